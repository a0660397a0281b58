use crate::commands::{execute, open_pool, CommandResult};

pub fn run() -> CommandResult {
    execute("migrate", move |config| async move {
        let pool = open_pool(&config).await?;
        pool.close().await;
        Ok(CommandResult::success("migrate", "applied pending migrations"))
    })
}
