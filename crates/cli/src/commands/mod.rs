pub mod apply;
pub mod config;
pub mod coupon;
pub mod generate;
pub mod list;
pub mod migrate;
pub mod saved;
pub mod seed;

use std::future::Future;
use std::sync::Arc;

use couponkit_core::config::{AppConfig, LoadOptions};
use couponkit_core::errors::ApplicationError;
use couponkit_db::{
    connect_with_settings, migrations, DbPool, SqlCouponRepository, SqlSavedCouponRepository,
    SqlUserDirectory,
};
use couponkit_service::{CouponService, CouponSettings, SystemClock};
use serde::Serialize;

pub const EXIT_CONFIG: u8 = 2;
pub const EXIT_RUNTIME: u8 = 3;
pub const EXIT_DB: u8 = 4;
pub const EXIT_MIGRATION: u8 = 5;
pub const EXIT_COMMAND: u8 = 6;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
}

/// `(error_class, message, exit_code)`
pub type CommandFailure = (&'static str, String, u8);

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        Self::ok_payload(command, message.into(), None)
    }

    pub fn success_with_data(
        command: &str,
        message: impl Into<String>,
        data: &impl Serialize,
    ) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::ok_payload(command, message.into(), Some(value)),
            Err(error) => Self::failure(command, "serialization", error.to_string(), EXIT_COMMAND),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }

    fn ok_payload(command: &str, message: String, data: Option<serde_json::Value>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message,
            data,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}

/// Loads config, starts a current-thread runtime and drives `work` to completion.
/// Config and runtime failures short-circuit with their own exit codes.
pub fn execute<F, Fut>(command: &'static str, work: F) -> CommandResult
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: Future<Output = Result<CommandResult, CommandFailure>>,
{
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                command,
                "config_validation",
                format!("configuration issue: {error}"),
                EXIT_CONFIG,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                EXIT_RUNTIME,
            );
        }
    };

    match runtime.block_on(work(config)) {
        Ok(result) => result,
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

/// Connects and brings the schema up to date.
pub async fn open_pool(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| ("db_connectivity", error.to_string(), EXIT_DB))?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| ("migration", error.to_string(), EXIT_MIGRATION))?;

    Ok(pool)
}

pub fn build_service(config: &AppConfig, pool: &DbPool) -> Result<CouponService, CommandFailure> {
    let settings = CouponSettings::try_from(&config.coupons)
        .map_err(|error| application_failure("build_service", error))?;
    Ok(CouponService::new(
        Arc::new(SqlCouponRepository::new(pool.clone())),
        Arc::new(SqlSavedCouponRepository::new(pool.clone())),
        Arc::new(SqlUserDirectory::new(pool.clone())),
        config.coupons.code_generator(),
        Arc::new(SystemClock),
        settings,
    ))
}

/// Maps a service error to the command's failure triple. Eligibility rejections keep
/// their machine-readable kind as the error class.
pub fn application_failure(command: &str, error: ApplicationError) -> CommandFailure {
    let (error_class, exit_code) = match error.rejection() {
        Some(rejection) => (rejection.kind(), EXIT_COMMAND),
        None => match &error {
            ApplicationError::Domain(_) => ("invalid_request", EXIT_COMMAND),
            ApplicationError::Persistence(_) => ("persistence", EXIT_COMMAND),
            ApplicationError::Configuration(_) => ("configuration", EXIT_CONFIG),
        },
    };
    let interface = error.into_interface(format!("cli-{command}"));
    (error_class, interface.user_message().to_string(), exit_code)
}

pub(crate) fn split_list(values: &[String]) -> Vec<String> {
    values
        .iter()
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .collect()
}
