use couponkit_db::{CouponSeedInfo, DemoSeedDataset};

use crate::commands::{execute, open_pool, CommandResult, EXIT_COMMAND, EXIT_MIGRATION};

/// Loads the demo dataset. With `reset`, previously seeded rows are removed first so
/// usage counts and wallets start fresh.
pub fn run(reset: bool) -> CommandResult {
    execute("seed", move |config| async move {
        let pool = open_pool(&config).await?;

        if reset {
            DemoSeedDataset::clean(&pool)
                .await
                .map_err(|error| ("seed_reset", error.to_string(), EXIT_MIGRATION))?;
        }

        let seed_result = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), EXIT_MIGRATION))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), EXIT_COMMAND))?;

        pool.close().await;

        if !verification.all_present {
            let failed_checks = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            return Err(("seed_verification", verification_message(&failed_checks), EXIT_COMMAND));
        }

        Ok(CommandResult::success(
            "seed",
            summary(&seed_result.coupons_seeded, &seed_result.users_seeded),
        ))
    })
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

fn summary(coupons: &[CouponSeedInfo], users: &[&str]) -> String {
    let coupon_lines =
        coupons.iter().map(|c| format!("  - {}: {} ({})", c.code, c.id, c.description));
    let mut lines = vec![format!("demo dataset loaded: {} coupons, {} users", coupons.len(), users.len())];
    lines.extend(coupon_lines);
    lines.push(format!("  users: {}", users.join(", ")));
    lines.join("\n")
}
