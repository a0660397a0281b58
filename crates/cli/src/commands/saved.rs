use couponkit_core::domain::coupon::CouponId;
use couponkit_core::domain::user::UserId;

use crate::commands::{application_failure, build_service, execute, open_pool, CommandResult};

pub fn save(user: String, coupon_id: String) -> CommandResult {
    execute("save", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result =
            service.save_coupon_to_user(&UserId(user.clone()), &CouponId(coupon_id.clone())).await;
        pool.close().await;

        let outcome = result.map_err(|error| application_failure("save", error))?;
        let message = if outcome.already_saved {
            format!("{coupon_id} was already saved for {user}")
        } else {
            format!("saved {coupon_id} for {user}")
        };
        Ok(CommandResult::success_with_data("save", message, &outcome))
    })
}

pub fn saved(user: String) -> CommandResult {
    execute("saved", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result = service.user_saved_coupons(&UserId(user.clone())).await;
        pool.close().await;

        let saved = result.map_err(|error| application_failure("saved", error))?;
        Ok(CommandResult::success_with_data(
            "saved",
            format!("{} saved coupon(s) for {user}", saved.len()),
            &saved,
        ))
    })
}

/// Coupons the user could currently claim, by account age.
pub fn available(user: String) -> CommandResult {
    execute("available", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result = service.user_coupons(&UserId(user.clone())).await;
        pool.close().await;

        let coupons = result.map_err(|error| application_failure("available", error))?;
        Ok(CommandResult::success_with_data(
            "available",
            format!("{} coupon(s) available to {user}", coupons.len()),
            &coupons,
        ))
    })
}
