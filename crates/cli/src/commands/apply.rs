use clap::Args;
use couponkit_core::coupons::eligibility::CartContext;
use couponkit_core::domain::user::UserId;
use rust_decimal::Decimal;

use crate::commands::{
    application_failure, build_service, execute, open_pool, split_list, CommandResult,
};

#[derive(Debug, Clone, Args)]
pub struct ApplyArgs {
    pub code: String,
    #[arg(long)]
    pub user: String,
    #[arg(long)]
    pub subtotal: Decimal,
    #[arg(long = "product", help = "Product id in the cart (repeatable or comma separated)")]
    pub products: Vec<String>,
    #[arg(long = "category", help = "Category id in the cart (repeatable or comma separated)")]
    pub categories: Vec<String>,
}

impl ApplyArgs {
    pub fn cart(&self) -> CartContext {
        CartContext {
            subtotal: self.subtotal,
            product_ids: split_list(&self.products),
            category_ids: split_list(&self.categories),
        }
    }
}

/// Applies a code to a cart. A successful run consumes one use of the coupon.
pub fn run(args: ApplyArgs) -> CommandResult {
    execute("apply", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result =
            service.apply_coupon(&args.code, &UserId(args.user.clone()), &args.cart()).await;
        pool.close().await;

        let applied = result.map_err(|error| application_failure("apply", error))?;
        Ok(CommandResult::success_with_data(
            "apply",
            format!("{} saves {} on {}", applied.code, applied.discount_amount, args.subtotal),
            &applied,
        ))
    })
}
