use clap::Args;
use couponkit_core::domain::coupon::{Coupon, UserType};
use couponkit_service::CouponFilter;
use serde::Serialize;

use crate::commands::coupon::parse_user_type;
use crate::commands::{application_failure, build_service, execute, open_pool, CommandResult};

#[derive(Debug, Clone, Default, Args)]
pub struct ListArgs {
    #[arg(long, help = "Cursor returned by the previous page")]
    pub cursor: Option<String>,
    #[arg(long)]
    pub page_size: Option<u32>,
    #[arg(long)]
    pub active: Option<bool>,
    #[arg(long, value_parser = parse_user_type)]
    pub user_type: Option<UserType>,
}

impl ListArgs {
    pub fn filter(&self) -> CouponFilter {
        CouponFilter {
            cursor: self.cursor.clone(),
            page_size: self.page_size,
            is_active: self.active,
            user_type: self.user_type,
        }
    }
}

#[derive(Debug, Serialize)]
struct PageView {
    coupons: Vec<Coupon>,
    next_cursor: Option<String>,
    has_more: bool,
}

pub fn run(args: ListArgs) -> CommandResult {
    execute("list", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result = service.list_coupons(args.filter()).await;
        pool.close().await;

        let page = result.map_err(|error| application_failure("list", error))?;
        let view = PageView {
            next_cursor: page.next_cursor.as_ref().map(|cursor| cursor.encode()),
            has_more: page.has_more,
            coupons: page.coupons,
        };
        Ok(CommandResult::success_with_data(
            "list",
            format!("{} coupon(s)", view.coupons.len()),
            &view,
        ))
    })
}
