use chrono::{DateTime, Duration, Utc};
use clap::Args;
use couponkit_core::coupons::codegen::CodeOptions;
use couponkit_core::domain::coupon::{
    normalize_code, CouponId, CouponPatch, DiscountType, NewCoupon, UserType,
};
use rust_decimal::Decimal;
use serde::Serialize;

use crate::commands::generate::parse_discount_type;
use crate::commands::{
    application_failure, build_service, execute, open_pool, split_list, CommandFailure,
    CommandResult, EXIT_COMMAND,
};

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[arg(long, help = "Coupon code; generated when omitted")]
    pub code: Option<String>,
    #[arg(long, default_value = "", help = "Prefix for a generated code")]
    pub prefix: String,
    #[arg(long = "type", default_value = "percentage", value_parser = parse_discount_type)]
    pub discount_type: DiscountType,
    #[arg(long)]
    pub value: Decimal,
    #[arg(long)]
    pub min_purchase: Option<Decimal>,
    #[arg(long)]
    pub max_discount: Option<Decimal>,
    #[arg(long, help = "RFC 3339 start; defaults to now")]
    pub start: Option<DateTime<Utc>>,
    #[arg(long, help = "RFC 3339 end; defaults to start plus --days")]
    pub end: Option<DateTime<Utc>>,
    #[arg(long, default_value_t = 30)]
    pub days: i64,
    #[arg(long, default_value = "all", value_parser = parse_user_type)]
    pub user_type: UserType,
    #[arg(long, default_value = "")]
    pub description: String,
    #[arg(long)]
    pub usage_limit: Option<u32>,
    #[arg(long, help = "Create the coupon deactivated")]
    pub inactive: bool,
    #[arg(long = "product", help = "Eligible product id (repeatable or comma separated)")]
    pub products: Vec<String>,
    #[arg(long = "category", help = "Eligible category id (repeatable or comma separated)")]
    pub categories: Vec<String>,
}

impl CreateArgs {
    fn into_new_coupon(self, code: String, now: DateTime<Utc>) -> Result<NewCoupon, CommandFailure> {
        let start_date = self.start.unwrap_or(now);
        let end_date = match self.end {
            Some(end) => end,
            None => Duration::try_days(self.days)
                .and_then(|window| start_date.checked_add_signed(window))
                .ok_or_else(|| {
                    (
                        "invalid_request",
                        format!("--days {} puts the end date out of range", self.days),
                        EXIT_COMMAND,
                    )
                })?,
        };
        Ok(NewCoupon {
            code,
            discount_type: self.discount_type,
            value: self.value,
            min_purchase: self.min_purchase,
            max_discount: self.max_discount,
            start_date,
            end_date,
            user_type: self.user_type,
            description: self.description,
            usage_limit: self.usage_limit,
            is_active: !self.inactive,
            products: split_list(&self.products),
            categories: split_list(&self.categories),
        })
    }
}

#[derive(Debug, Clone, Default, Args)]
pub struct UpdateArgs {
    pub id: String,
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long = "type", value_parser = parse_discount_type)]
    pub discount_type: Option<DiscountType>,
    #[arg(long)]
    pub value: Option<Decimal>,
    #[arg(long, conflicts_with = "clear_min_purchase")]
    pub min_purchase: Option<Decimal>,
    #[arg(long)]
    pub clear_min_purchase: bool,
    #[arg(long, conflicts_with = "clear_max_discount")]
    pub max_discount: Option<Decimal>,
    #[arg(long)]
    pub clear_max_discount: bool,
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,
    #[arg(long, value_parser = parse_user_type)]
    pub user_type: Option<UserType>,
    #[arg(long)]
    pub description: Option<String>,
    #[arg(long, conflicts_with = "clear_usage_limit")]
    pub usage_limit: Option<u32>,
    #[arg(long)]
    pub clear_usage_limit: bool,
    #[arg(long)]
    pub active: Option<bool>,
    #[arg(long = "product")]
    pub products: Vec<String>,
    #[arg(long)]
    pub clear_products: bool,
    #[arg(long = "category")]
    pub categories: Vec<String>,
    #[arg(long)]
    pub clear_categories: bool,
}

impl UpdateArgs {
    pub fn patch(&self) -> CouponPatch {
        CouponPatch {
            code: self.code.clone(),
            discount_type: self.discount_type,
            value: self.value,
            min_purchase: optional_field(self.min_purchase, self.clear_min_purchase),
            max_discount: optional_field(self.max_discount, self.clear_max_discount),
            start_date: self.start,
            end_date: self.end,
            user_type: self.user_type,
            description: self.description.clone(),
            usage_limit: optional_field(self.usage_limit, self.clear_usage_limit),
            is_active: self.active,
            products: list_field(&self.products, self.clear_products),
            categories: list_field(&self.categories, self.clear_categories),
        }
    }
}

fn optional_field<T>(value: Option<T>, clear: bool) -> Option<Option<T>> {
    if clear {
        Some(None)
    } else {
        value.map(Some)
    }
}

fn list_field(values: &[String], clear: bool) -> Option<Vec<String>> {
    if clear {
        Some(Vec::new())
    } else if values.is_empty() {
        None
    } else {
        Some(split_list(values))
    }
}

pub(crate) fn parse_user_type(value: &str) -> Result<UserType, String> {
    UserType::parse(value).ok_or_else(|| format!("`{value}` is not one of new|loyal|all"))
}

#[derive(Debug, Serialize)]
struct CreatedCoupon {
    id: CouponId,
    code: String,
}

pub fn create(args: CreateArgs) -> CommandResult {
    execute("create", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let code = match args.code.clone() {
            Some(code) => code,
            None => {
                let options = CodeOptions { prefix: args.prefix.clone(), ..CodeOptions::default() };
                service.generate_coupon_code(options).await.code
            }
        };
        let new = args.into_new_coupon(code, Utc::now())?;
        let code = normalize_code(&new.code);

        let result = service.create_coupon(new).await;
        pool.close().await;

        let id = result.map_err(|error| application_failure("create", error))?;
        Ok(CommandResult::success_with_data(
            "create",
            format!("created coupon {code}"),
            &CreatedCoupon { id, code },
        ))
    })
}

pub fn update(args: UpdateArgs) -> CommandResult {
    execute("update", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result = service.update_coupon(&CouponId(args.id.clone()), args.patch()).await;
        pool.close().await;

        let coupon = result.map_err(|error| application_failure("update", error))?;
        Ok(CommandResult::success_with_data(
            "update",
            format!("updated coupon {}", coupon.code),
            &coupon,
        ))
    })
}

pub fn delete(id: String) -> CommandResult {
    execute("delete", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let result = service.delete_coupon(&CouponId(id.clone())).await;
        pool.close().await;

        result.map_err(|error| application_failure("delete", error))?;
        Ok(CommandResult::success("delete", format!("deleted coupon {id}")))
    })
}

/// Looks a coupon up by id, falling back to its code.
pub fn show(key: String) -> CommandResult {
    execute("show", move |config| async move {
        let pool = open_pool(&config).await?;
        let service = build_service(&config, &pool)?;

        let by_id = service.get_coupon(&CouponId(key.clone())).await;
        let found = match by_id {
            Ok(Some(coupon)) => Ok(Some(coupon)),
            Ok(None) => service.get_coupon_by_code(&key).await,
            Err(error) => Err(error),
        };
        pool.close().await;

        match found.map_err(|error| application_failure("show", error))? {
            Some(coupon) => Ok(CommandResult::success_with_data(
                "show",
                format!("coupon {}", coupon.code),
                &coupon,
            )),
            None => Err(("not_found", "Coupon not found".to_string(), EXIT_COMMAND)),
        }
    })
}
