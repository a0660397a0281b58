//! Ordered, fail-fast eligibility checks for applying a coupon to a cart.
//!
//! The order is part of the contract: a cart that fails the product allow-list never
//! reaches the category check, and the user record is only consulted once every
//! coupon-local rule has passed.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::coupon::{Coupon, UserType};
use crate::domain::user::UserAccount;

/// Why a code could not be applied. `Display` is the user-facing message and is kept
/// stable; `kind()` is the machine-readable discriminant.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CouponRejection {
    #[error("Invalid coupon code")]
    NotFound,
    #[error("This coupon is no longer active")]
    Inactive,
    #[error("This coupon is expired or not yet active")]
    Expired,
    #[error("This coupon has reached its usage limit")]
    UsageLimitReached,
    #[error("Minimum purchase amount of ${required:.2} required")]
    BelowMinimumPurchase { required: Decimal },
    #[error("This coupon is not valid for the selected products")]
    ProductNotEligible,
    #[error("This coupon is not valid for the selected product categories")]
    CategoryNotEligible,
    #[error("User not found")]
    UserNotFound,
    #[error("{}", user_type_message(.required))]
    UserTypeNotEligible { required: UserType },
}

impl CouponRejection {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Inactive => "inactive",
            Self::Expired => "expired",
            Self::UsageLimitReached => "usage_limit_reached",
            Self::BelowMinimumPurchase { .. } => "below_minimum_purchase",
            Self::ProductNotEligible => "product_not_eligible",
            Self::CategoryNotEligible => "category_not_eligible",
            Self::UserNotFound => "user_not_found",
            Self::UserTypeNotEligible { .. } => "user_type_not_eligible",
        }
    }
}

fn user_type_message(required: &UserType) -> &'static str {
    match required {
        UserType::New => "This coupon is only valid for new members",
        UserType::Loyal => "This coupon is only valid for long-term members",
        UserType::All => "This coupon is not available for this account",
    }
}

/// The cart-side inputs of a single application attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartContext {
    pub subtotal: Decimal,
    pub product_ids: Vec<String>,
    pub category_ids: Vec<String>,
}

type CouponCheck = fn(&Coupon, &CartContext, DateTime<Utc>) -> Result<(), CouponRejection>;

const COUPON_CHECKS: [CouponCheck; 6] = [
    check_active,
    check_window,
    check_usage,
    check_minimum_purchase,
    check_products,
    check_categories,
];

/// Runs every coupon-local check in order and stops at the first failure.
pub fn check_coupon(
    coupon: &Coupon,
    cart: &CartContext,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    COUPON_CHECKS.iter().try_for_each(|check| check(coupon, cart, now))
}

pub fn requires_user_lookup(coupon: &Coupon) -> bool {
    coupon.user_type != UserType::All
}

/// Final check. `user` is whatever the directory returned; it is ignored for
/// coupons open to everyone.
pub fn check_user(
    coupon: &Coupon,
    user: Option<&UserAccount>,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if !requires_user_lookup(coupon) {
        return Ok(());
    }

    let Some(user) = user else {
        return Err(CouponRejection::UserNotFound);
    };

    if user.qualifies_for(coupon.user_type, now) {
        Ok(())
    } else {
        Err(CouponRejection::UserTypeNotEligible { required: coupon.user_type })
    }
}

/// The full pipeline over already-loaded inputs.
pub fn evaluate(
    coupon: Option<&Coupon>,
    cart: &CartContext,
    user: Option<&UserAccount>,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    let coupon = coupon.ok_or(CouponRejection::NotFound)?;
    check_coupon(coupon, cart, now)?;
    check_user(coupon, user, now)
}

fn check_active(coupon: &Coupon, _: &CartContext, _: DateTime<Utc>) -> Result<(), CouponRejection> {
    if coupon.is_active {
        Ok(())
    } else {
        Err(CouponRejection::Inactive)
    }
}

fn check_window(
    coupon: &Coupon,
    _: &CartContext,
    now: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if coupon.within_window(now) {
        Ok(())
    } else {
        Err(CouponRejection::Expired)
    }
}

fn check_usage(coupon: &Coupon, _: &CartContext, _: DateTime<Utc>) -> Result<(), CouponRejection> {
    if coupon.usage_exhausted() {
        Err(CouponRejection::UsageLimitReached)
    } else {
        Ok(())
    }
}

fn check_minimum_purchase(
    coupon: &Coupon,
    cart: &CartContext,
    _: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    match coupon.min_purchase.filter(|minimum| *minimum > Decimal::ZERO) {
        Some(required) if cart.subtotal < required => {
            Err(CouponRejection::BelowMinimumPurchase { required })
        }
        _ => Ok(()),
    }
}

fn check_products(
    coupon: &Coupon,
    cart: &CartContext,
    _: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if intersects_allow_list(&coupon.products, &cart.product_ids) {
        Ok(())
    } else {
        Err(CouponRejection::ProductNotEligible)
    }
}

fn check_categories(
    coupon: &Coupon,
    cart: &CartContext,
    _: DateTime<Utc>,
) -> Result<(), CouponRejection> {
    if intersects_allow_list(&coupon.categories, &cart.category_ids) {
        Ok(())
    } else {
        Err(CouponRejection::CategoryNotEligible)
    }
}

/// Empty allow-list means unrestricted.
fn intersects_allow_list(allowed: &[String], cart: &[String]) -> bool {
    allowed.is_empty() || cart.iter().any(|id| allowed.contains(id))
}
