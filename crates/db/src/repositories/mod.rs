use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use couponkit_core::domain::coupon::{Coupon, CouponId, CouponPatch, SavedCoupon, UserType};
use couponkit_core::domain::user::{UserAccount, UserId};

pub mod coupon;
pub mod memory;
pub mod saved_coupon;
pub mod user;

pub use coupon::SqlCouponRepository;
pub use memory::{InMemoryCouponRepository, InMemorySavedCouponRepository, InMemoryUserDirectory};
pub use saved_coupon::SqlSavedCouponRepository;
pub use user::SqlUserDirectory;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("coupon code `{code}` already exists")]
    DuplicateCode { code: String },
    #[error("record not found: {0}")]
    NotFound(String),
}

/// Position after the last coupon of a page, in `created_at DESC, id DESC` order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageCursor {
    pub created_at_micros: i64,
    pub id: String,
}

impl PageCursor {
    pub fn after(coupon: &Coupon) -> Self {
        Self { created_at_micros: coupon.created_at.timestamp_micros(), id: coupon.id.0.clone() }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.created_at_micros, self.id)
    }

    pub fn parse(token: &str) -> Result<Self, RepositoryError> {
        let (micros, id) = token
            .split_once(':')
            .ok_or_else(|| RepositoryError::Decode(format!("malformed page cursor `{token}`")))?;
        let created_at_micros = micros
            .parse::<i64>()
            .map_err(|_| RepositoryError::Decode(format!("malformed page cursor `{token}`")))?;
        if id.is_empty() {
            return Err(RepositoryError::Decode(format!("malformed page cursor `{token}`")));
        }
        Ok(Self { created_at_micros, id: id.to_string() })
    }

    /// True when `coupon` sorts strictly after this cursor.
    pub fn precedes(&self, coupon: &Coupon) -> bool {
        let micros = coupon.created_at.timestamp_micros();
        micros < self.created_at_micros
            || (micros == self.created_at_micros && coupon.id.0 < self.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponListQuery {
    pub cursor: Option<PageCursor>,
    pub page_size: u32,
    pub is_active: Option<bool>,
    pub user_type: Option<UserType>,
}

impl Default for CouponListQuery {
    fn default() -> Self {
        Self { cursor: None, page_size: 20, is_active: None, user_type: None }
    }
}

impl CouponListQuery {
    pub fn matches(&self, coupon: &Coupon) -> bool {
        self.is_active.map_or(true, |active| coupon.is_active == active)
            && self.user_type.map_or(true, |user_type| coupon.user_type == user_type)
            && self.cursor.as_ref().map_or(true, |cursor| cursor.precedes(coupon))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CouponPage {
    pub coupons: Vec<Coupon>,
    pub next_cursor: Option<PageCursor>,
    pub has_more: bool,
}

impl CouponPage {
    /// `has_more` only says the page was full; the next page may still be empty.
    pub fn from_rows(coupons: Vec<Coupon>, page_size: u32) -> Self {
        let has_more = coupons.len() >= page_size as usize;
        let next_cursor = coupons.last().map(PageCursor::after);
        Self { coupons, next_cursor, has_more }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedeemOutcome {
    Redeemed { usage_count: u32 },
    LimitReached,
    Missing,
}

#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Inserts a new coupon, rejecting a code that is already taken.
    async fn create(&self, coupon: Coupon) -> Result<CouponId, RepositoryError>;

    async fn update(
        &self,
        id: &CouponId,
        patch: CouponPatch,
        now: DateTime<Utc>,
    ) -> Result<Coupon, RepositoryError>;

    /// Returns whether a row was removed. Saved copies are left alone.
    async fn delete(&self, id: &CouponId) -> Result<bool, RepositoryError>;

    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError>;

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError>;

    async fn list(&self, query: CouponListQuery) -> Result<CouponPage, RepositoryError>;

    /// Active coupons whose end date is still ahead of `now`.
    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, RepositoryError>;

    /// Consumes one use if the limit allows it, as a single conditional write.
    async fn redeem(
        &self,
        id: &CouponId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError>;
}

#[async_trait]
pub trait SavedCouponRepository: Send + Sync {
    /// Returns `false` when the user already holds a copy of this coupon.
    async fn save_for_user(&self, saved: SavedCoupon) -> Result<bool, RepositoryError>;

    /// Newest acquisition first.
    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<SavedCoupon>, RepositoryError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError>;
    async fn save_user(&self, user: UserAccount) -> Result<(), RepositoryError>;
}

pub(crate) fn decode_error(error: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(error.to_string())
}

/// Fixed-width RFC3339 so stored timestamps also compare correctly as text.
pub(crate) fn format_timestamp(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| RepositoryError::Decode(format!("invalid timestamp for {field}: {error}")))
}

pub(crate) fn parse_decimal(field: &str, value: &str) -> Result<Decimal, RepositoryError> {
    Decimal::from_str(value)
        .map_err(|error| RepositoryError::Decode(format!("invalid decimal value for {field}: {error}")))
}

pub(crate) fn parse_optional_decimal(
    field: &str,
    value: Option<String>,
) -> Result<Option<Decimal>, RepositoryError> {
    value.map(|value| parse_decimal(field, &value)).transpose()
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}
