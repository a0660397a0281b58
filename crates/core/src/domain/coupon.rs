use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::user::UserId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CouponId(pub String);

impl CouponId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for CouponId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscountType {
    Percentage,
    Fixed,
}

impl DiscountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Percentage => "percentage",
            Self::Fixed => "fixed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "percentage" => Some(Self::Percentage),
            "fixed" => Some(Self::Fixed),
            _ => None,
        }
    }
}

/// Account-age bucket a coupon is restricted to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    New,
    Loyal,
    All,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Loyal => "loyal",
            Self::All => "all",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "loyal" => Some(Self::Loyal),
            "all" => Some(Self::All),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub id: CouponId,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_purchase: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub user_type: UserType,
    pub description: String,
    pub usage_limit: Option<u32>,
    pub usage_count: u32,
    pub is_active: bool,
    pub products: Vec<String>,
    pub categories: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    /// Builds the stored record for a new coupon: uppercased code, zeroed usage, both
    /// timestamps stamped with `now`.
    pub fn from_new(id: CouponId, new: NewCoupon, now: DateTime<Utc>) -> Self {
        Self {
            id,
            code: normalize_code(&new.code),
            discount_type: new.discount_type,
            value: new.value,
            min_purchase: new.min_purchase,
            max_discount: new.max_discount,
            start_date: new.start_date,
            end_date: new.end_date,
            user_type: new.user_type,
            description: new.description,
            usage_limit: new.usage_limit,
            usage_count: 0,
            is_active: new.is_active,
            products: new.products,
            categories: new.categories,
            created_at: now,
            updated_at: now,
        }
    }

    /// A limit of zero is treated as "no limit".
    pub fn effective_usage_limit(&self) -> Option<u32> {
        self.usage_limit.filter(|limit| *limit > 0)
    }

    pub fn usage_exhausted(&self) -> bool {
        self.effective_usage_limit().is_some_and(|limit| self.usage_count >= limit)
    }

    pub fn within_window(&self, now: DateTime<Utc>) -> bool {
        now >= self.start_date && now <= self.end_date
    }

    pub fn apply_patch(&mut self, patch: CouponPatch, now: DateTime<Utc>) {
        if let Some(code) = patch.code {
            self.code = normalize_code(&code);
        }
        if let Some(discount_type) = patch.discount_type {
            self.discount_type = discount_type;
        }
        if let Some(value) = patch.value {
            self.value = value;
        }
        if let Some(min_purchase) = patch.min_purchase {
            self.min_purchase = min_purchase;
        }
        if let Some(max_discount) = patch.max_discount {
            self.max_discount = max_discount;
        }
        if let Some(start_date) = patch.start_date {
            self.start_date = start_date;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(user_type) = patch.user_type {
            self.user_type = user_type;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(usage_limit) = patch.usage_limit {
            self.usage_limit = usage_limit;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        if let Some(products) = patch.products {
            self.products = products;
        }
        if let Some(categories) = patch.categories {
            self.categories = categories;
        }
        self.updated_at = now;
    }
}

/// Admin input for a coupon that does not exist yet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewCoupon {
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_purchase: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub user_type: UserType,
    pub description: String,
    pub usage_limit: Option<u32>,
    pub is_active: bool,
    pub products: Vec<String>,
    pub categories: Vec<String>,
}

/// Partial update. Outer `None` leaves a field untouched; for optional fields an inner
/// `None` clears the value.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponPatch {
    pub code: Option<String>,
    pub discount_type: Option<DiscountType>,
    pub value: Option<Decimal>,
    pub min_purchase: Option<Option<Decimal>>,
    pub max_discount: Option<Option<Decimal>>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub user_type: Option<UserType>,
    pub description: Option<String>,
    pub usage_limit: Option<Option<u32>>,
    pub is_active: Option<bool>,
    pub products: Option<Vec<String>>,
    pub categories: Option<Vec<String>>,
}

impl CouponPatch {
    pub fn normalized_code(&self) -> Option<String> {
        self.code.as_deref().map(normalize_code)
    }
}

/// Result of one successful application; never persisted on its own.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon_id: CouponId,
    pub code: String,
    pub discount_amount: Decimal,
    pub discount_type: DiscountType,
}

/// Per-user denormalized copy of a coupon taken at claim time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCoupon {
    pub user_id: UserId,
    pub coupon_id: CouponId,
    pub code: String,
    pub discount_type: DiscountType,
    pub value: Decimal,
    pub min_purchase: Option<Decimal>,
    pub max_discount: Option<Decimal>,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub description: String,
    pub user_type: UserType,
    pub is_active: bool,
    pub acquired_at: DateTime<Utc>,
}

impl SavedCoupon {
    pub fn snapshot(user_id: UserId, coupon: &Coupon, acquired_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            coupon_id: coupon.id.clone(),
            code: coupon.code.clone(),
            discount_type: coupon.discount_type,
            value: coupon.value,
            min_purchase: coupon.min_purchase,
            max_discount: coupon.max_discount,
            start_date: coupon.start_date,
            end_date: coupon.end_date,
            description: coupon.description.clone(),
            user_type: coupon.user_type,
            is_active: coupon.is_active,
            acquired_at,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub success: bool,
    pub already_saved: bool,
}

pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use super::{normalize_code, Coupon, CouponId, CouponPatch, DiscountType, NewCoupon, UserType};

    fn new_coupon() -> NewCoupon {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().expect("valid date");
        NewCoupon {
            code: " spring20 ".to_string(),
            discount_type: DiscountType::Percentage,
            value: Decimal::new(20, 0),
            min_purchase: None,
            max_discount: None,
            start_date: start,
            end_date: start + Duration::days(30),
            user_type: UserType::All,
            description: "Spring sale".to_string(),
            usage_limit: Some(0),
            is_active: true,
            products: vec![],
            categories: vec![],
        }
    }

    #[test]
    fn from_new_uppercases_code_and_zeroes_usage() {
        let now = Utc::now();
        let coupon = Coupon::from_new(CouponId("c-1".to_string()), new_coupon(), now);

        assert_eq!(coupon.code, "SPRING20");
        assert_eq!(coupon.usage_count, 0);
        assert_eq!(coupon.created_at, now);
        assert_eq!(coupon.updated_at, now);
    }

    #[test]
    fn zero_usage_limit_means_unlimited() {
        let mut coupon = Coupon::from_new(CouponId("c-1".to_string()), new_coupon(), Utc::now());
        coupon.usage_count = 1_000;
        assert!(!coupon.usage_exhausted());

        coupon.usage_limit = Some(1_000);
        assert!(coupon.usage_exhausted());
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let coupon = Coupon::from_new(CouponId("c-1".to_string()), new_coupon(), Utc::now());

        assert!(coupon.within_window(coupon.start_date));
        assert!(coupon.within_window(coupon.end_date));
        assert!(!coupon.within_window(coupon.end_date + Duration::seconds(1)));
        assert!(!coupon.within_window(coupon.start_date - Duration::seconds(1)));
    }

    #[test]
    fn patch_clears_optional_fields_and_stamps_updated_at() {
        let created = Utc::now();
        let mut coupon = Coupon::from_new(CouponId("c-1".to_string()), new_coupon(), created);
        coupon.max_discount = Some(Decimal::new(15, 0));

        let later = created + Duration::minutes(5);
        coupon.apply_patch(
            CouponPatch {
                code: Some("summer".to_string()),
                max_discount: Some(None),
                ..CouponPatch::default()
            },
            later,
        );

        assert_eq!(coupon.code, "SUMMER");
        assert_eq!(coupon.max_discount, None);
        assert_eq!(coupon.updated_at, later);
        assert_eq!(coupon.created_at, created);
    }

    #[test]
    fn normalize_code_trims_and_uppercases() {
        assert_eq!(normalize_code("  welcome-10 "), "WELCOME-10");
    }
}
