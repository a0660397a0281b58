use sqlx::{sqlite::SqliteRow, Row};

use couponkit_core::domain::coupon::{CouponId, DiscountType, SavedCoupon, UserType};
use couponkit_core::domain::user::UserId;

use super::{
    decode_error, format_timestamp, parse_decimal, parse_optional_decimal, parse_timestamp,
    RepositoryError, SavedCouponRepository,
};
use crate::DbPool;

pub struct SqlSavedCouponRepository {
    pool: DbPool,
}

impl SqlSavedCouponRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_saved(row: &SqliteRow) -> Result<SavedCoupon, RepositoryError> {
    let user_id: String = row.try_get("user_id").map_err(decode_error)?;
    let coupon_id: String = row.try_get("coupon_id").map_err(decode_error)?;
    let code: String = row.try_get("code").map_err(decode_error)?;
    let discount_type_str: String = row.try_get("discount_type").map_err(decode_error)?;
    let value_str: String = row.try_get("value").map_err(decode_error)?;
    let min_purchase_str: Option<String> = row.try_get("min_purchase").map_err(decode_error)?;
    let max_discount_str: Option<String> = row.try_get("max_discount").map_err(decode_error)?;
    let start_date_str: String = row.try_get("start_date").map_err(decode_error)?;
    let end_date_str: String = row.try_get("end_date").map_err(decode_error)?;
    let description: String = row.try_get("description").map_err(decode_error)?;
    let user_type_str: String = row.try_get("user_type").map_err(decode_error)?;
    let is_active: bool = row.try_get("is_active").map_err(decode_error)?;
    let acquired_at_str: String = row.try_get("acquired_at").map_err(decode_error)?;

    let discount_type = DiscountType::parse(&discount_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown discount_type `{discount_type_str}`"))
    })?;

    Ok(SavedCoupon {
        user_id: UserId(user_id),
        coupon_id: CouponId(coupon_id),
        code,
        discount_type,
        value: parse_decimal("value", &value_str)?,
        min_purchase: parse_optional_decimal("min_purchase", min_purchase_str)?,
        max_discount: parse_optional_decimal("max_discount", max_discount_str)?,
        start_date: parse_timestamp("start_date", &start_date_str)?,
        end_date: parse_timestamp("end_date", &end_date_str)?,
        description,
        // The column is unconstrained; an unrecognised value means open to everyone.
        user_type: UserType::parse(&user_type_str).unwrap_or(UserType::All),
        is_active,
        acquired_at: parse_timestamp("acquired_at", &acquired_at_str)?,
    })
}

#[async_trait::async_trait]
impl SavedCouponRepository for SqlSavedCouponRepository {
    async fn save_for_user(&self, saved: SavedCoupon) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "INSERT INTO saved_coupon (user_id, coupon_id, code, discount_type, value,
                                       min_purchase, max_discount, start_date, end_date,
                                       description, user_type, is_active, acquired_at,
                                       acquired_at_micros)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(user_id, coupon_id) DO NOTHING",
        )
        .bind(&saved.user_id.0)
        .bind(&saved.coupon_id.0)
        .bind(&saved.code)
        .bind(saved.discount_type.as_str())
        .bind(saved.value.to_string())
        .bind(saved.min_purchase.map(|value| value.to_string()))
        .bind(saved.max_discount.map(|value| value.to_string()))
        .bind(format_timestamp(saved.start_date))
        .bind(format_timestamp(saved.end_date))
        .bind(&saved.description)
        .bind(saved.user_type.as_str())
        .bind(saved.is_active)
        .bind(format_timestamp(saved.acquired_at))
        .bind(saved.acquired_at.timestamp_micros())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<SavedCoupon>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(
            "SELECT user_id, coupon_id, code, discount_type, value, min_purchase, max_discount,
                    start_date, end_date, description, user_type, is_active, acquired_at
             FROM saved_coupon
             WHERE user_id = ?
             ORDER BY acquired_at_micros DESC, coupon_id DESC",
        )
        .bind(&user_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_saved).collect::<Result<Vec<_>, _>>()
    }
}
