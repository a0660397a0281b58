use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use couponkit_core::domain::coupon::{
    normalize_code, Coupon, CouponId, CouponPatch, DiscountType, UserType,
};

use super::{
    decode_error, format_timestamp, is_unique_violation, parse_decimal, parse_optional_decimal,
    parse_timestamp, CouponListQuery, CouponPage, CouponRepository, RedeemOutcome,
    RepositoryError,
};
use crate::DbPool;

const COUPON_COLUMNS: &str = "id, code, discount_type, value, min_purchase, max_discount,
    start_date, end_date, user_type, description, usage_limit, usage_count, is_active,
    products_json, categories_json, created_at, updated_at";

pub struct SqlCouponRepository {
    pool: DbPool,
}

impl SqlCouponRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_coupon(row: &SqliteRow) -> Result<Coupon, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_error)?;
    let code: String = row.try_get("code").map_err(decode_error)?;
    let discount_type_str: String = row.try_get("discount_type").map_err(decode_error)?;
    let value_str: String = row.try_get("value").map_err(decode_error)?;
    let min_purchase_str: Option<String> = row.try_get("min_purchase").map_err(decode_error)?;
    let max_discount_str: Option<String> = row.try_get("max_discount").map_err(decode_error)?;
    let start_date_str: String = row.try_get("start_date").map_err(decode_error)?;
    let end_date_str: String = row.try_get("end_date").map_err(decode_error)?;
    let user_type_str: String = row.try_get("user_type").map_err(decode_error)?;
    let description: String = row.try_get("description").map_err(decode_error)?;
    let usage_limit: Option<i64> = row.try_get("usage_limit").map_err(decode_error)?;
    let usage_count: i64 = row.try_get("usage_count").map_err(decode_error)?;
    let is_active: bool = row.try_get("is_active").map_err(decode_error)?;
    let products_json: String = row.try_get("products_json").map_err(decode_error)?;
    let categories_json: String = row.try_get("categories_json").map_err(decode_error)?;
    let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;
    let updated_at_str: String = row.try_get("updated_at").map_err(decode_error)?;

    let discount_type = DiscountType::parse(&discount_type_str).ok_or_else(|| {
        RepositoryError::Decode(format!("unknown discount_type `{discount_type_str}`"))
    })?;
    let user_type = UserType::parse(&user_type_str)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown user_type `{user_type_str}`")))?;

    Ok(Coupon {
        id: CouponId(id),
        code,
        discount_type,
        value: parse_decimal("value", &value_str)?,
        min_purchase: parse_optional_decimal("min_purchase", min_purchase_str)?,
        max_discount: parse_optional_decimal("max_discount", max_discount_str)?,
        start_date: parse_timestamp("start_date", &start_date_str)?,
        end_date: parse_timestamp("end_date", &end_date_str)?,
        user_type,
        description,
        usage_limit: usage_limit.map(|limit| u32::try_from(limit.max(0)).unwrap_or(u32::MAX)),
        usage_count: u32::try_from(usage_count.max(0)).unwrap_or(u32::MAX),
        is_active,
        products: serde_json::from_str(&products_json).map_err(decode_error)?,
        categories: serde_json::from_str(&categories_json).map_err(decode_error)?,
        created_at: parse_timestamp("created_at", &created_at_str)?,
        updated_at: parse_timestamp("updated_at", &updated_at_str)?,
    })
}

fn encode_ids(ids: &[String]) -> Result<String, RepositoryError> {
    serde_json::to_string(ids).map_err(decode_error)
}

async fn code_owner<'e, E>(executor: E, code: &str) -> Result<Option<String>, RepositoryError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let owner = sqlx::query_scalar::<_, String>("SELECT id FROM coupon WHERE code = ?")
        .bind(code)
        .fetch_optional(executor)
        .await?;
    Ok(owner)
}

#[async_trait::async_trait]
impl CouponRepository for SqlCouponRepository {
    async fn create(&self, coupon: Coupon) -> Result<CouponId, RepositoryError> {
        let code = normalize_code(&coupon.code);
        if code_owner(&self.pool, &code).await?.is_some() {
            return Err(RepositoryError::DuplicateCode { code });
        }

        let result = sqlx::query(
            "INSERT INTO coupon (id, code, discount_type, value, min_purchase, max_discount,
                                 start_date, end_date, user_type, description, usage_limit,
                                 usage_count, is_active, products_json, categories_json,
                                 created_at, created_at_micros, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&coupon.id.0)
        .bind(&code)
        .bind(coupon.discount_type.as_str())
        .bind(coupon.value.to_string())
        .bind(coupon.min_purchase.map(|value| value.to_string()))
        .bind(coupon.max_discount.map(|value| value.to_string()))
        .bind(format_timestamp(coupon.start_date))
        .bind(format_timestamp(coupon.end_date))
        .bind(coupon.user_type.as_str())
        .bind(&coupon.description)
        .bind(coupon.usage_limit.map(i64::from))
        .bind(i64::from(coupon.usage_count))
        .bind(coupon.is_active)
        .bind(encode_ids(&coupon.products)?)
        .bind(encode_ids(&coupon.categories)?)
        .bind(format_timestamp(coupon.created_at))
        .bind(coupon.created_at.timestamp_micros())
        .bind(format_timestamp(coupon.updated_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(coupon.id),
            Err(error) if is_unique_violation(&error) => {
                Err(RepositoryError::DuplicateCode { code })
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn update(
        &self,
        id: &CouponId,
        patch: CouponPatch,
        now: DateTime<Utc>,
    ) -> Result<Coupon, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupon WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&mut *tx)
            .await?;
        let mut coupon = match row {
            Some(ref row) => row_to_coupon(row)?,
            None => return Err(RepositoryError::NotFound(id.0.clone())),
        };

        if let Some(code) = patch.normalized_code() {
            if code_owner(&mut *tx, &code).await?.is_some_and(|owner| owner != id.0) {
                return Err(RepositoryError::DuplicateCode { code });
            }
        }

        coupon.apply_patch(patch, now);

        let result = sqlx::query(
            "UPDATE coupon SET
                 code = ?, discount_type = ?, value = ?, min_purchase = ?, max_discount = ?,
                 start_date = ?, end_date = ?, user_type = ?, description = ?, usage_limit = ?,
                 is_active = ?, products_json = ?, categories_json = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&coupon.code)
        .bind(coupon.discount_type.as_str())
        .bind(coupon.value.to_string())
        .bind(coupon.min_purchase.map(|value| value.to_string()))
        .bind(coupon.max_discount.map(|value| value.to_string()))
        .bind(format_timestamp(coupon.start_date))
        .bind(format_timestamp(coupon.end_date))
        .bind(coupon.user_type.as_str())
        .bind(&coupon.description)
        .bind(coupon.usage_limit.map(i64::from))
        .bind(coupon.is_active)
        .bind(encode_ids(&coupon.products)?)
        .bind(encode_ids(&coupon.categories)?)
        .bind(format_timestamp(coupon.updated_at))
        .bind(&id.0)
        .execute(&mut *tx)
        .await;

        match result {
            Ok(_) => {}
            Err(error) if is_unique_violation(&error) => {
                return Err(RepositoryError::DuplicateCode { code: coupon.code });
            }
            Err(error) => return Err(error.into()),
        }

        tx.commit().await?;
        Ok(coupon)
    }

    async fn delete(&self, id: &CouponId) -> Result<bool, RepositoryError> {
        let result =
            sqlx::query("DELETE FROM coupon WHERE id = ?").bind(&id.0).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupon WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_coupon(r)?)),
            None => Ok(None),
        }
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {COUPON_COLUMNS} FROM coupon WHERE code = ?"))
            .bind(normalize_code(code))
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_coupon(r)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, query: CouponListQuery) -> Result<CouponPage, RepositoryError> {
        let is_active = query.is_active.map(i64::from);
        let user_type = query.user_type.map(|user_type| user_type.as_str());
        let cursor_micros = query.cursor.as_ref().map(|cursor| cursor.created_at_micros);
        let cursor_id = query.cursor.as_ref().map(|cursor| cursor.id.clone());

        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupon
             WHERE (?1 IS NULL OR is_active = ?1)
               AND (?2 IS NULL OR user_type = ?2)
               AND (?3 IS NULL OR created_at_micros < ?3
                    OR (created_at_micros = ?3 AND id < ?4))
             ORDER BY created_at_micros DESC, id DESC
             LIMIT ?5"
        ))
        .bind(is_active)
        .bind(user_type)
        .bind(cursor_micros)
        .bind(cursor_id)
        .bind(i64::from(query.page_size))
        .fetch_all(&self.pool)
        .await?;

        let coupons = rows.iter().map(row_to_coupon).collect::<Result<Vec<_>, _>>()?;
        Ok(CouponPage::from_rows(coupons, query.page_size))
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, RepositoryError> {
        let rows: Vec<SqliteRow> = sqlx::query(&format!(
            "SELECT {COUPON_COLUMNS} FROM coupon
             WHERE is_active = 1 AND end_date > ?
             ORDER BY created_at_micros DESC, id DESC"
        ))
        .bind(format_timestamp(now))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_coupon).collect::<Result<Vec<_>, _>>()
    }

    async fn redeem(
        &self,
        id: &CouponId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let updated: Option<i64> = sqlx::query_scalar(
            "UPDATE coupon
             SET usage_count = usage_count + 1, updated_at = ?
             WHERE id = ?
               AND (usage_limit IS NULL OR usage_limit <= 0 OR usage_count < usage_limit)
             RETURNING usage_count",
        )
        .bind(format_timestamp(now))
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(usage_count) = updated {
            let usage_count = u32::try_from(usage_count.max(0)).unwrap_or(u32::MAX);
            return Ok(RedeemOutcome::Redeemed { usage_count });
        }

        let exists: Option<i64> = sqlx::query_scalar("SELECT 1 FROM coupon WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        Ok(if exists.is_some() { RedeemOutcome::LimitReached } else { RedeemOutcome::Missing })
    }
}
