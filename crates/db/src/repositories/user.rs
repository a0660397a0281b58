use sqlx::Row;

use couponkit_core::domain::user::{UserAccount, UserId};

use super::{decode_error, format_timestamp, parse_timestamp, RepositoryError, UserDirectory};
use crate::DbPool;

/// Local projection of the accounts the coupon engine needs to age-check.
pub struct SqlUserDirectory {
    pool: DbPool,
}

impl SqlUserDirectory {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl UserDirectory for SqlUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let row = sqlx::query("SELECT id, email, role, created_at FROM user_account WHERE id = ?")
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: String = row.try_get("id").map_err(decode_error)?;
        let email: String = row.try_get("email").map_err(decode_error)?;
        let role: String = row.try_get("role").map_err(decode_error)?;
        let created_at_str: String = row.try_get("created_at").map_err(decode_error)?;

        Ok(Some(UserAccount {
            id: UserId(id),
            email,
            role,
            created_at: parse_timestamp("created_at", &created_at_str)?,
        }))
    }

    async fn save_user(&self, user: UserAccount) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO user_account (id, email, role, created_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 email = excluded.email,
                 role = excluded.role,
                 created_at = excluded.created_at",
        )
        .bind(&user.id.0)
        .bind(&user.email)
        .bind(&user.role)
        .bind(format_timestamp(user.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
