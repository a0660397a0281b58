use sqlx::Executor;

use crate::connection::DbPool;
use crate::repositories::RepositoryError;

/// Seeded coupons and the outcome each one demonstrates.
const SEED_COUPONS: &[SeedCouponContract] = &[
    SeedCouponContract { id: "seed-coupon-save20", code: "SAVE20", description: "capped percentage with minimum purchase" },
    SeedCouponContract { id: "seed-coupon-welcome10", code: "WELCOME10", description: "fixed amount for new members" },
    SeedCouponContract { id: "seed-coupon-loyal15", code: "LOYAL15", description: "percentage for long-term members" },
    SeedCouponContract { id: "seed-coupon-shoes5", code: "SHOES5", description: "product and category allow-lists" },
    SeedCouponContract { id: "seed-coupon-single", code: "SINGLEUSE", description: "usage limit of one" },
    SeedCouponContract { id: "seed-coupon-expired", code: "EXPIRED30", description: "validity window in the past" },
    SeedCouponContract { id: "seed-coupon-paused", code: "PAUSED7", description: "inactive coupon" },
];

const SEED_USER_IDS: &[&str] = &["seed-user-new", "seed-user-regular", "seed-user-loyal"];

/// Deterministic demo dataset for exercising every eligibility outcome by hand.
pub struct DemoSeedDataset;

impl DemoSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/demo_seed_data.sql");

    /// Loads the dataset. Rows that already exist are left untouched.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, RepositoryError> {
        let mut tx = pool.begin().await?;

        tx.execute(sqlx::query(Self::SQL)).await?;
        tx.commit().await?;

        let coupons_seeded = SEED_COUPONS
            .iter()
            .map(|coupon| CouponSeedInfo {
                id: coupon.id,
                code: coupon.code,
                description: coupon.description,
            })
            .collect::<Vec<_>>();

        Ok(SeedResult { coupons_seeded, users_seeded: SEED_USER_IDS.to_vec() })
    }

    pub async fn verify(pool: &DbPool) -> Result<VerificationResult, RepositoryError> {
        let mut checks = Vec::new();

        for coupon in SEED_COUPONS {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM coupon WHERE id = ?1 AND code = ?2)")
                    .bind(coupon.id)
                    .bind(coupon.code)
                    .fetch_one(pool)
                    .await?;
            checks.push((coupon.code, present == 1));
        }

        for user_id in SEED_USER_IDS {
            let present: i64 =
                sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM user_account WHERE id = ?1)")
                    .bind(*user_id)
                    .fetch_one(pool)
                    .await?;
            checks.push((*user_id, present == 1));
        }

        let all_present = checks.iter().all(|(_, ok)| *ok);
        Ok(VerificationResult { all_present, checks })
    }

    /// Removes seeded rows, including saved copies that reference seeded coupons.
    pub async fn clean(pool: &DbPool) -> Result<(), RepositoryError> {
        let mut tx = pool.begin().await?;

        let coupon_ids =
            sql_array_from_ids(&SEED_COUPONS.iter().map(|coupon| coupon.id).collect::<Vec<_>>());
        let user_ids = sql_array_from_ids(SEED_USER_IDS);

        sqlx::query(&format!("DELETE FROM saved_coupon WHERE coupon_id IN {coupon_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM coupon WHERE id IN {coupon_ids}"))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&format!("DELETE FROM user_account WHERE id IN {user_ids}"))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct SeedCouponContract {
    id: &'static str,
    code: &'static str,
    description: &'static str,
}

fn sql_array_from_ids(ids: &[&str]) -> String {
    let quoted = ids.iter().map(|id| format!("'{}'", id)).collect::<Vec<_>>().join(",");
    format!("({quoted})")
}

#[derive(Debug)]
pub struct SeedResult {
    pub coupons_seeded: Vec<CouponSeedInfo>,
    pub users_seeded: Vec<&'static str>,
}

#[derive(Debug)]
pub struct CouponSeedInfo {
    pub id: &'static str,
    pub code: &'static str,
    pub description: &'static str,
}

#[derive(Debug)]
pub struct VerificationResult {
    pub all_present: bool,
    pub checks: Vec<(&'static str, bool)>,
}
