use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use couponkit_core::domain::coupon::{normalize_code, Coupon, CouponId, CouponPatch, SavedCoupon};
use couponkit_core::domain::user::{UserAccount, UserId};

use super::{
    CouponListQuery, CouponPage, CouponRepository, RedeemOutcome, RepositoryError,
    SavedCouponRepository, UserDirectory,
};

#[derive(Default)]
pub struct InMemoryCouponRepository {
    coupons: RwLock<HashMap<String, Coupon>>,
}

fn code_taken(coupons: &HashMap<String, Coupon>, code: &str, except: Option<&CouponId>) -> bool {
    coupons.values().any(|coupon| coupon.code == code && Some(&coupon.id) != except)
}

#[async_trait::async_trait]
impl CouponRepository for InMemoryCouponRepository {
    async fn create(&self, mut coupon: Coupon) -> Result<CouponId, RepositoryError> {
        coupon.code = normalize_code(&coupon.code);
        let mut coupons = self.coupons.write().await;
        if code_taken(&coupons, &coupon.code, None) {
            return Err(RepositoryError::DuplicateCode { code: coupon.code });
        }
        let id = coupon.id.clone();
        coupons.insert(id.0.clone(), coupon);
        Ok(id)
    }

    async fn update(
        &self,
        id: &CouponId,
        patch: CouponPatch,
        now: DateTime<Utc>,
    ) -> Result<Coupon, RepositoryError> {
        let mut coupons = self.coupons.write().await;
        if let Some(code) = patch.normalized_code() {
            if code_taken(&coupons, &code, Some(id)) {
                return Err(RepositoryError::DuplicateCode { code });
            }
        }

        let coupon =
            coupons.get_mut(&id.0).ok_or_else(|| RepositoryError::NotFound(id.0.clone()))?;
        coupon.apply_patch(patch, now);
        Ok(coupon.clone())
    }

    async fn delete(&self, id: &CouponId) -> Result<bool, RepositoryError> {
        let mut coupons = self.coupons.write().await;
        Ok(coupons.remove(&id.0).is_some())
    }

    async fn find_by_id(&self, id: &CouponId) -> Result<Option<Coupon>, RepositoryError> {
        let coupons = self.coupons.read().await;
        Ok(coupons.get(&id.0).cloned())
    }

    async fn find_by_code(&self, code: &str) -> Result<Option<Coupon>, RepositoryError> {
        let code = normalize_code(code);
        let coupons = self.coupons.read().await;
        Ok(coupons.values().find(|coupon| coupon.code == code).cloned())
    }

    async fn list(&self, query: CouponListQuery) -> Result<CouponPage, RepositoryError> {
        let coupons = self.coupons.read().await;
        let mut matching: Vec<Coupon> =
            coupons.values().filter(|coupon| query.matches(coupon)).cloned().collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        matching.truncate(query.page_size as usize);
        Ok(CouponPage::from_rows(matching, query.page_size))
    }

    async fn list_active(&self, now: DateTime<Utc>) -> Result<Vec<Coupon>, RepositoryError> {
        let coupons = self.coupons.read().await;
        Ok(coupons
            .values()
            .filter(|coupon| coupon.is_active && coupon.end_date > now)
            .cloned()
            .collect())
    }

    async fn redeem(
        &self,
        id: &CouponId,
        now: DateTime<Utc>,
    ) -> Result<RedeemOutcome, RepositoryError> {
        let mut coupons = self.coupons.write().await;
        let Some(coupon) = coupons.get_mut(&id.0) else {
            return Ok(RedeemOutcome::Missing);
        };
        if coupon.usage_exhausted() {
            return Ok(RedeemOutcome::LimitReached);
        }
        coupon.usage_count = coupon.usage_count.saturating_add(1);
        coupon.updated_at = now;
        Ok(RedeemOutcome::Redeemed { usage_count: coupon.usage_count })
    }
}

#[derive(Default)]
pub struct InMemorySavedCouponRepository {
    saved: RwLock<HashMap<String, Vec<SavedCoupon>>>,
}

#[async_trait::async_trait]
impl SavedCouponRepository for InMemorySavedCouponRepository {
    async fn save_for_user(&self, saved: SavedCoupon) -> Result<bool, RepositoryError> {
        let mut all = self.saved.write().await;
        let entries = all.entry(saved.user_id.0.clone()).or_default();
        if entries.iter().any(|entry| entry.coupon_id == saved.coupon_id) {
            return Ok(false);
        }
        entries.push(saved);
        Ok(true)
    }

    async fn list_for_user(&self, user_id: &UserId) -> Result<Vec<SavedCoupon>, RepositoryError> {
        let all = self.saved.read().await;
        let mut entries = all.get(&user_id.0).cloned().unwrap_or_default();
        entries.sort_by(|a, b| b.acquired_at.cmp(&a.acquired_at));
        Ok(entries)
    }
}

#[derive(Default)]
pub struct InMemoryUserDirectory {
    users: RwLock<HashMap<String, UserAccount>>,
}

#[async_trait::async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_user(&self, id: &UserId) -> Result<Option<UserAccount>, RepositoryError> {
        let users = self.users.read().await;
        Ok(users.get(&id.0).cloned())
    }

    async fn save_user(&self, user: UserAccount) -> Result<(), RepositoryError> {
        let mut users = self.users.write().await;
        users.insert(user.id.0.clone(), user);
        Ok(())
    }
}
