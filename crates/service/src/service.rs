//! Application-facing coupon operations.
//!
//! Every operation reads time from the injected [`Clock`], goes through the repository
//! traits, and maps repository failures to [`ApplicationError::Persistence`] after
//! logging them. Eligibility rejections keep their shopper-facing message.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use couponkit_core::config::CouponConfig;
use couponkit_core::coupons::codegen::{
    last_resort_code, verify_checksum, CodeGenerator, CodeOptions, CodegenError,
    GenerationStrategy,
};
use couponkit_core::coupons::discount::applied_coupon;
use couponkit_core::coupons::eligibility::{
    check_coupon, check_user, requires_user_lookup, CartContext, CouponRejection,
};
use couponkit_core::domain::coupon::{
    AppliedCoupon, Coupon, CouponId, CouponPatch, NewCoupon, SaveOutcome, SavedCoupon, UserType,
};
use couponkit_core::domain::user::{UserAccount, UserId};
use couponkit_core::errors::{ApplicationError, DomainError};
use couponkit_db::repositories::{
    CouponListQuery, CouponPage, CouponRepository, PageCursor, RedeemOutcome, RepositoryError,
    SavedCouponRepository, UserDirectory,
};

const MAX_PAGE_SIZE: u32 = 500;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CouponSettings {
    pub max_generation_attempts: u32,
    pub page_size: u32,
}

impl Default for CouponSettings {
    fn default() -> Self {
        Self { max_generation_attempts: 16, page_size: 20 }
    }
}

impl TryFrom<&CouponConfig> for CouponSettings {
    type Error = ApplicationError;

    fn try_from(config: &CouponConfig) -> Result<Self, Self::Error> {
        config.validate().map_err(|error| {
            error!(event_name = "coupon.settings_invalid", error = %error, "coupon settings rejected");
            ApplicationError::Configuration(error.to_string())
        })?;
        Ok(Self {
            max_generation_attempts: config.max_generation_attempts,
            page_size: config.page_size,
        })
    }
}

/// Admin listing filters. `cursor` is the token returned with the previous page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CouponFilter {
    pub cursor: Option<String>,
    pub page_size: Option<u32>,
    pub is_active: Option<bool>,
    pub user_type: Option<UserType>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GeneratedCode {
    pub code: String,
    /// `sealed`, `simple` or `minimal`.
    pub strategy: &'static str,
}

enum StrategyFailure {
    Codegen(CodegenError),
    Repository(RepositoryError),
    Exhausted(u32),
}

impl std::fmt::Display for StrategyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Codegen(error) => write!(f, "{error}"),
            Self::Repository(error) => write!(f, "uniqueness check failed: {error}"),
            Self::Exhausted(attempts) => write!(f, "every candidate collided after {attempts} attempts"),
        }
    }
}

pub struct CouponService {
    coupons: Arc<dyn CouponRepository>,
    saved: Arc<dyn SavedCouponRepository>,
    users: Arc<dyn UserDirectory>,
    generator: CodeGenerator,
    clock: Arc<dyn crate::Clock>,
    settings: CouponSettings,
}

impl CouponService {
    pub fn new(
        coupons: Arc<dyn CouponRepository>,
        saved: Arc<dyn SavedCouponRepository>,
        users: Arc<dyn UserDirectory>,
        generator: CodeGenerator,
        clock: Arc<dyn crate::Clock>,
        settings: CouponSettings,
    ) -> Self {
        Self { coupons, saved, users, generator, clock, settings }
    }

    pub fn settings(&self) -> CouponSettings {
        self.settings
    }

    /// Validates `code` against the cart and user, then consumes one use.
    ///
    /// The usage limit is checked twice: once on the loaded record for an early,
    /// ordered rejection, and again inside the conditional redeem write, which is the
    /// one that actually decides under concurrency.
    #[tracing::instrument(
        name = "coupons.service.apply_coupon",
        skip(self, cart),
        fields(code = %code, user_id = %user_id, subtotal = %cart.subtotal),
        err
    )]
    pub async fn apply_coupon(
        &self,
        code: &str,
        user_id: &UserId,
        cart: &CartContext,
    ) -> Result<AppliedCoupon, ApplicationError> {
        let now = self.clock.now();

        let coupon = self
            .coupons
            .find_by_code(code)
            .await
            .map_err(|error| persistence("find_by_code", error))?
            .ok_or_else(|| rejected(CouponRejection::NotFound))?;

        check_coupon(&coupon, cart, now).map_err(rejected)?;

        if requires_user_lookup(&coupon) {
            let user = self.lookup_user(user_id).await?;
            check_user(&coupon, user.as_ref(), now).map_err(rejected)?;
        }

        let applied = applied_coupon(&coupon, cart.subtotal).map_err(DomainError::from)?;

        match self.coupons.redeem(&coupon.id, now).await {
            Ok(RedeemOutcome::Redeemed { usage_count }) => {
                info!(
                    event_name = "coupon.applied",
                    coupon_id = %coupon.id,
                    discount = %applied.discount_amount,
                    usage_count,
                    "coupon applied"
                );
                Ok(applied)
            }
            Ok(RedeemOutcome::LimitReached) => {
                warn!(event_name = "coupon.redeem_race_lost", coupon_id = %coupon.id, "usage limit reached during redeem");
                Err(rejected(CouponRejection::UsageLimitReached))
            }
            Ok(RedeemOutcome::Missing) => Err(rejected(CouponRejection::NotFound)),
            Err(error) => Err(persistence("redeem", error)),
        }
    }

    /// Active, unexpired coupons the user's account age qualifies for.
    #[tracing::instrument(name = "coupons.service.user_coupons", skip(self), fields(user_id = %user_id), err)]
    pub async fn user_coupons(&self, user_id: &UserId) -> Result<Vec<Coupon>, ApplicationError> {
        let now = self.clock.now();
        let user = self
            .lookup_user(user_id)
            .await?
            .ok_or_else(|| rejected(CouponRejection::UserNotFound))?;

        let coupons =
            self.coupons.list_active(now).await.map_err(|error| persistence("list_active", error))?;

        Ok(coupons.into_iter().filter(|coupon| user.qualifies_for(coupon.user_type, now)).collect())
    }

    #[tracing::instrument(name = "coupons.service.user_saved_coupons", skip(self), fields(user_id = %user_id), err)]
    pub async fn user_saved_coupons(
        &self,
        user_id: &UserId,
    ) -> Result<Vec<SavedCoupon>, ApplicationError> {
        if user_id.0.trim().is_empty() {
            return Err(invalid("User ID is required"));
        }

        self.saved.list_for_user(user_id).await.map_err(|error| persistence("list_for_user", error))
    }

    /// Copies the coupon into the user's saved set. Saving twice is not an error.
    #[tracing::instrument(
        name = "coupons.service.save_coupon_to_user",
        skip(self),
        fields(user_id = %user_id, coupon_id = %coupon_id),
        err
    )]
    pub async fn save_coupon_to_user(
        &self,
        user_id: &UserId,
        coupon_id: &CouponId,
    ) -> Result<SaveOutcome, ApplicationError> {
        if user_id.0.trim().is_empty() || coupon_id.0.trim().is_empty() {
            return Err(invalid("User ID and coupon ID are required"));
        }

        let coupon = self
            .coupons
            .find_by_id(coupon_id)
            .await
            .map_err(|error| persistence("find_by_id", error))?
            .ok_or_else(|| ApplicationError::from(DomainError::CouponNotFound(coupon_id.clone())))?;

        let snapshot = SavedCoupon::snapshot(user_id.clone(), &coupon, self.clock.now());
        let inserted = self
            .saved
            .save_for_user(snapshot)
            .await
            .map_err(|error| persistence("save_for_user", error))?;

        Ok(SaveOutcome { success: true, already_saved: !inserted })
    }

    #[tracing::instrument(
        name = "coupons.service.create_coupon",
        skip(self, new),
        fields(code = %new.code, coupon_id = tracing::field::Empty),
        err
    )]
    pub async fn create_coupon(&self, new: NewCoupon) -> Result<CouponId, ApplicationError> {
        if new.code.trim().is_empty() {
            return Err(invalid("Coupon code is required"));
        }

        let coupon = Coupon::from_new(CouponId::generate(), new, self.clock.now());
        tracing::Span::current().record("coupon_id", tracing::field::display(&coupon.id));

        let id = self.coupons.create(coupon).await.map_err(admin_error)?;
        info!(event_name = "coupon.created", coupon_id = %id, "coupon created");
        Ok(id)
    }

    #[tracing::instrument(name = "coupons.service.update_coupon", skip(self, patch), fields(coupon_id = %id), err)]
    pub async fn update_coupon(
        &self,
        id: &CouponId,
        patch: CouponPatch,
    ) -> Result<Coupon, ApplicationError> {
        if patch.code.as_deref().is_some_and(|code| code.trim().is_empty()) {
            return Err(invalid("Coupon code is required"));
        }

        let updated =
            self.coupons.update(id, patch, self.clock.now()).await.map_err(admin_error)?;
        info!(event_name = "coupon.updated", coupon_id = %id, "coupon updated");
        Ok(updated)
    }

    /// Unconditional. Saved copies of the coupon are kept as they are.
    #[tracing::instrument(name = "coupons.service.delete_coupon", skip(self), fields(coupon_id = %id), err)]
    pub async fn delete_coupon(&self, id: &CouponId) -> Result<(), ApplicationError> {
        let removed = self.coupons.delete(id).await.map_err(|error| persistence("delete", error))?;
        info!(event_name = "coupon.deleted", coupon_id = %id, removed, "coupon deleted");
        Ok(())
    }

    pub async fn get_coupon(&self, id: &CouponId) -> Result<Option<Coupon>, ApplicationError> {
        self.coupons.find_by_id(id).await.map_err(|error| persistence("find_by_id", error))
    }

    pub async fn get_coupon_by_code(&self, code: &str) -> Result<Option<Coupon>, ApplicationError> {
        self.coupons.find_by_code(code).await.map_err(|error| persistence("find_by_code", error))
    }

    #[tracing::instrument(name = "coupons.service.list_coupons", skip(self, filter), err)]
    pub async fn list_coupons(&self, filter: CouponFilter) -> Result<CouponPage, ApplicationError> {
        let cursor = match filter.cursor.as_deref().map(str::trim).filter(|token| !token.is_empty()) {
            Some(token) => {
                Some(PageCursor::parse(token).map_err(|_| invalid("Invalid page cursor"))?)
            }
            None => None,
        };
        let page_size = filter.page_size.unwrap_or(self.settings.page_size).clamp(1, MAX_PAGE_SIZE);

        self.coupons
            .list(CouponListQuery {
                cursor,
                page_size,
                is_active: filter.is_active,
                user_type: filter.user_type,
            })
            .await
            .map_err(|error| persistence("list", error))
    }

    /// Always returns a code. Strategies are tried in order, each bounded by
    /// `max_generation_attempts` collisions; the last resort skips the uniqueness check.
    #[tracing::instrument(
        name = "coupons.service.generate_coupon_code",
        skip(self, options),
        fields(prefix = %options.prefix, strategy = tracing::field::Empty)
    )]
    pub async fn generate_coupon_code(&self, options: CodeOptions) -> GeneratedCode {
        let options = options.normalized();
        let now = self.clock.now();
        let span = tracing::Span::current();

        for strategy in self.generator.strategies(&options) {
            match self.try_strategy(strategy, &options, now).await {
                Ok(code) => {
                    span.record("strategy", strategy.as_str());
                    return GeneratedCode { code, strategy: strategy.as_str() };
                }
                Err(failure) => {
                    warn!(
                        event_name = "coupon.codegen_fallback",
                        strategy = strategy.as_str(),
                        reason = %failure,
                        "code generation strategy failed, falling back"
                    );
                }
            }
        }

        span.record("strategy", "minimal");
        GeneratedCode { code: last_resort_code(&options.prefix), strategy: "minimal" }
    }

    pub fn verify_code(&self, code: &str, options: &CodeOptions) -> bool {
        verify_checksum(code, options)
    }

    async fn try_strategy(
        &self,
        strategy: GenerationStrategy,
        options: &CodeOptions,
        now: DateTime<Utc>,
    ) -> Result<String, StrategyFailure> {
        let attempts = self.settings.max_generation_attempts.max(1);
        for _ in 0..attempts {
            let candidate = self
                .generator
                .candidate(strategy, options, now)
                .map_err(StrategyFailure::Codegen)?;
            let existing =
                self.coupons.find_by_code(&candidate).await.map_err(StrategyFailure::Repository)?;
            if existing.is_none() {
                return Ok(candidate);
            }
        }
        Err(StrategyFailure::Exhausted(attempts))
    }

    async fn lookup_user(&self, user_id: &UserId) -> Result<Option<UserAccount>, ApplicationError> {
        self.users.find_user(user_id).await.map_err(|error| persistence("find_user", error))
    }
}

fn rejected(rejection: CouponRejection) -> ApplicationError {
    ApplicationError::Domain(DomainError::Rejected(rejection))
}

fn invalid(message: &str) -> ApplicationError {
    ApplicationError::Domain(DomainError::InvalidInput(message.to_string()))
}

fn persistence(operation: &'static str, error: RepositoryError) -> ApplicationError {
    error!(event_name = "coupon.repository_failure", operation, error = %error, "repository call failed");
    ApplicationError::Persistence(format!("{operation}: {error}"))
}

fn admin_error(error: RepositoryError) -> ApplicationError {
    match error {
        RepositoryError::DuplicateCode { code } => DomainError::DuplicateCode { code }.into(),
        RepositoryError::NotFound(id) => DomainError::CouponNotFound(CouponId(id)).into(),
        other => persistence("write", other),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{DateTime, Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    use couponkit_core::config::AppConfig;
    use couponkit_core::coupons::codegen::{verify_checksum, CodeGenerator, CodeOptions};
    use couponkit_core::coupons::eligibility::{CartContext, CouponRejection};
    use couponkit_core::domain::coupon::{
        Coupon, CouponId, CouponPatch, DiscountType, NewCoupon, SaveOutcome, UserType,
    };
    use couponkit_core::domain::user::{UserAccount, UserId};
    use couponkit_core::errors::{ApplicationError, DomainError};
    use couponkit_db::repositories::{
        CouponListQuery, CouponPage, CouponRepository, InMemoryCouponRepository,
        InMemorySavedCouponRepository, InMemoryUserDirectory, RedeemOutcome, RepositoryError,
        UserDirectory,
    };

    use super::{CouponFilter, CouponService, CouponSettings};
    use crate::FixedClock;

    struct Harness {
        service: CouponService,
        coupons: Arc<InMemoryCouponRepository>,
        users: Arc<InMemoryUserDirectory>,
        now: DateTime<Utc>,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 12, 0, 0).single().expect("valid date")
    }

    fn harness_with(generator: CodeGenerator) -> Harness {
        let coupons = Arc::new(InMemoryCouponRepository::default());
        let users = Arc::new(InMemoryUserDirectory::default());
        let service = CouponService::new(
            coupons.clone(),
            Arc::new(InMemorySavedCouponRepository::default()),
            users.clone(),
            generator,
            Arc::new(FixedClock(now())),
            CouponSettings::default(),
        );
        Harness { service, coupons, users, now: now() }
    }

    fn harness() -> Harness {
        harness_with(CodeGenerator::from_key_material("test-key", "test-iv"))
    }

    fn dec(value: &str) -> Decimal {
        value.parse().expect("decimal literal")
    }

    fn new_coupon(code: &str, discount_type: DiscountType, value: &str) -> NewCoupon {
        NewCoupon {
            code: code.to_string(),
            discount_type,
            value: dec(value),
            min_purchase: None,
            max_discount: None,
            start_date: now() - Duration::days(10),
            end_date: now() + Duration::days(10),
            user_type: UserType::All,
            description: String::new(),
            usage_limit: None,
            is_active: true,
            products: vec![],
            categories: vec![],
        }
    }

    fn cart(subtotal: &str) -> CartContext {
        CartContext { subtotal: dec(subtotal), ..CartContext::default() }
    }

    fn shopper() -> UserId {
        UserId("shopper-1".to_string())
    }

    async fn register(harness: &Harness, id: &str, age_days: i64) -> UserId {
        let user = UserAccount {
            id: UserId(id.to_string()),
            email: format!("{id}@example.com"),
            role: "customer".to_string(),
            created_at: harness.now - Duration::days(age_days),
        };
        harness.users.save_user(user.clone()).await.expect("save user");
        user.id
    }

    fn rejection_of(result: Result<impl std::fmt::Debug, ApplicationError>) -> CouponRejection {
        match result {
            Err(ApplicationError::Domain(DomainError::Rejected(rejection))) => rejection,
            other => panic!("expected a rejection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn percentage_discount_is_capped_and_consumes_one_use() {
        let h = harness();
        let mut new = new_coupon("save20", DiscountType::Percentage, "20");
        new.min_purchase = Some(dec("50"));
        new.max_discount = Some(dec("15"));
        let id = h.service.create_coupon(new).await.expect("create");

        let applied =
            h.service.apply_coupon("SAVE20", &shopper(), &cart("100")).await.expect("apply");

        assert_eq!(applied.discount_amount, dec("15"));
        assert_eq!(applied.code, "SAVE20");
        assert_eq!(applied.coupon_id, id);
        let stored = h.coupons.find_by_id(&id).await.expect("find").expect("present");
        assert_eq!(stored.usage_count, 1);
        assert_eq!(stored.updated_at, h.now);
    }

    #[tokio::test]
    async fn fixed_discount_is_clamped_to_subtotal() {
        let h = harness();
        h.service.create_coupon(new_coupon("THIRTY", DiscountType::Fixed, "30")).await.expect("create");

        let applied =
            h.service.apply_coupon("thirty", &shopper(), &cart("20")).await.expect("apply");
        assert_eq!(applied.discount_amount, dec("20"));
        assert_eq!(applied.discount_type, DiscountType::Fixed);
    }

    #[test]
    fn settings_reject_out_of_bounds_config() {
        let mut config = AppConfig::default().coupons;
        assert_eq!(
            CouponSettings::try_from(&config),
            Ok(CouponSettings { max_generation_attempts: 16, page_size: 20 })
        );

        config.page_size = 0;
        assert!(matches!(
            CouponSettings::try_from(&config),
            Err(ApplicationError::Configuration(message)) if message.contains("coupons.page_size")
        ));

        config.page_size = 20;
        config.max_generation_attempts = 0;
        assert!(matches!(
            CouponSettings::try_from(&config),
            Err(ApplicationError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn huge_subtotal_without_cap_is_refused_and_keeps_the_use() {
        let h = harness();
        let id = h
            .service
            .create_coupon(new_coupon("TRIPLE", DiscountType::Percentage, "250"))
            .await
            .expect("create");
        let huge = CartContext { subtotal: Decimal::MAX, ..CartContext::default() };

        let result = h.service.apply_coupon("TRIPLE", &shopper(), &huge).await;

        assert!(matches!(result, Err(ApplicationError::Domain(DomainError::Discount(_)))));
        let stored = h.coupons.find_by_id(&id).await.expect("find").expect("present");
        assert_eq!(stored.usage_count, 0);
    }

    #[tokio::test]
    async fn huge_subtotal_with_cap_gets_the_cap() {
        let h = harness();
        let mut new = new_coupon("WHOLE", DiscountType::Percentage, "100");
        new.max_discount = Some(dec("15"));
        h.service.create_coupon(new).await.expect("create");

        let applied = h
            .service
            .apply_coupon("WHOLE", &shopper(), &cart("1000000000000000000000000000"))
            .await
            .expect("apply");

        assert_eq!(applied.discount_amount, dec("15"));
    }

    #[tokio::test]
    async fn exhausted_coupon_is_rejected_with_usage_message() {
        let h = harness();
        let mut coupon = Coupon::from_new(
            CouponId("c-used".to_string()),
            new_coupon("USEDUP", DiscountType::Fixed, "5"),
            h.now,
        );
        coupon.usage_limit = Some(1);
        coupon.usage_count = 1;
        h.coupons.create(coupon).await.expect("create");

        let rejection = rejection_of(h.service.apply_coupon("USEDUP", &shopper(), &cart("40")).await);
        assert_eq!(rejection, CouponRejection::UsageLimitReached);
        assert_eq!(rejection.to_string(), "This coupon has reached its usage limit");
    }

    #[tokio::test]
    async fn category_mismatch_is_rejected() {
        let h = harness();
        let mut new = new_coupon("GADGETS", DiscountType::Percentage, "10");
        new.min_purchase = Some(dec("10"));
        new.categories = vec!["electronics".to_string()];
        h.service.create_coupon(new).await.expect("create");

        let books = CartContext { category_ids: vec!["books".to_string()], ..cart("50") };
        let rejection = rejection_of(h.service.apply_coupon("GADGETS", &shopper(), &books).await);
        assert_eq!(rejection, CouponRejection::CategoryNotEligible);
        assert_eq!(
            rejection.to_string(),
            "This coupon is not valid for the selected product categories"
        );
    }

    #[tokio::test]
    async fn ended_coupon_is_rejected_even_when_active() {
        let h = harness();
        let mut new = new_coupon("BYGONE", DiscountType::Fixed, "5");
        new.start_date = h.now - Duration::days(30);
        new.end_date = h.now - Duration::days(1);
        h.service.create_coupon(new).await.expect("create");

        let rejection = rejection_of(h.service.apply_coupon("BYGONE", &shopper(), &cart("50")).await);
        assert_eq!(rejection, CouponRejection::Expired);
        assert_eq!(rejection.to_string(), "This coupon is expired or not yet active");
    }

    #[tokio::test]
    async fn unknown_code_is_invalid() {
        let h = harness();
        let rejection = rejection_of(h.service.apply_coupon("NOPE", &shopper(), &cart("50")).await);
        assert_eq!(rejection.to_string(), "Invalid coupon code");
    }

    #[tokio::test]
    async fn rejections_do_not_consume_usage() {
        let h = harness();
        let mut new = new_coupon("MIN50", DiscountType::Fixed, "5");
        new.min_purchase = Some(dec("50"));
        let id = h.service.create_coupon(new).await.expect("create");

        let rejection = rejection_of(h.service.apply_coupon("MIN50", &shopper(), &cart("49.99")).await);
        assert_eq!(rejection.to_string(), "Minimum purchase amount of $50.00 required");

        let stored = h.coupons.find_by_id(&id).await.expect("find").expect("present");
        assert_eq!(stored.usage_count, 0);
    }

    #[tokio::test]
    async fn member_restrictions_use_account_age() {
        let h = harness();
        let mut welcome = new_coupon("WELCOME", DiscountType::Fixed, "10");
        welcome.user_type = UserType::New;
        h.service.create_coupon(welcome).await.expect("create");
        let mut loyal = new_coupon("LOYAL", DiscountType::Fixed, "10");
        loyal.user_type = UserType::Loyal;
        h.service.create_coupon(loyal).await.expect("create");

        let fresh = register(&h, "fresh", 30).await;
        let veteran = register(&h, "veteran", 90).await;

        h.service.apply_coupon("WELCOME", &fresh, &cart("40")).await.expect("new member");
        h.service.apply_coupon("LOYAL", &veteran, &cart("40")).await.expect("loyal member");

        let rejection = rejection_of(h.service.apply_coupon("LOYAL", &fresh, &cart("40")).await);
        assert_eq!(rejection.to_string(), "This coupon is only valid for long-term members");
        let rejection = rejection_of(h.service.apply_coupon("WELCOME", &veteran, &cart("40")).await);
        assert_eq!(rejection.to_string(), "This coupon is only valid for new members");

        let ghost = UserId("ghost".to_string());
        let rejection = rejection_of(h.service.apply_coupon("WELCOME", &ghost, &cart("40")).await);
        assert_eq!(rejection, CouponRejection::UserNotFound);
    }

    #[tokio::test]
    async fn concurrent_applications_respect_a_limit_of_one() {
        let h = harness();
        let mut new = new_coupon("ONLYONE", DiscountType::Fixed, "5");
        new.usage_limit = Some(1);
        let id = h.service.create_coupon(new).await.expect("create");
        let service = Arc::new(h.service);

        let mut handles = Vec::new();
        for _ in 0..10 {
            let service = Arc::clone(&service);
            handles.push(tokio::spawn(async move {
                service.apply_coupon("ONLYONE", &shopper(), &cart("20")).await
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            match handle.await.expect("join") {
                Ok(_) => accepted += 1,
                Err(error) => assert_eq!(error.rejection(), Some(&CouponRejection::UsageLimitReached)),
            }
        }
        assert_eq!(accepted, 1);
        let stored = h.coupons.find_by_id(&id).await.expect("find").expect("present");
        assert_eq!(stored.usage_count, 1);
    }

    #[tokio::test]
    async fn saving_twice_keeps_one_copy() {
        let h = harness();
        let id = h
            .service
            .create_coupon(new_coupon("KEEPME", DiscountType::Fixed, "5"))
            .await
            .expect("create");
        let user = shopper();

        let first = h.service.save_coupon_to_user(&user, &id).await.expect("save");
        let second = h.service.save_coupon_to_user(&user, &id).await.expect("save again");

        assert_eq!(first, SaveOutcome { success: true, already_saved: false });
        assert_eq!(second, SaveOutcome { success: true, already_saved: true });
        let saved = h.service.user_saved_coupons(&user).await.expect("list saved");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].acquired_at, h.now);
    }

    #[tokio::test]
    async fn save_validates_inputs() {
        let h = harness();

        let error = h
            .service
            .save_coupon_to_user(&UserId(" ".to_string()), &CouponId("c-1".to_string()))
            .await
            .expect_err("blank user");
        assert_eq!(error.to_string(), "User ID and coupon ID are required");

        let error = h
            .service
            .save_coupon_to_user(&shopper(), &CouponId("missing".to_string()))
            .await
            .expect_err("unknown coupon");
        assert_eq!(error.to_string(), "Coupon not found");
    }

    #[tokio::test]
    async fn saved_copy_outlives_coupon_deletion() {
        let h = harness();
        let id = h
            .service
            .create_coupon(new_coupon("SHORTLIVED", DiscountType::Fixed, "5"))
            .await
            .expect("create");
        h.service.save_coupon_to_user(&shopper(), &id).await.expect("save");

        h.service.delete_coupon(&id).await.expect("delete");
        h.service.delete_coupon(&id).await.expect("deleting again is fine");

        assert_eq!(h.service.get_coupon(&id).await.expect("get"), None);
        let saved = h.service.user_saved_coupons(&shopper()).await.expect("list saved");
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].code, "SHORTLIVED");
    }

    #[tokio::test]
    async fn create_and_update_enforce_unique_codes() {
        let h = harness();
        h.service.create_coupon(new_coupon("TAKEN", DiscountType::Fixed, "5")).await.expect("create");
        let other = h
            .service
            .create_coupon(new_coupon("OTHER", DiscountType::Fixed, "5"))
            .await
            .expect("create");

        let error = h
            .service
            .create_coupon(new_coupon("taken", DiscountType::Fixed, "5"))
            .await
            .expect_err("duplicate");
        assert_eq!(error.to_string(), "Coupon code already exists");

        let error = h
            .service
            .update_coupon(&other, CouponPatch { code: Some("Taken".to_string()), ..CouponPatch::default() })
            .await
            .expect_err("duplicate on update");
        assert!(matches!(error, ApplicationError::Domain(DomainError::DuplicateCode { .. })));

        let error = h
            .service
            .create_coupon(new_coupon("   ", DiscountType::Fixed, "5"))
            .await
            .expect_err("blank code");
        assert!(matches!(error, ApplicationError::Domain(DomainError::InvalidInput(_))));

        let error = h
            .service
            .update_coupon(&CouponId("missing".to_string()), CouponPatch::default())
            .await
            .expect_err("missing coupon");
        assert_eq!(error.to_string(), "Coupon not found");
    }

    #[tokio::test]
    async fn user_coupons_follow_membership_bucket() {
        let h = harness();
        for (code, user_type) in
            [("EVERYONE", UserType::All), ("NEWBIE", UserType::New), ("VETERAN", UserType::Loyal)]
        {
            let mut new = new_coupon(code, DiscountType::Fixed, "5");
            new.user_type = user_type;
            h.service.create_coupon(new).await.expect("create");
        }
        let mut paused = new_coupon("PAUSED", DiscountType::Fixed, "5");
        paused.is_active = false;
        h.service.create_coupon(paused).await.expect("create");

        let fresh = register(&h, "fresh", 3).await;
        let mut codes: Vec<String> = h
            .service
            .user_coupons(&fresh)
            .await
            .expect("user coupons")
            .into_iter()
            .map(|coupon| coupon.code)
            .collect();
        codes.sort();
        assert_eq!(codes, vec!["EVERYONE".to_string(), "NEWBIE".to_string()]);

        let rejection = rejection_of(h.service.user_coupons(&UserId("ghost".to_string())).await);
        assert_eq!(rejection, CouponRejection::UserNotFound);
    }

    #[tokio::test]
    async fn listing_uses_configured_page_size_and_rejects_bad_cursors() {
        let h = harness();
        for index in 0..3 {
            h.service
                .create_coupon(new_coupon(&format!("LIST{index}"), DiscountType::Fixed, "5"))
                .await
                .expect("create");
        }

        let page = h
            .service
            .list_coupons(CouponFilter { page_size: Some(2), ..CouponFilter::default() })
            .await
            .expect("list");
        assert_eq!(page.coupons.len(), 2);
        assert!(page.has_more);

        let rest = h
            .service
            .list_coupons(CouponFilter {
                cursor: page.next_cursor.map(|cursor| cursor.encode()),
                page_size: Some(2),
                ..CouponFilter::default()
            })
            .await
            .expect("list rest");
        assert_eq!(rest.coupons.len(), 1);

        let error = h
            .service
            .list_coupons(CouponFilter { cursor: Some("garbage".to_string()), ..CouponFilter::default() })
            .await
            .expect_err("bad cursor");
        assert_eq!(error.to_string(), "Invalid page cursor");
    }

    #[tokio::test]
    async fn generated_codes_are_unique_and_checksummed() {
        let h = harness();
        let options = CodeOptions { prefix: "vip".to_string(), ..CodeOptions::default() };
        let mut seen = std::collections::HashSet::new();

        for _ in 0..20 {
            let generated = h.service.generate_coupon_code(options.clone()).await;
            assert_eq!(generated.strategy, "simple");
            assert!(generated.code.starts_with("VIP-"));
            assert!(h.service.verify_code(&generated.code, &options));
            assert!(seen.insert(generated.code.clone()), "duplicate {}", generated.code);

            let mut new = new_coupon(&generated.code, DiscountType::Fixed, "1");
            new.description = "generated".to_string();
            h.service.create_coupon(new).await.expect("store generated code");
        }
    }

    #[tokio::test]
    async fn metadata_request_uses_sealed_strategy() {
        let h = harness();
        let options =
            CodeOptions { discount_value: Some(dec("15")), ..CodeOptions::default() };

        let generated = h.service.generate_coupon_code(options.clone()).await;
        assert_eq!(generated.strategy, "sealed");
        assert!(verify_checksum(&generated.code, &options));
    }

    #[tokio::test]
    async fn missing_key_material_falls_back_to_simple() {
        let h = harness_with(CodeGenerator::from_key_material("", ""));
        let options =
            CodeOptions { discount_value: Some(dec("15")), ..CodeOptions::default() };

        let generated = h.service.generate_coupon_code(options.clone()).await;
        assert_eq!(generated.strategy, "simple");
        assert!(verify_checksum(&generated.code, &options));
    }

    struct UnavailableCoupons;

    fn unavailable() -> RepositoryError {
        RepositoryError::Decode("store unavailable".to_string())
    }

    #[async_trait::async_trait]
    impl CouponRepository for UnavailableCoupons {
        async fn create(&self, _coupon: Coupon) -> Result<CouponId, RepositoryError> {
            Err(unavailable())
        }
        async fn update(
            &self,
            _id: &CouponId,
            _patch: CouponPatch,
            _now: DateTime<Utc>,
        ) -> Result<Coupon, RepositoryError> {
            Err(unavailable())
        }
        async fn delete(&self, _id: &CouponId) -> Result<bool, RepositoryError> {
            Err(unavailable())
        }
        async fn find_by_id(&self, _id: &CouponId) -> Result<Option<Coupon>, RepositoryError> {
            Err(unavailable())
        }
        async fn find_by_code(&self, _code: &str) -> Result<Option<Coupon>, RepositoryError> {
            Err(unavailable())
        }
        async fn list(&self, _query: CouponListQuery) -> Result<CouponPage, RepositoryError> {
            Err(unavailable())
        }
        async fn list_active(&self, _now: DateTime<Utc>) -> Result<Vec<Coupon>, RepositoryError> {
            Err(unavailable())
        }
        async fn redeem(
            &self,
            _id: &CouponId,
            _now: DateTime<Utc>,
        ) -> Result<RedeemOutcome, RepositoryError> {
            Err(unavailable())
        }
    }

    fn unavailable_service() -> CouponService {
        CouponService::new(
            Arc::new(UnavailableCoupons),
            Arc::new(InMemorySavedCouponRepository::default()),
            Arc::new(InMemoryUserDirectory::default()),
            CodeGenerator::from_key_material("k", "iv"),
            Arc::new(FixedClock(now())),
            CouponSettings::default(),
        )
    }

    #[tokio::test]
    async fn generation_survives_an_unavailable_store() {
        let service = unavailable_service();

        let generated = service
            .generate_coupon_code(CodeOptions {
                prefix: "sos".to_string(),
                discount_value: Some(dec("5")),
                ..CodeOptions::default()
            })
            .await;

        assert_eq!(generated.strategy, "minimal");
        assert!(generated.code.starts_with("SOS-"));
    }

    #[tokio::test]
    async fn repository_failures_surface_as_persistence_errors() {
        let service = unavailable_service();

        let error = service.apply_coupon("ANY", &shopper(), &cart("10")).await.expect_err("store down");
        assert!(matches!(error, ApplicationError::Persistence(_)));
        assert_eq!(error.rejection(), None);
    }
}
