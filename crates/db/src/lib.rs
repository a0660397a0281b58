pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect_with_settings, DbPool};
pub use fixtures::{CouponSeedInfo, DemoSeedDataset, SeedResult, VerificationResult};
pub use repositories::{
    CouponListQuery, CouponPage, CouponRepository, InMemoryCouponRepository,
    InMemorySavedCouponRepository, InMemoryUserDirectory, PageCursor, RedeemOutcome,
    RepositoryError, SavedCouponRepository, SqlCouponRepository, SqlSavedCouponRepository,
    SqlUserDirectory, UserDirectory,
};
