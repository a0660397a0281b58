pub mod config;
pub mod coupons;
pub mod domain;
pub mod errors;

pub use coupons::{
    applied_coupon, calculate_discount, evaluate, CartContext, CodeGenerator, CodeOptions,
    CodegenError, CouponRejection, GenerationStrategy, SealingKey,
};
pub use domain::coupon::{
    AppliedCoupon, Coupon, CouponId, CouponPatch, DiscountType, NewCoupon, SaveOutcome,
    SavedCoupon, UserType,
};
pub use domain::user::{UserAccount, UserId};
pub use errors::{ApplicationError, DomainError, InterfaceError};
