pub mod codegen;
pub mod discount;
pub mod eligibility;

pub use codegen::{
    last_resort_code, verify_checksum, CodeGenerator, CodeOptions, CodegenError,
    GenerationStrategy, SealingKey,
};
pub use discount::{applied_coupon, calculate_discount, DiscountOverflow};
pub use eligibility::{check_coupon, check_user, evaluate, CartContext, CouponRejection};
