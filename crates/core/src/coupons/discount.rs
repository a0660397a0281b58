use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::coupon::{AppliedCoupon, Coupon, DiscountType};

/// The percentage discount does not fit in a `Decimal` and no cap bounds it.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("Discount cannot be calculated for this order total")]
pub struct DiscountOverflow;

/// Monetary discount for `coupon` on `subtotal`. Percentage discounts honour a positive
/// `max_discount` cap; fixed discounts never exceed the subtotal. Never negative.
pub fn calculate_discount(coupon: &Coupon, subtotal: Decimal) -> Result<Decimal, DiscountOverflow> {
    let discount = match coupon.discount_type {
        DiscountType::Percentage => {
            let cap = coupon.max_discount.filter(|cap| *cap > Decimal::ZERO);
            match percentage_of(subtotal, coupon.value) {
                Some(raw) => match cap {
                    Some(cap) if raw > cap => cap,
                    _ => raw,
                },
                // Out of range: only the sign and the cap are still known.
                None if subtotal.is_sign_negative() != coupon.value.is_sign_negative() => {
                    Decimal::ZERO
                }
                None => cap.ok_or(DiscountOverflow)?,
            }
        }
        DiscountType::Fixed => coupon.value.min(subtotal),
    };

    Ok(discount.max(Decimal::ZERO))
}

/// `amount * percent / 100`, dividing first when the product is out of range.
fn percentage_of(amount: Decimal, percent: Decimal) -> Option<Decimal> {
    amount
        .checked_mul(percent)
        .and_then(|product| product.checked_div(Decimal::ONE_HUNDRED))
        .or_else(|| amount.checked_div(Decimal::ONE_HUNDRED)?.checked_mul(percent))
}

pub fn applied_coupon(coupon: &Coupon, subtotal: Decimal) -> Result<AppliedCoupon, DiscountOverflow> {
    Ok(AppliedCoupon {
        coupon_id: coupon.id.clone(),
        code: coupon.code.clone(),
        discount_amount: calculate_discount(coupon, subtotal)?,
        discount_type: coupon.discount_type,
    })
}
