//! Flat-amount coupon

use serde::Serialize;
use crate::domain::value_objects::{CouponId, Money};

pub const COUPON_CODE_MAX_LEN: usize = 15;

/// Subtracts a fixed amount from an order total. Reusable without limit.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Coupon {
    pub(crate) id: CouponId,
    pub(crate) code: String,
    pub(crate) amount: Money,
}

impl Coupon {
    pub fn new(code: impl Into<String>, amount: Money) -> Result<Self, CouponError> {
        let code = code.into().trim().to_string();
        if code.is_empty() { return Err(CouponError::EmptyCode); }
        if code.chars().count() > COUPON_CODE_MAX_LEN { return Err(CouponError::CodeTooLong); }
        if amount.is_negative() || amount.is_zero() { return Err(CouponError::NonPositiveAmount); }
        Ok(Self { id: CouponId::new(), code, amount })
    }

    pub fn id(&self) -> CouponId { self.id }
    pub fn code(&self) -> &str { &self.code }
    pub fn amount(&self) -> Money { self.amount }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponError {
    #[error("coupon code is required")]
    EmptyCode,
    #[error("coupon code is longer than 15 characters")]
    CodeTooLong,
    #[error("coupon amount must be positive")]
    NonPositiveAmount,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coupon_validation() {
        assert_eq!(Coupon::new(" SAVE10 ", Money::from_cents(1000)).unwrap().code(), "SAVE10");
        assert_eq!(Coupon::new("", Money::from_cents(1000)), Err(CouponError::EmptyCode));
        assert_eq!(Coupon::new("SAVE", Money::ZERO), Err(CouponError::NonPositiveAmount));
        assert_eq!(Coupon::new("A-VERY-LONG-COUPON", Money::from_cents(1)), Err(CouponError::CodeTooLong));
    }
}
