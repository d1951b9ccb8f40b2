// Copyright (c) James Kassemi, SC, US. All rights reserved.

//! Fixed-precision currency math.
//!
//! All monetary amounts and per-share prices flow through [`Money`]
//! (`rust_decimal::Decimal`); binary floats are never used for currency.
//! Share quantities are plain `u64` units.

use rust_decimal::Decimal;

pub type Money = Decimal;

/// `part / whole * 100`, or zero when `whole` is zero.
pub fn percent_of(part: Money, whole: Money) -> Money {
    if whole.is_zero() {
        return Decimal::ZERO;
    }
    part / whole * Decimal::ONE_HUNDRED
}

/// Decimal value of a share quantity, for quantity-by-price products.
pub fn from_shares(quantity: u64) -> Money {
    Decimal::from(quantity)
}
