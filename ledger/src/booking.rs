use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_types::{
    ids::{BookingId, ShareClassId, UserId},
    money::{from_shares, percent_of, Money},
    status::BookingStatus,
};

use crate::error::{LedgerError, Result};

/// An installment commitment to buy `quantity` shares at a locked-in price,
/// paid down over time. Shares convert to owned holdings progressively as
/// cumulative payments cover whole share prices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub user: UserId,
    pub share_class: ShareClassId,
    pub quantity: u64,
    pub booked_price_per_share: Money,
    pub cumulative_payments: Money,
    /// Monotonically non-decreasing; never exceeds `quantity`.
    pub shares_owned: u64,
    pub status: BookingStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn new(
        id: BookingId,
        user: UserId,
        share_class: ShareClassId,
        quantity: u64,
        booked_price_per_share: Money,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            user,
            share_class,
            quantity,
            booked_price_per_share,
            cumulative_payments: Decimal::ZERO,
            shares_owned: 0,
            status: BookingStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    /// Full contract value: `quantity × booked price`.
    pub fn contract_value(&self) -> Money {
        from_shares(self.quantity) * self.booked_price_per_share
    }

    /// Shares still reserved out of the pool but not yet paid for.
    pub fn unpaid_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.shares_owned)
    }

    /// Record an accepted payment breakdown on the booking.
    pub fn apply_payment(&mut self, breakdown: &PaymentBreakdown) {
        self.cumulative_payments = breakdown.new_cumulative_payments;
        self.shares_owned = breakdown.new_shares_owned;
        self.status = if breakdown.completed {
            BookingStatus::Completed
        } else if self.shares_owned > 0 {
            BookingStatus::PartiallyPaid
        } else {
            BookingStatus::Active
        };
        self.updated_at = Utc::now();
    }
}

/// Result of converting one payment into unlocked shares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentBreakdown {
    pub shares_unlocked: u64,
    pub new_cumulative_payments: Money,
    pub new_shares_owned: u64,
    pub percent_paid: Money,
    pub completed: bool,
}

/// Convert a payment against a booking into unlocked shares.
///
/// Ownership is the floor of cumulative payments over the booked price,
/// clamped so it never decreases and never exceeds the contracted quantity.
/// Pure; the caller applies the breakdown to booking and holding atomically.
pub fn unlock_shares(booking: &Booking, payment: Money) -> Result<PaymentBreakdown> {
    if payment <= Decimal::ZERO {
        return Err(LedgerError::InvalidArgument(format!(
            "payment amount must be positive, got {payment}"
        )));
    }
    if !booking.status.accepts_payment() {
        return Err(LedgerError::InvalidState(format!(
            "booking {} no longer accepts payments (status {:?})",
            booking.id, booking.status
        )));
    }
    if booking.booked_price_per_share <= Decimal::ZERO {
        return Err(LedgerError::InvalidState(format!(
            "booking {} has non-positive price {}",
            booking.id, booking.booked_price_per_share
        )));
    }

    let new_cumulative = booking.cumulative_payments + payment;
    let covered = (new_cumulative / booking.booked_price_per_share).floor();
    let target = covered
        .to_u64()
        .unwrap_or(u64::MAX)
        .min(booking.quantity)
        .max(booking.shares_owned);

    Ok(PaymentBreakdown {
        shares_unlocked: target - booking.shares_owned,
        new_cumulative_payments: new_cumulative,
        new_shares_owned: target,
        percent_paid: percent_of(new_cumulative, booking.contract_value()),
        completed: target == booking.quantity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn booking(quantity: u64, price: Money) -> Booking {
        Booking::new(
            BookingId::from("b1"),
            UserId::from("u1"),
            ShareClassId::from("gold-a"),
            quantity,
            price,
        )
    }

    #[test]
    fn payment_unlocks_floor_of_covered_shares() {
        let b = booking(100, dec!(1000));
        let breakdown = unlock_shares(&b, dec!(30000)).unwrap();
        assert_eq!(breakdown.shares_unlocked, 30);
        assert_eq!(breakdown.new_shares_owned, 30);
        assert_eq!(breakdown.percent_paid, dec!(30));
        assert!(!breakdown.completed);
    }

    #[test]
    fn second_payment_completes_booking() {
        let mut b = booking(100, dec!(1000));
        let first = unlock_shares(&b, dec!(30000)).unwrap();
        b.apply_payment(&first);
        assert_eq!(b.status, BookingStatus::PartiallyPaid);

        let second = unlock_shares(&b, dec!(70000)).unwrap();
        assert_eq!(second.shares_unlocked, 70);
        assert_eq!(second.new_shares_owned, 100);
        assert!(second.completed);
        b.apply_payment(&second);
        assert_eq!(b.status, BookingStatus::Completed);
    }

    #[test]
    fn partial_share_payment_unlocks_nothing() {
        let b = booking(100, dec!(1000));
        let breakdown = unlock_shares(&b, dec!(999)).unwrap();
        assert_eq!(breakdown.shares_unlocked, 0);
        assert_eq!(breakdown.new_cumulative_payments, dec!(999));
        assert!(!breakdown.completed);
    }

    #[test]
    fn overpayment_clamps_to_contracted_quantity() {
        let b = booking(10, dec!(100));
        let breakdown = unlock_shares(&b, dec!(5000)).unwrap();
        assert_eq!(breakdown.new_shares_owned, 10);
        assert_eq!(breakdown.shares_unlocked, 10);
        assert!(breakdown.completed);
    }

    #[test]
    fn ownership_never_decreases() {
        let mut b = booking(100, dec!(1000));
        let first = unlock_shares(&b, dec!(50000)).unwrap();
        b.apply_payment(&first);
        assert_eq!(b.shares_owned, 50);

        // A fractional follow-up keeps ownership where it was.
        let second = unlock_shares(&b, dec!(1)).unwrap();
        assert_eq!(second.shares_unlocked, 0);
        assert_eq!(second.new_shares_owned, 50);
    }

    #[test]
    fn paid_ownership_invariant_holds() {
        let mut b = booking(100, dec!(997));
        for payment in [dec!(12345.67), dec!(1), dec!(50000), dec!(36353.33)] {
            let breakdown = unlock_shares(&b, payment).unwrap();
            b.apply_payment(&breakdown);
            assert!(
                b.cumulative_payments
                    >= from_shares(b.shares_owned) * b.booked_price_per_share
            );
            assert!(b.shares_owned <= b.quantity);
        }
    }

    #[test]
    fn non_positive_payment_is_invalid_argument() {
        let b = booking(100, dec!(1000));
        assert!(matches!(
            unlock_shares(&b, dec!(0)),
            Err(LedgerError::InvalidArgument(_))
        ));
        assert!(matches!(
            unlock_shares(&b, dec!(-5)),
            Err(LedgerError::InvalidArgument(_))
        ));
    }

    #[test]
    fn terminal_booking_is_invalid_state() {
        let mut b = booking(100, dec!(1000));
        b.status = BookingStatus::Cancelled;
        assert!(matches!(
            unlock_shares(&b, dec!(1000)),
            Err(LedgerError::InvalidState(_))
        ));
    }
}
