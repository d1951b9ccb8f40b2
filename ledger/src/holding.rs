use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_types::{
    ids::{BookingId, HoldingId, ShareClassId, UserId},
    money::{from_shares, Money},
};
use rust_decimal::Decimal;

use crate::error::{LedgerError, Result};

/// Where a holding's shares came from. Shares unlocked progressively by an
/// installment booking stay attributed to that booking until it completes,
/// so pool recomputation can count them exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldingSource {
    Direct,
    Booking(BookingId),
}

/// A user's fully-owned position in one share class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub id: HoldingId,
    pub user: UserId,
    pub share_class: ShareClassId,
    pub quantity: u64,
    pub average_buy_price: Money,
    pub total_invested: Money,
    pub source: HoldingSource,
    pub updated_at: DateTime<Utc>,
}

impl Holding {
    pub fn new(
        id: HoldingId,
        user: UserId,
        share_class: ShareClassId,
        source: HoldingSource,
    ) -> Self {
        Self {
            id,
            user,
            share_class,
            quantity: 0,
            average_buy_price: Decimal::ZERO,
            total_invested: Decimal::ZERO,
            source,
            updated_at: Utc::now(),
        }
    }

    /// Add shares at `price`, folding them into the weighted-average buy
    /// price.
    pub fn credit(&mut self, quantity: u64, price: Money) {
        if quantity == 0 {
            return;
        }
        let added_value = from_shares(quantity) * price;
        let old_value = from_shares(self.quantity) * self.average_buy_price;
        let new_quantity = self.quantity + quantity;
        self.average_buy_price = (old_value + added_value) / from_shares(new_quantity);
        self.total_invested += added_value;
        self.quantity = new_quantity;
        self.updated_at = Utc::now();
    }

    /// Remove shares; the position never goes negative.
    pub fn debit(&mut self, quantity: u64) -> Result<()> {
        if quantity > self.quantity {
            return Err(LedgerError::InsufficientShares {
                required: quantity,
                available: self.quantity,
            });
        }
        self.total_invested -= from_shares(quantity) * self.average_buy_price;
        self.quantity -= quantity;
        if self.quantity == 0 {
            self.average_buy_price = Decimal::ZERO;
            self.total_invested = Decimal::ZERO;
        }
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn holding() -> Holding {
        Holding::new(
            HoldingId::from("h1"),
            UserId::from("u1"),
            ShareClassId::from("gold-a"),
            HoldingSource::Direct,
        )
    }

    #[test]
    fn credit_computes_weighted_average() {
        let mut h = holding();
        h.credit(100, dec!(1000));
        assert_eq!(h.quantity, 100);
        assert_eq!(h.average_buy_price, dec!(1000));

        h.credit(50, dec!(1600));
        assert_eq!(h.quantity, 150);
        // (100*1000 + 50*1600) / 150 = 1200
        assert_eq!(h.average_buy_price, dec!(1200));
        assert_eq!(h.total_invested, dec!(180000));
    }

    #[test]
    fn debit_rejects_overdraw_with_shortfall() {
        let mut h = holding();
        h.credit(10, dec!(500));
        let err = h.debit(11).unwrap_err();
        assert_eq!(
            err,
            LedgerError::InsufficientShares {
                required: 11,
                available: 10
            }
        );
        assert_eq!(h.quantity, 10);
    }

    #[test]
    fn debit_to_zero_clears_cost_basis() {
        let mut h = holding();
        h.credit(10, dec!(500));
        h.debit(10).unwrap();
        assert_eq!(h.quantity, 0);
        assert_eq!(h.average_buy_price, dec!(0));
        assert_eq!(h.total_invested, dec!(0));
    }
}
