use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_types::{
    config::TransferFeeConfig,
    ids::{ShareClassId, TransferId, UserId},
    money::{from_shares, Money},
    status::TransferStatus,
};

use crate::error::{LedgerError, Result};

/// A pending or completed movement of shares between two holders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub id: TransferId,
    pub sender: UserId,
    pub recipient: UserId,
    pub share_class: ShareClassId,
    pub quantity: u64,
    pub price_per_share: Money,
    pub fee: Money,
    pub status: TransferStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TransferRequest {
    pub fn transfer_value(&self) -> Money {
        from_shares(self.quantity) * self.price_per_share
    }
}

/// Outcome of executing (or replaying) a transfer request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferOutcome {
    pub request_id: TransferId,
    pub status: TransferStatus,
    pub fee: Money,
    pub sender_remaining: u64,
    pub recipient_total: u64,
}

/// `clamp(value × rate + flat, minimum, maximum?)`.
pub fn compute_fee(transfer_value: Money, fees: &TransferFeeConfig) -> Money {
    let mut fee = transfer_value * fees.percentage_rate + fees.flat_fee;
    if fee < fees.minimum_fee {
        fee = fees.minimum_fee;
    }
    if let Some(max) = fees.maximum_fee {
        if fee > max {
            fee = max;
        }
    }
    fee
}

/// Validate quantity and minimum transfer value; returns the transfer value.
pub fn validate_transfer_value(
    quantity: u64,
    price_per_share: Money,
    fees: &TransferFeeConfig,
) -> Result<Money> {
    if quantity == 0 {
        return Err(LedgerError::InvalidArgument(
            "transfer quantity must be positive".to_string(),
        ));
    }
    if price_per_share <= Decimal::ZERO {
        return Err(LedgerError::InvalidArgument(format!(
            "price per share must be positive, got {price_per_share}"
        )));
    }
    let value = from_shares(quantity) * price_per_share;
    if value < fees.minimum_transfer_value {
        return Err(LedgerError::BelowMinimum {
            minimum: fees.minimum_transfer_value,
            actual: value,
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fees() -> TransferFeeConfig {
        TransferFeeConfig::default()
    }

    #[test]
    fn fee_is_percentage_plus_flat_with_floor() {
        // 50 shares at 1000 -> value 50000, fee
        // max(5000, 500 + 5000) = 5500.
        let value = validate_transfer_value(50, dec!(1000), &fees()).unwrap();
        assert_eq!(value, dec!(50000));
        assert_eq!(compute_fee(value, &fees()), dec!(5500));
    }

    #[test]
    fn minimum_fee_floor_applies() {
        let mut schedule = fees();
        schedule.flat_fee = dec!(0);
        // 1% of 20000 = 200, floored to the 5000 minimum.
        assert_eq!(compute_fee(dec!(20000), &schedule), dec!(5000));
    }

    #[test]
    fn maximum_fee_caps_large_transfers() {
        let mut schedule = fees();
        schedule.maximum_fee = Some(dec!(25000));
        assert_eq!(compute_fee(dec!(10000000), &schedule), dec!(25000));
    }

    #[test]
    fn below_minimum_value_is_rejected_with_rule() {
        let err = validate_transfer_value(5, dec!(1000), &fees()).unwrap_err();
        assert_eq!(
            err,
            LedgerError::BelowMinimum {
                minimum: dec!(10000),
                actual: dec!(5000)
            }
        );
    }

    #[test]
    fn zero_quantity_is_invalid_argument() {
        assert!(matches!(
            validate_transfer_value(0, dec!(1000), &fees()),
            Err(LedgerError::InvalidArgument(_))
        ));
    }
}
