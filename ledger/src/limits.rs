use std::fmt;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use core_types::money::from_shares;

/// Kind of disposal cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitType {
    /// Absolute share quantity per period.
    Quantity,
    /// Percentage of the seller's total holdings per period.
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodType {
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl fmt::Display for PeriodType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PeriodType::Day => "day",
            PeriodType::Week => "week",
            PeriodType::Month => "month",
            PeriodType::Quarter => "quarter",
            PeriodType::Year => "year",
        };
        f.write_str(label)
    }
}

/// One disposal cap rule. Multiple active rules combine by taking the
/// minimum allowed quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SellingLimit {
    pub limit_type: LimitType,
    pub period: PeriodType,
    pub limit_value: Decimal,
    pub active: bool,
}

impl SellingLimit {
    /// Cap this rule imposes on a holding of `total_holdings` shares.
    fn cap(&self, total_holdings: u64) -> u64 {
        let allowed = match self.limit_type {
            LimitType::Quantity => self.limit_value.floor(),
            LimitType::Percentage => {
                (self.limit_value / Decimal::ONE_HUNDRED * from_shares(total_holdings)).floor()
            }
        };
        allowed.to_u64().unwrap_or(0)
    }

    fn describe(&self, total_holdings: u64) -> String {
        match self.limit_type {
            LimitType::Quantity => format!(
                "at most {} shares per {}",
                self.cap(total_holdings),
                self.period
            ),
            LimitType::Percentage => format!(
                "at most {}% of holdings ({} shares) per {}",
                self.limit_value,
                self.cap(total_holdings),
                self.period
            ),
        }
    }
}

/// Result of a disposal validation; collects every breached rule so the
/// caller can surface all of them at once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitCheck {
    pub is_valid: bool,
    pub violations: Vec<String>,
}

/// Largest quantity disposable under all active limits and the holding
/// itself.
pub fn max_allowed(total_holdings: u64, limits: &[SellingLimit]) -> u64 {
    limits
        .iter()
        .filter(|l| l.active)
        .map(|l| l.cap(total_holdings))
        .fold(total_holdings, u64::min)
}

/// Check `quantity` against every active limit, collecting all violations.
pub fn validate(quantity: u64, total_holdings: u64, limits: &[SellingLimit]) -> LimitCheck {
    let mut violations = Vec::new();
    if quantity > total_holdings {
        violations.push(format!(
            "requested {quantity} exceeds total holdings of {total_holdings}"
        ));
    }
    for limit in limits.iter().filter(|l| l.active) {
        if quantity > limit.cap(total_holdings) {
            violations.push(format!(
                "selling {} breaches limit: {}",
                quantity,
                limit.describe(total_holdings)
            ));
        }
    }
    LimitCheck {
        is_valid: violations.is_empty(),
        violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn quantity_limit(value: Decimal) -> SellingLimit {
        SellingLimit {
            limit_type: LimitType::Quantity,
            period: PeriodType::Day,
            limit_value: value,
            active: true,
        }
    }

    fn percentage_limit(value: Decimal) -> SellingLimit {
        SellingLimit {
            limit_type: LimitType::Percentage,
            period: PeriodType::Day,
            limit_value: value,
            active: true,
        }
    }

    #[test]
    fn combined_cap_is_minimum_across_rules() {
        // {100/day, 5%/day} on 3000 shares -> min(100, 150).
        let limits = vec![quantity_limit(dec!(100)), percentage_limit(dec!(5))];
        assert_eq!(max_allowed(3_000, &limits), 100);
    }

    #[test]
    fn holding_itself_caps_disposal() {
        // Holding of 40, limit 100/day -> 40 allowed.
        let limits = vec![quantity_limit(dec!(100))];
        assert_eq!(max_allowed(40, &limits), 40);
        let check = validate(40, 40, &limits);
        assert!(check.is_valid);
    }

    #[test]
    fn inactive_limits_are_ignored() {
        let mut limit = quantity_limit(dec!(10));
        limit.active = false;
        assert_eq!(max_allowed(500, &[limit]), 500);
    }

    #[test]
    fn all_violations_reported_not_fail_fast() {
        let limits = vec![quantity_limit(dec!(100)), percentage_limit(dec!(5))];
        let check = validate(200, 3_000, &limits);
        assert!(!check.is_valid);
        assert_eq!(check.violations.len(), 2);
        assert!(check.violations[0].contains("100 shares per day"));
        assert!(check.violations[1].contains("5% of holdings"));
    }

    #[test]
    fn percentage_cap_floors_fractional_shares() {
        // 5% of 50 shares = 2.5, floored to 2.
        let limits = vec![percentage_limit(dec!(5))];
        assert_eq!(max_allowed(50, &limits), 2);
    }
}
