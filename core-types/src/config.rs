use config::{Config, ConfigError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Top-level application configuration, loaded from `config.toml` plus
/// `SHAREPOOL_*` environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub transfer_fees: TransferFeeConfig,
    #[serde(default)]
    pub reconciliation: ReconciliationConfig,
    #[serde(default)]
    pub booking: BookingConfig,
}

/// Fee schedule applied to share transfers.
///
/// `fee = clamp(transfer_value * percentage_rate + flat_fee, minimum_fee,
/// maximum_fee)`; transfers below `minimum_transfer_value` are rejected
/// outright.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferFeeConfig {
    #[serde(default = "default_percentage_rate")]
    pub percentage_rate: Decimal,
    #[serde(default = "default_flat_fee")]
    pub flat_fee: Decimal,
    #[serde(default = "default_minimum_fee")]
    pub minimum_fee: Decimal,
    #[serde(default)]
    pub maximum_fee: Option<Decimal>,
    #[serde(default = "default_minimum_transfer_value")]
    pub minimum_transfer_value: Decimal,
}

fn default_percentage_rate() -> Decimal {
    Decimal::new(1, 2) // 1%
}

fn default_flat_fee() -> Decimal {
    Decimal::from(5_000)
}

fn default_minimum_fee() -> Decimal {
    Decimal::from(5_000)
}

fn default_minimum_transfer_value() -> Decimal {
    Decimal::from(10_000)
}

impl Default for TransferFeeConfig {
    fn default() -> Self {
        Self {
            percentage_rate: default_percentage_rate(),
            flat_fee: default_flat_fee(),
            minimum_fee: default_minimum_fee(),
            maximum_fee: None,
            minimum_transfer_value: default_minimum_transfer_value(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    #[serde(default = "default_interval_s")]
    pub interval_s: u64,
    /// Pool counters are integral share units, so any non-zero disagreement
    /// between cached and recomputed availability counts as drift.
    #[serde(default = "default_drift_tolerance")]
    pub drift_tolerance: Decimal,
}

fn default_interval_s() -> u64 {
    300
}

fn default_drift_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            interval_s: default_interval_s(),
            drift_tolerance: default_drift_tolerance(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookingConfig {
    /// Days a pending booking may sit without payment before expiry.
    #[serde(default = "default_expiry_days")]
    pub expiry_days: u32,
}

fn default_expiry_days() -> u32 {
    30
}

impl Default for BookingConfig {
    fn default() -> Self {
        Self {
            expiry_days: default_expiry_days(),
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let settings = Config::builder()
            .add_source(config::File::with_name("config.toml").required(false))
            .add_source(config::Environment::with_prefix("SHAREPOOL").separator("__"))
            .build()?;
        settings.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn default_fee_schedule_matches_platform_rules() {
        let fees = TransferFeeConfig::default();
        assert_eq!(fees.percentage_rate, dec!(0.01));
        assert_eq!(fees.flat_fee, dec!(5000));
        assert_eq!(fees.minimum_fee, dec!(5000));
        assert_eq!(fees.maximum_fee, None);
        assert_eq!(fees.minimum_transfer_value, dec!(10000));
    }

    #[test]
    fn default_reconciliation_interval() {
        let recon = ReconciliationConfig::default();
        assert_eq!(recon.interval_s, 300);
        assert_eq!(recon.drift_tolerance, dec!(0.01));
    }
}
