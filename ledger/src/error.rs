use thiserror::Error;

use core_types::{ids::ShareClassId, money::Money};

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Error taxonomy surfaced at the accounting boundary.
///
/// Reconciliation drift is deliberately absent: drift is recorded and
/// logged, never raised.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum LedgerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: Money, available: Money },
    #[error("insufficient shares: required {required}, available {available}")]
    InsufficientShares { required: u64, available: u64 },
    #[error("transfer value {actual} below minimum {minimum}")]
    BelowMinimum { minimum: Money, actual: Money },
    #[error("selling limit exceeded: {}", .violations.join("; "))]
    LimitExceeded { violations: Vec<String> },
    #[error("concurrent update on pool {share_class}: expected version {expected}, actual {actual}")]
    ConcurrencyConflict {
        share_class: ShareClassId,
        expected: u64,
        actual: u64,
    },
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },
}

impl LedgerError {
    /// Only concurrency conflicts are safe to retry automatically.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::ConcurrencyConflict { .. })
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        LedgerError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
