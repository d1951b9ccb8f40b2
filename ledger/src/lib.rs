//! Share ownership and pool accounting core.
//!
//! The crate exposes:
//! - [`LedgerController`]: high-level API orchestrating payments, transfers,
//!   sales, and pool reconciliation.
//! - [`LedgerService`]: async boundary over the controller with a single
//!   automatic retry on concurrency conflicts.
//! - [`recompute_availability`]: the pure pool math shared by live
//!   availability checks and the reconciliation sweep.

pub mod booking;
pub mod controller;
pub mod error;
pub mod holding;
pub mod limits;
pub mod pool;
pub mod service;
pub mod store;
pub mod transfer;

pub use booking::{unlock_shares, Booking, PaymentBreakdown};
pub use controller::{LedgerController, PoolDelta, ReconcileReport};
pub use error::{LedgerError, Result};
pub use holding::{Holding, HoldingSource};
pub use limits::{max_allowed, LimitCheck, LimitType, PeriodType, SellingLimit};
pub use pool::{recompute_availability, PoolBreakdown, SharePool};
pub use service::LedgerService;
pub use store::{DriftEvent, LedgerStore, MemoryStore};
pub use transfer::{compute_fee, TransferOutcome, TransferRequest};
