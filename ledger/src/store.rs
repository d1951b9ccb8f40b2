use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use core_types::{
    ids::{BookingId, HoldingId, PaymentReference, ShareClassId, TransferId, UserId},
    money::Money,
    status::BookingStatus,
};
use rust_decimal::Decimal;

use crate::{
    booking::{Booking, PaymentBreakdown},
    error::{LedgerError, Result},
    holding::Holding,
    limits::SellingLimit,
    pool::SharePool,
    transfer::{TransferOutcome, TransferRequest},
};

/// Drift observed by reconciliation: the cached availability disagreed with
/// the recomputed value. Retained for audit, never raised as an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftEvent {
    pub share_class: ShareClassId,
    pub cached: u64,
    pub recomputed: u64,
    pub observed_at: DateTime<Utc>,
}

impl DriftEvent {
    pub fn delta(&self) -> i64 {
        self.recomputed as i64 - self.cached as i64
    }
}

/// Persistence boundary for the accounting core.
///
/// Implementations must serialize pool writes: `pool_guard` hands out one
/// mutex per share class, and every compute-then-write window (payment,
/// purchase, transfer, reconciliation) runs under it. `put_share_pool`
/// additionally supports an optimistic version check for writers that
/// bypass the guard (e.g. an external row-store backend).
pub trait LedgerStore: Send + Sync {
    fn pool_guard(&self, id: &ShareClassId) -> Arc<Mutex<()>>;

    fn share_pool(&self, id: &ShareClassId) -> Result<SharePool>;
    fn insert_pool(&self, pool: SharePool) -> Result<()>;
    fn put_share_pool(&self, pool: SharePool, expected_version: Option<u64>) -> Result<SharePool>;
    fn pool_ids(&self) -> Vec<ShareClassId>;

    fn holdings(&self, user: &UserId, share_class: &ShareClassId) -> Vec<Holding>;
    fn holdings_for_pool(&self, share_class: &ShareClassId) -> Vec<Holding>;
    fn holding(&self, id: &HoldingId) -> Option<Holding>;
    fn put_holding(&self, holding: Holding);
    fn remove_holding(&self, id: &HoldingId);

    fn booking(&self, id: &BookingId) -> Result<Booking>;
    fn bookings(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        statuses: &[BookingStatus],
    ) -> Vec<Booking>;
    fn bookings_for_pool(&self, share_class: &ShareClassId) -> Vec<Booking>;
    fn put_booking(&self, booking: Booking);

    fn transfer(&self, id: &TransferId) -> Result<TransferRequest>;
    fn put_transfer(&self, request: TransferRequest);

    fn wallet_balance(&self, user: &UserId) -> Money;
    fn set_wallet_balance(&self, user: &UserId, amount: Money);

    fn active_selling_limits(&self, account_type: &str) -> Vec<SellingLimit>;
    fn put_selling_limits(&self, account_type: &str, limits: Vec<SellingLimit>);

    fn recorded_payment(&self, reference: &PaymentReference) -> Option<PaymentBreakdown>;
    fn record_payment(&self, reference: PaymentReference, outcome: PaymentBreakdown);
    fn recorded_trade(&self, reference: &PaymentReference) -> Option<Holding>;
    fn record_trade(&self, reference: PaymentReference, holding: Holding);
    fn recorded_transfer(&self, id: &TransferId) -> Option<TransferOutcome>;
    fn record_transfer(&self, id: TransferId, outcome: TransferOutcome);

    fn record_drift(&self, event: DriftEvent);
    fn drift_events(&self) -> Vec<DriftEvent>;
}

/// In-process store backing tests and single-node deployments. A
/// transactional row store with per-row locking maps onto the same trait.
#[derive(Default)]
pub struct MemoryStore {
    pools: RwLock<HashMap<ShareClassId, SharePool>>,
    holdings: RwLock<HashMap<HoldingId, Holding>>,
    bookings: RwLock<HashMap<BookingId, Booking>>,
    transfers: RwLock<HashMap<TransferId, TransferRequest>>,
    wallets: RwLock<HashMap<UserId, Money>>,
    limits: RwLock<HashMap<String, Vec<SellingLimit>>>,
    applied_payments: RwLock<HashMap<PaymentReference, PaymentBreakdown>>,
    applied_trades: RwLock<HashMap<PaymentReference, Holding>>,
    applied_transfers: RwLock<HashMap<TransferId, TransferOutcome>>,
    drift_log: RwLock<Vec<DriftEvent>>,
    pool_guards: Mutex<HashMap<ShareClassId, Arc<Mutex<()>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryStore {
    fn pool_guard(&self, id: &ShareClassId) -> Arc<Mutex<()>> {
        let mut guards = self.pool_guards.lock();
        Arc::clone(
            guards
                .entry(id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(()))),
        )
    }

    fn share_pool(&self, id: &ShareClassId) -> Result<SharePool> {
        self.pools
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("share pool", id))
    }

    fn insert_pool(&self, pool: SharePool) -> Result<()> {
        let mut pools = self.pools.write();
        if pools.contains_key(&pool.id) {
            return Err(LedgerError::InvalidState(format!(
                "share pool {} already registered",
                pool.id
            )));
        }
        pools.insert(pool.id.clone(), pool);
        Ok(())
    }

    fn put_share_pool(&self, pool: SharePool, expected_version: Option<u64>) -> Result<SharePool> {
        let mut pools = self.pools.write();
        let current = pools
            .get(&pool.id)
            .ok_or_else(|| LedgerError::not_found("share pool", &pool.id))?;
        if let Some(expected) = expected_version {
            if current.version != expected {
                return Err(LedgerError::ConcurrencyConflict {
                    share_class: pool.id.clone(),
                    expected,
                    actual: current.version,
                });
            }
        }
        let mut next = pool;
        next.version = current.version + 1;
        next.updated_at = Utc::now();
        pools.insert(next.id.clone(), next.clone());
        Ok(next)
    }

    fn pool_ids(&self) -> Vec<ShareClassId> {
        let mut ids: Vec<_> = self.pools.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn holdings(&self, user: &UserId, share_class: &ShareClassId) -> Vec<Holding> {
        let mut out: Vec<_> = self
            .holdings
            .read()
            .values()
            .filter(|h| &h.user == user && &h.share_class == share_class)
            .cloned()
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    fn holdings_for_pool(&self, share_class: &ShareClassId) -> Vec<Holding> {
        self.holdings
            .read()
            .values()
            .filter(|h| &h.share_class == share_class)
            .cloned()
            .collect()
    }

    fn holding(&self, id: &HoldingId) -> Option<Holding> {
        self.holdings.read().get(id).cloned()
    }

    fn put_holding(&self, holding: Holding) {
        self.holdings.write().insert(holding.id.clone(), holding);
    }

    fn remove_holding(&self, id: &HoldingId) {
        self.holdings.write().remove(id);
    }

    fn booking(&self, id: &BookingId) -> Result<Booking> {
        self.bookings
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("booking", id))
    }

    fn bookings(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        statuses: &[BookingStatus],
    ) -> Vec<Booking> {
        self.bookings
            .read()
            .values()
            .filter(|b| {
                &b.user == user
                    && &b.share_class == share_class
                    && (statuses.is_empty() || statuses.contains(&b.status))
            })
            .cloned()
            .collect()
    }

    fn bookings_for_pool(&self, share_class: &ShareClassId) -> Vec<Booking> {
        self.bookings
            .read()
            .values()
            .filter(|b| &b.share_class == share_class)
            .cloned()
            .collect()
    }

    fn put_booking(&self, booking: Booking) {
        self.bookings.write().insert(booking.id.clone(), booking);
    }

    fn transfer(&self, id: &TransferId) -> Result<TransferRequest> {
        self.transfers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| LedgerError::not_found("transfer request", id))
    }

    fn put_transfer(&self, request: TransferRequest) {
        self.transfers.write().insert(request.id.clone(), request);
    }

    fn wallet_balance(&self, user: &UserId) -> Money {
        self.wallets
            .read()
            .get(user)
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    fn set_wallet_balance(&self, user: &UserId, amount: Money) {
        self.wallets.write().insert(user.clone(), amount);
    }

    fn active_selling_limits(&self, account_type: &str) -> Vec<SellingLimit> {
        self.limits
            .read()
            .get(account_type)
            .map(|limits| limits.iter().filter(|l| l.active).cloned().collect())
            .unwrap_or_default()
    }

    fn put_selling_limits(&self, account_type: &str, limits: Vec<SellingLimit>) {
        self.limits.write().insert(account_type.to_string(), limits);
    }

    fn recorded_payment(&self, reference: &PaymentReference) -> Option<PaymentBreakdown> {
        self.applied_payments.read().get(reference).cloned()
    }

    fn record_payment(&self, reference: PaymentReference, outcome: PaymentBreakdown) {
        self.applied_payments.write().insert(reference, outcome);
    }

    fn recorded_trade(&self, reference: &PaymentReference) -> Option<Holding> {
        self.applied_trades.read().get(reference).cloned()
    }

    fn record_trade(&self, reference: PaymentReference, holding: Holding) {
        self.applied_trades.write().insert(reference, holding);
    }

    fn recorded_transfer(&self, id: &TransferId) -> Option<TransferOutcome> {
        self.applied_transfers.read().get(id).cloned()
    }

    fn record_transfer(&self, id: TransferId, outcome: TransferOutcome) {
        self.applied_transfers.write().insert(id, outcome);
    }

    fn record_drift(&self, event: DriftEvent) {
        self.drift_log.write().push(event);
    }

    fn drift_events(&self) -> Vec<DriftEvent> {
        self.drift_log.read().clone()
    }
}
