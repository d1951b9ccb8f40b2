use log::{debug, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use chrono::Utc;
use core_types::{
    config::AppConfig,
    ids::{BookingId, HoldingId, PaymentReference, ShareClassId, TransferId, UserId},
    money::{from_shares, Money},
    status::{BookingStatus, TransferStatus},
};

use crate::{
    booking::{unlock_shares, Booking, PaymentBreakdown},
    error::{LedgerError, Result},
    holding::{Holding, HoldingSource},
    limits::{self, LimitCheck, SellingLimit},
    pool::{recompute_availability, PoolBreakdown, SharePool},
    store::{DriftEvent, LedgerStore},
    transfer::{compute_fee, validate_transfer_value, TransferOutcome, TransferRequest},
};

/// Per-pool availability delta observed during a reconciliation sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolDelta {
    pub share_class: ShareClassId,
    pub previous: u64,
    pub recomputed: u64,
}

impl PoolDelta {
    pub fn delta(&self) -> i64 {
        self.recomputed as i64 - self.previous as i64
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub pools_updated: usize,
    pub deltas: Vec<PoolDelta>,
}

/// High-level accounting API. Every mutation of a share class runs inside
/// that pool's store guard, so concurrent payments, purchases, transfers,
/// and reconciliation sweeps against one pool serialize.
pub struct LedgerController<S: LedgerStore> {
    config: AppConfig,
    store: S,
}

impl<S: LedgerStore> LedgerController<S> {
    pub fn new(config: AppConfig, store: S) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    // ---- pool administration ----

    pub fn register_pool(&self, pool: SharePool) -> Result<SharePool> {
        if pool.reserved_issued > pool.reserved_shares {
            return Err(LedgerError::InvalidArgument(format!(
                "reserved_issued {} exceeds reserved_shares {}",
                pool.reserved_issued, pool.reserved_shares
            )));
        }
        if pool.net_reserved() > pool.total_shares {
            return Err(LedgerError::InvalidArgument(format!(
                "net reserve {} exceeds total supply {}",
                pool.net_reserved(),
                pool.total_shares
            )));
        }
        info!(
            "registered pool {} ({} shares, {} reserved)",
            pool.id, pool.total_shares, pool.reserved_shares
        );
        self.store.insert_pool(pool.clone())?;
        Ok(pool)
    }

    pub fn share_pool(&self, id: &ShareClassId) -> Result<SharePool> {
        self.store.share_pool(id)
    }

    pub fn holdings(&self, user: &UserId, share_class: &ShareClassId) -> Vec<Holding> {
        self.store.holdings(user, share_class)
    }

    pub fn bookings(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        statuses: &[BookingStatus],
    ) -> Vec<Booking> {
        self.store.bookings(user, share_class, statuses)
    }

    // ---- booking flow ----

    /// Open an installment booking, reserving its quantity out of the pool.
    /// Idempotent by booking id.
    pub fn create_booking(
        &self,
        id: BookingId,
        user: UserId,
        share_class: ShareClassId,
        quantity: u64,
        price_per_share: Money,
    ) -> Result<Booking> {
        if quantity == 0 {
            return Err(LedgerError::InvalidArgument(
                "booking quantity must be positive".to_string(),
            ));
        }
        if price_per_share <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "booked price must be positive, got {price_per_share}"
            )));
        }
        if let Ok(existing) = self.store.booking(&id) {
            return Ok(existing);
        }

        let guard = self.store.pool_guard(&share_class);
        let _lock = guard.lock();

        // Re-check under the guard; a concurrent duplicate may have won the
        // race between the fast-path lookup and the lock.
        if let Ok(existing) = self.store.booking(&id) {
            return Ok(existing);
        }

        let (pool, breakdown) = self.derive_pool_state(&share_class)?;
        if quantity > breakdown.available {
            return Err(LedgerError::InsufficientShares {
                required: quantity,
                available: breakdown.available,
            });
        }

        let booking = Booking::new(id, user, share_class, quantity, price_per_share);
        self.persist_availability(pool, breakdown.available - quantity)?;
        self.store.put_booking(booking.clone());
        debug!(
            "booking {} opened: {} shares at {}",
            booking.id, booking.quantity, booking.booked_price_per_share
        );
        Ok(booking)
    }

    /// Apply an installment payment, unlocking progressively-owned shares.
    ///
    /// Reference-idempotent: a replayed reference returns the recorded
    /// breakdown without touching any balance. Booking, holding, and pool
    /// all change inside the pool guard or not at all; every write is staged
    /// until the pool version check succeeds, so a conflicting writer leaves
    /// the payment fully unapplied and the reference replayable.
    pub fn apply_booking_payment(
        &self,
        booking_id: &BookingId,
        amount: Money,
        reference: &PaymentReference,
    ) -> Result<PaymentBreakdown> {
        if reference.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "payment reference must not be empty".to_string(),
            ));
        }
        if let Some(prior) = self.store.recorded_payment(reference) {
            debug!("payment reference {reference} replayed; returning recorded outcome");
            return Ok(prior);
        }

        let booking = self.store.booking(booking_id)?;
        let guard = self.store.pool_guard(&booking.share_class);
        let _lock = guard.lock();

        // Re-check under the guard; a concurrent duplicate may have won the
        // race between the fast-path lookup and the lock.
        if let Some(prior) = self.store.recorded_payment(reference) {
            debug!("payment reference {reference} replayed; returning recorded outcome");
            return Ok(prior);
        }

        // Re-read inside the guard; another payment may have landed first.
        let mut booking = self.store.booking(booking_id)?;
        let breakdown = unlock_shares(&booking, amount)?;
        booking.apply_payment(&breakdown);

        // Stage the holding changes; nothing is written until the pool
        // version check below succeeds.
        let mut staged_holdings = Vec::new();
        let mut removed_holding = None;
        if breakdown.shares_unlocked > 0 {
            let derived_id = booking_holding_id(&booking.user, &booking.share_class, &booking.id);
            let mut derived = self.store.holding(&derived_id).unwrap_or_else(|| {
                Holding::new(
                    derived_id.clone(),
                    booking.user.clone(),
                    booking.share_class.clone(),
                    HoldingSource::Booking(booking.id.clone()),
                )
            });
            derived.credit(breakdown.shares_unlocked, booking.booked_price_per_share);

            if breakdown.completed {
                // Fold the paid-off position into the user's direct holding.
                let mut direct =
                    self.load_or_new_direct_holding(&booking.user, &booking.share_class);
                direct.credit(derived.quantity, booking.booked_price_per_share);
                staged_holdings.push(direct);
                removed_holding = Some(derived_id);
            } else {
                staged_holdings.push(derived);
            }
        }

        let (pool, pool_breakdown) = self.preview_availability(
            &booking.share_class,
            &staged_holdings,
            removed_holding.as_ref(),
            Some(&booking),
        )?;
        self.persist_availability(pool, pool_breakdown.available)?;

        for holding in staged_holdings {
            self.store.put_holding(holding);
        }
        if let Some(id) = removed_holding {
            self.store.remove_holding(&id);
        }
        self.store.put_booking(booking.clone());
        self.store
            .record_payment(reference.clone(), breakdown.clone());
        info!(
            "payment {} on booking {}: {} shares unlocked ({}% paid)",
            reference,
            booking.id,
            breakdown.shares_unlocked,
            breakdown.percent_paid.round_dp(2)
        );
        Ok(breakdown)
    }

    /// Cancel an open booking, releasing its unpaid reservation. No-op when
    /// the booking is already terminal, to stay idempotent under retries.
    pub fn cancel_booking(&self, id: &BookingId) -> Result<Booking> {
        self.close_booking(id, BookingStatus::Cancelled)
    }

    /// Expire an open booking via timeout. Same terminal semantics as
    /// cancellation.
    pub fn expire_booking(&self, id: &BookingId) -> Result<Booking> {
        self.close_booking(id, BookingStatus::Expired)
    }

    fn close_booking(&self, id: &BookingId, terminal: BookingStatus) -> Result<Booking> {
        let booking = self.store.booking(id)?;
        let guard = self.store.pool_guard(&booking.share_class);
        let _lock = guard.lock();

        let mut booking = self.store.booking(id)?;
        if booking.status.is_terminal() {
            return Ok(booking);
        }
        booking.status = terminal;
        booking.updated_at = Utc::now();

        let (pool, breakdown) =
            self.preview_availability(&booking.share_class, &[], None, Some(&booking))?;
        self.persist_availability(pool, breakdown.available)?;
        self.store.put_booking(booking.clone());
        info!("booking {} closed as {:?}", booking.id, terminal);
        Ok(booking)
    }

    // ---- direct purchase and sale ----

    /// Buy shares outright from the pool. Reference-idempotent.
    pub fn purchase_shares(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        quantity: u64,
        price_per_share: Money,
        reference: &PaymentReference,
    ) -> Result<Holding> {
        if reference.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "purchase reference must not be empty".to_string(),
            ));
        }
        if quantity == 0 {
            return Err(LedgerError::InvalidArgument(
                "purchase quantity must be positive".to_string(),
            ));
        }
        if price_per_share <= Decimal::ZERO {
            return Err(LedgerError::InvalidArgument(format!(
                "purchase price must be positive, got {price_per_share}"
            )));
        }
        if let Some(prior) = self.store.recorded_trade(reference) {
            return Ok(prior);
        }

        let guard = self.store.pool_guard(share_class);
        let _lock = guard.lock();

        // Re-check under the guard; a concurrent duplicate may have won the
        // race between the fast-path lookup and the lock.
        if let Some(prior) = self.store.recorded_trade(reference) {
            return Ok(prior);
        }

        let (pool, breakdown) = self.derive_pool_state(share_class)?;
        if quantity > breakdown.available {
            return Err(LedgerError::InsufficientShares {
                required: quantity,
                available: breakdown.available,
            });
        }

        let mut direct = self.load_or_new_direct_holding(user, share_class);
        direct.credit(quantity, price_per_share);
        self.persist_availability(pool, breakdown.available - quantity)?;
        self.store.put_holding(direct.clone());
        self.store.record_trade(reference.clone(), direct.clone());
        info!(
            "purchase {}: {} bought {} shares of {}",
            reference, user, quantity, share_class
        );
        Ok(direct)
    }

    /// Sell shares back to the pool, subject to the account type's selling
    /// limits. Proceeds are credited to the seller's wallet.
    pub fn sell_shares(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        quantity: u64,
        price_per_share: Money,
        account_type: &str,
        reference: &PaymentReference,
    ) -> Result<Holding> {
        if reference.is_empty() {
            return Err(LedgerError::InvalidArgument(
                "sale reference must not be empty".to_string(),
            ));
        }
        if quantity == 0 {
            return Err(LedgerError::InvalidArgument(
                "sale quantity must be positive".to_string(),
            ));
        }
        if let Some(prior) = self.store.recorded_trade(reference) {
            return Ok(prior);
        }

        let guard = self.store.pool_guard(share_class);
        let _lock = guard.lock();

        // Re-check under the guard; a concurrent duplicate may have won the
        // race between the fast-path lookup and the lock.
        if let Some(prior) = self.store.recorded_trade(reference) {
            return Ok(prior);
        }

        let mut direct = self.load_or_new_direct_holding(user, share_class);
        let check = self.check_selling_limits(direct.quantity, quantity, account_type);
        if !check.is_valid {
            return Err(LedgerError::LimitExceeded {
                violations: check.violations,
            });
        }
        direct.debit(quantity)?;

        let (pool, breakdown) =
            self.preview_availability(share_class, std::slice::from_ref(&direct), None, None)?;
        self.persist_availability(pool, breakdown.available)?;
        self.store.put_holding(direct.clone());

        let proceeds = from_shares(quantity) * price_per_share;
        let balance = self.store.wallet_balance(user);
        self.store.set_wallet_balance(user, balance + proceeds);
        self.store.record_trade(reference.clone(), direct.clone());
        info!(
            "sale {}: {} sold {} shares of {} for {}",
            reference, user, quantity, share_class, proceeds
        );
        Ok(direct)
    }

    // ---- transfers ----

    /// Open a transfer request with its fee fixed up front.
    /// Idempotent by transfer id.
    pub fn request_transfer(
        &self,
        id: TransferId,
        sender: UserId,
        recipient: UserId,
        share_class: ShareClassId,
        quantity: u64,
        price_per_share: Money,
    ) -> Result<TransferRequest> {
        if sender == recipient {
            return Err(LedgerError::InvalidArgument(
                "sender and recipient must differ".to_string(),
            ));
        }
        if let Ok(existing) = self.store.transfer(&id) {
            return Ok(existing);
        }
        let value = validate_transfer_value(
            quantity,
            price_per_share,
            &self.config.transfer_fees,
        )?;
        let fee = compute_fee(value, &self.config.transfer_fees);
        let now = Utc::now();
        let request = TransferRequest {
            id,
            sender,
            recipient,
            share_class,
            quantity,
            price_per_share,
            fee,
            status: TransferStatus::Pending,
            reason: None,
            created_at: now,
            updated_at: now,
        };
        self.store.put_transfer(request.clone());
        debug!(
            "transfer {} requested: {} shares at {}, fee {}",
            request.id, request.quantity, request.price_per_share, request.fee
        );
        Ok(request)
    }

    pub fn approve_transfer(&self, id: &TransferId) -> Result<TransferRequest> {
        let mut request = self.store.transfer(id)?;
        match request.status {
            TransferStatus::Pending => {
                request.status = TransferStatus::Approved;
                request.updated_at = Utc::now();
                self.store.put_transfer(request.clone());
                Ok(request)
            }
            TransferStatus::Approved => Ok(request),
            status => Err(LedgerError::InvalidState(format!(
                "transfer {id} cannot be approved from {status:?}"
            ))),
        }
    }

    /// Reject a transfer; balances never move. No-op once terminal.
    pub fn reject_transfer(&self, id: &TransferId, reason: &str) -> Result<TransferRequest> {
        let mut request = self.store.transfer(id)?;
        if request.status.is_terminal() {
            return Ok(request);
        }
        request.status = TransferStatus::Rejected;
        request.reason = Some(reason.to_string());
        request.updated_at = Utc::now();
        self.store.put_transfer(request.clone());
        info!("transfer {} rejected: {}", id, reason);
        Ok(request)
    }

    /// Execute a pending/approved transfer. Idempotent by transfer id; all
    /// four effects (sender debit, recipient credit, fee debit, completion)
    /// land together or not at all.
    pub fn execute_transfer(&self, id: &TransferId) -> Result<TransferOutcome> {
        if let Some(prior) = self.store.recorded_transfer(id) {
            return Ok(prior);
        }

        let request = self.store.transfer(id)?;
        let guard = self.store.pool_guard(&request.share_class);
        let _lock = guard.lock();

        // Re-check under the guard; a concurrent duplicate may have won the
        // race between the fast-path lookup and the lock.
        if let Some(prior) = self.store.recorded_transfer(id) {
            return Ok(prior);
        }

        let request = self.store.transfer(id)?;
        if request.status.is_terminal() {
            return Err(LedgerError::InvalidState(format!(
                "transfer {} already {:?}",
                id, request.status
            )));
        }

        // Validate everything before mutating anything.
        let mut sender_holding =
            self.load_or_new_direct_holding(&request.sender, &request.share_class);
        if sender_holding.quantity < request.quantity {
            return Err(LedgerError::InsufficientShares {
                required: request.quantity,
                available: sender_holding.quantity,
            });
        }
        let sender_wallet = self.store.wallet_balance(&request.sender);
        if sender_wallet < request.fee {
            return Err(LedgerError::InsufficientFunds {
                required: request.fee,
                available: sender_wallet,
            });
        }

        let mut recipient_holding =
            self.load_or_new_direct_holding(&request.recipient, &request.share_class);
        sender_holding.debit(request.quantity)?;
        recipient_holding.credit(request.quantity, request.price_per_share);
        self.store.put_holding(sender_holding.clone());
        self.store.put_holding(recipient_holding.clone());
        self.store
            .set_wallet_balance(&request.sender, sender_wallet - request.fee);

        let mut completed = request;
        completed.status = TransferStatus::Completed;
        completed.updated_at = Utc::now();
        self.store.put_transfer(completed.clone());

        let outcome = TransferOutcome {
            request_id: completed.id.clone(),
            status: TransferStatus::Completed,
            fee: completed.fee,
            sender_remaining: sender_holding.quantity,
            recipient_total: recipient_holding.quantity,
        };
        self.store.record_transfer(completed.id.clone(), outcome.clone());
        info!(
            "transfer {} completed: {} shares {} -> {}, fee {}",
            completed.id, completed.quantity, completed.sender, completed.recipient, completed.fee
        );
        Ok(outcome)
    }

    // ---- selling limits ----

    pub fn active_selling_limits(&self, account_type: &str) -> Vec<SellingLimit> {
        self.store.active_selling_limits(account_type)
    }

    /// Largest disposal the account type's limits allow right now.
    pub fn max_sale_quantity(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        account_type: &str,
    ) -> u64 {
        let total = self.sellable_quantity(user, share_class);
        limits::max_allowed(total, &self.store.active_selling_limits(account_type))
    }

    /// Check a proposed disposal, reporting every breached rule.
    pub fn validate_sale(
        &self,
        user: &UserId,
        share_class: &ShareClassId,
        quantity: u64,
        account_type: &str,
    ) -> LimitCheck {
        let total = self.sellable_quantity(user, share_class);
        self.check_selling_limits(total, quantity, account_type)
    }

    fn check_selling_limits(
        &self,
        total_holdings: u64,
        quantity: u64,
        account_type: &str,
    ) -> LimitCheck {
        limits::validate(
            quantity,
            total_holdings,
            &self.store.active_selling_limits(account_type),
        )
    }

    fn sellable_quantity(&self, user: &UserId, share_class: &ShareClassId) -> u64 {
        self.store
            .holding(&direct_holding_id(user, share_class))
            .map(|h| h.quantity)
            .unwrap_or(0)
    }

    // ---- availability and reconciliation ----

    /// Recompute availability from holdings and bookings and persist it.
    /// Disagreement with the cached value is recorded as drift and logged,
    /// never raised; the recomputed value wins.
    pub fn recompute_and_persist_availability(&self, share_class: &ShareClassId) -> Result<u64> {
        let guard = self.store.pool_guard(share_class);
        let _lock = guard.lock();
        let (pool, breakdown) = self.derive_pool_state(share_class)?;
        self.note_drift(&pool, breakdown.available);
        self.persist_availability(pool, breakdown.available)?;
        Ok(breakdown.available)
    }

    /// Recompute every pool from first principles. Idempotent: a second
    /// sweep with no intervening mutation reports zero deltas.
    pub fn reconcile_all(&self) -> ReconcileReport {
        let mut deltas = Vec::new();
        let mut pools_updated = 0;
        for share_class in self.store.pool_ids() {
            let guard = self.store.pool_guard(&share_class);
            let _lock = guard.lock();
            let (pool, breakdown) = match self.derive_pool_state(&share_class) {
                Ok(state) => state,
                Err(err) => {
                    warn!("reconciliation skipped pool {share_class}: {err}");
                    continue;
                }
            };
            let previous = pool.available_shares;
            self.note_drift(&pool, breakdown.available);
            if let Err(err) = self.persist_availability(pool, breakdown.available) {
                warn!("reconciliation failed to persist pool {share_class}: {err}");
                continue;
            }
            if previous != breakdown.available {
                pools_updated += 1;
            }
            deltas.push(PoolDelta {
                share_class,
                previous,
                recomputed: breakdown.available,
            });
        }
        if pools_updated > 0 {
            info!("reconciliation corrected {pools_updated} pool(s)");
        }
        ReconcileReport {
            pools_updated,
            deltas,
        }
    }

    pub fn drift_events(&self) -> Vec<DriftEvent> {
        self.store.drift_events()
    }

    // ---- internals (pool guard must be held) ----

    fn derive_pool_state(&self, share_class: &ShareClassId) -> Result<(SharePool, PoolBreakdown)> {
        let pool = self.store.share_pool(share_class)?;
        let holdings = self.store.holdings_for_pool(share_class);
        let bookings = self.store.bookings_for_pool(share_class);
        let breakdown = recompute_availability(&pool, &holdings, &bookings);
        if !breakdown.conserves(pool.total_shares) {
            warn!(
                "pool {} oversold: sold {} + booked {} + reserved {} exceeds total {}",
                pool.id,
                breakdown.sold,
                breakdown.pure_booked,
                breakdown.net_reserved,
                pool.total_shares
            );
        }
        Ok((pool, breakdown))
    }

    /// Availability as it will stand once the staged records are written.
    /// Overlays the staged holdings/booking on the stored state so the pool
    /// write can precede the record writes; runs under the pool guard, so
    /// the preview cannot go stale before the commit.
    fn preview_availability(
        &self,
        share_class: &ShareClassId,
        staged_holdings: &[Holding],
        removed_holding: Option<&HoldingId>,
        staged_booking: Option<&Booking>,
    ) -> Result<(SharePool, PoolBreakdown)> {
        let pool = self.store.share_pool(share_class)?;
        let mut holdings = self.store.holdings_for_pool(share_class);
        holdings.retain(|h| {
            removed_holding != Some(&h.id) && !staged_holdings.iter().any(|s| s.id == h.id)
        });
        holdings.extend_from_slice(staged_holdings);
        let mut bookings = self.store.bookings_for_pool(share_class);
        if let Some(staged) = staged_booking {
            match bookings.iter_mut().find(|b| b.id == staged.id) {
                Some(existing) => *existing = staged.clone(),
                None => bookings.push(staged.clone()),
            }
        }
        let breakdown = recompute_availability(&pool, &holdings, &bookings);
        Ok((pool, breakdown))
    }

    /// Compare the recomputed value against the cached one. Only called on
    /// recompute/reconcile paths, where no mutation separates the two; a
    /// mismatch there is genuine upstream drift. Logged and recorded for
    /// audit, never raised, so the subsequent write is never blocked.
    fn note_drift(&self, pool: &SharePool, recomputed: u64) {
        let tolerance = self.config.reconciliation.drift_tolerance;
        let cached = pool.available_shares;
        if Decimal::from(cached.abs_diff(recomputed)) > tolerance {
            warn!(
                "pool {} availability drift: cached {}, recomputed {}",
                pool.id, cached, recomputed
            );
            self.store.record_drift(DriftEvent {
                share_class: pool.id.clone(),
                cached,
                recomputed,
                observed_at: Utc::now(),
            });
        }
    }

    fn persist_availability(&self, pool: SharePool, available: u64) -> Result<SharePool> {
        let expected = pool.version;
        let mut next = pool;
        next.available_shares = available;
        self.store.put_share_pool(next, Some(expected))
    }

    fn load_or_new_direct_holding(&self, user: &UserId, share_class: &ShareClassId) -> Holding {
        let id = direct_holding_id(user, share_class);
        self.store.holding(&id).unwrap_or_else(|| {
            Holding::new(
                id,
                user.clone(),
                share_class.clone(),
                HoldingSource::Direct,
            )
        })
    }
}

fn direct_holding_id(user: &UserId, share_class: &ShareClassId) -> HoldingId {
    HoldingId::new(format!("{user}:{share_class}:direct"))
}

fn booking_holding_id(
    user: &UserId,
    share_class: &ShareClassId,
    booking: &BookingId,
) -> HoldingId {
    HoldingId::new(format!("{user}:{share_class}:booking:{booking}"))
}
