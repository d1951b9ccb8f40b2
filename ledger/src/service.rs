use std::sync::Arc;

use core_types::{
    ids::{BookingId, PaymentReference, ShareClassId, TransferId, UserId},
    money::Money,
    retry::RetryPolicy,
};

use crate::{
    booking::PaymentBreakdown,
    controller::{LedgerController, ReconcileReport},
    error::{LedgerError, Result},
    holding::Holding,
    store::LedgerStore,
    transfer::TransferOutcome,
};

/// Async request/response boundary over [`LedgerController`].
///
/// Callers await each mutation before reading derived state, so they never
/// act on a stale availability snapshot. A `ConcurrencyConflict` is retried
/// automatically exactly once with backoff; every other error propagates
/// unchanged.
pub struct LedgerService<S: LedgerStore> {
    controller: Arc<LedgerController<S>>,
    retry: RetryPolicy,
}

impl<S: LedgerStore> LedgerService<S> {
    pub fn new(controller: Arc<LedgerController<S>>) -> Self {
        Self {
            controller,
            retry: RetryPolicy::single_retry(),
        }
    }

    pub fn controller(&self) -> &Arc<LedgerController<S>> {
        &self.controller
    }

    pub async fn apply_booking_payment(
        &self,
        booking_id: BookingId,
        amount: Money,
        reference: PaymentReference,
    ) -> Result<PaymentBreakdown> {
        self.retry
            .retry_transient(
                |_| {
                    let booking_id = booking_id.clone();
                    let reference = reference.clone();
                    async move {
                        self.controller
                            .apply_booking_payment(&booking_id, amount, &reference)
                    }
                },
                LedgerError::is_transient,
            )
            .await
    }

    pub async fn purchase_shares(
        &self,
        user: UserId,
        share_class: ShareClassId,
        quantity: u64,
        price_per_share: Money,
        reference: PaymentReference,
    ) -> Result<Holding> {
        self.retry
            .retry_transient(
                |_| {
                    let user = user.clone();
                    let share_class = share_class.clone();
                    let reference = reference.clone();
                    async move {
                        self.controller.purchase_shares(
                            &user,
                            &share_class,
                            quantity,
                            price_per_share,
                            &reference,
                        )
                    }
                },
                LedgerError::is_transient,
            )
            .await
    }

    pub async fn execute_transfer(&self, id: TransferId) -> Result<TransferOutcome> {
        self.retry
            .retry_transient(
                |_| {
                    let id = id.clone();
                    async move { self.controller.execute_transfer(&id) }
                },
                LedgerError::is_transient,
            )
            .await
    }

    pub async fn recompute_and_persist_availability(
        &self,
        share_class: ShareClassId,
    ) -> Result<u64> {
        self.retry
            .retry_transient(
                |_| {
                    let share_class = share_class.clone();
                    async move {
                        self.controller
                            .recompute_and_persist_availability(&share_class)
                    }
                },
                LedgerError::is_transient,
            )
            .await
    }

    pub async fn reconcile_all(&self) -> ReconcileReport {
        self.controller.reconcile_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{pool::SharePool, store::MemoryStore};
    use core_types::config::AppConfig;
    use rust_decimal_macros::dec;

    fn service() -> LedgerService<MemoryStore> {
        let controller = LedgerController::new(AppConfig::default(), MemoryStore::new());
        controller
            .register_pool(SharePool::new(
                ShareClassId::from("gold-a"),
                "Gold Series A",
                10_000,
            ))
            .unwrap();
        LedgerService::new(Arc::new(controller))
    }

    #[tokio::test]
    async fn awaited_mutation_is_visible_to_subsequent_reads() {
        let svc = service();
        let gold = ShareClassId::from("gold-a");
        svc.purchase_shares(
            UserId::from("u1"),
            gold.clone(),
            1_000,
            dec!(1000),
            "buy-1".into(),
        )
        .await
        .unwrap();

        let available = svc
            .recompute_and_persist_availability(gold.clone())
            .await
            .unwrap();
        assert_eq!(available, 9_000);
    }

    #[tokio::test]
    async fn invalid_argument_is_not_retried() {
        let svc = service();
        let gold = ShareClassId::from("gold-a");
        let err = svc
            .purchase_shares(UserId::from("u1"), gold, 0, dec!(1000), "buy-1".into())
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn payment_flow_end_to_end() {
        let svc = service();
        let gold = ShareClassId::from("gold-a");
        svc.controller()
            .create_booking(
                BookingId::from("b1"),
                UserId::from("u1"),
                gold,
                100,
                dec!(1000),
            )
            .unwrap();

        let breakdown = svc
            .apply_booking_payment(BookingId::from("b1"), dec!(30000), "pay-1".into())
            .await
            .unwrap();
        assert_eq!(breakdown.shares_unlocked, 30);
    }
}
