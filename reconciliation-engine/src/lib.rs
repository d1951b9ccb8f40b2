use std::{sync::Arc, time::Duration};

use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::{runtime::Runtime, task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use core_types::config::ReconciliationConfig;
use engine_api::{Engine, EngineError, EngineHealth, EngineResult, HealthStatus};
use ledger::{controller::ReconcileReport, LedgerController, LedgerStore};

/// Periodic pool reconciliation.
///
/// Recomputes every share pool's availability from holdings and bookings on
/// a fixed interval, overwriting the cached counters. Sweeps are idempotent
/// and serialize against live mutations through the store's per-pool
/// guards, so a sweep never races a payment or transfer on the same pool.
pub struct ReconciliationEngine<S: LedgerStore + 'static> {
    inner: Arc<ReconciliationInner<S>>,
}

#[derive(Clone)]
pub struct ReconciliationEngineConfig {
    pub label: String,
    pub interval: Duration,
}

impl ReconciliationEngineConfig {
    pub fn new(label: impl Into<String>, config: &ReconciliationConfig) -> Self {
        Self {
            label: label.into(),
            interval: Duration::from_secs(config.interval_s),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl<S: LedgerStore + 'static> ReconciliationEngine<S> {
    pub fn new(
        config: ReconciliationEngineConfig,
        controller: Arc<LedgerController<S>>,
    ) -> Self {
        Self {
            inner: ReconciliationInner::new(config, controller),
        }
    }

    /// Run one sweep synchronously, outside the periodic loop.
    pub fn sweep_now(&self) -> ReconcileReport {
        self.inner.sweep()
    }
}

impl<S: LedgerStore + 'static> Engine for ReconciliationEngine<S> {
    fn name(&self) -> &'static str {
        "reconciliation"
    }

    fn start(&self) -> EngineResult<()> {
        self.inner.start()
    }

    fn stop(&self) -> EngineResult<()> {
        self.inner.stop()
    }

    fn health(&self) -> EngineHealth {
        self.inner.health()
    }
}

struct ReconciliationInner<S: LedgerStore + 'static> {
    config: ReconciliationEngineConfig,
    controller: Arc<LedgerController<S>>,
    state: Mutex<EngineRuntimeState>,
    health: Mutex<EngineHealth>,
}

impl<S: LedgerStore + 'static> ReconciliationInner<S> {
    fn new(
        config: ReconciliationEngineConfig,
        controller: Arc<LedgerController<S>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            controller,
            state: Mutex::new(EngineRuntimeState::Stopped),
            health: Mutex::new(EngineHealth::new(HealthStatus::Stopped, None)),
        })
    }

    fn start(self: &Arc<Self>) -> EngineResult<()> {
        let mut guard = self.state.lock();
        if matches!(*guard, EngineRuntimeState::Running(_)) {
            return Err(EngineError::AlreadyRunning);
        }
        self.set_health(HealthStatus::Starting, None);
        let runtime = Runtime::new().map_err(|err| EngineError::Failure {
            source: Box::new(err),
        })?;
        let cancel = CancellationToken::new();
        let runner = Arc::clone(self);
        let cancel_clone = cancel.clone();
        let handle = runtime.spawn(async move {
            runner.run(cancel_clone).await;
        });
        *guard = EngineRuntimeState::Running(RuntimeBundle {
            runtime,
            handle,
            cancel,
        });
        info!("[{}] reconciliation engine starting", self.config.label);
        Ok(())
    }

    fn stop(&self) -> EngineResult<()> {
        let mut guard = self.state.lock();
        let Some(bundle) = guard.take_running() else {
            return Err(EngineError::NotRunning);
        };
        bundle.cancel.cancel();
        if let Err(err) = RuntimeBundle::join(bundle) {
            error!(
                "[{}] reconciliation runtime join failed: {:?}",
                self.config.label, err
            );
        }
        *guard = EngineRuntimeState::Stopped;
        self.set_health(HealthStatus::Stopped, None);
        Ok(())
    }

    fn health(&self) -> EngineHealth {
        self.health.lock().clone()
    }

    fn set_health(&self, status: HealthStatus, detail: Option<String>) {
        let mut guard = self.health.lock();
        guard.status = status;
        guard.detail = detail;
    }

    async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.set_health(HealthStatus::Ready, None);
        while !cancel.is_cancelled() {
            let report = self.sweep();
            let drifted = self.controller.drift_events().len();
            if report.pools_updated > 0 {
                warn!(
                    "[{}] sweep corrected {} pool(s); {} drift event(s) on record",
                    self.config.label, report.pools_updated, drifted
                );
            }
            self.set_health(HealthStatus::Ready, None);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.config.interval) => {}
            }
        }
        self.set_health(HealthStatus::Stopped, None);
        info!("[{}] reconciliation engine stopped", self.config.label);
    }

    fn sweep(&self) -> ReconcileReport {
        let report = self.controller.reconcile_all();
        for delta in &report.deltas {
            if delta.delta() != 0 {
                info!(
                    "[{}] pool {}: availability {} -> {}",
                    self.config.label, delta.share_class, delta.previous, delta.recomputed
                );
            }
        }
        report
    }
}

enum EngineRuntimeState {
    Stopped,
    Running(RuntimeBundle),
}

impl EngineRuntimeState {
    fn take_running(&mut self) -> Option<RuntimeBundle> {
        match std::mem::replace(self, EngineRuntimeState::Stopped) {
            EngineRuntimeState::Running(bundle) => Some(bundle),
            other => {
                *self = other;
                None
            }
        }
    }
}

struct RuntimeBundle {
    runtime: Runtime,
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

impl RuntimeBundle {
    fn join(bundle: RuntimeBundle) -> Result<(), tokio::task::JoinError> {
        let RuntimeBundle {
            runtime,
            handle,
            cancel: _,
        } = bundle;
        runtime.block_on(async { handle.await })
    }
}
