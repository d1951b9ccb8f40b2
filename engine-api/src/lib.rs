use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Lifecycle contract for long-running background components
/// (reconciliation sweeps, pricing refreshers).
pub trait Engine: Send + Sync {
    fn name(&self) -> &'static str;
    fn start(&self) -> EngineResult<()>;
    fn stop(&self) -> EngineResult<()>;
    fn health(&self) -> EngineHealth;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Starting,
    Ready,
    Degraded,
    Failed,
    Stopped,
}

#[derive(Clone, Debug)]
pub struct EngineHealth {
    pub status: HealthStatus,
    pub detail: Option<String>,
}

impl EngineHealth {
    pub fn new(status: HealthStatus, detail: Option<String>) -> Self {
        Self { status, detail }
    }
}

impl Default for EngineHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Stopped,
            detail: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already running")]
    AlreadyRunning,
    #[error("engine is not running")]
    NotRunning,
    #[error("engine encountered an error: {source}")]
    Failure {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
