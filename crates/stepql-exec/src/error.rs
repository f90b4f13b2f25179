use thiserror::Error;

use stepql_engine::EngineError;
use stepql_optimize::{OptimizationError, PhaseOrderError};
use stepql_planner::PlanError;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("source '{0}' not found")]
    SourceNotFound(String),

    #[error("source '{source_name}' was found but its pipeline failed to build: {reason}")]
    SourceBuild { source_name: String, reason: String },

    #[error("source '{source_name}' has no optimization named '{name}'")]
    UnknownOptimization { source_name: String, name: String },

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("planning: {0}")]
    Plan(#[from] PlanError),

    /// A row could not be copied across the bridge or into the cache.
    #[error("row error: {0}")]
    Row(String),

    #[error("source pipeline failed: {0}")]
    SourceFailed(String),

    #[error("query pipeline failed: {0}")]
    QueryFailed(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Optimization(#[from] OptimizationError),

    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("internal invariant failed: {0}")]
    Invariant(String),
}

impl From<PhaseOrderError> for ExecError {
    fn from(e: PhaseOrderError) -> Self {
        ExecError::Invariant(e.to_string())
    }
}

/// Terminal failure of a running execution, kept until a caller waits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Row(String),
    Source(String),
    Query(String),
}

impl From<Failure> for ExecError {
    fn from(f: Failure) -> Self {
        match f {
            Failure::Row(m) => ExecError::Row(m),
            Failure::Source(m) => ExecError::SourceFailed(m),
            Failure::Query(m) => ExecError::QueryFailed(m),
        }
    }
}

/// First terminal failure of an execution. Later failures are ignored.
#[derive(Debug, Default)]
pub(crate) struct FailureSlot {
    slot: parking_lot::Mutex<Option<Failure>>,
}

impl FailureSlot {
    pub(crate) fn record(&self, failure: Failure) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            tracing::warn!(?failure, "execution failed");
            *slot = Some(failure);
        }
    }

    pub(crate) fn get(&self) -> Option<Failure> {
        self.slot.lock().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}
