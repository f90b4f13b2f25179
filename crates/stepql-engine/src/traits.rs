//! The pipeline engine interface.
//!
//! Invariants:
//! - Row listeners of a step see its output rows in production order, on the
//!   pipeline's worker thread.
//! - Every step's finish listeners fire exactly once per run.
//! - `stop` and `kill` are idempotent.

use std::sync::Arc;
use std::time::Duration;

use stepql_core::pipeline::PipelineDef;
use stepql_core::schema::Schema;
use stepql_core::types::Row;

use crate::error::EngineError;

/// How a step's production ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// All rows were produced.
    Finished,
    /// Production was cut short by a stop or by a downstream limit.
    Stopped,
    Failed(String),
}

pub type RowListener = Box<dyn FnMut(&Schema, &Row) + Send>;
pub type FinishListener = Box<dyn FnOnce(&StepOutcome) + Send>;

/// Result of handing one row to an injector. Rejected rows are handed back.
#[derive(Debug, PartialEq)]
pub enum Offer {
    Accepted,
    /// The buffer stayed full for the whole wait.
    Full(Row),
    /// The consumer is gone or input was already finished.
    Closed(Row),
}

impl Offer {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Offer::Accepted)
    }
}

/// Row intake of an injector step.
pub trait RowInjector: Send + Sync {
    /// Hand over `row`, waiting at most `timeout` for buffer space.
    fn offer(&self, row: Row, timeout: Duration) -> Offer;

    fn try_offer(&self, row: Row) -> Offer {
        self.offer(row, Duration::ZERO)
    }

    /// No more rows will be offered.
    fn finished(&self);
}

/// A running (or runnable) step of an instantiated pipeline.
pub trait StepInstance: Send + Sync {
    fn name(&self) -> &str;

    /// Step variable, falling back to the pipeline's variables and then to the
    /// definition's parameter defaults.
    fn variable(&self, name: &str) -> Option<String>;

    fn set_variable(&self, name: &str, value: &str);

    /// Effective backend query text with variables substituted, for steps
    /// that carry a query template.
    fn query_text(&self) -> Option<String>;

    fn mark_output_done(&self);
    fn dispose(&self);
    fn mark_stopped(&self);
    fn is_disposed(&self) -> bool;
}

pub trait Pipeline: Send + Sync {
    fn definition(&self) -> &PipelineDef;

    fn start(&self) -> Result<(), EngineError>;

    /// Ask the pipeline to stop after the row in flight.
    fn stop(&self);

    /// Stop without draining buffered input.
    fn kill(&self);

    /// Started, not yet terminated, and not asked to stop.
    fn is_running(&self) -> bool;
    fn is_stopped(&self) -> bool;
    fn is_finished(&self) -> bool;

    /// Block until the worker has terminated. Returns at once if it never started.
    fn wait_until_finished(&self);

    fn step(&self, name: &str) -> Result<Arc<dyn StepInstance>, EngineError>;
    fn step_schema(&self, name: &str) -> Result<Schema, EngineError>;

    fn add_row_listener(&self, step: &str, listener: RowListener) -> Result<(), EngineError>;
    fn add_finish_listener(&self, step: &str, listener: FinishListener)
        -> Result<(), EngineError>;

    fn injector(&self, step: &str) -> Result<Arc<dyn RowInjector>, EngineError>;

    fn set_variable(&self, name: &str, value: &str);
    fn variable(&self, name: &str) -> Option<String>;
}

pub trait PipelineEngine: Send + Sync {
    /// Load a fresh copy of a registered definition.
    fn load(&self, name: &str) -> Result<PipelineDef, EngineError>;

    fn instantiate(&self, def: &PipelineDef) -> Result<Arc<dyn Pipeline>, EngineError>;

    /// Output schema of `step` without instantiating anything.
    fn step_schema(&self, def: &PipelineDef, step: &str) -> Result<Schema, EngineError>;

    fn pipeline_names(&self) -> Vec<String>;
}
