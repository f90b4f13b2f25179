#![forbid(unsafe_code)]
//! stepql-engine: the pipeline engine interface and `memory`, an in-process
//! reference engine.
//!
//! Engines turn a `PipelineDef` into a runnable `Pipeline`. Listeners fire
//! synchronously on the thread that produces the rows, so a slow listener
//! slows the producing pipeline down.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::EngineError;
pub use memory::{MemoryEngine, MemoryPipeline};
pub use traits::{
    FinishListener, Offer, Pipeline, PipelineEngine, RowInjector, RowListener, StepInstance,
    StepOutcome,
};
