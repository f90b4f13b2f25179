#![forbid(unsafe_code)]
//! stepql-optimize: push-down optimizations applied to a source pipeline
//! before it runs.
//!
//! A descriptor names a strategy, the source step it targets and whether it
//! is enabled. Strategies prepare the source definition (`init`), rewrite the
//! running step (`activate`, deferred into `ExecutionPhase::Optimize`) and
//! report what they would do (`preview`).

pub mod capture;
pub mod descriptor;
pub mod error;
pub mod phase;
pub mod registry;
pub mod report;
pub mod strategy;
pub mod translate;

pub use capture::{capture_equalities, Capture, ParameterCapture};
pub use descriptor::{OptimizationDescriptor, Strategy};
pub use error::OptimizationError;
pub use phase::{ExecutionPhase, PhaseHooks, PhaseOrderError, PhaseOutcome};
pub use registry::OptimizationRegistry;
pub use report::{Activation, ImpactReport};
pub use strategy::{OptimizationContext, PushDownStrategy};
pub use translate::{ConditionTranslation, Dialect, FilterDialect, FilterOp, InverseTable};
