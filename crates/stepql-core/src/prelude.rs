//! Convenient re-exports for downstream crates.

pub use crate::condition::{Comparison, Condition, Connective, Predicate};
pub use crate::config::ExecConfig;
pub use crate::error::{Error, Result};
pub use crate::id::ExecutionId;
pub use crate::pipeline::{PipelineDef, StepDef, StepKind};
pub use crate::query::{Aggregation, QuerySpec, QuerySpecBuilder, SelectItem, SortKey};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Row, Scalar};
