#![forbid(unsafe_code)]
//! stepql-planner: from a `QuerySpec` to a query pipeline definition.
//!
//! - `builder`: lays out the query pipeline (injector → where → group by →
//!   order by → select → limit → result).
//! - `dsl::yaml`: pipeline definitions from YAML documents.
//! - `parser`: the `QueryParser` seam for front ends that start from text.

pub mod builder;
pub mod dsl;
pub mod error;
pub mod parser;

pub use builder::{QueryPlan, QueryPlanBuilder};
pub use dsl::yaml::{parse_yaml_pipeline, parse_yaml_pipelines};
pub use error::PlanError;
pub use parser::{QueryParser, YamlQueryParser};
