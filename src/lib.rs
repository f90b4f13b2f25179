//! stepql: query the output of a running data-flow pipeline as if it were a table.
//!
//! This crate re-exports the workspace crates under one roof:
//!
//! - [`core`]: values, rows, schemas, conditions, query specs, pipeline definitions
//! - [`engine`]: the pipeline engine interface and the in-memory engine
//! - [`planner`]: query plan builder and YAML pipeline documents
//! - [`optimize`]: push-down optimizations and execution phases
//! - [`exec`]: the query service, pipeline bridge and result cache

pub use stepql_core as core;
pub use stepql_engine as engine;
pub use stepql_exec as exec;
pub use stepql_optimize as optimize;
pub use stepql_planner as planner;

pub use stepql_core::prelude::*;
pub use stepql_exec::{CollectingSink, ExecError, Execution, QueryService, RowSink, SourceCatalog, SourceEntry};
