#![forbid(unsafe_code)]
//! stepql-core: values, rows, schemas, conditions, query specs and pipeline
//! definitions shared by every stepql crate.
//!
//! Pure data and pure functions only. Threads, listeners and channels live in
//! `stepql-engine` and `stepql-exec`.

pub mod condition;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod pipeline;
pub mod prelude;
pub mod query;
pub mod schema;
pub mod types;

/// Crate version, stamped into cache entries for provenance.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
