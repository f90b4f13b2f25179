#![forbid(unsafe_code)]
//! stepql-exec: run a query against a source pipeline.
//!
//! `QueryService` resolves parameters, builds the query pipeline, lets the
//! registered optimizations rewrite the source pipeline, and then either
//! bridges live source rows into the query pipeline or replays a cached run.

pub mod bridge;
pub mod cache;
pub mod catalog;
pub mod error;
pub mod execution;
pub mod params;
pub mod service;
pub mod sink;
pub mod window;

pub use bridge::{offer_with_retry, BridgeStats, BridgeStatsSnapshot, Delivery, PipelineBridge};
pub use cache::{
    CacheEntry, CacheKey, ObserveError, ObservedRows, Observer, ReplayError, ReplayTarget, Replayer,
    ResultCache,
};
pub use catalog::{SourceCatalog, SourceEntry};
pub use error::ExecError;
pub use execution::Execution;
pub use service::QueryService;
pub use sink::{CollectingSink, RowSink};
pub use window::{window_key, WindowCacheKey, WindowMode, WindowParams};
