//! Shared fixtures for the integration suites.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::json;
use stepql_core::config::ExecConfig;
use stepql_core::pipeline::{PipelineDef, StepDef, StepKind};
use stepql_core::schema::{DataType, Field};
use stepql_core::types::{Row, Scalar};
use stepql_engine::MemoryEngine;
use stepql_exec::{QueryService, SourceCatalog, SourceEntry};
use stepql_optimize::OptimizationRegistry;

pub const REGIONS: [&str; 3] = ["east", "west", "north"];

/// `orders`: `rows` rows of (id, region, qty), regions cycling through `REGIONS`.
/// The read step carries a backend query bound to the `REGION` parameter.
pub fn orders_def(rows: usize) -> PipelineDef {
    let data = (0..rows)
        .map(|i| vec![json!(i), json!(REGIONS[i % REGIONS.len()]), json!(i % 10)])
        .collect();
    let mut bindings = BTreeMap::new();
    bindings.insert("REGION".to_string(), "region".to_string());
    PipelineDef::new("orders").with_step(StepDef::new(
        "read",
        StepKind::Table {
            fields: vec![
                Field::new("id", DataType::Int64, false),
                Field::new("region", DataType::Utf8, false),
                Field::new("qty", DataType::Int64, false),
            ],
            rows: data,
            query: Some("SELECT * FROM orders WHERE region = '${REGION}'".into()),
            bindings,
            delay_ms: 0,
        },
    ))
}

/// `numbers`: a single `n` column counting from 0.
pub fn numbers_def(count: u64) -> PipelineDef {
    PipelineDef::new("numbers").with_step(StepDef::new(
        "gen",
        StepKind::Sequence {
            field: "n".into(),
            start: 0,
            count,
            delay_ms: 0,
        },
    ))
}

pub fn engine_with(defs: Vec<PipelineDef>, capacity: usize) -> Arc<MemoryEngine> {
    let engine = MemoryEngine::with_capacity(capacity);
    for def in defs {
        engine.register(def);
    }
    Arc::new(engine)
}

pub fn catalog() -> SourceCatalog {
    let mut c = SourceCatalog::new();
    c.register(SourceEntry::new("orders", "orders", "read"));
    c.register(SourceEntry::new("numbers", "numbers", "gen"));
    c
}

pub fn config() -> ExecConfig {
    ExecConfig {
        offer_timeout_ms: 20,
        observer_poll_ms: 2,
        ..ExecConfig::default()
    }
}

/// Service over `orders` (300 rows) and `numbers` (`numbers` rows).
pub fn service(numbers: u64, capacity: usize, registry: OptimizationRegistry) -> QueryService {
    let engine = engine_with(vec![orders_def(300), numbers_def(numbers)], capacity);
    QueryService::new(engine, catalog(), registry, config())
}

pub fn ints(rows: &[Row], col: usize) -> Vec<i64> {
    rows.iter()
        .map(|r| match &r.values[col] {
            Scalar::I64(v) => *v,
            Scalar::I32(v) => *v as i64,
            other => panic!("not an integer: {:?}", other),
        })
        .collect()
}

pub fn strs(rows: &[Row], col: usize) -> Vec<String> {
    rows.iter().map(|r| r.values[col].render()).collect()
}
