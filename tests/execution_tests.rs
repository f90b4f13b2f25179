//! End-to-end query execution through `QueryService`.

mod common;

use stepql_core::condition::{Comparison, Condition};
use stepql_core::pipeline::{PipelineDef, StepDef, StepKind};
use stepql_core::query::{Aggregation, QuerySpec, SelectItem, SortKey};
use stepql_core::types::{Row, Scalar};
use stepql_engine::StepOutcome;
use stepql_exec::{CollectingSink, ExecError, QueryService, SourceEntry};
use stepql_optimize::OptimizationRegistry;
use stepql_planner::YamlQueryParser;

use common::*;

fn default_service() -> QueryService {
    service(100, 64, OptimizationRegistry::new())
}

#[test]
fn filter_group_and_sort() {
    let svc = default_service();
    let sink = CollectingSink::new();
    let q = QuerySpec::builder()
        .from_source("orders")
        .select_fields(["region"])
        .select(SelectItem::Aggregate {
            function: Aggregation::Count,
            alias: Some("n".into()),
        })
        .filter(Condition::compare("qty", Comparison::Ge, Scalar::I64(5)))
        .group_by("region")
        .order_by(SortKey::asc("region"))
        .build();
    let exec = svc.execute(q, sink.clone()).unwrap();
    exec.wait_until_finished().unwrap();

    let rows = sink.rows();
    assert_eq!(strs(&rows, 0), vec!["east", "north", "west"]);
    assert_eq!(ints(&rows, 1), vec![50, 50, 50]);
    assert_eq!(sink.schema().unwrap().names(), vec!["region", "n"]);
    assert!(!exec.served_from_cache());
}

#[test]
fn constant_query_without_source_yields_one_row() {
    let svc = default_service();
    let sink = CollectingSink::new();
    let q = QuerySpec::builder()
        .select(SelectItem::constant(Scalar::I64(1), "one"))
        .build();
    let exec = svc.execute(q, sink.clone()).unwrap();
    exec.wait_until_finished().unwrap();
    assert_eq!(sink.rows(), vec![Row::new(vec![Scalar::I64(1)])]);
    assert!(exec.source_pipeline().is_none());
    assert!(exec.cache_key().is_none());
}

#[test]
fn empty_query_without_source_yields_nothing() {
    let svc = default_service();
    let sink = CollectingSink::new();
    let exec = svc.execute(QuerySpec::builder().build(), sink.clone()).unwrap();
    exec.wait_until_finished().unwrap();
    assert!(sink.is_empty());
    assert_eq!(sink.outcome(), Some(StepOutcome::Finished));
}

#[test]
fn unknown_source_and_broken_source_are_distinct_errors() {
    let engine = engine_with(
        vec![
            orders_def(10),
            // A transform cannot start a pipeline.
            PipelineDef::new("broken").with_step(StepDef::new("only", StepKind::Dummy)),
        ],
        8,
    );
    let mut catalog = catalog();
    catalog.register(SourceEntry::new("ghost", "not-registered", "read"));
    catalog.register(SourceEntry::new("broken", "broken", "only"));
    let svc = QueryService::new(engine, catalog, OptimizationRegistry::new(), config());

    let run = |source: &str| {
        svc.execute(
            QuerySpec::builder().from_source(source).build(),
            CollectingSink::new(),
        )
    };
    let not_found = run("nowhere").err().unwrap();
    let missing_pipeline = run("ghost").err().unwrap();
    let invalid = run("broken").err().unwrap();

    assert!(matches!(not_found, ExecError::SourceNotFound(ref s) if s == "nowhere"));
    assert!(matches!(missing_pipeline, ExecError::SourceBuild { .. }));
    assert!(matches!(invalid, ExecError::SourceBuild { .. }));
    assert_ne!(not_found.to_string(), missing_pipeline.to_string());
}

#[test]
fn parameters_reach_the_source() {
    let svc = default_service();
    let sink = CollectingSink::new();
    let q = QuerySpec::builder()
        .from_source("orders")
        .select_fields(["id", "region"])
        .filter(Condition::and(vec![
            Condition::eq("PARAMETER('REGION')", Scalar::Str("east".into())),
            Condition::eq("qty", Scalar::I64(3)),
        ]))
        .build();
    let exec = svc.execute(q, sink.clone()).unwrap();
    exec.wait_until_finished().unwrap();

    assert_eq!(
        exec.query().parameters().get("REGION").map(String::as_str),
        Some("east")
    );
    assert_eq!(
        exec.query().condition(),
        Some(&Condition::eq("qty", Scalar::I64(3)))
    );
    let rows = sink.rows();
    assert_eq!(ints(&rows, 0), (0..10).map(|k| 3 + 30 * k).collect::<Vec<i64>>());
    assert!(strs(&rows, 1).iter().all(|r| r == "east"));
    let source = exec.source_pipeline().unwrap();
    assert_eq!(
        source.step("read").unwrap().query_text().as_deref(),
        Some("SELECT * FROM orders WHERE region = 'east'")
    );
}

#[test]
fn misplaced_parameter_is_rejected_before_anything_runs() {
    let svc = default_service();
    let q = QuerySpec::builder()
        .from_source("orders")
        .filter(Condition::or(vec![
            Condition::eq("PARAMETER('REGION')", Scalar::Str("east".into())),
            Condition::eq("qty", Scalar::I64(3)),
        ]))
        .build();
    assert!(matches!(
        svc.execute(q, CollectingSink::new()),
        Err(ExecError::MalformedQuery(_))
    ));
}

#[test]
fn unknown_field_is_a_planning_error() {
    let svc = default_service();
    let q = QuerySpec::builder()
        .from_source("orders")
        .select_fields(["price"])
        .build();
    assert!(matches!(
        svc.execute(q, CollectingSink::new()),
        Err(ExecError::Plan(_))
    ));
}

#[test]
fn known_sources_are_sorted() {
    assert_eq!(
        default_service().list_known_sources(),
        vec!["numbers".to_string(), "orders".to_string()]
    );
}

#[test]
fn executes_parsed_text() {
    let svc = default_service();
    let sink = CollectingSink::new();
    let text = r#"
source: numbers
select:
  - field: { name: n }
group_by: []
order_by: [{ field: n, ascending: false }]
limit: 3
parameters: {}
"#;
    let exec = svc.execute_text(text, &YamlQueryParser, sink.clone()).unwrap();
    exec.wait_until_finished().unwrap();
    assert_eq!(ints(&sink.rows(), 0), vec![99, 98, 97]);

    let unknown = text.replace("source: numbers", "source: elsewhere");
    assert!(matches!(
        svc.execute_text(&unknown, &YamlQueryParser, CollectingSink::new()),
        Err(ExecError::Plan(_))
    ));
}

#[test]
fn closures_are_sinks() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    let svc = default_service();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);
    let q = QuerySpec::builder().from_source("numbers").build();
    let exec = svc
        .execute(q, move |_: &stepql_core::schema::Schema, _: &Row| {
            seen.fetch_add(1, Ordering::Relaxed);
        })
        .unwrap();
    exec.wait_until_finished().unwrap();
    assert_eq!(count.load(Ordering::Relaxed), 100);
}
