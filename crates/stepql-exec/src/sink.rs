//! Caller-side row delivery.

use std::sync::Arc;

use parking_lot::Mutex;

use stepql_core::schema::Schema;
use stepql_core::types::Row;
use stepql_engine::StepOutcome;

/// Receives the query's result rows, in order, on the query pipeline's thread.
pub trait RowSink: Send {
    fn on_row(&mut self, schema: &Schema, row: &Row);

    fn on_finish(&mut self, _outcome: &StepOutcome) {}
}

impl<F> RowSink for F
where
    F: FnMut(&Schema, &Row) + Send,
{
    fn on_row(&mut self, schema: &Schema, row: &Row) {
        self(schema, row)
    }
}

#[derive(Debug, Default)]
struct Collected {
    schema: Option<Schema>,
    rows: Vec<Row>,
    outcome: Option<StepOutcome>,
}

/// Keeps every row. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct CollectingSink {
    inner: Arc<Mutex<Collected>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> Vec<Row> {
        self.inner.lock().rows.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().rows.is_empty()
    }

    pub fn schema(&self) -> Option<Schema> {
        self.inner.lock().schema.clone()
    }

    pub fn outcome(&self) -> Option<StepOutcome> {
        self.inner.lock().outcome.clone()
    }
}

impl RowSink for CollectingSink {
    fn on_row(&mut self, schema: &Schema, row: &Row) {
        let mut inner = self.inner.lock();
        if inner.schema.is_none() {
            inner.schema = Some(schema.clone());
        }
        inner.rows.push(row.clone());
    }

    fn on_finish(&mut self, outcome: &StepOutcome) {
        self.inner.lock().outcome = Some(outcome.clone());
    }
}
