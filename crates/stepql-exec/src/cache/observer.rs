//! Records a source step's rows while they flow past, for the cache.

use std::sync::Arc;
use std::time::Duration;

use futures::channel::oneshot;
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, trace};

use stepql_core::schema::Schema;
use stepql_core::types::Row;
use stepql_engine::{Pipeline, StepOutcome};

use super::{CacheEntry, CacheKey, ResultCache};
use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    /// The step stopped before producing everything, or the observer was cancelled.
    #[error("observation cancelled")]
    Cancelled,
    #[error("observation failed: {0}")]
    Failed(String),
}

pub type ObservedResult = Result<Arc<CacheEntry>, ObserveError>;

#[derive(Debug, Default)]
struct Buffer {
    rows: Vec<Row>,
    done: bool,
}

struct Inner {
    schema: Schema,
    buffer: Mutex<Buffer>,
    available: Condvar,
    sender: Mutex<Option<oneshot::Sender<ObservedResult>>>,
    publish: Option<(Arc<ResultCache>, CacheKey)>,
}

impl Inner {
    fn on_row(&self, schema: &Schema, row: &Row) {
        let copy = match schema.clone_row(row) {
            Ok(copy) => copy,
            Err(e) => {
                self.complete(Err(ObserveError::Failed(e.to_string())));
                return;
            }
        };
        let mut buf = self.buffer.lock();
        if buf.done {
            return;
        }
        buf.rows.push(copy);
        trace!(rows = buf.rows.len(), "row observed");
        self.available.notify_all();
    }

    fn on_finish(&self, outcome: &StepOutcome) {
        let result = match outcome {
            StepOutcome::Finished => Ok(()),
            StepOutcome::Stopped => Err(ObserveError::Cancelled),
            StepOutcome::Failed(msg) => Err(ObserveError::Failed(msg.clone())),
        };
        self.complete(result);
    }

    /// First completion wins; later ones are ignored.
    fn complete(&self, result: Result<(), ObserveError>) {
        let result = {
            let mut buf = self.buffer.lock();
            if buf.done {
                return;
            }
            buf.done = true;
            self.available.notify_all();
            result.map(|()| Arc::new(CacheEntry::new(self.schema.clone(), buf.rows.clone())))
        };
        match &result {
            Ok(entry) => {
                debug!(rows = entry.len(), "observation complete");
                if let Some((cache, key)) = &self.publish {
                    cache.put(key.clone(), Arc::clone(entry));
                }
            }
            Err(e) => debug!(error = %e, "observation ended without an entry"),
        }
        if let Some(tx) = self.sender.lock().take() {
            let _ = tx.send(result);
        }
    }
}

/// Listens to one source step and buffers a deep copy of every row.
pub struct Observer {
    inner: Arc<Inner>,
    future: Shared<BoxFuture<'static, ObservedResult>>,
    poll: Duration,
}

impl Observer {
    /// `schema` is the observed step's output schema. A completed run is
    /// published to `publish` when given.
    pub fn new(
        schema: Schema,
        poll: Duration,
        publish: Option<(Arc<ResultCache>, CacheKey)>,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let future = rx
            .map(|r| r.unwrap_or(Err(ObserveError::Cancelled)))
            .boxed()
            .shared();
        Self {
            inner: Arc::new(Inner {
                schema,
                buffer: Mutex::new(Buffer::default()),
                available: Condvar::new(),
                sender: Mutex::new(Some(tx)),
                publish,
            }),
            future,
            poll,
        }
    }

    /// Register the row and finish listeners on `step`. Call before the pipeline starts.
    pub fn attach(&self, pipeline: &dyn Pipeline, step: &str) -> Result<(), ExecError> {
        let inner = Arc::clone(&self.inner);
        pipeline.add_row_listener(
            step,
            Box::new(move |schema: &Schema, row: &Row| inner.on_row(schema, row)),
        )?;
        let inner = Arc::clone(&self.inner);
        pipeline.add_finish_listener(
            step,
            Box::new(move |outcome: &StepOutcome| inner.on_finish(outcome)),
        )?;
        Ok(())
    }

    pub fn schema(&self) -> &Schema {
        &self.inner.schema
    }

    /// Iterate over everything observed so far and, blocking, over what comes next.
    pub fn rows(&self) -> ObservedRows {
        ObservedRows {
            inner: Arc::clone(&self.inner),
            pos: 0,
            poll: self.poll,
        }
    }

    /// Rows buffered so far.
    pub fn buffered(&self) -> usize {
        self.inner.buffer.lock().rows.len()
    }

    pub fn is_done(&self) -> bool {
        self.inner.buffer.lock().done
    }

    /// Resolves when the step finished, stopped or failed.
    pub fn future(&self) -> Shared<BoxFuture<'static, ObservedResult>> {
        self.future.clone()
    }

    /// The outcome, if the observation is already over.
    pub fn try_result(&self) -> Option<ObservedResult> {
        self.future().now_or_never()
    }

    pub fn wait(&self) -> ObservedResult {
        futures::executor::block_on(self.future())
    }

    /// Stop observing. Pending `future()`s resolve to `Cancelled`.
    pub fn cancel(&self) {
        self.inner.complete(Err(ObserveError::Cancelled));
    }

    #[cfg(test)]
    pub(crate) fn feed(&self, schema: &Schema, row: &Row) {
        self.inner.on_row(schema, row)
    }

    #[cfg(test)]
    pub(crate) fn finish(&self, outcome: &StepOutcome) {
        self.inner.on_finish(outcome)
    }
}

/// Cursor over an observer's buffer. `has_next` blocks until a row is
/// available or the observation is over.
pub struct ObservedRows {
    inner: Arc<Inner>,
    pos: usize,
    poll: Duration,
}

impl ObservedRows {
    pub fn has_next(&mut self) -> bool {
        let mut buf = self.inner.buffer.lock();
        loop {
            if self.pos < buf.rows.len() {
                return true;
            }
            if buf.done {
                return false;
            }
            self.inner.available.wait_for(&mut buf, self.poll);
        }
    }

    /// Start again from the first row.
    pub fn restart(&mut self) {
        self.pos = 0;
    }
}

impl Iterator for ObservedRows {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        if !self.has_next() {
            return None;
        }
        let row = self.inner.buffer.lock().rows.get(self.pos).cloned();
        self.pos += 1;
        row
    }
}
