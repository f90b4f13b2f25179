//! One pipeline instance, run by a single worker thread.
//!
//! The worker pulls rows from the source step and pushes each one through
//! the transform steps in order, firing row listeners as rows leave a step.
//! When a step reports `Flow::Done` the steps above it are stopped and the
//! steps below it are flushed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use stepql_core::pipeline::{PipelineDef, StepKind};
use stepql_core::schema::Schema;
use stepql_core::types::{Row, Scalar};

use super::ops::{build_op, derive_schemas, Flow, StepOp};
use super::queue::{BoundedQueue, Pop, PushError};
use super::step::{MemoryStep, VariableSpace};
use crate::error::EngineError;
use crate::traits::{
    FinishListener, Offer, Pipeline, RowInjector, RowListener, StepInstance, StepOutcome,
};

/// How often an idle injector source re-checks the stop flag.
const INJECTOR_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Finished,
}

#[derive(Default)]
struct StepListeners {
    rows: Vec<RowListener>,
    finish: Vec<FinishListener>,
}

struct Shared {
    def: PipelineDef,
    schemas: Vec<Schema>,
    steps: Vec<Arc<MemoryStep>>,
    space: Arc<VariableSpace>,
    /// Taken by the worker on start.
    listeners: Mutex<Option<Vec<StepListeners>>>,
    queue: Option<Arc<BoundedQueue<Row>>>,
    state: Mutex<RunState>,
    state_cv: Condvar,
    stop: AtomicBool,
}

impl Shared {
    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn set_finished(&self) {
        if let Some(q) = &self.queue {
            q.close();
        }
        *self.state.lock() = RunState::Finished;
        self.state_cv.notify_all();
    }
}

pub struct MemoryPipeline {
    shared: Arc<Shared>,
}

impl MemoryPipeline {
    pub fn new(def: PipelineDef, channel_capacity: usize) -> Result<Self, EngineError> {
        let schemas = derive_schemas(&def)?;
        let space = Arc::new(VariableSpace::new(def.parameters.clone()));
        let steps = def
            .steps
            .iter()
            .map(|s| Arc::new(MemoryStep::new(s, Arc::clone(&space))))
            .collect();
        let listeners = def.steps.iter().map(|_| StepListeners::default()).collect();
        let queue = match def.steps.first().map(|s| &s.kind) {
            Some(StepKind::Injector { .. }) => {
                Some(Arc::new(BoundedQueue::with_capacity(channel_capacity)))
            }
            _ => None,
        };
        Ok(Self {
            shared: Arc::new(Shared {
                def,
                schemas,
                steps,
                space,
                listeners: Mutex::new(Some(listeners)),
                queue,
                state: Mutex::new(RunState::Idle),
                state_cv: Condvar::new(),
                stop: AtomicBool::new(false),
            }),
        })
    }

    fn index_of(&self, step: &str) -> Result<usize, EngineError> {
        self.shared
            .def
            .step_index(step)
            .ok_or_else(|| EngineError::StepNotFound {
                pipeline: self.shared.def.name.clone(),
                step: step.to_string(),
            })
    }

    fn with_listeners(
        &self,
        step: &str,
        f: impl FnOnce(&mut StepListeners),
    ) -> Result<(), EngineError> {
        let idx = self.index_of(step)?;
        let mut guard = self.shared.listeners.lock();
        let all = guard
            .as_mut()
            .ok_or_else(|| EngineError::AlreadyStarted(self.shared.def.name.clone()))?;
        f(&mut all[idx]);
        Ok(())
    }

    /// Listeners of a pipeline that never ran: report `Stopped` and drop them,
    /// releasing whatever they hold.
    fn release_listeners(&self) {
        let Some(all) = self.shared.listeners.lock().take() else {
            return;
        };
        for step in all {
            for f in step.finish {
                f(&StepOutcome::Stopped);
            }
        }
        tracing::debug!(pipeline = %self.shared.def.name, "listeners of an unstarted pipeline released");
    }
}

impl Drop for MemoryPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Pipeline for MemoryPipeline {
    fn definition(&self) -> &PipelineDef {
        &self.shared.def
    }

    fn start(&self) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if *state != RunState::Idle {
            return Err(EngineError::AlreadyStarted(self.shared.def.name.clone()));
        }
        let mut ops = Vec::with_capacity(self.shared.def.steps.len().saturating_sub(1));
        for (i, step) in self.shared.def.steps.iter().enumerate().skip(1) {
            ops.push(build_op(&step.kind, &self.shared.schemas[i - 1])?);
        }
        let listeners = self
            .shared
            .listeners
            .lock()
            .take()
            .unwrap_or_else(|| self.shared.def.steps.iter().map(|_| StepListeners::default()).collect());
        *state = RunState::Running;
        drop(state);

        let finished = vec![false; self.shared.def.steps.len()];
        let worker = Worker {
            shared: Arc::clone(&self.shared),
            ops,
            listeners,
            finished,
        };
        let spawned = thread::Builder::new()
            .name(format!("stepql-{}", self.shared.def.name))
            .spawn(move || worker.run());
        if let Err(e) = spawned {
            self.shared.set_finished();
            return Err(EngineError::Thread(e.to_string()));
        }
        tracing::debug!(pipeline = %self.shared.def.name, "pipeline started");
        Ok(())
    }

    fn stop(&self) {
        if !self.shared.stop.swap(true, Ordering::AcqRel) {
            tracing::debug!(pipeline = %self.shared.def.name, "stop requested");
            if let Some(q) = &self.shared.queue {
                q.close();
            }
        }
        let idle = *self.shared.state.lock() == RunState::Idle;
        if idle {
            self.release_listeners();
        }
    }

    fn kill(&self) {
        tracing::trace!(pipeline = %self.shared.def.name, "kill");
        self.stop();
    }

    fn is_running(&self) -> bool {
        *self.shared.state.lock() == RunState::Running && !self.shared.stop_requested()
    }

    fn is_stopped(&self) -> bool {
        self.shared.stop_requested()
    }

    fn is_finished(&self) -> bool {
        *self.shared.state.lock() == RunState::Finished
    }

    fn wait_until_finished(&self) {
        let mut state = self.shared.state.lock();
        while *state == RunState::Running {
            self.shared.state_cv.wait(&mut state);
        }
    }

    fn step(&self, name: &str) -> Result<Arc<dyn StepInstance>, EngineError> {
        let idx = self.index_of(name)?;
        Ok(Arc::clone(&self.shared.steps[idx]) as Arc<dyn StepInstance>)
    }

    fn step_schema(&self, name: &str) -> Result<Schema, EngineError> {
        Ok(self.shared.schemas[self.index_of(name)?].clone())
    }

    fn add_row_listener(&self, step: &str, listener: RowListener) -> Result<(), EngineError> {
        self.with_listeners(step, |l| l.rows.push(listener))
    }

    fn add_finish_listener(
        &self,
        step: &str,
        listener: FinishListener,
    ) -> Result<(), EngineError> {
        self.with_listeners(step, |l| l.finish.push(listener))
    }

    fn injector(&self, step: &str) -> Result<Arc<dyn RowInjector>, EngineError> {
        let idx = self.index_of(step)?;
        match (&self.shared.queue, idx) {
            (Some(queue), 0) => Ok(Arc::new(MemoryInjector {
                queue: Arc::clone(queue),
            })),
            _ => Err(EngineError::NotAnInjector(step.to_string())),
        }
    }

    fn set_variable(&self, name: &str, value: &str) {
        self.shared.space.set(name, value);
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.shared.space.get(name)
    }
}

struct MemoryInjector {
    queue: Arc<BoundedQueue<Row>>,
}

impl RowInjector for MemoryInjector {
    fn offer(&self, row: Row, timeout: Duration) -> Offer {
        match self.queue.push_timeout(row, timeout) {
            Ok(()) => Offer::Accepted,
            Err(PushError::Full(row)) => Offer::Full(row),
            Err(PushError::Closed(row)) => Offer::Closed(row),
        }
    }

    fn finished(&self) {
        self.queue.finish();
    }
}

enum Ending {
    /// The source ran out of rows.
    Exhausted,
    /// A step reported `Flow::Done`.
    Done(usize),
    Stopped,
}

struct Worker {
    shared: Arc<Shared>,
    /// `ops[i - 1]` runs step `i`.
    ops: Vec<Box<dyn StepOp>>,
    listeners: Vec<StepListeners>,
    finished: Vec<bool>,
}

impl Worker {
    fn run(mut self) {
        let name = self.shared.def.name.clone();
        let outcome = self.produce().and_then(|ending| match ending {
            Ending::Exhausted => {
                self.finish_step(0, StepOutcome::Finished);
                self.flush_from(1)
            }
            Ending::Done(d) => {
                for i in 0..d {
                    self.finish_step(i, StepOutcome::Stopped);
                }
                self.flush_from(d)
            }
            Ending::Stopped => Ok(()),
        });
        match outcome {
            Ok(()) => {
                self.finish_remaining(StepOutcome::Stopped);
                tracing::debug!(pipeline = %name, "pipeline finished");
            }
            Err(e) => {
                tracing::warn!(pipeline = %name, error = %e, "pipeline failed");
                self.finish_remaining(StepOutcome::Failed(e.to_string()));
            }
        }
        self.shared.set_finished();
    }

    fn produce(&mut self) -> Result<Ending, EngineError> {
        let shared = Arc::clone(&self.shared);
        let source = &shared.def.steps[0];
        match &source.kind {
            StepKind::Table {
                fields,
                rows,
                bindings,
                delay_ms,
                ..
            } => {
                let schema = &shared.schemas[0];
                let step = &shared.steps[0];
                let mut filters = Vec::new();
                for (param, field) in bindings {
                    match step.variable(param) {
                        Some(v) if !v.is_empty() => filters.push((schema.require(field)?, v)),
                        _ => {}
                    }
                }
                for (n, raw) in rows.iter().enumerate() {
                    if shared.stop_requested() {
                        return Ok(Ending::Stopped);
                    }
                    if raw.len() != fields.len() {
                        return Err(EngineError::Step(format!(
                            "table '{}' row {} has {} values, expected {}",
                            source.name,
                            n,
                            raw.len(),
                            fields.len()
                        )));
                    }
                    let row = Row::new(
                        raw.iter()
                            .zip(fields)
                            .map(|(v, f)| Scalar::from_json(v, f.data_type))
                            .collect(),
                    );
                    if filters.iter().any(|(idx, v)| row.values[*idx].render() != *v) {
                        continue;
                    }
                    if let Some(d) = self.emit(row)? {
                        return Ok(Ending::Done(d));
                    }
                    pause(*delay_ms);
                }
                Ok(Ending::Exhausted)
            }
            StepKind::Sequence {
                start,
                count,
                delay_ms,
                ..
            } => {
                for i in 0..*count {
                    if shared.stop_requested() {
                        return Ok(Ending::Stopped);
                    }
                    let row = Row::new(vec![Scalar::I64(start + i as i64)]);
                    if let Some(d) = self.emit(row)? {
                        return Ok(Ending::Done(d));
                    }
                    pause(*delay_ms);
                }
                Ok(Ending::Exhausted)
            }
            StepKind::Injector { .. } => {
                let queue = shared.queue.as_ref().ok_or_else(|| {
                    EngineError::InvalidDefinition(format!("injector '{}' has no queue", source.name))
                })?;
                loop {
                    if shared.stop_requested() {
                        return Ok(Ending::Stopped);
                    }
                    match queue.pop_timeout(INJECTOR_POLL) {
                        Pop::Item(row) => {
                            if let Some(d) = self.emit(row)? {
                                return Ok(Ending::Done(d));
                            }
                        }
                        Pop::Empty => continue,
                        Pop::Drained => {
                            return Ok(if shared.stop_requested() {
                                Ending::Stopped
                            } else {
                                Ending::Exhausted
                            })
                        }
                    }
                }
            }
            other => Err(EngineError::InvalidDefinition(format!(
                "first step '{}' is a {} step",
                source.name,
                other.label()
            ))),
        }
    }

    /// Emit one source row and push it down the chain.
    fn emit(&mut self, row: Row) -> Result<Option<usize>, EngineError> {
        tracing::trace!(pipeline = %self.shared.def.name, "row");
        self.fire_rows(0, std::slice::from_ref(&row));
        self.deliver(1, vec![row])
    }

    /// Push `rows` into step `from` and onwards. Returns the first step that
    /// reported `Flow::Done`.
    fn deliver(&mut self, from: usize, mut rows: Vec<Row>) -> Result<Option<usize>, EngineError> {
        let mut done = None;
        for i in from..self.finished.len() {
            if rows.is_empty() || self.finished[i] {
                break;
            }
            let mut next = Vec::new();
            let op = &mut self.ops[i - 1];
            for r in rows.drain(..) {
                if op.push(r, &mut next)? == Flow::Done && done.is_none() {
                    done = Some(i);
                }
            }
            self.fire_rows(i, &next);
            rows = next;
        }
        Ok(done)
    }

    fn flush_from(&mut self, k: usize) -> Result<(), EngineError> {
        for j in k..self.finished.len() {
            if self.finished[j] {
                continue;
            }
            if self.shared.stop_requested() {
                return Ok(());
            }
            let mut out = Vec::new();
            self.ops[j - 1].finish(&mut out)?;
            self.fire_rows(j, &out);
            if !out.is_empty() {
                self.deliver(j + 1, out)?;
            }
            self.finish_step(j, StepOutcome::Finished);
        }
        Ok(())
    }

    fn fire_rows(&mut self, step: usize, rows: &[Row]) {
        let schema = &self.shared.schemas[step];
        let listeners = &mut self.listeners[step].rows;
        if listeners.is_empty() {
            return;
        }
        for r in rows {
            for l in listeners.iter_mut() {
                l(schema, r);
            }
        }
    }

    fn finish_step(&mut self, step: usize, outcome: StepOutcome) {
        if self.finished[step] {
            return;
        }
        self.finished[step] = true;
        self.shared.steps[step].mark_output_done();
        for l in self.listeners[step].finish.drain(..) {
            l(&outcome);
        }
    }

    fn finish_remaining(&mut self, outcome: StepOutcome) {
        for i in 0..self.finished.len() {
            self.finish_step(i, outcome.clone());
        }
    }
}

fn pause(delay_ms: u64) {
    if delay_ms > 0 {
        thread::sleep(Duration::from_millis(delay_ms));
    }
}
