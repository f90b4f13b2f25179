//! Step instances: per-step variables, query templates and lifecycle flags.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use stepql_core::pipeline::{substitute, StepDef, StepKind};

use crate::traits::StepInstance;

/// Variables visible to every step of one pipeline instance.
#[derive(Debug, Default)]
pub struct VariableSpace {
    defaults: BTreeMap<String, String>,
    values: RwLock<BTreeMap<String, String>>,
}

impl VariableSpace {
    pub fn new(defaults: BTreeMap<String, String>) -> Self {
        Self {
            defaults,
            values: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.values
            .read()
            .get(name)
            .cloned()
            .or_else(|| self.defaults.get(name).cloned())
    }

    pub fn set(&self, name: &str, value: &str) {
        self.values.write().insert(name.to_string(), value.to_string());
    }
}

pub struct MemoryStep {
    name: String,
    query: Option<String>,
    locals: RwLock<BTreeMap<String, String>>,
    space: Arc<VariableSpace>,
    output_done: AtomicBool,
    disposed: AtomicBool,
    stopped: AtomicBool,
}

impl MemoryStep {
    pub fn new(def: &StepDef, space: Arc<VariableSpace>) -> Self {
        let query = match &def.kind {
            StepKind::Table { query, .. } => query.clone(),
            _ => None,
        };
        Self {
            name: def.name.clone(),
            query,
            locals: RwLock::new(BTreeMap::new()),
            space,
            output_done: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn is_output_done(&self) -> bool {
        self.output_done.load(Ordering::Acquire)
    }

    pub fn is_marked_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl StepInstance for MemoryStep {
    fn name(&self) -> &str {
        &self.name
    }

    fn variable(&self, name: &str) -> Option<String> {
        self.locals
            .read()
            .get(name)
            .cloned()
            .or_else(|| self.space.get(name))
    }

    fn set_variable(&self, name: &str, value: &str) {
        self.locals.write().insert(name.to_string(), value.to_string());
    }

    fn query_text(&self) -> Option<String> {
        self.query
            .as_deref()
            .map(|q| substitute(q, |name| self.variable(name)))
    }

    fn mark_output_done(&self) {
        self.output_done.store(true, Ordering::Release);
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}
