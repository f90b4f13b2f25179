//! In-process reference engine.
//!
//! Definitions are registered up front and handed out as fresh copies by
//! `load`. Each instantiated pipeline runs on its own worker thread.

mod ops;
mod pipeline;
pub mod queue;
mod step;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use stepql_core::config::ExecConfig;
use stepql_core::pipeline::PipelineDef;
use stepql_core::schema::Schema;

use crate::error::EngineError;
use crate::traits::{Pipeline, PipelineEngine};

pub use ops::derive_schemas;
pub use pipeline::MemoryPipeline;

pub struct MemoryEngine {
    defs: RwLock<BTreeMap<String, PipelineDef>>,
    channel_capacity: usize,
}

impl MemoryEngine {
    pub fn new(cfg: &ExecConfig) -> Self {
        Self::with_capacity(cfg.channel_capacity)
    }

    /// Engine whose injector steps buffer at most `channel_capacity` rows.
    pub fn with_capacity(channel_capacity: usize) -> Self {
        Self {
            defs: RwLock::new(BTreeMap::new()),
            channel_capacity: channel_capacity.max(1),
        }
    }

    /// Register (or replace) a definition. Validation happens on `load`.
    pub fn register(&self, def: PipelineDef) {
        tracing::debug!(pipeline = %def.name, steps = def.steps.len(), "registered pipeline");
        self.defs.write().insert(def.name.clone(), def);
    }

    pub fn channel_capacity(&self) -> usize {
        self.channel_capacity
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(&ExecConfig::default())
    }
}

impl PipelineEngine for MemoryEngine {
    fn load(&self, name: &str) -> Result<PipelineDef, EngineError> {
        let def = self
            .defs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::PipelineNotFound(name.to_string()))?;
        derive_schemas(&def).map_err(|e| match e {
            EngineError::InvalidDefinition(_) => e,
            other => EngineError::InvalidDefinition(other.to_string()),
        })?;
        Ok(def)
    }

    fn instantiate(&self, def: &PipelineDef) -> Result<Arc<dyn Pipeline>, EngineError> {
        Ok(Arc::new(MemoryPipeline::new(def.clone(), self.channel_capacity)?))
    }

    fn step_schema(&self, def: &PipelineDef, step: &str) -> Result<Schema, EngineError> {
        let idx = def.step_index(step).ok_or_else(|| EngineError::StepNotFound {
            pipeline: def.name.clone(),
            step: step.to_string(),
        })?;
        let mut schemas = derive_schemas(def)?;
        Ok(schemas.swap_remove(idx))
    }

    fn pipeline_names(&self) -> Vec<String> {
        self.defs.read().keys().cloned().collect()
    }
}
