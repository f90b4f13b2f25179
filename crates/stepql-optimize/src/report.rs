use serde::{Deserialize, Serialize};

use crate::descriptor::OptimizationDescriptor;

/// Marker put in front of the description of a disabled optimization's preview.
pub const DISABLED_PREFIX: &str = "[disabled]";

/// What an optimization would do to its target step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactReport {
    pub optimization: String,
    pub step: String,
    pub description: String,
    pub query_before: Option<String>,
    pub query_after: Option<String>,
    /// The rewrite changed the step and would be applied.
    pub modified: bool,
    pub error: Option<String>,
}

impl ImpactReport {
    pub fn new(desc: &OptimizationDescriptor, description: String) -> Self {
        let description = if desc.enabled {
            description
        } else {
            format!("{} {}", DISABLED_PREFIX, description)
        };
        Self {
            optimization: desc.name.clone(),
            step: desc.step.clone(),
            description,
            query_before: None,
            query_after: None,
            modified: false,
            error: None,
        }
    }

    pub fn failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.modified = false;
        self
    }
}

/// Per-optimization outcome of one execution's `init` and `activate`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub optimization: String,
    /// The step's effective query text after activation, when it changed.
    pub effective_query: Option<String>,
    pub changed: bool,
    pub error: Option<String>,
}

impl Activation {
    pub fn failed(optimization: impl Into<String>, error: impl ToString) -> Self {
        Self {
            optimization: optimization.into(),
            effective_query: None,
            changed: false,
            error: Some(error.to_string()),
        }
    }
}
