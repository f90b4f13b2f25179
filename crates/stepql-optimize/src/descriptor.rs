use serde::{Deserialize, Serialize};

use crate::capture::ParameterCapture;
use crate::strategy::PushDownStrategy;
use crate::translate::ConditionTranslation;

/// One registered optimization. Steps are referenced by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationDescriptor {
    pub name: String,
    /// Target step of the source pipeline.
    pub step: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub strategy: Strategy,
}

fn default_enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Strategy {
    ParameterCapture(ParameterCapture),
    ConditionTranslation(ConditionTranslation),
}

impl Strategy {
    pub fn as_strategy(&self) -> &dyn PushDownStrategy {
        match self {
            Strategy::ParameterCapture(s) => s,
            Strategy::ConditionTranslation(s) => s,
        }
    }
}

impl OptimizationDescriptor {
    pub fn new(name: impl Into<String>, step: impl Into<String>, strategy: Strategy) -> Self {
        Self {
            name: name.into(),
            step: step.into(),
            enabled: true,
            strategy,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn strategy(&self) -> &dyn PushDownStrategy {
        self.strategy.as_strategy()
    }
}
