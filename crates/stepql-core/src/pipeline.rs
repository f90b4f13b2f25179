//! Pipeline definitions: the static, cloneable description of a data-flow
//! graph before it is instantiated by an engine.
//!
//! Definitions are linear: the first step is a source (`Table`, `Sequence` or
//! `Injector`), every later step transforms the rows of the step before it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::error::{Error, Result};
use crate::query::{Aggregation, SelectItem, SortKey};
use crate::schema::Field;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateDef {
    pub function: Aggregation,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Literal rows. `bindings` maps parameter name → field: when the
    /// parameter has a non-empty value only matching rows are emitted.
    Table {
        fields: Vec<Field>,
        #[serde(default)]
        rows: Vec<Vec<serde_json::Value>>,
        /// Backend query template, `${NAME}` placeholders are substituted.
        #[serde(default)]
        query: Option<String>,
        #[serde(default)]
        bindings: BTreeMap<String, String>,
        #[serde(default)]
        delay_ms: u64,
    },
    /// `count` rows of a single Int64 field counting up from `start`.
    Sequence {
        field: String,
        #[serde(default)]
        start: i64,
        count: u64,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Row intake fed from outside the pipeline.
    Injector { fields: Vec<Field> },
    Filter { condition: Condition },
    Select { items: Vec<SelectItem> },
    Aggregate {
        #[serde(default)]
        group_by: Vec<String>,
        aggregates: Vec<AggregateDef>,
    },
    Sort { keys: Vec<SortKey> },
    Limit {
        count: u64,
        #[serde(default)]
        offset: u64,
    },
    Dummy,
}

impl StepKind {
    pub fn is_source(&self) -> bool {
        matches!(
            self,
            StepKind::Table { .. } | StepKind::Sequence { .. } | StepKind::Injector { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            StepKind::Table { .. } => "table",
            StepKind::Sequence { .. } => "sequence",
            StepKind::Injector { .. } => "injector",
            StepKind::Filter { .. } => "filter",
            StepKind::Select { .. } => "select",
            StepKind::Aggregate { .. } => "aggregate",
            StepKind::Sort { .. } => "sort",
            StepKind::Limit { .. } => "limit",
            StepKind::Dummy => "dummy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    pub name: String,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl StepDef {
    pub fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDef {
    pub name: String,
    /// Declared parameter slots (name → default value).
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    pub steps: Vec<StepDef>,
}

impl PipelineDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: BTreeMap::new(),
            steps: vec![],
        }
    }

    pub fn with_step(mut self, step: StepDef) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn step_index(&self, name: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.name == name)
    }

    /// Declare a parameter slot; an existing default is kept.
    pub fn declare_parameter(&mut self, name: impl Into<String>, default: impl Into<String>) {
        self.parameters.entry(name.into()).or_insert_with(|| default.into());
    }

    /// Check the linear shape: non-empty, source first, no other sources,
    /// unique step names.
    pub fn validate(&self) -> Result<()> {
        let first = self
            .steps
            .first()
            .ok_or_else(|| Error::Config(format!("pipeline '{}' has no steps", self.name)))?;
        if !first.kind.is_source() {
            return Err(Error::Config(format!(
                "pipeline '{}': first step '{}' must be a source, got {}",
                self.name,
                first.name,
                first.kind.label()
            )));
        }
        for (i, step) in self.steps.iter().enumerate().skip(1) {
            if step.kind.is_source() {
                return Err(Error::Config(format!(
                    "pipeline '{}': step '{}' is a second source",
                    self.name, step.name
                )));
            }
            if self.steps[..i].iter().any(|s| s.name == step.name) {
                return Err(Error::Config(format!(
                    "pipeline '{}': duplicate step name '{}'",
                    self.name, step.name
                )));
            }
        }
        Ok(())
    }
}

/// Substitute `${NAME}` placeholders using `lookup`. Unknown names become empty.
pub fn substitute(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                out.push_str(&lookup(name).unwrap_or_default());
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}
