//! Registered optimizations, grouped by source name.
//!
//! YAML layout:
//! ```yaml
//! sources:
//!   orders:
//!     - name: region-capture
//!       step: read
//!       strategy: { type: parameter_capture, mappings: { region: REGION } }
//!     - name: filter-pushdown
//!       step: read
//!       enabled: false
//!       strategy: { type: condition_translation, variable: FILTER, dialect: sql }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::descriptor::OptimizationDescriptor;
use crate::error::OptimizationError;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRegistry {
    #[serde(default)]
    sources: BTreeMap<String, Vec<OptimizationDescriptor>>,
}

impl OptimizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml(src: &str) -> Result<Self, OptimizationError> {
        let parsed: OptimizationRegistry = serde_yaml::from_str(src)?;
        // Re-register to enforce unique names per source
        let mut registry = OptimizationRegistry::new();
        for (source, descs) in parsed.sources {
            for desc in descs {
                registry.register(&source, desc)?;
            }
        }
        Ok(registry)
    }

    /// Append `desc` to `source`'s optimizations. Names are unique per source.
    pub fn register(
        &mut self,
        source: &str,
        desc: OptimizationDescriptor,
    ) -> Result<(), OptimizationError> {
        let list = self.sources.entry(source.to_string()).or_default();
        if list.iter().any(|d| d.name == desc.name) {
            return Err(OptimizationError::Duplicate {
                source_name: source.to_string(),
                name: desc.name,
            });
        }
        list.push(desc);
        Ok(())
    }

    /// All optimizations of `source`, in registration order.
    pub fn for_source(&self, source: &str) -> &[OptimizationDescriptor] {
        self.sources.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn enabled_for<'a>(
        &'a self,
        source: &str,
    ) -> impl Iterator<Item = &'a OptimizationDescriptor> + 'a {
        self.for_source(source).iter().filter(|d| d.enabled)
    }

    pub fn find(&self, source: &str, name: &str) -> Option<&OptimizationDescriptor> {
        self.for_source(source).iter().find(|d| d.name == name)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}
