//! Named data sources: which pipeline produces a source's rows, and from which step.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ExecError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub name: String,
    pub pipeline: String,
    /// Step whose output rows form the source.
    pub step: String,
    /// Completed runs may be cached and replayed.
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
}

fn default_cacheable() -> bool {
    true
}

impl SourceEntry {
    pub fn new(name: impl Into<String>, pipeline: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pipeline: pipeline.into(),
            step: step.into(),
            cacheable: true,
        }
    }

    pub fn uncached(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

#[derive(Debug, Deserialize)]
struct CatalogDocument {
    sources: Vec<SourceEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct SourceCatalog {
    entries: BTreeMap<String, SourceEntry>,
}

impl SourceCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `sources:` list.
    pub fn from_yaml(src: &str) -> Result<Self, ExecError> {
        let doc: CatalogDocument = serde_yaml::from_str(src)?;
        let mut catalog = Self::new();
        for entry in doc.sources {
            catalog.register(entry);
        }
        Ok(catalog)
    }

    pub fn register(&mut self, entry: SourceEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&SourceEntry> {
        self.entries.get(name)
    }

    /// Source names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_sources_from_yaml() {
        let src = r#"
sources:
  - { name: orders, pipeline: orders, step: read }
  - { name: audit, pipeline: audit-log, step: out, cacheable: false }
"#;
        let c = SourceCatalog::from_yaml(src).unwrap();
        assert_eq!(c.names(), vec!["audit".to_string(), "orders".to_string()]);
        assert!(c.get("orders").unwrap().cacheable);
        assert!(!c.get("audit").unwrap().cacheable);
        assert!(c.get("missing").is_none());
    }
}
