//! Query text → `QuerySpec`.
//!
//! Full query-language parsing lives outside this workspace. The seam is the
//! `QueryParser` trait; `YamlQueryParser` reads a serialized `QuerySpec`.

use stepql_core::query::QuerySpec;

use crate::error::PlanError;

pub trait QueryParser: Send + Sync {
    /// Parse `text`. A named source must be one of `known_sources`.
    fn parse(&self, text: &str, known_sources: &[String]) -> Result<QuerySpec, PlanError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct YamlQueryParser;

impl QueryParser for YamlQueryParser {
    fn parse(&self, text: &str, known_sources: &[String]) -> Result<QuerySpec, PlanError> {
        let spec: QuerySpec = serde_yaml::from_str(text)?;
        if let Some(src) = spec.source() {
            if !known_sources.iter().any(|k| k == src) {
                return Err(PlanError::UnknownSource(src.to_string()));
            }
        }
        Ok(spec)
    }
}
