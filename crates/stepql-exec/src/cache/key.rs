use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use stepql_core::hash::{hash_parts, Hash256};

/// Identity of one source run: which source, with which parameters, and how
/// the active optimizations rewrote its query.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub source: String,
    pub params: BTreeMap<String, String>,
    /// Effective query text of every optimization that changed the source, in
    /// registration order.
    pub effective_queries: Vec<String>,
}

impl CacheKey {
    pub fn new(
        source: impl Into<String>,
        params: BTreeMap<String, String>,
        effective_queries: Vec<String>,
    ) -> Self {
        Self {
            source: source.into(),
            params,
            effective_queries,
        }
    }

    /// Stable content hash, independent of process and map iteration order.
    pub fn digest(&self) -> Hash256 {
        let params = self.params.len().to_string();
        let queries = self.effective_queries.len().to_string();
        let mut parts: Vec<&str> = vec![self.source.as_str(), params.as_str()];
        for (k, v) in &self.params {
            parts.push(k);
            parts.push(v);
        }
        parts.push(queries.as_str());
        parts.extend(self.effective_queries.iter().map(String::as_str));
        hash_parts(parts)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.source, &self.digest().to_hex()[..12])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(params: &[(&str, &str)], queries: &[&str]) -> CacheKey {
        CacheKey::new(
            "orders",
            params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            queries.iter().map(|q| q.to_string()).collect(),
        )
    }

    #[test]
    fn digest_is_deterministic() {
        let a = key(&[("REGION", "east"), ("Y", "2024")], &["select 1"]);
        let b = key(&[("Y", "2024"), ("REGION", "east")], &["select 1"]);
        assert_eq!(a, b);
        assert_eq!(a.digest(), b.digest());
    }

    #[test]
    fn every_component_matters() {
        let base = key(&[("REGION", "east")], &["q1"]);
        assert_ne!(base.digest(), key(&[("REGION", "west")], &["q1"]).digest());
        assert_ne!(base.digest(), key(&[("REGION", "east")], &["q2"]).digest());
        assert_ne!(base.digest(), key(&[("REGION", "east")], &[]).digest());
        let mut other = base.clone();
        other.source = "audit".into();
        assert_ne!(base.digest(), other.digest());
    }

    #[test]
    fn params_and_queries_do_not_alias() {
        let a = key(&[("a", "b")], &[]);
        let b = key(&[], &["a", "b"]);
        assert_ne!(a.digest(), b.digest());
    }
}
