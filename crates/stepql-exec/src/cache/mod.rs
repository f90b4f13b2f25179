//! Result cache: completed source runs, keyed by [`CacheKey`], replayed into
//! later executions instead of re-running the source.
//!
//! - `Observer` records a live run and publishes it when it completes.
//! - `Replayer` feeds a recorded run into a query pipeline.

mod key;
mod observer;
mod replay;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tracing::debug;

use stepql_core::config::ExecConfig;
use stepql_core::schema::Schema;
use stepql_core::types::Row;

pub use key::CacheKey;
pub use observer::{ObserveError, ObservedResult, ObservedRows, Observer};
pub use replay::{ReplayError, ReplayTarget, Replayer};

/// Rows of one completed source run. Never mutated once published.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub schema: Schema,
    pub rows: Vec<Row>,
}

impl CacheEntry {
    pub fn new(schema: Schema, rows: Vec<Row>) -> Self {
        Self { schema, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug)]
struct Cached {
    entry: Arc<CacheEntry>,
    inserted: Instant,
    seq: u64,
}

#[derive(Debug)]
pub struct ResultCache {
    entries: RwLock<HashMap<CacheKey, Cached>>,
    /// `None` = unbounded
    max_entries: Option<usize>,
    /// `None` = entries never expire
    ttl: Option<Duration>,
    next_seq: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(None, None)
    }
}

impl ResultCache {
    pub fn new(max_entries: Option<usize>, ttl: Option<Duration>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entries,
            ttl,
            next_seq: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &ExecConfig) -> Self {
        Self::new(cfg.cache_max_entries, cfg.cache_ttl_secs.map(Duration::from_secs))
    }

    fn expired(&self, cached: &Cached) -> bool {
        self.ttl
            .map(|ttl| cached.inserted.elapsed() > ttl)
            .unwrap_or(false)
    }

    /// Look up `key`. Expired entries are removed on the way.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        {
            let entries = self.entries.read();
            let cached = entries.get(key)?;
            if !self.expired(cached) {
                return Some(Arc::clone(&cached.entry));
            }
        }
        let mut entries = self.entries.write();
        if entries.get(key).map(|c| self.expired(c)).unwrap_or(false) {
            entries.remove(key);
            debug!(%key, "cache entry expired");
        }
        None
    }

    /// Insert or replace, evicting the oldest entries beyond `max_entries`.
    pub fn put(&self, key: CacheKey, entry: Arc<CacheEntry>) {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let mut entries = self.entries.write();
        entries.remove(&key);
        if let Some(max) = self.max_entries {
            while !entries.is_empty() && entries.len() >= max {
                Self::evict_oldest(&mut entries);
            }
            if max == 0 {
                return;
            }
        }
        debug!(%key, rows = entry.len(), "cache entry published");
        entries.insert(
            key,
            Cached {
                entry,
                inserted: Instant::now(),
                seq,
            },
        );
    }

    fn evict_oldest(entries: &mut HashMap<CacheKey, Cached>) {
        let oldest = entries
            .iter()
            .min_by_key(|(_, c)| c.seq)
            .map(|(k, _)| k.clone());
        if let Some(k) = oldest {
            debug!(key = %k, "evicting cache entry");
            entries.remove(&k);
        }
    }

    pub fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use stepql_core::schema::{DataType, Field};
    use stepql_core::types::Scalar;

    fn key(n: usize) -> CacheKey {
        CacheKey::new(format!("s{}", n), BTreeMap::new(), vec![])
    }

    fn entry(n: i64) -> Arc<CacheEntry> {
        Arc::new(CacheEntry::new(
            Schema::new(vec![Field::new("n", DataType::Int64, false)]),
            vec![Row::new(vec![Scalar::I64(n)])],
        ))
    }

    #[test]
    fn put_get_invalidate() {
        let cache = ResultCache::default();
        assert!(cache.get(&key(1)).is_none());
        cache.put(key(1), entry(1));
        assert_eq!(cache.get(&key(1)).unwrap().rows[0].values[0], Scalar::I64(1));
        cache.put(key(1), entry(2));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&key(1)).unwrap().rows[0].values[0], Scalar::I64(2));
        assert!(cache.invalidate(&key(1)));
        assert!(cache.is_empty());
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let cache = ResultCache::new(Some(2), None);
        cache.put(key(1), entry(1));
        cache.put(key(2), entry(2));
        cache.put(key(3), entry(3));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.get(&key(2)).is_some());
        assert!(cache.get(&key(3)).is_some());
    }

    #[test]
    fn expired_entries_are_dropped_on_lookup() {
        let cache = ResultCache::new(None, Some(Duration::ZERO));
        cache.put(key(1), entry(1));
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(&key(1)).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn zero_capacity_stores_nothing() {
        let cache = ResultCache::new(Some(0), None);
        cache.put(key(1), entry(1));
        assert!(cache.is_empty());
    }
}
