//! Execution configuration that downstream crates can serialize/deserialize.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecConfig {
    /// Bounded wait for one row handoff into a query pipeline's injector.
    /// A timed-out handoff is retried while the query pipeline is alive.
    pub offer_timeout_ms: u64,

    /// Capacity of an injector step's row buffer.
    pub channel_capacity: usize,

    /// Poll interval of the cache observer's `has_next` wait.
    pub observer_poll_ms: u64,

    /// Whether completed source runs are captured and replayed.
    pub cache_enabled: bool,

    /// Upper bound on cached entries (oldest evicted first). `None` = unbounded.
    pub cache_max_entries: Option<usize>,

    /// Entry time-to-live in seconds. `None` = entries never expire.
    pub cache_ttl_secs: Option<u64>,

    /// Default row ceiling for windowed queries.
    pub window_max_rows: i64,

    /// Default time ceiling (ms) for windowed queries.
    pub window_max_time_ms: i64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            offer_timeout_ms: 1_000,
            channel_capacity: 1_000,
            observer_poll_ms: 10,
            cache_enabled: true,
            cache_max_entries: Some(64),
            cache_ttl_secs: None,
            window_max_rows: 50_000,
            window_max_time_ms: 10_000,
        }
    }
}

impl ExecConfig {
    /// Create a config from environment variables, falling back to defaults.
    ///
    /// Environment variables:
    /// - `STEPQL_OFFER_TIMEOUT_MS`: injector handoff wait
    /// - `STEPQL_CHANNEL_CAPACITY`: injector buffer size
    /// - `STEPQL_OBSERVER_POLL_MS`: observer poll interval
    /// - `STEPQL_CACHE_ENABLED`: `true`/`false`
    /// - `STEPQL_CACHE_MAX_ENTRIES`: entry bound (`0` = unbounded)
    /// - `STEPQL_CACHE_TTL_SECS`: entry ttl
    /// - `STEPQL_WINDOW_MAX_ROWS`, `STEPQL_WINDOW_MAX_TIME_MS`: window ceilings
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(s) = std::env::var("STEPQL_OFFER_TIMEOUT_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.offer_timeout_ms = v;
            }
        }

        if let Ok(s) = std::env::var("STEPQL_CHANNEL_CAPACITY") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.channel_capacity = v.max(1);
            }
        }

        if let Ok(s) = std::env::var("STEPQL_OBSERVER_POLL_MS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.observer_poll_ms = v;
            }
        }

        if let Ok(s) = std::env::var("STEPQL_CACHE_ENABLED") {
            if let Ok(v) = s.parse::<bool>() {
                cfg.cache_enabled = v;
            }
        }

        if let Ok(s) = std::env::var("STEPQL_CACHE_MAX_ENTRIES") {
            if let Ok(v) = s.parse::<usize>() {
                cfg.cache_max_entries = (v > 0).then_some(v);
            }
        }

        if let Ok(s) = std::env::var("STEPQL_CACHE_TTL_SECS") {
            if let Ok(v) = s.parse::<u64>() {
                cfg.cache_ttl_secs = Some(v);
            }
        }

        if let Ok(s) = std::env::var("STEPQL_WINDOW_MAX_ROWS") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.window_max_rows = v;
            }
        }

        if let Ok(s) = std::env::var("STEPQL_WINDOW_MAX_TIME_MS") {
            if let Ok(v) = s.parse::<i64>() {
                cfg.window_max_time_ms = v;
            }
        }

        cfg
    }

    pub fn offer_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.offer_timeout_ms)
    }

    pub fn observer_poll(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.observer_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_in_defaults() {
        let cfg: ExecConfig =
            serde_json::from_str(r#"{"offer_timeout_ms": 5, "cache_enabled": false}"#).unwrap();
        assert_eq!(cfg.offer_timeout_ms, 5);
        assert!(!cfg.cache_enabled);
        assert_eq!(cfg.channel_capacity, 1_000);
        assert_eq!(cfg.cache_max_entries, Some(64));
    }

    #[test]
    fn env_overrides_and_ignores_garbage() {
        std::env::set_var("STEPQL_CHANNEL_CAPACITY", "0");
        std::env::set_var("STEPQL_CACHE_MAX_ENTRIES", "0");
        std::env::set_var("STEPQL_OBSERVER_POLL_MS", "soon");
        let cfg = ExecConfig::from_env();
        std::env::remove_var("STEPQL_CHANNEL_CAPACITY");
        std::env::remove_var("STEPQL_CACHE_MAX_ENTRIES");
        std::env::remove_var("STEPQL_OBSERVER_POLL_MS");

        assert_eq!(cfg.channel_capacity, 1);
        assert_eq!(cfg.cache_max_entries, None);
        assert_eq!(cfg.observer_poll_ms, 10);
    }

    #[test]
    fn zero_poll_is_raised_to_one_millisecond() {
        let cfg = ExecConfig {
            observer_poll_ms: 0,
            ..ExecConfig::default()
        };
        assert_eq!(cfg.observer_poll(), std::time::Duration::from_millis(1));
    }
}
