//! Cache keys for windowed (streaming) variants of a query.
//!
//! A window is `size` rows (row mode) or `size` milliseconds (time mode),
//! re-evaluated `every` rows or milliseconds. Both are clamped to the
//! configured ceilings before they become part of the key, so requests that
//! clamp to the same window share a key.

use std::fmt;

use serde::{Deserialize, Serialize};

use stepql_core::config::ExecConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowMode {
    Row,
    Time,
}

impl fmt::Display for WindowMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WindowMode::Row => "row",
            WindowMode::Time => "time",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowParams {
    pub size: i64,
    pub every: i64,
    pub mode: WindowMode,
    pub max_rows: i64,
    /// Milliseconds.
    pub max_time: i64,
    /// Query limit; non-positive means none.
    pub limit: i64,
}

impl WindowParams {
    /// Window of `size` with the ceilings from `cfg` and no limit.
    pub fn new(mode: WindowMode, size: i64, every: i64, cfg: &ExecConfig) -> Self {
        Self {
            size,
            every,
            mode,
            max_rows: cfg.window_max_rows,
            max_time: cfg.window_max_time_ms,
            limit: 0,
        }
    }

    pub fn with_limit(mut self, limit: i64) -> Self {
        self.limit = limit;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowCacheKey {
    pub key: String,
    pub size: i64,
    pub every: i64,
    pub max_rows: i64,
    pub max_time: i64,
    pub mode: WindowMode,
}

impl fmt::Display for WindowCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Key for `query_text` over the source identified by `source_hash`, or
/// `None` when the clamped window is empty.
pub fn window_key(query_text: &str, source_hash: &str, params: &WindowParams) -> Option<WindowCacheKey> {
    let mut max_rows = params.max_rows;
    let mut max_time = params.max_time;
    if params.limit > 0 {
        match params.mode {
            WindowMode::Row => max_time = max_time.min(params.limit),
            WindowMode::Time => max_rows = max_rows.min(params.limit),
        }
    }
    let ceiling = match params.mode {
        WindowMode::Row => max_rows,
        WindowMode::Time => max_time,
    };

    let size = params.size.min(ceiling);
    if size <= 0 {
        return None;
    }
    let every = if params.every <= 0 {
        0
    } else {
        params.every.min(ceiling)
    };

    let key = format!(
        "{}|{}|{}|{}|{}|{}|{}",
        query_text, source_hash, params.mode, size, every, max_rows, max_time
    );
    Some(WindowCacheKey {
        key,
        size,
        every,
        max_rows,
        max_time,
        mode: params.mode,
    })
}
