//! Window cache keys: clamping and determinism.

use stepql_core::config::ExecConfig;
use stepql_core::hash::hash_str;
use stepql_exec::{window_key, WindowMode, WindowParams};

fn cfg() -> ExecConfig {
    ExecConfig {
        window_max_rows: 500,
        window_max_time_ms: 30_000,
        ..ExecConfig::default()
    }
}

#[test]
fn same_inputs_same_key() {
    let source = hash_str("orders/orders/read").to_hex();
    let p = WindowParams::new(WindowMode::Time, 5_000, 1_000, &cfg());
    let a = window_key("SELECT * FROM orders", &source, &p).unwrap();
    let b = window_key("SELECT * FROM orders", &source, &p).unwrap();
    assert_eq!(a, b);
    assert_ne!(
        a,
        window_key("SELECT * FROM other", &source, &p).unwrap()
    );
}

#[test]
fn row_window_clamps_to_row_ceiling_and_limit_caps_time() {
    let p = WindowParams::new(WindowMode::Row, 10_000, 20_000, &cfg()).with_limit(250);
    let k = window_key("q", "h", &p).unwrap();
    assert_eq!(k.size, 500);
    assert_eq!(k.every, 500);
    assert_eq!(k.max_rows, 500);
    assert_eq!(k.max_time, 250);
    assert_eq!(k.mode, WindowMode::Row);
}

#[test]
fn time_window_limit_caps_rows() {
    let p = WindowParams::new(WindowMode::Time, 60_000, 0, &cfg()).with_limit(10);
    let k = window_key("q", "h", &p).unwrap();
    assert_eq!(k.size, 30_000);
    assert_eq!(k.every, 0);
    assert_eq!(k.max_rows, 10);
    assert_eq!(k.max_time, 30_000);
    assert_eq!(k.to_string(), "q|h|time|30000|0|10|30000");
}

#[test]
fn empty_windows_have_no_key() {
    assert!(window_key("q", "h", &WindowParams::new(WindowMode::Row, 0, 1, &cfg())).is_none());
    let zero_ceiling = ExecConfig {
        window_max_rows: 0,
        ..cfg()
    };
    assert!(window_key("q", "h", &WindowParams::new(WindowMode::Row, 10, 1, &zero_ceiling)).is_none());
}

fn params(mode: WindowMode, size: i64, every: i64, limit: i64) -> WindowParams {
    WindowParams {
        size,
        every,
        mode,
        max_rows: 10_000,
        max_time: 10_000,
        limit,
    }
}

#[test]
fn small_row_window_keeps_size_and_rate() {
    let k = window_key("q", "h", &params(WindowMode::Row, 10, 1, 1_000)).unwrap();
    assert_eq!((k.size, k.every), (10, 1));
    assert_eq!(k.max_rows, 10_000);
    assert_eq!(k.max_time, 1_000);
}

#[test]
fn negative_size_has_no_key() {
    assert!(window_key("q", "h", &params(WindowMode::Row, -10, 1, 1_000)).is_none());
    assert!(window_key("q", "h", &params(WindowMode::Time, -10, 1, 1_000)).is_none());
}
