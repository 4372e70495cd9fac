//! Small helpers shared by tests.

use livetree_data::{node_from_json, Node, Path};
use serde_json::Value;
use std::sync::Once;
use tracing_subscriber::EnvFilter;

static TRACING: Once = Once::new();

/// Installs a test-friendly tracing subscriber once per process.
///
/// Filtering follows `RUST_LOG`, defaulting to warnings only.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Parses a path, panicking on invalid input.
pub fn path(path: &str) -> Path {
    Path::parse(path).expect("test path must be valid")
}

/// Imports a JSON value, panicking on invalid input.
pub fn node(value: Value) -> Node {
    node_from_json(&value).expect("test value must be valid")
}
