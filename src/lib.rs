//! Shared support for the workspace integration tests.

pub use scout_core;
pub use scout_search;
pub use scout_storage;

use std::sync::Once;

static INIT: Once = Once::new();

/// Install a test-friendly tracing subscriber once per process. Safe to
/// call from every test.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
