//! Shared helpers for integration tests

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

/// Default wait for blocking drains in tests
pub const WAIT: Duration = Duration::from_secs(2);

static INIT: Once = Once::new();

/// Route `tracing` output to the test harness (`RUST_LOG` filters it)
pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}
