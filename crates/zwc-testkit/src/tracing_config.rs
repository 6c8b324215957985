//! Tracing setup for tests.

use tracing_subscriber::EnvFilter;

/// Initialize a compact tracing subscriber for a test run.
///
/// Honors `RUST_LOG`, defaults to `info`, and is safe to call from multiple
/// tests; only the first call installs the subscriber.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}
