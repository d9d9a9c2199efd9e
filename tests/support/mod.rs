use tracing_subscriber::EnvFilter;

/// Installs a test-friendly subscriber; `RUST_LOG=runloop=trace` shows queue traffic.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
