use tracing::Level;

/// Installs a debug-level fmt subscriber routed through the libtest
/// capture. Later calls in the same process are ignored.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
