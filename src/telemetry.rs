//! Tracing initialization for embedders and tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize a fmt subscriber honoring `RUST_LOG`. Safe to call more
/// than once; later calls are ignored.
pub fn init() {
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .try_init();
}
