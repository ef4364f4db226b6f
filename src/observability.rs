//! Tracing setup for pipeline diagnostics.
//!
//! Operators emit structured events through the `tracing` ecosystem.
//! Applications that already install their own subscriber can skip this
//! module entirely; `init_tracing` is a convenience for binaries and
//! integration tests.

use tracing_subscriber::{fmt, EnvFilter};

/// Installs a formatted tracing subscriber for the whole process.
///
/// The filter comes from `RUST_LOG` when set, defaulting to `info`.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
