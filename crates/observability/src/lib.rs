//! Tracing and logging setup shared by processes that host a Jitney bus.

/// Initialize process-wide tracing with settings read from the environment.
///
/// Safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LogFormat, TracingConfig};
