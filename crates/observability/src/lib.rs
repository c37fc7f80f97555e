//! Tracing and logging setup shared by the Backbone binaries.

/// Initialize process-wide observability (tracing/logging).
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init();
}

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use tracing::{LOG_FORMAT_ENV, LogFormat, init_with};
