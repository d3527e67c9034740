//! Tracing and logging setup shared by the binaries.

/// Tracing configuration (filters, output format).
pub mod tracing;

pub use self::tracing::LogFormat;

/// Initialize process-wide tracing with JSON output.
///
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    tracing::init(LogFormat::Json);
}

/// Initialize tracing, choosing JSON or human-readable output.
pub fn init_with(json: bool) {
    tracing::init(if json { LogFormat::Json } else { LogFormat::Pretty });
}
