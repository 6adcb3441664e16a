/*!
 * Diagnostic Sink
 *
 * The logging collaborator executors report through. Injected at construction
 * instead of reaching for a global logger; the default forwards to `tracing`.
 */

use std::sync::Arc;
use tracing::Level;

/// Receives an executor's diagnostics
///
/// Implementations must not block and must not panic: they are called on the
/// deadline path and from detached workers.
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

/// Forwards to `tracing` under the `bounded_call` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!(target: "bounded_call", "{}", message),
            Level::WARN => tracing::warn!(target: "bounded_call", "{}", message),
            Level::INFO => tracing::info!(target: "bounded_call", "{}", message),
            Level::DEBUG => tracing::debug!(target: "bounded_call", "{}", message),
            _ => tracing::trace!(target: "bounded_call", "{}", message),
        }
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: Level, _message: &str) {}
}

impl<S: LogSink + ?Sized> LogSink for Arc<S> {
    fn log(&self, level: Level, message: &str) {
        (**self).log(level, message)
    }
}

/// Sink used when none is injected
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}
