/*!
 * Bounded Call Library
 * Deadline-bounded function execution with cooperative and signal-based cancellation
 */

pub mod core;
pub mod deadline;
pub mod monitoring;

// Re-exports
pub use crate::core::errors::{DeadlineError, DeadlineExceeded, DeadlineResult, TimeoutError};
pub use crate::core::guard::alarm_depth;
pub use deadline::{
    checkpoint, is_cancelled, signal_deadline_available, sleep, with_timeout, with_timeout_secs,
    with_timeout_signal, with_timeout_signal_secs, CheckpointExt, DeadlineConfig,
    InvocationState, SignalExecutor, ThreadExecutor,
};
pub use monitoring::{
    init_tracing, DeadlineStats, DeadlineStatsSnapshot, LogSink, NullSink, TracingSink,
};
