/*!
 * Monitoring
 * Diagnostic sink, deadline statistics and tracing setup
 */

mod sink;
mod stats;
mod tracer;

pub use sink::{default_sink, LogSink, NullSink, TracingSink};
pub use stats::{DeadlineStats, DeadlineStatsSnapshot};
pub use tracer::{init_tracing, InvocationSpan, ENV_TRACE_JSON};
