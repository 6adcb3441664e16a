/*!
 * Signal-Based Deadline Executor
 *
 * Runs the target synchronously on the calling thread under a one-shot
 * `SIGALRM` timer aimed at that thread. No worker is created.
 *
 * When the timer fires, the next checkpoint unwinds back here and the call is
 * reported as `DeadlineExceeded`. The timer and handler are released on every
 * exit path.
 *
 * Stopping the target is still cooperative. A raw system call that is not
 * retried (`libc::sleep`, a bare `read`) returns early with `EINTR`, but std
 * wrappers such as `std::thread::sleep` or `read_exact` retry and run to
 * completion. A target parked in one of those is reported as timed out only
 * once it returns, however late that is.
 *
 * Only the process main thread on Linux is eligible. Everywhere else `execute`
 * fails with `ContextIneligible` before the target runs; use
 * `signal_deadline_available()` to ask up front.
 */

use super::checkpoint::{unwind_reason, UnwindReason};
use super::config::DeadlineConfig;
use super::record::{InvocationRecord, InvocationState};
use crate::core::errors::{DeadlineError, DeadlineResult, TimeoutError};
use crate::core::guard::{alarm_depth, check_eligible, AlarmGuard, Guard};
use crate::monitoring::{default_sink, DeadlineStats, InvocationSpan, LogSink};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

/// Capability check for the signal-based executor on the calling thread
pub fn signal_deadline_available() -> DeadlineResult<()> {
    check_eligible()
}

/// Executes targets on the calling thread under an interval-timer deadline
#[derive(Clone)]
pub struct SignalExecutor {
    config: DeadlineConfig,
    sink: Arc<dyn LogSink>,
    stats: Arc<DeadlineStats>,
}

impl SignalExecutor {
    /// Create executor reporting through `tracing`
    pub fn new(config: DeadlineConfig) -> Self {
        Self::with_sink(config, default_sink())
    }

    /// Create executor reporting through the given sink
    pub fn with_sink(config: DeadlineConfig, sink: Arc<dyn LogSink>) -> Self {
        Self {
            config,
            sink,
            stats: Arc::new(DeadlineStats::new()),
        }
    }

    /// Create disabled executor (targets run inline, unbounded)
    pub fn disabled() -> Self {
        Self::new(DeadlineConfig::disabled())
    }

    /// Same executor with a new config; sink and statistics are kept
    pub fn configured(mut self, config: DeadlineConfig) -> Self {
        self.config = config;
        self
    }

    /// Same executor reporting through `sink`; config and statistics are kept
    pub fn reporting_to(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &DeadlineConfig {
        &self.config
    }

    pub fn stats(&self) -> &Arc<DeadlineStats> {
        &self.stats
    }

    /// Run `target` on this thread, bounded by `deadline`
    ///
    /// Nested calls share the thread's timer; leaving an inner call re-arms it
    /// for the enclosing one. An inner call interrupted because an enclosing
    /// deadline fired unwinds on to that enclosing call.
    pub fn execute<T, E, F>(
        &self,
        function_name: &str,
        arguments: &str,
        deadline: Duration,
        target: F,
    ) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let record = InvocationRecord::new(function_name, arguments, deadline)?;

        if !self.config.enabled {
            // Fast path: enforcement disabled
            return target().map_err(TimeoutError::Operation);
        }

        let mut alarm = AlarmGuard::arm(record.deadline())?;
        self.stats.inc_calls();
        let span = InvocationSpan::new(&record, "signal");
        let _entered = span.enter();

        let _ = record.start_inline();
        let caught = panic::catch_unwind(AssertUnwindSafe(target));

        let expired = alarm.expired();
        if let Err(e) = alarm.release() {
            self.sink.log(
                Level::WARN,
                &format!(
                    "failed to release deadline alarm for '{}': {}",
                    record.function_name(),
                    e
                ),
            );
        }

        match caught {
            Ok(_) if expired => Err(self.expire(&record, &span)),
            Ok(result) => {
                let _ = record.complete_inline();
                self.stats.inc_completed();
                span.record_state(InvocationState::Completed);
                result.map_err(TimeoutError::Operation)
            }
            Err(payload) => match unwind_reason(payload.as_ref()) {
                Some(UnwindReason::Interrupted) if expired => Err(self.expire(&record, &span)),
                // Outermost frame and no deadline due: nothing above us owns this interrupt.
                Some(UnwindReason::Interrupted) if alarm_depth() == 0 => {
                    Err(self.stray_interrupt(&record))
                }
                // A target panic, or an enclosing call's deadline: keep unwinding.
                _ => panic::resume_unwind(payload),
            },
        }
    }

    #[cold]
    #[inline(never)]
    fn expire<E>(&self, record: &InvocationRecord, span: &InvocationSpan) -> TimeoutError<E> {
        let _ = record.time_out();
        self.stats.inc_timed_out();
        span.record_state(InvocationState::TimedOut);

        let exceeded = record.exceeded().with_arguments(record.arguments());
        self.sink.log(Level::WARN, &exceeded.to_string());
        self.sink.log(
            Level::DEBUG,
            &format!(
                "interrupted '{}' on the calling thread after {:?}",
                record.function_name(),
                record.elapsed()
            ),
        );
        exceeded.into()
    }

    #[cold]
    fn stray_interrupt<E>(&self, record: &InvocationRecord) -> TimeoutError<E> {
        let error = DeadlineError::Timer(format!(
            "'{}' was interrupted by a timer signal its deadline did not raise",
            record.function_name()
        ));
        self.sink.log(Level::WARN, &error.to_string());
        error.into()
    }
}

impl Default for SignalExecutor {
    fn default() -> Self {
        Self::new(DeadlineConfig::default())
    }
}
