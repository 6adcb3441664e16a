/*!
 * Thread-Based Deadline Executor
 *
 * Runs each target on a fresh worker thread and waits on the result slot for
 * at most the deadline. On expiry the caller gets `DeadlineExceeded` right
 * away, the worker's cancel flag is raised, and the worker is detached.
 *
 * ## Guarantees
 *
 * - The caller regains control at the deadline plus scheduling overhead,
 *   whatever the target is doing.
 * - Stopping the worker is cooperative: it unwinds at its next checkpoint.
 *   A worker blocked where no checkpoint exists keeps running (and keeps its
 *   resources) until it returns on its own. `DeadlineStats::detached_live`
 *   counts these workers.
 * - No pooling: one thread per call, including leaked ones.
 * - A result published before the executor claims the deadline is returned;
 *   a result produced after it is discarded. `DeadlineExceeded` never carries
 *   a partial result.
 */

use super::checkpoint::{self, unwind_reason, CheckpointScope};
use super::config::DeadlineConfig;
use super::record::{
    result_slot, InvocationRecord, InvocationState, Outcome, SlotReader, SlotWait,
    WorkerBinding,
};
use crate::core::errors::{DeadlineError, DeadlineResult, TimeoutError};
use crate::monitoring::{default_sink, DeadlineStats, InvocationSpan, LogSink};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{trace, Level};

/// Executes targets on dedicated workers under a deadline
///
/// Cheap to clone; clones share the sink and statistics.
///
/// ## Example
///
/// ```ignore
/// let executor = ThreadExecutor::new(DeadlineConfig::default());
/// let body = executor.execute("fetch", "(url)", Duration::from_secs(1), move || fetch(url))?;
/// ```
#[derive(Clone)]
pub struct ThreadExecutor {
    config: DeadlineConfig,
    sink: Arc<dyn LogSink>,
    stats: Arc<DeadlineStats>,
}

impl ThreadExecutor {
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

    #[inline(always)]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Run `target` on a new worker, bounded by `deadline`
    ///
    /// # Returns
    ///
    /// - `Ok(T)` if the target returns `Ok` in time
    /// - `Err(TimeoutError::Operation(E))` if the target returns `Err` in time
    /// - `Err(TimeoutError::Deadline(Exceeded))` if the deadline elapses first
    /// - `Err(TimeoutError::Deadline(_))` for an invalid deadline or a failed spawn
    ///
    /// A panic in the target before the deadline is resumed on the caller.
    pub fn execute<T, E, F>(
        &self,
        function_name: &str,
        arguments: &str,
        deadline: Duration,
        target: F,
    ) -> Result<T, TimeoutError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let record = InvocationRecord::new(function_name, arguments, deadline)?;

        if !self.config.enabled {
            // Fast path: enforcement disabled
            return target().map_err(TimeoutError::Operation);
        }

        self.stats.inc_calls();
        let span = InvocationSpan::new(&record, "thread");
        let _entered = span.enter();

        let (writer, reader) = result_slot();
        let handle = self.spawn_worker(record.bind_worker(writer), span.span().clone(), target)?;
        trace!(id = %record.id(), "worker started");

        match self.wait(&record, &reader) {
            SlotWait::Filled(outcome) => self.finish(&record, &span, handle, outcome),
            SlotWait::Expired => self.expire(&record, &span, &reader, handle),
            SlotWait::Abandoned => Err(abandoned(&record).into()),
        }
    }

    fn spawn_worker<T, F>(
        &self,
        binding: WorkerBinding<T>,
        span: tracing::Span,
        target: F,
    ) -> DeadlineResult<JoinHandle<()>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let mut builder = thread::Builder::new().name(worker_thread_name(
            &self.config.worker_name_prefix,
            &binding.function_name,
        ));
        if let Some(size) = self.config.worker_stack_size {
            builder = builder.stack_size(size);
        }

        let worker = Worker {
            sink: Arc::clone(&self.sink),
            stats: Arc::clone(&self.stats),
            slice: self.config.checkpoint_slice,
        };

        builder
            .spawn(move || {
                let _entered = span.enter();
                worker.run(binding, target)
            })
            .map_err(|e| DeadlineError::WorkerSpawn(e.to_string()))
    }

    /// Wait for the worker, polling the caller's own cancellation when nested
    fn wait<T>(&self, record: &InvocationRecord, reader: &SlotReader<T>) -> SlotWait<T> {
        let expires_at = record.expires_at();
        if !checkpoint::inside_bounded_call() {
            return match expires_at {
                Some(at) => reader.wait_until(at),
                None => reader.wait(),
            };
        }

        // Running inside another bounded call: this wait is one of its checkpoints.
        let slice = self.config.checkpoint_slice;
        loop {
            let (until, last) = match (Instant::now().checked_add(slice), expires_at) {
                (Some(poll), Some(at)) if poll < at => (Some(poll), false),
                (Some(poll), None) => (Some(poll), false),
                (_, at) => (at, true),
            };
            let waited = match until {
                Some(until) => reader.wait_until(until),
                None => reader.wait(),
            };
            match waited {
                SlotWait::Expired if !last => {
                    if checkpoint::is_cancelled() && record.time_out().is_ok() {
                        record.cancel();
                        self.stats.inc_detached();
                        self.sink.log(
                            Level::DEBUG,
                            &format!(
                                "enclosing call cancelled; requested cooperative kill of worker {} for '{}'",
                                record.id(),
                                record.function_name()
                            ),
                        );
                        checkpoint::checkpoint();
                    }
                }
                other => return other,
            }
        }
    }

    fn finish<T, E>(
        &self,
        record: &InvocationRecord,
        span: &InvocationSpan,
        handle: JoinHandle<()>,
        outcome: Outcome<Result<T, E>>,
    ) -> Result<T, TimeoutError<E>> {
        // The worker has nothing left to do after publishing.
        let _ = handle.join();
        self.stats.inc_completed();
        span.record_state(InvocationState::Completed);
        trace!(
            id = %record.id(),
            elapsed_us = record.elapsed().as_micros() as u64,
            "worker completed"
        );

        match outcome {
            Outcome::Returned(result) => result.map_err(TimeoutError::Operation),
            Outcome::Panicked(payload) => panic::resume_unwind(payload),
        }
    }

    #[cold]
    #[inline(never)]
    fn expire<T, E>(
        &self,
        record: &InvocationRecord,
        span: &InvocationSpan,
        reader: &SlotReader<Result<T, E>>,
        handle: JoinHandle<()>,
    ) -> Result<T, TimeoutError<E>> {
        if record.time_out().is_err() {
            // The worker completed in the gap between the wait expiring and the claim;
            // its outcome is already on its way into the slot.
            return match reader.wait() {
                SlotWait::Filled(outcome) => self.finish(record, span, handle, outcome),
                _ => Err(abandoned(record).into()),
            };
        }

        record.cancel();
        self.stats.inc_timed_out();
        self.stats.inc_detached();
        span.record_state(InvocationState::TimedOut);

        let exceeded = record.exceeded();
        self.sink.log(
            Level::WARN,
            &format!(
                "{} (arguments: {}, waited {:?})",
                exceeded,
                record.arguments(),
                record.elapsed()
            ),
        );
        self.sink.log(
            Level::DEBUG,
            &format!(
                "requested cooperative kill of worker {} for '{}'; it stops at its next checkpoint",
                record.id(),
                record.function_name()
            ),
        );

        // Detach: the worker is never joined.
        drop(handle);
        Err(exceeded.into())
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new(DeadlineConfig::default())
    }
}

fn abandoned(record: &InvocationRecord) -> DeadlineError {
    DeadlineError::WorkerLost(record.function_name().to_string())
}

fn worker_thread_name(prefix: &str, function_name: &str) -> String {
    let short = function_name.rsplit("::").next().unwrap_or(function_name);
    format!("{}-{}", prefix, short).replace('\0', "")
}

/// State a worker thread carries besides its binding
struct Worker {
    sink: Arc<dyn LogSink>,
    stats: Arc<DeadlineStats>,
    slice: Duration,
}

impl Worker {
    fn run<T, F>(self, binding: WorkerBinding<T>, target: F)
    where
        F: FnOnce() -> T,
    {
        let WorkerBinding {
            id,
            function_name,
            deadline,
            state,
            cancel,
            writer,
        } = binding;

        if state
            .transition(InvocationState::Pending, InvocationState::Running)
            .is_err()
        {
            self.sink.log(
                Level::DEBUG,
                &format!(
                    "worker {} for '{}' started after its caller timed out; target not run",
                    id, function_name
                ),
            );
            self.stats.detached_exited();
            return;
        }

        let started = Instant::now();
        let caught = {
            let _scope = CheckpointScope::enter(cancel, self.slice);
            panic::catch_unwind(AssertUnwindSafe(target))
        };

        let outcome = match caught {
            Ok(value) => Outcome::Returned(value),
            Err(payload) if unwind_reason(payload.as_ref()).is_some() => {
                let _ = state.transition(InvocationState::TimedOut, InvocationState::Killed);
                self.stats.inc_killed();
                self.stats.detached_exited();
                self.sink.log(
                    Level::DEBUG,
                    &format!(
                        "worker {} for '{}' stopped at a checkpoint {:?} after starting",
                        id,
                        function_name,
                        started.elapsed()
                    ),
                );
                return;
            }
            Err(payload) => Outcome::Panicked(payload),
        };

        if state
            .transition(InvocationState::Running, InvocationState::Completed)
            .is_ok()
        {
            // The executor only gives up after claiming TimedOut, so it is still waiting.
            let _ = writer.fill(outcome);
            return;
        }

        let (level, what) = match outcome {
            Outcome::Returned(_) => (Level::DEBUG, "result"),
            Outcome::Panicked(_) => (Level::WARN, "panic"),
        };
        self.sink.log(
            level,
            &format!(
                "discarding late {} from detached worker {} for '{}' ({:?} into a {:?} deadline)",
                what,
                id,
                function_name,
                started.elapsed(),
                deadline
            ),
        );
        self.stats.detached_exited();
    }
}
