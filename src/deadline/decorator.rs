/*!
 * Deadline Decorator API
 *
 * Wraps a target function so that every call runs under a deadline:
 *
 * ```ignore
 * let fetch = with_timeout(Duration::from_secs(1))?.wrap(fetch_page);
 * let page = fetch(("example.org", 80))?;
 * ```
 *
 * The wrapped function has the target's shape: one argument (use a tuple for
 * several) and the target's `Result`. A timeout surfaces through the target's
 * own error type, which must implement `From<DeadlineError>`; errors the
 * target returns pass through unchanged. Panics propagate to the caller.
 *
 * Retrying is left to the caller: the wrapped function may be called again
 * after a timeout and each call gets a fresh deadline.
 */

use super::config::DeadlineConfig;
use super::record::{deadline_from_secs, validate_deadline};
use super::signal::SignalExecutor;
use super::thread::ThreadExecutor;
use crate::core::errors::{DeadlineError, DeadlineResult, TimeoutError};
use crate::monitoring::LogSink;
use std::any::type_name;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

/// Thread-based deadline, for any thread and any platform
///
/// Fails with `InvalidDeadline` for a zero deadline.
pub fn with_timeout(deadline: Duration) -> DeadlineResult<ThreadDeadline> {
    Ok(ThreadDeadline {
        deadline: validate_deadline(deadline)?,
        name: None,
        executor: ThreadExecutor::default(),
    })
}

/// `with_timeout` taking fractional seconds
pub fn with_timeout_secs(seconds: f64) -> DeadlineResult<ThreadDeadline> {
    with_timeout(deadline_from_secs(seconds)?)
}

/// Signal-based deadline, for the process main thread on Linux
///
/// Eligibility is checked on every call of the wrapped function, not here.
pub fn with_timeout_signal(deadline: Duration) -> DeadlineResult<SignalDeadline> {
    Ok(SignalDeadline {
        deadline: validate_deadline(deadline)?,
        name: None,
        executor: SignalExecutor::default(),
    })
}

/// `with_timeout_signal` taking fractional seconds
pub fn with_timeout_signal_secs(seconds: f64) -> DeadlineResult<SignalDeadline> {
    with_timeout_signal(deadline_from_secs(seconds)?)
}

/// Builder returned by `with_timeout`
#[derive(Clone)]
pub struct ThreadDeadline {
    deadline: Duration,
    name: Option<String>,
    executor: ThreadExecutor,
}

impl ThreadDeadline {
    /// Name reported in `DeadlineExceeded` (default: the target's type name)
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Keeps the sink and statistics already chosen
    pub fn with_config(mut self, config: DeadlineConfig) -> Self {
        self.executor = self.executor.configured(config);
        self
    }

    /// Report timeouts and kill requests through `sink`
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.executor = self.executor.reporting_to(sink);
        self
    }

    /// Use an existing executor (and its statistics)
    ///
    /// Replaces any config or sink set earlier on this builder.
    pub fn with_executor(mut self, executor: ThreadExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn executor(&self) -> &ThreadExecutor {
        &self.executor
    }

    /// Wrap `target`; each call of the result runs it on a new worker
    pub fn wrap<A, T, E, F>(self, target: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E> + Send + Sync + 'static,
        A: Debug + Send + 'static,
        T: Send + 'static,
        E: From<DeadlineError> + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| type_name::<F>().to_string());
        let deadline = self.deadline;
        let executor = self.executor;
        let target = Arc::new(target);

        move |arguments: A| {
            let summary = format!("{:?}", arguments);
            let target = Arc::clone(&target);
            executor
                .execute(&name, &summary, deadline, move || target(arguments))
                .map_err(TimeoutError::into_error)
        }
    }
}

/// Builder returned by `with_timeout_signal`
#[derive(Clone)]
pub struct SignalDeadline {
    deadline: Duration,
    name: Option<String>,
    executor: SignalExecutor,
}

impl SignalDeadline {
    /// Name reported in `DeadlineExceeded` (default: the target's type name)
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_config(mut self, config: DeadlineConfig) -> Self {
        self.executor = self.executor.configured(config);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.executor = self.executor.reporting_to(sink);
        self
    }

    pub fn with_executor(mut self, executor: SignalExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn executor(&self) -> &SignalExecutor {
        &self.executor
    }

    /// Wrap `target`; each call of the result runs it on the calling thread
    ///
    /// Calling the result anywhere but an eligible thread fails with
    /// `ContextIneligible` before the target runs.
    pub fn wrap<A, T, E, F>(self, target: F) -> impl Fn(A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        A: Debug,
        E: From<DeadlineError>,
    {
        let name = self.name.unwrap_or_else(|| type_name::<F>().to_string());
        let deadline = self.deadline;
        let executor = self.executor;

        move |arguments: A| {
            let summary = format!("{:?}", arguments);
            executor
                .execute(&name, &summary, deadline, || target(arguments))
                .map_err(TimeoutError::into_error)
        }
    }
}
