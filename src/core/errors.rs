/*!
 * Error Types
 * Centralized error handling with thiserror and miette
 */

use miette::Diagnostic;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for deadline operations
pub type DeadlineResult<T> = Result<T, DeadlineError>;

/// A bounded call ran past its deadline.
///
/// The message always names the function and the configured bound.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "function '{function_name}' exceeded its deadline of {}{}",
    format_seconds(.deadline),
    format_arguments(.arguments)
)]
pub struct DeadlineExceeded {
    pub function_name: String,
    pub deadline: Duration,
    /// Rendered arguments of the interrupted call, when the executor records them
    pub arguments: Option<String>,
}

impl DeadlineExceeded {
    pub fn new(function_name: impl Into<String>, deadline: Duration) -> Self {
        Self {
            function_name: function_name.into(),
            deadline,
            arguments: None,
        }
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }

    /// Configured bound in seconds
    #[inline]
    pub fn deadline_seconds(&self) -> f64 {
        self.deadline.as_secs_f64()
    }
}

fn format_seconds(deadline: &Duration) -> String {
    format!("{:.3}s", deadline.as_secs_f64())
}

fn format_arguments(arguments: &Option<String>) -> String {
    match arguments {
        Some(args) => format!(" (arguments: {})", args),
        None => String::new(),
    }
}

/// Failures produced by the deadline machinery itself, never by the target
#[derive(Error, Debug, Clone, PartialEq, Eq, Diagnostic)]
pub enum DeadlineError {
    #[error(transparent)]
    #[diagnostic(
        code(deadline::exceeded),
        help("The target may still be running in the background until it reaches a checkpoint.")
    )]
    Exceeded(#[from] DeadlineExceeded),

    #[error("Execution context cannot receive deadline interrupts: {reason}")]
    #[diagnostic(
        code(deadline::context_ineligible),
        help("Signal deadlines only work on the process main thread on Linux. Use with_timeout() elsewhere.")
    )]
    ContextIneligible { reason: String },

    #[error("Invalid deadline: {0}")]
    #[diagnostic(
        code(deadline::invalid),
        help("Deadlines must be finite and strictly positive.")
    )]
    InvalidDeadline(String),

    #[error("Failed to spawn worker: {0}")]
    #[diagnostic(
        code(deadline::worker_spawn),
        help("The OS refused to create a thread. Check thread limits and leaked detached workers.")
    )]
    WorkerSpawn(String),

    #[error("Worker for '{0}' exited without publishing a result")]
    #[diagnostic(
        code(deadline::worker_lost),
        help("The worker thread died outside the executor's panic handling.")
    )]
    WorkerLost(String),

    #[error("Deadline timer failure: {0}")]
    #[diagnostic(
        code(deadline::timer),
        help("Installing or restoring the interval timer or its signal handler failed.")
    )]
    Timer(String),

    #[error("Resource already released")]
    #[diagnostic(code(deadline::already_released))]
    AlreadyReleased,
}

impl DeadlineError {
    /// Check if this is a deadline expiry
    #[inline]
    pub fn is_exceeded(&self) -> bool {
        matches!(self, Self::Exceeded(_))
    }

    /// The expiry details, if this is a deadline expiry
    pub fn as_exceeded(&self) -> Option<&DeadlineExceeded> {
        match self {
            Self::Exceeded(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn ineligible(reason: impl fmt::Display) -> Self {
        Self::ContextIneligible {
            reason: reason.to_string(),
        }
    }
}

/// Executor-level error: either the deadline machinery failed or the target did
#[derive(Debug, Error)]
pub enum TimeoutError<E> {
    /// Deadline expired or could not be enforced
    #[error(transparent)]
    Deadline(DeadlineError),

    /// Error returned by the target, carried unchanged
    #[error("Operation failed: {0}")]
    Operation(#[source] E),
}

impl<E> TimeoutError<E> {
    /// Check if this is a deadline expiry
    #[inline(always)]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Deadline(DeadlineError::Exceeded(_)))
    }

    /// Check if this is an operation error
    #[inline(always)]
    pub fn is_operation_error(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// Flatten into the target's own error type
    ///
    /// This is what lets a decorated target keep its exact signature: the target's
    /// error passes through untouched and deadline failures convert via `From`.
    pub fn into_error(self) -> E
    where
        E: From<DeadlineError>,
    {
        match self {
            Self::Operation(e) => e,
            Self::Deadline(e) => E::from(e),
        }
    }
}

impl<E> From<DeadlineError> for TimeoutError<E> {
    fn from(err: DeadlineError) -> Self {
        Self::Deadline(err)
    }
}

impl<E> From<DeadlineExceeded> for TimeoutError<E> {
    fn from(err: DeadlineExceeded) -> Self {
        Self::Deadline(DeadlineError::Exceeded(err))
    }
}
