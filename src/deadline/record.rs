/*!
 * Invocation Record
 *
 * Per-call bookkeeping shared between an executor and the worker it starts:
 * lifecycle state, the cancel flag, and the single-assignment result slot.
 *
 * Ownership is split by type. The executor keeps the `InvocationRecord`
 * (the only `CancelFlag` writer) and the `SlotReader`; the worker gets a
 * `WorkerBinding` holding a read-only `CancelWatch` and the `SlotWriter`.
 */

use crate::core::errors::{DeadlineError, DeadlineExceeded, DeadlineResult};
use crate::core::limits::MAX_DEADLINE;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Lifecycle of one bounded call
///
/// `Pending -> Running -> {Completed, TimedOut}`, and `TimedOut -> Killed` once the
/// detached worker is unwound at a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum InvocationState {
    Pending = 0,
    Running = 1,
    Completed = 2,
    TimedOut = 3,
    Killed = 4,
}

impl InvocationState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::TimedOut | Self::Killed)
    }

    #[inline]
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Running,
            2 => Self::Completed,
            3 => Self::TimedOut,
            _ => Self::Killed,
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::TimedOut => "timed_out",
            Self::Killed => "killed",
        };
        f.write_str(name)
    }
}

/// Atomic holder for `InvocationState`
#[derive(Debug)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: InvocationState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> InvocationState {
        InvocationState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Move `from -> to`; on failure returns the state actually observed
    #[inline]
    pub fn transition(
        &self,
        from: InvocationState,
        to: InvocationState,
    ) -> Result<(), InvocationState> {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(InvocationState::from_u8)
    }
}

/// Write side of the cancel flag, held only by the executor
#[derive(Debug, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag; true only for the call that actually raised it
    pub fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::Release)
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Read-only view for the worker
    pub fn watch(&self) -> CancelWatch {
        CancelWatch(Arc::clone(&self.0))
    }
}

/// Read side of the cancel flag, tested at every checkpoint
#[derive(Debug, Clone)]
pub struct CancelWatch(Arc<AtomicBool>);

impl CancelWatch {
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a worker publishes into the result slot
pub(crate) enum Outcome<T> {
    Returned(T),
    Panicked(Box<dyn Any + Send + 'static>),
}

/// Create a connected single-assignment slot
pub(crate) fn result_slot<T>() -> (SlotWriter<T>, SlotReader<T>) {
    let (tx, rx) = flume::bounded(1);
    (SlotWriter(tx), SlotReader(rx))
}

/// Worker side of the result slot; consumed by the one write it permits
pub(crate) struct SlotWriter<T>(flume::Sender<Outcome<T>>);

impl<T> SlotWriter<T> {
    /// Publish the outcome; hands it back when the executor has already gone
    pub fn fill(self, outcome: Outcome<T>) -> Result<(), Outcome<T>> {
        self.0.send(outcome).map_err(|e| e.into_inner())
    }
}

/// Result of waiting on the slot
pub(crate) enum SlotWait<T> {
    Filled(Outcome<T>),
    Expired,
    Abandoned,
}

/// Executor side of the result slot
pub(crate) struct SlotReader<T>(flume::Receiver<Outcome<T>>);

impl<T> SlotReader<T> {
    /// Block until the worker publishes or `until` passes
    pub fn wait_until(&self, until: Instant) -> SlotWait<T> {
        match self.0.recv_deadline(until) {
            Ok(outcome) => SlotWait::Filled(outcome),
            Err(flume::RecvTimeoutError::Timeout) => SlotWait::Expired,
            Err(flume::RecvTimeoutError::Disconnected) => SlotWait::Abandoned,
        }
    }

    /// Block until the worker publishes, with no deadline
    pub fn wait(&self) -> SlotWait<T> {
        match self.0.recv() {
            Ok(outcome) => SlotWait::Filled(outcome),
            Err(flume::RecvError::Disconnected) => SlotWait::Abandoned,
        }
    }
}

/// Reject deadlines that cannot be enforced
pub fn validate_deadline(deadline: Duration) -> DeadlineResult<Duration> {
    if deadline.is_zero() {
        return Err(DeadlineError::InvalidDeadline(
            "deadline must be greater than zero".to_string(),
        ));
    }
    if deadline > MAX_DEADLINE || Instant::now().checked_add(deadline).is_none() {
        return Err(DeadlineError::InvalidDeadline(format!(
            "{:?} is beyond the longest supported deadline of {:?}",
            deadline, MAX_DEADLINE
        )));
    }
    Ok(deadline)
}

/// Deadline from a seconds value, as in `with_timeout(deadline_seconds)`
pub fn deadline_from_secs(seconds: f64) -> DeadlineResult<Duration> {
    let deadline = Duration::try_from_secs_f64(seconds)
        .map_err(|e| DeadlineError::InvalidDeadline(format!("{} seconds: {}", seconds, e)))?;
    validate_deadline(deadline)
}

/// One bounded call, owned by the executor that created it
#[derive(Debug)]
pub struct InvocationRecord {
    id: Uuid,
    function_name: Arc<str>,
    arguments: String,
    deadline: Duration,
    state: Arc<StateCell>,
    cancel: CancelFlag,
    created_at: Instant,
}

impl InvocationRecord {
    /// Create a pending record; `arguments` is a rendered summary of the call's arguments
    pub fn new(
        function_name: impl Into<Arc<str>>,
        arguments: impl Into<String>,
        deadline: Duration,
    ) -> DeadlineResult<Self> {
        Ok(Self {
            id: Uuid::new_v4(),
            function_name: function_name.into(),
            arguments: arguments.into(),
            deadline: validate_deadline(deadline)?,
            state: Arc::new(StateCell::new(InvocationState::Pending)),
            cancel: CancelFlag::new(),
            created_at: Instant::now(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    pub fn arguments(&self) -> &str {
        &self.arguments
    }

    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    pub fn state(&self) -> InvocationState {
        self.state.load()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Instant at which the deadline elapses
    ///
    /// `None` only if the clock cannot represent it; `validate_deadline` keeps
    /// every record's deadline well inside that range.
    pub fn expires_at(&self) -> Option<Instant> {
        self.created_at.checked_add(self.deadline)
    }

    pub fn elapsed(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Mark the call as running on the caller's own thread
    pub(crate) fn start_inline(&self) -> Result<(), InvocationState> {
        self.state
            .transition(InvocationState::Pending, InvocationState::Running)
    }

    /// Running -> Completed for calls without a worker
    pub(crate) fn complete_inline(&self) -> Result<(), InvocationState> {
        self.state
            .transition(InvocationState::Running, InvocationState::Completed)
    }

    /// Claim the deadline path: Running/Pending -> TimedOut
    ///
    /// Fails with the observed state when the worker completed first.
    pub(crate) fn time_out(&self) -> Result<(), InvocationState> {
        match self
            .state
            .transition(InvocationState::Running, InvocationState::TimedOut)
        {
            Err(InvocationState::Pending) => self
                .state
                .transition(InvocationState::Pending, InvocationState::TimedOut),
            other => other,
        }
    }

    /// Raise the cancel flag; only ever called after `time_out`
    pub(crate) fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    /// The failure reported to the caller for this record
    pub fn exceeded(&self) -> DeadlineExceeded {
        DeadlineExceeded::new(self.function_name.as_ref(), self.deadline)
    }

    /// Hand the worker its half of the record
    pub(crate) fn bind_worker<T>(&self, writer: SlotWriter<T>) -> WorkerBinding<T> {
        WorkerBinding {
            id: self.id,
            function_name: Arc::clone(&self.function_name),
            deadline: self.deadline,
            state: Arc::clone(&self.state),
            cancel: self.cancel.watch(),
            writer,
        }
    }
}

/// Everything a worker may touch once started
pub(crate) struct WorkerBinding<T> {
    pub id: Uuid,
    pub function_name: Arc<str>,
    pub deadline: Duration,
    pub state: Arc<StateCell>,
    pub cancel: CancelWatch,
    pub writer: SlotWriter<T>,
}
