/*!
 * Cooperative Checkpoint Monitor
 *
 * Cancellation is observed only at safe points the target's own code reaches:
 * an explicit `checkpoint()`, each piece of a checkpointed `sleep()`, each
 * iteration of a `.checkpointed()` iterator, or a nested bounded call waiting
 * on its worker. When the current call has been cancelled the checkpoint
 * unwinds the calling thread's stack with a private payload, which the
 * executor that owns the thread catches. No other thread is touched.
 *
 * There is no checkpoint inside blocking system calls, `std::thread::sleep`,
 * lock waits, or foreign code. A worker parked in one of those keeps running
 * until control comes back to code that checks. Targets that catch unwinds
 * themselves can swallow the cancellation.
 */

use super::record::CancelWatch;
use crate::core::errors::DeadlineResult;
use crate::core::guard::{alarm_depth, interrupt_pending, Guard, GuardDrop, GuardMetadata};
use crate::core::limits::DEFAULT_CHECKPOINT_SLICE;
use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::panic;
use std::time::{Duration, Instant};

/// Why a checkpoint unwound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnwindReason {
    /// The worker's cancel flag was raised by its executor
    Cancelled,
    /// The calling thread's deadline alarm fired
    Interrupted,
}

/// Payload carried by a checkpoint unwind
#[derive(Debug)]
pub(crate) struct CheckpointUnwind {
    pub reason: UnwindReason,
}

/// Recognize a payload raised by `checkpoint()`
pub(crate) fn unwind_reason(payload: &(dyn Any + Send)) -> Option<UnwindReason> {
    payload.downcast_ref::<CheckpointUnwind>().map(|u| u.reason)
}

struct Monitor {
    cancel: CancelWatch,
    slice: Duration,
}

thread_local! {
    static MONITOR: RefCell<Option<Monitor>> = const { RefCell::new(None) };
}

fn pending_reason() -> Option<UnwindReason> {
    let cancelled = MONITOR.with(|m| {
        m.try_borrow()
            .map(|m| m.as_ref().map_or(false, |m| m.cancel.is_cancelled()))
            .unwrap_or(false)
    });
    if cancelled {
        Some(UnwindReason::Cancelled)
    } else if interrupt_pending() {
        Some(UnwindReason::Interrupted)
    } else {
        None
    }
}

/// Whether the bounded call running on this thread has been cancelled
///
/// Never unwinds. Outside a bounded call this is always false.
pub fn is_cancelled() -> bool {
    pending_reason().is_some()
}

/// Safe point: unwinds the current worker if its call was cancelled
///
/// A no-op outside a bounded call.
pub fn checkpoint() {
    if let Some(reason) = pending_reason() {
        panic::resume_unwind(Box::new(CheckpointUnwind { reason }));
    }
}

/// Sleep that observes cancellation every checkpoint slice
///
/// A duration too long for the clock (`Duration::MAX`) sleeps until cancelled.
pub fn sleep(duration: Duration) {
    let slice = current_slice();
    let until = Instant::now().checked_add(duration);
    loop {
        checkpoint();
        let remaining = match until {
            Some(until) => until.saturating_duration_since(Instant::now()),
            None => slice,
        };
        if remaining.is_zero() {
            break;
        }
        std::thread::sleep(remaining.min(slice));
    }
}

/// Slice configured for the current thread's monitor
pub(crate) fn current_slice() -> Duration {
    MONITOR.with(|m| {
        m.try_borrow()
            .ok()
            .and_then(|m| m.as_ref().map(|m| m.slice))
            .unwrap_or(DEFAULT_CHECKPOINT_SLICE)
    })
}

/// Whether the current thread runs inside a worker's monitor
pub(crate) fn has_monitor() -> bool {
    MONITOR.with(|m| m.try_borrow().map(|m| m.is_some()).unwrap_or(false))
}

/// Whether anything on this thread can cancel the code running here
pub(crate) fn inside_bounded_call() -> bool {
    has_monitor() || alarm_depth() > 0
}

/// Installs a worker's cancel flag as the current thread's monitor
///
/// Restores the previously installed monitor (if any) when released.
pub(crate) struct CheckpointScope {
    previous: Option<Monitor>,
    metadata: GuardMetadata,
    active: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl CheckpointScope {
    pub(crate) fn enter(cancel: CancelWatch, slice: Duration) -> Self {
        let previous = MONITOR.with(|m| m.borrow_mut().replace(Monitor { cancel, slice }));
        Self {
            previous,
            metadata: GuardMetadata::new("checkpoint_scope"),
            active: true,
            _thread_bound: PhantomData,
        }
    }
}

impl Guard for CheckpointScope {
    fn resource_type(&self) -> &'static str {
        "checkpoint_scope"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn release(&mut self) -> DeadlineResult<()> {
        if !self.active {
            return Err(crate::core::errors::DeadlineError::AlreadyReleased);
        }
        self.active = false;
        let previous = self.previous.take();
        MONITOR.with(|m| *m.borrow_mut() = previous);
        Ok(())
    }
}

impl GuardDrop for CheckpointScope {
    fn on_drop(&mut self) {
        if self.active {
            let _ = self.release();
        }
    }
}

impl Drop for CheckpointScope {
    fn drop(&mut self) {
        self.on_drop();
    }
}

/// Iterator adapter with a checkpoint before every item
pub struct Checkpointed<I> {
    inner: I,
}

impl<I: Iterator> Iterator for Checkpointed<I> {
    type Item = I::Item;

    fn next(&mut self) -> Option<I::Item> {
        checkpoint();
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

/// Extension for marking loops as safe points
///
/// ```ignore
/// for chunk in chunks.iter().checkpointed() {
///     process(chunk);
/// }
/// ```
pub trait CheckpointExt: Iterator + Sized {
    fn checkpointed(self) -> Checkpointed<Self> {
        Checkpointed { inner: self }
    }
}

impl<I: Iterator> CheckpointExt for I {}
