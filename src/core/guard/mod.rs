/*!
 * RAII Resource Guards
 *
 * Scoped ownership of the per-thread state a bounded call installs.
 *
 * ## Guard Types
 *
 * - **AlarmGuard**: the calling thread's deadline timer and SIGALRM handler
 * - **CheckpointScope**: the cancel flag a worker's checkpoints observe
 *   (lives next to the checkpoint monitor in `deadline::checkpoint`)
 *
 * Both restore whatever was installed before them on every exit path,
 * including unwinding out of the target.
 */

mod alarm;
mod traits;

use std::thread::ThreadId;
use std::time::{Duration, Instant};

pub use alarm::{alarm_depth, AlarmGuard};
pub use traits::{Guard, GuardDrop};

pub(crate) use alarm::{check_eligible, interrupt_pending};

/// Where and when a guard was installed
#[derive(Debug, Clone)]
pub struct GuardMetadata {
    pub resource_type: &'static str,
    pub installed_at: Instant,
    pub thread: ThreadId,
}

impl GuardMetadata {
    pub fn new(resource_type: &'static str) -> Self {
        Self {
            resource_type,
            installed_at: Instant::now(),
            thread: std::thread::current().id(),
        }
    }

    /// How long the guard has been held
    #[inline]
    pub fn held_for(&self) -> Duration {
        self.installed_at.elapsed()
    }
}
