/*!
 * Lock-Free Deadline Statistics
 * Atomic counters shared by an executor and the workers it detaches
 */

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Point-in-time copy of `DeadlineStats`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineStatsSnapshot {
    /// Bounded calls started
    pub calls: u64,
    /// Calls whose target finished before the deadline (successfully or not)
    pub completed: u64,
    /// Calls that returned `DeadlineExceeded`
    pub timed_out: u64,
    /// Detached workers unwound at a checkpoint
    pub killed: u64,
    /// Workers still running after their caller timed out
    pub detached_live: usize,
    /// Detached workers that have since exited, killed or not
    pub detached_exited: u64,
}

/// Atomic deadline statistics for lock-free updates
///
/// # Performance
/// - Cache-line aligned to prevent false sharing
/// - All operations use relaxed ordering
#[repr(C, align(64))]
#[derive(Debug)]
pub struct DeadlineStats {
    calls: AtomicU64,
    completed: AtomicU64,
    timed_out: AtomicU64,
    killed: AtomicU64,
    detached_live: AtomicUsize,
    detached_exited: AtomicU64,
}

impl DeadlineStats {
    #[inline]
    pub const fn new() -> Self {
        Self {
            calls: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            killed: AtomicU64::new(0),
            detached_live: AtomicUsize::new(0),
            detached_exited: AtomicU64::new(0),
        }
    }

    #[inline(always)]
    pub fn inc_calls(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// A worker was left running without a caller
    #[inline(always)]
    pub fn inc_detached(&self) {
        self.detached_live.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn inc_killed(&self) {
        self.killed.fetch_add(1, Ordering::Relaxed);
    }

    /// A detached worker finally exited
    #[inline(always)]
    pub fn detached_exited(&self) {
        self.detached_live.fetch_sub(1, Ordering::Relaxed);
        self.detached_exited.fetch_add(1, Ordering::Relaxed);
    }

    /// Workers currently running past their caller's deadline
    #[inline]
    pub fn detached_live(&self) -> usize {
        self.detached_live.load(Ordering::Relaxed)
    }

    /// Get snapshot of current stats (no locks required)
    ///
    /// # Note
    /// Values may not be perfectly consistent with each other due to concurrent updates,
    /// but each individual value is accurate. This is acceptable for monitoring.
    #[inline]
    pub fn snapshot(&self) -> DeadlineStatsSnapshot {
        DeadlineStatsSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            killed: self.killed.load(Ordering::Relaxed),
            detached_live: self.detached_live.load(Ordering::Relaxed),
            detached_exited: self.detached_exited.load(Ordering::Relaxed),
        }
    }
}

impl Default for DeadlineStats {
    fn default() -> Self {
        Self::new()
    }
}
