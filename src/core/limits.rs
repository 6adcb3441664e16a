/*!
 * Deadline Limits and Constants
 *
 * Centralized location for the numbers the executors depend on.
 */

use std::time::Duration;

// =============================================================================
// CHECKPOINTS
// =============================================================================

/// Default granularity of checkpointed sleeps (10ms)
/// Also the poll interval of a bounded call waiting inside another bounded call.
/// Upper bound on how late a sleeping target notices cancellation.
pub const DEFAULT_CHECKPOINT_SLICE: Duration = Duration::from_millis(10);

/// Smallest accepted checkpoint slice (100us)
/// [PERF] Below this the slices are dominated by scheduler wakeups
pub const MIN_CHECKPOINT_SLICE: Duration = Duration::from_micros(100);

// =============================================================================
// WORKERS
// =============================================================================

/// Thread name prefix for deadline workers
pub const DEFAULT_WORKER_NAME_PREFIX: &str = "deadline-worker";

// =============================================================================
// SIGNAL TIMERS
// =============================================================================

/// Shortest expiry programmed into the interval timer (1us)
/// [LINUX-COMPAT] A zero expiry disarms a POSIX timer instead of firing it
pub const MIN_TIMER_EXPIRY: Duration = Duration::from_micros(1);

// =============================================================================
// DEADLINES
// =============================================================================

/// Longest accepted deadline (100 years)
/// [LINUX-COMPAT] Keeps `Instant + deadline` and the timer's `time_t` expiry representable
pub const MAX_DEADLINE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);
