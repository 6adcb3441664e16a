/*!
 * Guard Traits
 *
 * Shared shape of the scoped guards a bounded call installs
 */

use super::GuardMetadata;
use crate::core::errors::DeadlineResult;

/// Scoped ownership of per-thread deadline state
///
/// Not `Send`: implementors own thread-local state and must be released on the
/// thread that created them.
pub trait Guard {
    /// Short name used in logs
    fn resource_type(&self) -> &'static str;

    fn metadata(&self) -> &GuardMetadata;

    /// False once released
    fn is_active(&self) -> bool;

    /// Restore what the guard replaced
    ///
    /// A second release fails with `AlreadyReleased`.
    fn release(&mut self) -> DeadlineResult<()>;
}

/// Cleanup run from `Drop`, including while unwinding out of a target
pub trait GuardDrop: Guard {
    /// Must not panic; a panic here during an unwind aborts the process.
    fn on_drop(&mut self);
}
