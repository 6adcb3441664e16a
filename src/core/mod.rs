/*!
 * Core Module
 * Error types, limits and RAII guards shared by the executors
 */

pub mod errors;
pub mod guard;
pub mod limits;

// Re-export for convenience
pub use errors::*;
pub use guard::{alarm_depth, AlarmGuard, Guard, GuardDrop, GuardMetadata};
