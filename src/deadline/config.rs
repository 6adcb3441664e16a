/*!
 * Deadline Executor Configuration
 *
 * Knobs shared by both executors, with presets and environment overrides.
 */

use crate::core::limits::{DEFAULT_CHECKPOINT_SLICE, DEFAULT_WORKER_NAME_PREFIX, MIN_CHECKPOINT_SLICE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

/// Disable deadline enforcement entirely ("1" or "true")
pub const ENV_DISABLED: &str = "BOUNDED_CALL_DISABLED";

/// Checkpoint slice in milliseconds
pub const ENV_CHECKPOINT_MS: &str = "BOUNDED_CALL_CHECKPOINT_MS";

/// Worker stack size in KiB
pub const ENV_WORKER_STACK_KB: &str = "BOUNDED_CALL_WORKER_STACK_KB";

/// Configuration for deadline executors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineConfig {
    /// Granularity of checkpointed sleeps and nested-wait polling (default: 10ms)
    pub checkpoint_slice: Duration,

    /// Thread name prefix for workers (default: "deadline-worker")
    pub worker_name_prefix: String,

    /// Stack size for workers, OS default when unset
    pub worker_stack_size: Option<usize>,

    /// Enforce deadlines; when false targets run inline and unbounded
    pub enabled: bool,
}

impl DeadlineConfig {
    /// Create default configuration
    pub fn new() -> Self {
        Self {
            checkpoint_slice: DEFAULT_CHECKPOINT_SLICE,
            worker_name_prefix: DEFAULT_WORKER_NAME_PREFIX.to_string(),
            worker_stack_size: None,
            enabled: true,
        }
    }

    /// Create configuration with enforcement disabled (testing only)
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new()
        }
    }

    /// Default configuration with overrides from the environment
    ///
    /// Malformed values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();

        if let Some(value) = lookup(ENV_DISABLED) {
            let value = value.trim().to_ascii_lowercase();
            config.enabled = !(value == "1" || value == "true");
        }

        if let Some(value) = lookup(ENV_CHECKPOINT_MS) {
            match value.trim().parse::<u64>() {
                Ok(ms) => config = config.with_checkpoint_slice(Duration::from_millis(ms)),
                Err(e) => warn!(
                    var = ENV_CHECKPOINT_MS,
                    value = %value,
                    error = %e,
                    "ignoring malformed value"
                ),
            }
        }

        if let Some(value) = lookup(ENV_WORKER_STACK_KB) {
            match value.trim().parse::<usize>() {
                Ok(kb) if kb > 0 => config.worker_stack_size = Some(kb * 1024),
                Ok(_) => warn!(var = ENV_WORKER_STACK_KB, "ignoring zero stack size"),
                Err(e) => warn!(
                    var = ENV_WORKER_STACK_KB,
                    value = %value,
                    error = %e,
                    "ignoring malformed value"
                ),
            }
        }

        config
    }

    /// Set checkpoint slice, clamped to the supported minimum
    pub fn with_checkpoint_slice(mut self, slice: Duration) -> Self {
        self.checkpoint_slice = slice.max(MIN_CHECKPOINT_SLICE);
        self
    }

    /// Set worker thread name prefix
    pub fn with_worker_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_name_prefix = prefix.into();
        self
    }

    /// Set worker stack size in bytes
    pub fn with_worker_stack_size(mut self, bytes: usize) -> Self {
        self.worker_stack_size = Some(bytes);
        self
    }
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self::new()
    }
}
