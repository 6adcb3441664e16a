/*!
 * Bounded Execution
 *
 * Run a function under a wall-clock deadline.
 *
 * - `thread`: the target runs on a fresh worker; the caller is released at the
 *   deadline and the worker is cancelled cooperatively at its next checkpoint.
 * - `signal`: the target runs on the calling thread under a `SIGALRM` timer;
 *   main thread on Linux only.
 * - `decorator`: `with_timeout` / `with_timeout_signal` wrap a function over
 *   either executor.
 */

pub mod checkpoint;
pub mod config;
pub mod decorator;
pub mod record;
pub mod signal;
pub mod thread;

pub use checkpoint::{checkpoint, is_cancelled, sleep, CheckpointExt, Checkpointed};
pub use config::DeadlineConfig;
pub use decorator::{
    with_timeout, with_timeout_secs, with_timeout_signal, with_timeout_signal_secs,
    SignalDeadline, ThreadDeadline,
};
pub use record::{
    deadline_from_secs, validate_deadline, CancelFlag, CancelWatch, InvocationRecord,
    InvocationState,
};
pub use signal::{signal_deadline_available, SignalExecutor};
pub use thread::ThreadExecutor;
