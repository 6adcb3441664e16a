/*!
 * Alarm Guard
 *
 * Scoped ownership of the calling thread's deadline timer.
 *
 * One POSIX timer per eligible thread delivers `SIGALRM` to that thread only
 * (`SIGEV_THREAD_ID`). Nested guards share it: the timer is always armed for the
 * earliest outstanding deadline, and leaving a frame re-arms it for the frames
 * that remain. The outermost frame installs our handler and restores the
 * previous disposition when it leaves.
 *
 * The handler only sets an atomic flag, and only for expiries of a POSIX timer
 * (`SI_TIMER`); a `SIGALRM` from `kill`, `raise` or `alarm()` is ignored. It is
 * installed without `SA_RESTART`, so a raw system call that is not retried
 * (`libc::sleep`, a bare `read`) returns `EINTR`. std wrappers such as
 * `std::thread::sleep` and `read_exact` retry on `EINTR` and run to completion.
 * The unwind itself happens at the next checkpoint.
 */

use super::{Guard, GuardDrop, GuardMetadata};
use crate::core::errors::{DeadlineError, DeadlineResult};
use crate::core::limits::MIN_TIMER_EXPIRY;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::warn;

/// Written by the signal handler, read by checkpoints and by the guards
static ALARM_FIRED: AtomicBool = AtomicBool::new(false);

static NEXT_FRAME_ID: AtomicU64 = AtomicU64::new(1);

#[cfg(target_os = "linux")]
mod platform {
    use super::ALARM_FIRED;
    use crate::core::errors::{DeadlineError, DeadlineResult};
    use nix::sys::signal::{
        self, SaFlags, SigAction, SigEvent, SigHandler, SigSet, SigevNotify, Signal,
    };
    use nix::libc;
    use nix::sys::time::TimeSpec;
    use nix::sys::timer::{Expiration, Timer, TimerSetTimeFlags};
    use nix::time::ClockId;
    use nix::unistd::{getpid, gettid};
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    const DEADLINE_SIGNAL: Signal = Signal::SIGALRM;

    extern "C" fn on_alarm(
        _signal: libc::c_int,
        info: *mut libc::siginfo_t,
        _context: *mut libc::c_void,
    ) {
        // SAFETY: with SA_SIGINFO the kernel passes a valid siginfo_t.
        if !info.is_null() && unsafe { (*info).si_code } == libc::SI_TIMER {
            ALARM_FIRED.store(true, Ordering::SeqCst);
        }
    }

    pub fn check_eligible() -> DeadlineResult<()> {
        let tid = gettid();
        if tid != getpid() {
            return Err(DeadlineError::ineligible(format!(
                "thread {} is not the process main thread",
                tid
            )));
        }

        let mask = SigSet::thread_get_mask()
            .map_err(|e| DeadlineError::Timer(format!("reading signal mask: {}", e)))?;
        if mask.contains(DEADLINE_SIGNAL) {
            return Err(DeadlineError::ineligible("SIGALRM is blocked on this thread"));
        }

        Ok(())
    }

    /// Our handler plus the thread-directed timer that raises it
    pub struct Armed {
        timer: Timer,
        previous: SigAction,
    }

    impl Armed {
        pub fn install() -> DeadlineResult<Self> {
            let action = SigAction::new(
                SigHandler::SigAction(on_alarm),
                SaFlags::SA_SIGINFO,
                SigSet::empty(),
            );
            // SAFETY: on_alarm is async-signal-safe, it only stores to an atomic.
            let previous = unsafe { signal::sigaction(DEADLINE_SIGNAL, &action) }
                .map_err(|e| DeadlineError::Timer(format!("installing SIGALRM handler: {}", e)))?;

            let event = SigEvent::new(SigevNotify::SigevThreadId {
                signal: DEADLINE_SIGNAL,
                thread_id: gettid().as_raw(),
                si_value: 0,
            });

            match Timer::new(ClockId::CLOCK_MONOTONIC, event) {
                Ok(timer) => Ok(Self { timer, previous }),
                Err(e) => {
                    // SAFETY: restores the disposition we replaced above.
                    let _ = unsafe { signal::sigaction(DEADLINE_SIGNAL, &previous) };
                    Err(DeadlineError::Timer(format!("creating timer: {}", e)))
                }
            }
        }

        pub fn set(&mut self, after: Duration) -> DeadlineResult<()> {
            self.timer
                .set(
                    Expiration::OneShot(TimeSpec::from_duration(after)),
                    TimerSetTimeFlags::empty(),
                )
                .map_err(|e| DeadlineError::Timer(format!("arming timer: {}", e)))
        }

        pub fn uninstall(self) -> DeadlineResult<()> {
            let Armed { timer, previous } = self;
            // Deleting the timer first means a pending expiry is delivered while
            // our handler is still installed, never to the restored one.
            drop(timer);
            // SAFETY: restores the disposition saved by install().
            unsafe { signal::sigaction(DEADLINE_SIGNAL, &previous) }
                .map(|_| ())
                .map_err(|e| DeadlineError::Timer(format!("restoring SIGALRM handler: {}", e)))
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use crate::core::errors::{DeadlineError, DeadlineResult};
    use std::time::Duration;

    pub fn check_eligible() -> DeadlineResult<()> {
        Err(DeadlineError::ineligible(
            "per-thread deadline timers are only available on Linux",
        ))
    }

    pub struct Armed;

    impl Armed {
        pub fn install() -> DeadlineResult<Self> {
            check_eligible().map(|_| Armed)
        }

        pub fn set(&mut self, _after: Duration) -> DeadlineResult<()> {
            Ok(())
        }

        pub fn uninstall(self) -> DeadlineResult<()> {
            Ok(())
        }
    }
}

struct Frame {
    id: u64,
    expires_at: Instant,
}

struct AlarmContext {
    armed: platform::Armed,
    frames: Vec<Frame>,
}

impl AlarmContext {
    fn earliest(&self) -> Option<Instant> {
        self.frames.iter().map(|f| f.expires_at).min()
    }

    /// Program the timer for the earliest outstanding deadline
    fn rearm(&mut self, now: Instant) -> DeadlineResult<()> {
        match self.earliest() {
            Some(at) => {
                let after = at.saturating_duration_since(now).max(MIN_TIMER_EXPIRY);
                self.armed.set(after)
            }
            None => Ok(()),
        }
    }
}

thread_local! {
    static CONTEXT: RefCell<Option<AlarmContext>> = const { RefCell::new(None) };
}

/// Fail fast unless the calling thread can receive deadline interrupts
pub(crate) fn check_eligible() -> DeadlineResult<()> {
    platform::check_eligible()
}

/// True once the timer fired while this thread has a frame outstanding
pub(crate) fn interrupt_pending() -> bool {
    ALARM_FIRED.load(Ordering::SeqCst)
        && CONTEXT.with(|cell| cell.try_borrow().map(|c| c.is_some()).unwrap_or(false))
}

/// Number of alarm frames outstanding on the calling thread
pub fn alarm_depth() -> usize {
    CONTEXT.with(|cell| {
        cell.try_borrow()
            .map(|c| c.as_ref().map_or(0, |ctx| ctx.frames.len()))
            .unwrap_or(0)
    })
}

/// One armed deadline on the calling thread
///
/// # Example
///
/// ```ignore
/// let mut alarm = AlarmGuard::arm(Duration::from_secs(1))?;
/// let result = run_target();
/// let expired = alarm.expired();
/// alarm.release()?;
/// ```
pub struct AlarmGuard {
    id: u64,
    deadline: Duration,
    expires_at: Instant,
    metadata: GuardMetadata,
    active: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl AlarmGuard {
    /// Arm a deadline on the calling thread
    ///
    /// Checks eligibility first, so an ineligible context fails here rather
    /// than when the deadline would have fired.
    pub fn arm(deadline: Duration) -> DeadlineResult<Self> {
        platform::check_eligible()?;

        let now = Instant::now();
        let expires_at = now.checked_add(deadline).ok_or_else(|| {
            DeadlineError::InvalidDeadline(format!("{:?} overflows the monotonic clock", deadline))
        })?;
        let id = NEXT_FRAME_ID.fetch_add(1, Ordering::Relaxed);

        CONTEXT.with(|cell| {
            let mut slot = cell.borrow_mut();
            let mut ctx = match slot.take() {
                Some(ctx) => ctx,
                None => {
                    let armed = platform::Armed::install()?;
                    ALARM_FIRED.store(false, Ordering::SeqCst);
                    AlarmContext {
                        armed,
                        frames: Vec::new(),
                    }
                }
            };

            ctx.frames.push(Frame { id, expires_at });
            if let Err(e) = ctx.rearm(now) {
                ctx.frames.pop();
                if ctx.frames.is_empty() {
                    let _ = ctx.armed.uninstall();
                } else {
                    *slot = Some(ctx);
                }
                return Err(e);
            }

            *slot = Some(ctx);
            Ok(())
        })?;

        Ok(Self {
            id,
            deadline,
            expires_at,
            metadata: GuardMetadata::new("alarm"),
            active: true,
            _thread_bound: PhantomData,
        })
    }

    /// Configured deadline of this frame
    pub fn deadline(&self) -> Duration {
        self.deadline
    }

    /// Whether the timer fired for this frame (not merely for an enclosing one)
    pub fn expired(&self) -> bool {
        ALARM_FIRED.load(Ordering::SeqCst) && Instant::now() >= self.expires_at
    }

    fn leave(&mut self) -> DeadlineResult<()> {
        if !self.active {
            return Err(DeadlineError::AlreadyReleased);
        }
        self.active = false;

        let id = self.id;
        CONTEXT.with(|cell| {
            let mut slot = cell.borrow_mut();
            let mut ctx = match slot.take() {
                Some(ctx) => ctx,
                None => return Ok(()),
            };

            ctx.frames.retain(|f| f.id != id);
            if ctx.frames.is_empty() {
                let result = ctx.armed.uninstall();
                ALARM_FIRED.store(false, Ordering::SeqCst);
                return result;
            }

            let now = Instant::now();
            let result = ctx.rearm(now);
            // The flag stays raised only if an enclosing frame is itself past due.
            if ctx.earliest().map_or(true, |at| at > now) {
                ALARM_FIRED.store(false, Ordering::SeqCst);
            }
            *slot = Some(ctx);
            result
        })
    }
}

impl Guard for AlarmGuard {
    fn resource_type(&self) -> &'static str {
        "alarm"
    }

    fn metadata(&self) -> &GuardMetadata {
        &self.metadata
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn release(&mut self) -> DeadlineResult<()> {
        self.leave()
    }
}

impl GuardDrop for AlarmGuard {
    fn on_drop(&mut self) {
        if self.active {
            if let Err(e) = self.leave() {
                warn!(
                    error = %e,
                    held_us = self.metadata.held_for().as_micros() as u64,
                    "failed to release deadline alarm"
                );
            }
        }
    }
}

impl Drop for AlarmGuard {
    fn drop(&mut self) {
        self.on_drop();
    }
}
