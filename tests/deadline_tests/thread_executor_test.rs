/*!
 * Thread Executor Tests
 *
 * Deadline behavior of the thread-based executor, including the gap between
 * the caller being released and a non-cooperating worker actually stopping.
 */

use bounded_call::deadline::{self, InvocationState};
use bounded_call::{
    DeadlineConfig, DeadlineError, DeadlineExceeded, NullSink, ThreadExecutor, TimeoutError,
};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq)]
enum JobError {
    Rejected { code: u32, reason: String },
}

fn executor() -> ThreadExecutor {
    ThreadExecutor::with_sink(DeadlineConfig::default(), Arc::new(NullSink))
}

fn eventually(mut condition: impl FnMut() -> bool, limit: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < limit {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

#[test]
#[serial]
fn test_fast_target_returns_value() {
    let start = Instant::now();
    let result = executor().execute("quick", "()", Duration::from_secs(1), || {
        thread::sleep(Duration::from_millis(100));
        Ok::<_, JobError>("done")
    });

    let elapsed = start.elapsed();
    assert_eq!(result.unwrap(), "done");
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(600), "took {:?}", elapsed);
}

#[test]
#[serial]
fn test_checkpointed_target_times_out_at_deadline() {
    let executor = executor();
    let start = Instant::now();

    let result = executor.execute("slow_loop", "(5,)", Duration::from_secs(1), || {
        let until = Instant::now() + Duration::from_secs(5);
        while Instant::now() < until {
            deadline::checkpoint();
            thread::sleep(Duration::from_millis(5));
        }
        Ok::<(), JobError>(())
    });

    let elapsed = start.elapsed();
    match result {
        Err(TimeoutError::Deadline(DeadlineError::Exceeded(e))) => {
            assert_eq!(e, DeadlineExceeded::new("slow_loop", Duration::from_secs(1)));
            assert_eq!(e.deadline_seconds(), 1.0);
        }
        other => panic!("expected DeadlineExceeded, got {:?}", other),
    }
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_millis(1500), "took {:?}", elapsed);

    // The worker reaches a checkpoint within a few milliseconds and is unwound.
    let stats = Arc::clone(executor.stats());
    assert!(eventually(|| stats.snapshot().killed == 1, Duration::from_secs(1)));
    assert_eq!(stats.detached_live(), 0);
}

#[test]
#[serial]
fn test_uninterruptible_worker_outlives_caller() {
    let executor = executor();
    let worker_finished = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&worker_finished);
    let start = Instant::now();

    let result = executor.execute("blocking_wait", "()", Duration::from_secs(1), move || {
        // No checkpoint anywhere in here.
        thread::sleep(Duration::from_secs(3));
        flag.store(true, Ordering::SeqCst);
        Ok::<u32, JobError>(1)
    });

    // The caller is released at the deadline...
    let notified_after = start.elapsed();
    assert!(result.unwrap_err().is_timeout());
    assert!(notified_after < Duration::from_millis(1500), "took {:?}", notified_after);

    // ...while the worker is still running.
    assert!(!worker_finished.load(Ordering::SeqCst));
    assert_eq!(executor.stats().detached_live(), 1);

    // It only stops once its blocking call returns on its own.
    assert!(eventually(
        || worker_finished.load(Ordering::SeqCst),
        Duration::from_secs(5)
    ));
    assert!(start.elapsed() >= Duration::from_secs(3));

    let stats = Arc::clone(executor.stats());
    assert!(eventually(|| stats.detached_live() == 0, Duration::from_secs(1)));
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.timed_out, 1);
    assert_eq!(snapshot.killed, 0);
    assert_eq!(snapshot.detached_exited, 1);
}

#[test]
fn test_target_error_propagates_unchanged() {
    let job = || -> Result<(), JobError> {
        Err(JobError::Rejected {
            code: 409,
            reason: "conflict".to_string(),
        })
    };

    let direct = job();
    let bounded = executor().execute("job", "()", Duration::from_secs(1), job);

    match bounded {
        Err(TimeoutError::Operation(e)) => assert_eq!(Err(e), direct),
        other => panic!("expected operation error, got {:?}", other),
    }
}

#[test]
fn test_target_panic_propagates() {
    let outcome = std::panic::catch_unwind(|| {
        executor().execute("explodes", "()", Duration::from_secs(1), || -> Result<(), JobError> {
            panic!("target failed");
        })
    });

    let payload = outcome.unwrap_err();
    assert_eq!(payload.downcast_ref::<&str>(), Some(&"target failed"));
}

#[test]
fn test_cancellation_observable_without_unwinding() {
    let executor = executor();
    let observed = Arc::new(AtomicBool::new(false));
    let observed_in_worker = Arc::clone(&observed);

    let result = executor.execute("polite", "()", Duration::from_millis(50), move || {
        while !deadline::is_cancelled() {
            thread::sleep(Duration::from_millis(2));
        }
        observed_in_worker.store(true, Ordering::SeqCst);
        Ok::<(), JobError>(())
    });

    assert!(result.unwrap_err().is_timeout());
    assert!(eventually(|| observed.load(Ordering::SeqCst), Duration::from_secs(1)));
}

#[test]
fn test_checkpointed_iterator_stops_worker() {
    let executor = executor();
    let processed = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&processed);

    let result = executor.execute("batch", "(1000,)", Duration::from_millis(50), move || {
        use bounded_call::CheckpointExt;
        for _ in (0..1000).checkpointed() {
            thread::sleep(Duration::from_millis(1));
            counter.fetch_add(1, Ordering::SeqCst);
        }
        Ok::<(), JobError>(())
    });

    assert!(result.unwrap_err().is_timeout());
    let stats = Arc::clone(executor.stats());
    assert!(eventually(|| stats.snapshot().killed == 1, Duration::from_secs(1)));

    let stopped_at = processed.load(Ordering::SeqCst);
    thread::sleep(Duration::from_millis(50));
    assert_eq!(processed.load(Ordering::SeqCst), stopped_at);
    assert!(stopped_at < 1000);
}

#[test]
fn test_nested_call_cancelled_with_outer() {
    let executor = executor();
    let inner_executor = executor.clone();
    let inner_result = Arc::new(parking_lot::Mutex::new(None));
    let inner_slot = Arc::clone(&inner_result);

    let outer = executor.execute("outer", "()", Duration::from_millis(100), move || {
        // The inner deadline is far longer than the outer one.
        let result = inner_executor.execute(
            "inner",
            "()",
            Duration::from_secs(10),
            || -> Result<(), JobError> {
                loop {
                    deadline::sleep(Duration::from_millis(5));
                }
            },
        );
        *inner_slot.lock() = Some(result.is_err());
        Ok::<(), JobError>(())
    });

    assert!(outer.unwrap_err().is_timeout());

    // Outer worker unwinds out of its wait; the inner worker is cancelled with it.
    let stats = Arc::clone(executor.stats());
    assert!(eventually(|| stats.snapshot().killed == 2, Duration::from_secs(2)));
    assert!(eventually(|| stats.detached_live() == 0, Duration::from_secs(1)));
    assert_eq!(*inner_result.lock(), None);
}

#[test]
fn test_invalid_deadlines_rejected_before_running() {
    let ran = Arc::new(AtomicBool::new(false));
    for seconds in [0.0, -1.0, f64::NAN, f64::INFINITY] {
        assert!(deadline::deadline_from_secs(seconds).is_err(), "{}", seconds);
    }

    assert!(deadline::deadline_from_secs(1e19).is_err());
    assert!(bounded_call::with_timeout_secs(1e19).is_err());

    let executor = executor();
    for bad in [Duration::ZERO, Duration::MAX] {
        let flag = Arc::clone(&ran);
        let result = executor.execute("never", "()", bad, move || {
            flag.store(true, Ordering::SeqCst);
            Ok::<(), JobError>(())
        });
        assert!(
            matches!(result, Err(TimeoutError::Deadline(DeadlineError::InvalidDeadline(_)))),
            "{:?}",
            bad
        );
    }
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(executor.stats().snapshot().calls, 0);
}

#[test]
fn test_unbounded_sleep_in_worker_is_cancelled() {
    let executor = executor();
    let start = Instant::now();
    let result = executor.execute("idle", "()", Duration::from_millis(50), || {
        bounded_call::sleep(Duration::MAX);
        Ok::<(), JobError>(())
    });

    assert!(result.unwrap_err().is_timeout());
    assert!(start.elapsed() < Duration::from_millis(500));

    let stats = Arc::clone(executor.stats());
    assert!(eventually(|| stats.snapshot().killed == 1, Duration::from_secs(2)));
}

#[test]
fn test_invocation_record_lifecycle() {
    let record =
        deadline::InvocationRecord::new("lifecycle", "(1, 2)", Duration::from_millis(250)).unwrap();
    assert_eq!(record.state(), InvocationState::Pending);
    assert_eq!(record.function_name(), "lifecycle");
    assert_eq!(record.arguments(), "(1, 2)");
    assert!(!record.is_cancelled());
    assert_eq!(
        record.exceeded().to_string(),
        "function 'lifecycle' exceeded its deadline of 0.250s"
    );
}
