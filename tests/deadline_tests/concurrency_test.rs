/*!
 * Concurrency Tests
 * Independent bounded calls running at the same time
 */

use bounded_call::{sleep, DeadlineConfig, NullSink, ThreadExecutor};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Debug, PartialEq)]
struct Never;

#[test]
#[serial]
fn test_timeout_of_one_call_does_not_affect_another() {
    let executor = ThreadExecutor::with_sink(DeadlineConfig::default(), Arc::new(NullSink));
    let barrier = Arc::new(Barrier::new(2));

    let slow = {
        let executor = executor.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            executor.execute("slow", "()", Duration::from_millis(100), || {
                sleep(Duration::from_secs(5));
                Ok::<u32, Never>(0)
            })
        })
    };

    let steady = {
        let executor = executor.clone();
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            let start = Instant::now();
            let result = executor.execute("steady", "()", Duration::from_secs(2), || {
                // Outlives the slow call's deadline and its cancellation.
                sleep(Duration::from_millis(300));
                Ok::<u32, Never>(42)
            });
            (result, start.elapsed())
        })
    };

    assert!(slow.join().unwrap().unwrap_err().is_timeout());
    let (result, elapsed) = steady.join().unwrap();
    assert_eq!(result.unwrap(), 42);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(1000), "took {:?}", elapsed);
}

#[test]
#[serial]
fn test_many_concurrent_calls() {
    let executor = ThreadExecutor::with_sink(DeadlineConfig::default(), Arc::new(NullSink));

    let handles: Vec<_> = (0..16u64)
        .map(|i| {
            let executor = executor.clone();
            thread::spawn(move || {
                executor.execute("work", &format!("({},)", i), Duration::from_millis(150), move || {
                    if i % 2 == 0 {
                        sleep(Duration::from_millis(10));
                        Ok::<u64, Never>(i * 10)
                    } else {
                        sleep(Duration::from_secs(5));
                        Ok::<u64, Never>(0)
                    }
                })
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(result.unwrap(), i as u64 * 10);
        } else {
            assert!(result.unwrap_err().is_timeout());
        }
    }

    let snapshot = executor.stats().snapshot();
    assert_eq!(snapshot.calls, 16);
    assert_eq!(snapshot.completed, 8);
    assert_eq!(snapshot.timed_out, 8);
}
