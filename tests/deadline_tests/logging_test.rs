/*!
 * Logging Tests
 * What executors report through an injected sink
 */

use bounded_call::{sleep, with_timeout, DeadlineConfig, DeadlineError, LogSink, ThreadExecutor};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Level;

#[derive(Default)]
struct CapturingSink {
    events: Mutex<Vec<(Level, String)>>,
}

impl CapturingSink {
    fn events(&self) -> Vec<(Level, String)> {
        self.events.lock().clone()
    }
}

impl LogSink for CapturingSink {
    fn log(&self, level: Level, message: &str) {
        self.events.lock().push((level, message.to_string()));
    }
}

#[test]
fn test_timeout_and_kill_request_are_logged() {
    let sink = Arc::new(CapturingSink::default());
    let executor = ThreadExecutor::with_sink(DeadlineConfig::default(), sink.clone());

    let result = executor.execute("fetch_report", "(\"q3\",)", Duration::from_millis(30), || {
        sleep(Duration::from_secs(5));
        Ok::<(), ()>(())
    });
    assert!(result.unwrap_err().is_timeout());

    let events = sink.events();
    let warning = events
        .iter()
        .find(|(level, _)| *level == Level::WARN)
        .expect("timeout warning");
    assert!(warning.1.contains("function 'fetch_report' exceeded its deadline of 0.030s"));
    assert!(warning.1.contains("(\"q3\",)"));

    assert!(events
        .iter()
        .any(|(level, msg)| *level == Level::DEBUG && msg.contains("cooperative kill")));
}

#[test]
fn test_late_worker_exit_is_logged() {
    let sink = Arc::new(CapturingSink::default());
    let executor = ThreadExecutor::with_sink(DeadlineConfig::default(), sink.clone());

    let result = executor.execute("stubborn", "()", Duration::from_millis(20), || {
        std::thread::sleep(Duration::from_millis(100));
        Ok::<u8, ()>(1)
    });
    assert!(result.unwrap_err().is_timeout());

    let start = Instant::now();
    while executor.stats().detached_live() > 0 && start.elapsed() < Duration::from_secs(2) {
        std::thread::sleep(Duration::from_millis(10));
    }

    assert!(sink
        .events()
        .iter()
        .any(|(_, msg)| msg.contains("discarding late result") && msg.contains("stubborn")));
}

#[test]
fn test_successful_call_logs_nothing() {
    let sink = Arc::new(CapturingSink::default());
    let executor = ThreadExecutor::with_sink(DeadlineConfig::default(), sink.clone());

    let value = executor
        .execute("fine", "()", Duration::from_secs(1), || Ok::<_, ()>(3))
        .unwrap();

    assert_eq!(value, 3);
    assert!(sink.events().is_empty());
}

#[test]
fn test_stats_snapshot_serializes() {
    let executor =
        ThreadExecutor::with_sink(DeadlineConfig::default(), Arc::new(CapturingSink::default()));
    let _ = executor.execute("one", "()", Duration::from_secs(1), || Ok::<_, ()>(()));

    let json = serde_json::to_value(executor.stats().snapshot()).unwrap();
    assert_eq!(json["calls"], 1);
    assert_eq!(json["completed"], 1);
    assert_eq!(json["detached_live"], 0);
}

#[test]
fn test_decorator_sink_independent_of_builder_order() {
    let config = DeadlineConfig::default().with_checkpoint_slice(Duration::from_millis(2));
    let stuck = |_: ()| -> Result<(), DeadlineError> {
        sleep(Duration::from_secs(2));
        Ok(())
    };

    let sink_then_config = Arc::new(CapturingSink::default());
    let config_then_sink = Arc::new(CapturingSink::default());
    let first = with_timeout(Duration::from_millis(20))
        .unwrap()
        .with_sink(sink_then_config.clone())
        .with_config(config.clone())
        .wrap(stuck);
    let second = with_timeout(Duration::from_millis(20))
        .unwrap()
        .with_config(config)
        .with_sink(config_then_sink.clone())
        .wrap(stuck);

    assert!(first(()).unwrap_err().is_exceeded());
    assert!(second(()).unwrap_err().is_exceeded());

    for sink in [&sink_then_config, &config_then_sink] {
        assert!(sink
            .events()
            .iter()
            .any(|(level, msg)| *level == Level::WARN && msg.contains("exceeded its deadline")));
    }
}
