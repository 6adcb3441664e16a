/*!
 * Structured Tracing
 * Subscriber setup and per-invocation spans using the tracing crate
 */

use crate::deadline::{InvocationRecord, InvocationState};
use std::time::Instant;
use tracing::{debug, info, span, Level};
use tracing_subscriber::{
    fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter,
};

/// Enable JSON output ("1" or "true")
pub const ENV_TRACE_JSON: &str = "BOUNDED_CALL_TRACE_JSON";

/// Initialize structured tracing
///
/// Environment variables:
/// - RUST_LOG: Set log level (default: info)
/// - BOUNDED_CALL_TRACE_JSON: Enable JSON output (default: false)
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = std::env::var(ENV_TRACE_JSON)
        .map(|v| v == "1" || v == "true")
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if use_json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_thread_names(true)
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_names(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .compact(),
            )
            .try_init()
    };

    if installed.is_ok() {
        info!(json = use_json, "structured tracing initialized");
    }
}

/// Span covering one bounded call, from record creation to the executor's return
pub struct InvocationSpan {
    span: tracing::Span,
    start: Instant,
}

impl InvocationSpan {
    pub fn new(record: &InvocationRecord, executor: &'static str) -> Self {
        let span = span!(
            Level::DEBUG,
            "bounded_call",
            id = %record.id(),
            executor = executor,
            function = record.function_name(),
            deadline_ms = record.deadline().as_millis() as u64,
            state = tracing::field::Empty,
            elapsed_ms = tracing::field::Empty,
        );
        Self {
            span,
            start: Instant::now(),
        }
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// The underlying span, for handing to a worker thread
    pub fn span(&self) -> &tracing::Span {
        &self.span
    }

    /// Record the state the call ended in
    pub fn record_state(&self, state: InvocationState) {
        self.span.record("state", tracing::field::display(state));
    }
}

impl Drop for InvocationSpan {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed();
        self.span.record("elapsed_ms", elapsed.as_millis() as u64);
        let _entered = self.span.enter();
        debug!(elapsed_us = elapsed.as_micros() as u64, "bounded call returned");
    }
}
