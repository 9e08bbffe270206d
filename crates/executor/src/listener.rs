//! Callbacks around request execution.

use crate::error::BulkExecutionError;
use crate::result::Row;
use crate::statement::Statement;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// Scratch space attached to one request.
///
/// A context is created when a request starts and dropped once the last
/// listener callback for that request has fired. The executor records start
/// and stop instants; listeners may store arbitrary attributes to carry state
/// from the "started" callback to the completion callbacks.
#[derive(Default)]
pub struct ExecutionContext {
    inner: Mutex<ContextState>,
}

#[derive(Default)]
struct ContextState {
    start: Option<Instant>,
    stop: Option<Instant>,
    attributes: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ContextState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn start(&self) {
        self.state().start = Some(Instant::now());
    }

    pub(crate) fn stop(&self) {
        self.state().stop = Some(Instant::now());
    }

    pub fn start_instant(&self) -> Option<Instant> {
        self.state().start
    }

    pub fn stop_instant(&self) -> Option<Instant> {
        self.state().stop
    }

    /// Time between start and stop, or `None` while the request is running.
    pub fn elapsed(&self) -> Option<Duration> {
        let state = self.state();
        Some(state.stop?.saturating_duration_since(state.start?))
    }

    pub fn set_attribute<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        self.state().attributes.insert(key.into(), Arc::new(value));
    }

    pub fn attribute<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let value = self.state().attributes.get(key)?.clone();
        value.downcast::<T>().ok()
    }
}

/// Receives notifications about requests issued by the executor.
///
/// Each callback fires exactly once per request (or per row, for
/// [`on_row_received`](Self::on_row_received)), whether the executor runs in
/// fail-fast or fail-safe mode. Callbacks run on executor threads and must
/// not block.
pub trait ExecutionListener: Send + Sync {
    fn on_write_request_started(&self, _statement: &Statement, _context: &ExecutionContext) {}

    fn on_write_request_successful(&self, _statement: &Statement, _context: &ExecutionContext) {}

    fn on_write_request_failed(
        &self,
        _statement: &Statement,
        _error: &BulkExecutionError,
        _context: &ExecutionContext,
    ) {
    }

    fn on_read_request_started(&self, _statement: &Statement, _context: &ExecutionContext) {}

    fn on_read_request_successful(&self, _statement: &Statement, _context: &ExecutionContext) {}

    fn on_read_request_failed(
        &self,
        _statement: &Statement,
        _error: &BulkExecutionError,
        _context: &ExecutionContext,
    ) {
    }

    fn on_row_received(&self, _row: &Row, _context: &ExecutionContext) {}
}

/// Forwards every callback to several listeners, in order.
#[derive(Default, Clone)]
pub struct CompositeListener {
    listeners: Vec<Arc<dyn ExecutionListener>>,
}

impl CompositeListener {
    pub fn new(listeners: Vec<Arc<dyn ExecutionListener>>) -> Self {
        Self { listeners }
    }

    pub fn push(&mut self, listener: Arc<dyn ExecutionListener>) {
        self.listeners.push(listener);
    }
}

impl ExecutionListener for CompositeListener {
    fn on_write_request_started(&self, statement: &Statement, context: &ExecutionContext) {
        for l in &self.listeners {
            l.on_write_request_started(statement, context);
        }
    }

    fn on_write_request_successful(&self, statement: &Statement, context: &ExecutionContext) {
        for l in &self.listeners {
            l.on_write_request_successful(statement, context);
        }
    }

    fn on_write_request_failed(
        &self,
        statement: &Statement,
        error: &BulkExecutionError,
        context: &ExecutionContext,
    ) {
        for l in &self.listeners {
            l.on_write_request_failed(statement, error, context);
        }
    }

    fn on_read_request_started(&self, statement: &Statement, context: &ExecutionContext) {
        for l in &self.listeners {
            l.on_read_request_started(statement, context);
        }
    }

    fn on_read_request_successful(&self, statement: &Statement, context: &ExecutionContext) {
        for l in &self.listeners {
            l.on_read_request_successful(statement, context);
        }
    }

    fn on_read_request_failed(
        &self,
        statement: &Statement,
        error: &BulkExecutionError,
        context: &ExecutionContext,
    ) {
        for l in &self.listeners {
            l.on_read_request_failed(statement, error, context);
        }
    }

    fn on_row_received(&self, row: &Row, context: &ExecutionContext) {
        for l in &self.listeners {
            l.on_row_received(row, context);
        }
    }
}

/// Snapshot of the counters of a [`MetricsCollectingListener`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionMetrics {
    pub successful_writes: u64,
    pub failed_writes: u64,
    /// Number of statements written, counting each child of a batch.
    pub statements_written: u64,
    pub successful_reads: u64,
    pub failed_reads: u64,
    pub rows_received: u64,
    pub in_flight_requests: u64,
    /// Sum of the latencies of all completed requests, in microseconds.
    pub total_latency_micros: u64,
}

impl ExecutionMetrics {
    pub fn completed_requests(&self) -> u64 {
        self.successful_writes + self.failed_writes + self.successful_reads + self.failed_reads
    }

    pub fn mean_latency(&self) -> Option<Duration> {
        let completed = self.completed_requests();
        (completed > 0).then(|| Duration::from_micros(self.total_latency_micros / completed))
    }
}

/// Listener that counts requests and rows.
///
/// Counters are independent atomics: a snapshot taken while requests are
/// running may be slightly inconsistent, e.g. a request may already be
/// counted as completed but still as in flight.
#[derive(Debug, Default)]
pub struct MetricsCollectingListener {
    successful_writes: AtomicU64,
    failed_writes: AtomicU64,
    statements_written: AtomicU64,
    successful_reads: AtomicU64,
    failed_reads: AtomicU64,
    rows_received: AtomicU64,
    in_flight_requests: AtomicU64,
    total_latency_micros: AtomicU64,
}

impl MetricsCollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        ExecutionMetrics {
            successful_writes: self.successful_writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            statements_written: self.statements_written.load(Ordering::Relaxed),
            successful_reads: self.successful_reads.load(Ordering::Relaxed),
            failed_reads: self.failed_reads.load(Ordering::Relaxed),
            rows_received: self.rows_received.load(Ordering::Relaxed),
            in_flight_requests: self.in_flight_requests.load(Ordering::Relaxed),
            total_latency_micros: self.total_latency_micros.load(Ordering::Relaxed),
        }
    }

    /// Logs a one-line summary of the counters.
    pub fn report(&self) {
        let metrics = self.metrics();
        info!(
            writes = metrics.successful_writes + metrics.failed_writes,
            failed_writes = metrics.failed_writes,
            reads = metrics.successful_reads + metrics.failed_reads,
            failed_reads = metrics.failed_reads,
            rows = metrics.rows_received,
            in_flight = metrics.in_flight_requests,
            mean_latency = ?metrics.mean_latency(),
            "execution metrics"
        );
    }

    fn started(&self) {
        self.in_flight_requests.fetch_add(1, Ordering::Relaxed);
    }

    fn completed(&self, counter: &AtomicU64, context: &ExecutionContext) {
        counter.fetch_add(1, Ordering::Relaxed);
        self.in_flight_requests.fetch_sub(1, Ordering::Relaxed);
        if let Some(elapsed) = context.elapsed() {
            let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            self.total_latency_micros
                .fetch_add(micros, Ordering::Relaxed);
        }
    }
}

impl ExecutionListener for MetricsCollectingListener {
    fn on_write_request_started(&self, _statement: &Statement, _context: &ExecutionContext) {
        self.started();
    }

    fn on_write_request_successful(&self, statement: &Statement, context: &ExecutionContext) {
        self.statements_written
            .fetch_add(statement.children().len() as u64, Ordering::Relaxed);
        self.completed(&self.successful_writes, context);
    }

    fn on_write_request_failed(
        &self,
        _statement: &Statement,
        _error: &BulkExecutionError,
        context: &ExecutionContext,
    ) {
        self.completed(&self.failed_writes, context);
    }

    fn on_read_request_started(&self, _statement: &Statement, _context: &ExecutionContext) {
        self.started();
    }

    fn on_read_request_successful(&self, _statement: &Statement, context: &ExecutionContext) {
        self.completed(&self.successful_reads, context);
    }

    fn on_read_request_failed(
        &self,
        _statement: &Statement,
        _error: &BulkExecutionError,
        context: &ExecutionContext,
    ) {
        self.completed(&self.failed_reads, context);
    }

    fn on_row_received(&self, _row: &Row, _context: &ExecutionContext) {
        self.rows_received.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use super::{CompositeListener, ExecutionContext, ExecutionListener, MetricsCollectingListener};
    use crate::error::{BulkExecutionError, DriverError};
    use crate::statement::Statement;
    use std::sync::Arc;

    #[test]
    fn context_attributes() {
        let context = ExecutionContext::new();
        assert_eq!(context.elapsed(), None);
        context.start();
        context.stop();
        assert!(context.elapsed().is_some());

        context.set_attribute("attempt", 3u32);
        assert_eq!(context.attribute::<u32>("attempt").as_deref(), Some(&3));
        assert!(context.attribute::<String>("attempt").is_none());
        assert!(context.attribute::<u32>("missing").is_none());
    }

    #[test]
    fn composite_forwards_to_all() {
        let first = Arc::new(MetricsCollectingListener::new());
        let second = Arc::new(MetricsCollectingListener::new());
        let composite = CompositeListener::new(vec![first.clone(), second.clone()]);

        let statement = Arc::new(Statement::from("INSERT 1"));
        let context = ExecutionContext::new();
        composite.on_write_request_started(&statement, &context);
        composite.on_write_request_successful(&statement, &context);
        composite.on_write_request_started(&statement, &context);
        let error = BulkExecutionError::new(
            statement.clone(),
            DriverError::WriteTimeout("timeout".to_string()),
        );
        composite.on_write_request_failed(&statement, &error, &context);

        for listener in [first, second] {
            let metrics = listener.metrics();
            assert_eq!(metrics.successful_writes, 1);
            assert_eq!(metrics.failed_writes, 1);
            assert_eq!(metrics.statements_written, 1);
            assert_eq!(metrics.in_flight_requests, 0);
            assert_eq!(metrics.completed_requests(), 2);
        }
    }
}
