//! The bulk executor facade.
//!
//! Every operation comes in three styles:
//!
//! * `*_reactive` methods return a stream of results that executes lazily as
//!   it is polled.
//! * `async` methods drive such a stream to completion, handing every result
//!   to a consumer callback.
//! * `*_sync` methods block the calling thread on the `async` form. They must
//!   not be called from within an async context.
//!
//! and three arities: one statement, a finite collection (`*_all`), or a
//! possibly unbounded stream (`*_stream`).
//!
//! In fail-fast mode (the default), the first failed request ends the
//! operation with an error: requests already sent run to completion, but no
//! new requests are admitted. In fail-safe mode failures are delivered as
//! [`WriteResult::Failure`] or [`ReadResult::Failure`] and processing
//! continues.

use crate::admission::AdmissionGate;
use crate::error::{BulkExecutionError, DriverError, ExecutorError};
use crate::listener::ExecutionListener;
use crate::result::{ReadResult, WriteResult};
use crate::session::{ContinuousPagingSession, Session};
use crate::statement::Statement;
use crate::subscription::{
    ContinuousReadSubscription, Dispatcher, ReadSubscription, WriteSubscription,
};
use bulkload_types::{ContinuousPagingConfig, ExecutorConfig};
use futures::stream::{self, BoxStream};
use futures::{future, Stream, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Maximum number of statements of a collection or stream executed
/// concurrently when in-flight requests are not limited.
const DEFAULT_CONCURRENCY: usize = 256;

type ResultStream<T> = BoxStream<'static, Result<T, BulkExecutionError>>;

/// Executes statements in bulk under admission control.
pub struct BulkExecutor {
    dispatcher: Arc<Dispatcher>,
    /// Runtime owned by the executor, unless it was given a handle to an
    /// existing runtime.
    runtime: Option<Runtime>,
    concurrency: usize,
    shutdown_timeout: Duration,
}

/// Builder for [`BulkExecutor`].
pub struct BulkExecutorBuilder {
    session: Arc<dyn Session>,
    continuous_session: Option<Arc<dyn ContinuousPagingSession>>,
    config: ExecutorConfig,
    listener: Option<Arc<dyn ExecutionListener>>,
    handle: Option<Handle>,
}

impl BulkExecutorBuilder {
    /// Replaces all settings with `config`.
    pub fn config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn fail_safe(mut self, fail_safe: bool) -> Self {
        self.config.fail_safe = fail_safe;
        self
    }

    /// `None` disables the limit.
    pub fn max_in_flight_requests(mut self, max: Option<u64>) -> Self {
        self.config.max_in_flight_requests = max;
        self
    }

    /// `None` disables the limit.
    pub fn max_requests_per_second(mut self, max: Option<u64>) -> Self {
        self.config.max_requests_per_second = max;
        self
    }

    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.config.worker_threads = Some(threads);
        self
    }

    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout_secs = timeout.as_secs();
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ExecutionListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Runs requests on an existing runtime instead of starting a dedicated
    /// one.
    pub fn runtime_handle(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Executes reads with continuous paging, using the options of the
    /// executor configuration or the defaults.
    pub fn continuous_paging(mut self, session: Arc<dyn ContinuousPagingSession>) -> Self {
        self.continuous_session = Some(session);
        self
    }

    pub fn continuous_paging_options(mut self, options: ContinuousPagingConfig) -> Self {
        self.config.continuous_paging = Some(options);
        self
    }

    pub fn build(self) -> Result<BulkExecutor, ExecutorError> {
        self.config.validate()?;

        let (runtime, handle) = match self.handle {
            Some(handle) => (None, handle),
            None => {
                let runtime = new_runtime(self.config.worker_threads())?;
                let handle = runtime.handle().clone();
                (Some(runtime), handle)
            }
        };

        let gate = AdmissionGate::from_config(&self.config);
        let concurrency = gate
            .max_in_flight_requests()
            .unwrap_or(DEFAULT_CONCURRENCY)
            .max(1);
        let continuous = self.continuous_session.map(|session| {
            let options = self.config.continuous_paging.clone().unwrap_or_default();
            (session, options)
        });

        info!(
            fail_safe = self.config.fail_safe,
            max_in_flight_requests = ?self.config.max_in_flight_requests,
            max_requests_per_second = ?self.config.max_requests_per_second,
            continuous_paging = continuous.is_some(),
            "starting bulk executor"
        );

        Ok(BulkExecutor {
            dispatcher: Arc::new(Dispatcher {
                session: self.session,
                continuous,
                gate: Arc::new(gate),
                listener: self.listener,
                fail_safe: self.config.fail_safe,
                handle,
                tracker: TaskTracker::new(),
                shutdown: CancellationToken::new(),
            }),
            runtime,
            concurrency,
            shutdown_timeout: self.config.shutdown_timeout(),
        })
    }
}

fn new_runtime(worker_threads: usize) -> Result<Runtime, ExecutorError> {
    let next_id = Arc::new(AtomicUsize::new(0));
    Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name_fn(move || {
            let id = next_id.fetch_add(1, Ordering::Relaxed);
            format!("bulk-executor-{id}")
        })
        .enable_all()
        .build()
        .map_err(ExecutorError::Runtime)
}

/// Ends a result stream after its first error.
fn until_first_error<T, S>(results: S) -> ResultStream<T>
where
    T: Send + 'static,
    S: Stream<Item = Result<T, BulkExecutionError>> + Send + 'static,
{
    results
        .scan(false, |failed, result| {
            if *failed {
                return future::ready(None);
            }
            *failed = result.is_err();
            future::ready(Some(result))
        })
        .boxed()
}

/// Picks the read subscription matching the executor's paging mode.
fn read_subscription(
    dispatcher: &Arc<Dispatcher>,
    statement: Statement,
) -> ResultStream<ReadResult> {
    let statement = Arc::new(statement);
    match &dispatcher.continuous {
        Some((session, options)) => ContinuousReadSubscription::new(
            dispatcher.clone(),
            session.clone(),
            options.clone(),
            statement,
        )
        .boxed(),
        None => ReadSubscription::new(dispatcher.clone(), statement).boxed(),
    }
}

/// Feeds every result to `consumer`, stopping at the first error.
async fn consume<T, F>(
    mut results: ResultStream<T>,
    mut consumer: F,
) -> Result<(), BulkExecutionError>
where
    F: FnMut(T),
{
    while let Some(result) = results.next().await {
        consumer(result?);
    }
    Ok(())
}

impl BulkExecutor {
    pub fn builder(session: Arc<dyn Session>) -> BulkExecutorBuilder {
        BulkExecutorBuilder {
            session,
            continuous_session: None,
            config: ExecutorConfig::default(),
            listener: None,
            handle: None,
        }
    }

    pub fn from_config(
        session: Arc<dyn Session>,
        config: &ExecutorConfig,
    ) -> Result<Self, ExecutorError> {
        Self::builder(session).config(config.clone()).build()
    }

    pub fn is_fail_safe(&self) -> bool {
        self.dispatcher.fail_safe
    }

    pub fn admission_gate(&self) -> &AdmissionGate {
        &self.dispatcher.gate
    }

    fn block_on<F: Future>(&self, future: F) -> F::Output {
        match &self.runtime {
            Some(runtime) => runtime.block_on(future),
            None => self.dispatcher.handle.block_on(future),
        }
    }

    fn interrupted(statement: Arc<Statement>) -> BulkExecutionError {
        BulkExecutionError::new(statement, DriverError::Interrupted)
    }

    // Writes.

    /// Stream yielding the result of one write.
    pub fn write_reactive(&self, statement: impl Into<Statement>) -> ResultStream<WriteResult> {
        WriteSubscription::new(self.dispatcher.clone(), Arc::new(statement.into())).boxed()
    }

    /// Stream yielding the results of all `statements`, in completion order.
    pub fn write_stream_reactive<S>(&self, statements: S) -> ResultStream<WriteResult>
    where
        S: Stream<Item = Statement> + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let results = statements
            .map(move |statement| WriteSubscription::new(dispatcher.clone(), Arc::new(statement)))
            .flatten_unordered(self.concurrency);
        until_first_error(results)
    }

    pub fn write_all_reactive<I>(&self, statements: I) -> ResultStream<WriteResult>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
    {
        self.write_stream_reactive(stream::iter(statements))
    }

    /// Executes one write.
    ///
    /// In fail-fast mode a failed write is returned as an error; in fail-safe
    /// mode as [`WriteResult::Failure`].
    pub async fn write(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<WriteResult, BulkExecutionError> {
        let statement = Arc::new(statement.into());
        let mut results = WriteSubscription::new(self.dispatcher.clone(), statement.clone());
        match results.next().await {
            Some(result) => result,
            None => Err(Self::interrupted(statement)),
        }
    }

    pub async fn write_all<I, F>(
        &self,
        statements: I,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
        F: FnMut(WriteResult),
    {
        consume(self.write_all_reactive(statements), consumer).await
    }

    pub async fn write_stream<S, F>(
        &self,
        statements: S,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        S: Stream<Item = Statement> + Send + 'static,
        F: FnMut(WriteResult),
    {
        consume(self.write_stream_reactive(statements), consumer).await
    }

    pub fn write_sync(
        &self,
        statement: impl Into<Statement>,
    ) -> Result<WriteResult, BulkExecutionError> {
        self.block_on(self.write(statement))
    }

    pub fn write_all_sync<I, F>(&self, statements: I, consumer: F) -> Result<(), BulkExecutionError>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
        F: FnMut(WriteResult),
    {
        self.block_on(self.write_all(statements, consumer))
    }

    pub fn write_stream_sync<S, F>(
        &self,
        statements: S,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        S: Stream<Item = Statement> + Send + 'static,
        F: FnMut(WriteResult),
    {
        self.block_on(self.write_stream(statements, consumer))
    }

    // Reads.

    /// Stream yielding one result per row returned by the read, in server
    /// order.
    pub fn read_reactive(&self, statement: impl Into<Statement>) -> ResultStream<ReadResult> {
        read_subscription(&self.dispatcher, statement.into())
    }

    /// Stream yielding the rows of all reads. Rows of one statement keep
    /// their order; rows of different statements may interleave.
    pub fn read_stream_reactive<S>(&self, statements: S) -> ResultStream<ReadResult>
    where
        S: Stream<Item = Statement> + Send + 'static,
    {
        let dispatcher = self.dispatcher.clone();
        let results = statements
            .map(move |statement| read_subscription(&dispatcher, statement))
            .flatten_unordered(self.concurrency);
        until_first_error(results)
    }

    pub fn read_all_reactive<I>(&self, statements: I) -> ResultStream<ReadResult>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
    {
        self.read_stream_reactive(stream::iter(statements))
    }

    pub async fn read<F>(
        &self,
        statement: impl Into<Statement>,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        F: FnMut(ReadResult),
    {
        consume(self.read_reactive(statement), consumer).await
    }

    pub async fn read_all<I, F>(&self, statements: I, consumer: F) -> Result<(), BulkExecutionError>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
        F: FnMut(ReadResult),
    {
        consume(self.read_all_reactive(statements), consumer).await
    }

    pub async fn read_stream<S, F>(
        &self,
        statements: S,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        S: Stream<Item = Statement> + Send + 'static,
        F: FnMut(ReadResult),
    {
        consume(self.read_stream_reactive(statements), consumer).await
    }

    pub fn read_sync<F>(
        &self,
        statement: impl Into<Statement>,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        F: FnMut(ReadResult),
    {
        self.block_on(self.read(statement, consumer))
    }

    pub fn read_all_sync<I, F>(&self, statements: I, consumer: F) -> Result<(), BulkExecutionError>
    where
        I: IntoIterator<Item = Statement>,
        I::IntoIter: Send + 'static,
        F: FnMut(ReadResult),
    {
        self.block_on(self.read_all(statements, consumer))
    }

    pub fn read_stream_sync<S, F>(
        &self,
        statements: S,
        consumer: F,
    ) -> Result<(), BulkExecutionError>
    where
        S: Stream<Item = Statement> + Send + 'static,
        F: FnMut(ReadResult),
    {
        self.block_on(self.read_stream(statements, consumer))
    }

    // Shutdown.

    /// Stops admitting requests and waits up to the shutdown timeout for
    /// in-flight requests. Requests still running after the timeout are
    /// interrupted.
    ///
    /// Returns `true` if all requests completed in time.
    pub async fn shutdown(&self) -> bool {
        let tracker = &self.dispatcher.tracker;
        tracker.close();
        debug!(in_flight = tracker.len(), "waiting for in-flight requests");
        let drained = tokio::time::timeout(self.shutdown_timeout, tracker.wait())
            .await
            .is_ok();
        if !drained {
            warn!(
                in_flight = tracker.len(),
                timeout = ?self.shutdown_timeout,
                "in-flight requests did not complete in time, interrupting them"
            );
        }
        self.dispatcher.shutdown.cancel();
        drained
    }

    /// Blocking form of [`shutdown`](Self::shutdown) that also stops the
    /// executor's own runtime.
    pub fn close(mut self) -> bool {
        let drained = self.block_on(self.shutdown());
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(self.shutdown_timeout);
        }
        info!("bulk executor closed");
        drained
    }
}

impl Drop for BulkExecutor {
    fn drop(&mut self) {
        self.dispatcher.shutdown.cancel();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

#[cfg(test)]
mod test {
    use super::BulkExecutor;
    use crate::error::DriverError;
    use crate::listener::MetricsCollectingListener;
    use crate::result::{BulkResult, ReadResult, WriteResult};
    use crate::session::{MockContinuousPagingSession, MockSession, Page};
    use crate::statement::Statement;
    use crate::test::{ids, init_test_logger, rows, FakeContinuousSession, FakeSession};
    use bulkload_types::ContinuousPagingConfig;
    use futures::{stream, StreamExt};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::runtime::Handle;

    fn statements(queries: &[&str]) -> Vec<Statement> {
        queries.iter().map(|q| Statement::from(*q)).collect()
    }

    #[test]
    fn write_sync() {
        init_test_logger();
        let session = Arc::new(FakeSession::new());
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session.clone())
            .worker_threads(2)
            .listener(listener.clone())
            .build()
            .unwrap();

        let result = executor.write_sync("INSERT 1").unwrap();
        assert!(result.is_success());
        assert_eq!(result.statement().to_string(), "INSERT 1");
        assert_eq!(
            result.execution_info().unwrap().host.as_deref(),
            Some("127.0.0.1:9042")
        );
        assert_eq!(session.executed(), vec!["INSERT 1"]);
        assert_eq!(listener.metrics().successful_writes, 1);
        assert!(executor.close());
    }

    #[test]
    fn write_sync_fail_fast() {
        let session = Arc::new(
            FakeSession::new().fail("INSERT 1", DriverError::WriteTimeout("error 1".into())),
        );
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session)
            .worker_threads(1)
            .listener(listener.clone())
            .build()
            .unwrap();

        let error = executor.write_sync("INSERT 1").unwrap_err();
        assert_eq!(
            error.to_string(),
            "Statement execution failed: INSERT 1 (error 1)"
        );
        assert_eq!(listener.metrics().failed_writes, 1);
        assert_eq!(listener.metrics().in_flight_requests, 0);
    }

    #[test]
    fn write_sync_fail_safe() {
        let session = Arc::new(
            FakeSession::new().fail("INSERT 1", DriverError::WriteTimeout("error 1".into())),
        );
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session)
            .worker_threads(1)
            .fail_safe(true)
            .listener(listener.clone())
            .build()
            .unwrap();

        let result = executor.write_sync("INSERT 1").unwrap();
        assert!(!result.is_success());
        assert!(matches!(
            result.error().unwrap().cause(),
            DriverError::WriteTimeout(_)
        ));
        assert_eq!(listener.metrics().failed_writes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn write_with_mock_session() {
        let mut session = MockSession::new();
        session
            .expect_execute()
            .times(1)
            .returning(|_, _| Ok(Page::default()));
        let executor = BulkExecutor::builder(Arc::new(session))
            .runtime_handle(Handle::current())
            .build()
            .unwrap();

        let result = executor.write("INSERT 1").await.unwrap();
        assert!(matches!(result, WriteResult::Success { .. }));
        assert!(executor.shutdown().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_fast_stops_admitting_requests() {
        let session = Arc::new(
            FakeSession::new().fail("INSERT 3", DriverError::WriteTimeout("error 3".into())),
        );
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .max_in_flight_requests(Some(1))
            .listener(listener.clone())
            .build()
            .unwrap();

        let mut successes = Vec::new();
        let error = executor
            .write_all(
                statements(&["INSERT 1", "INSERT 2", "INSERT 3", "INSERT 4", "INSERT 5"]),
                |result| successes.push(result.statement().to_string()),
            )
            .await
            .unwrap_err();

        assert_eq!(error.statement().to_string(), "INSERT 3");
        assert_eq!(successes, vec!["INSERT 1", "INSERT 2"]);
        assert_eq!(session.executed(), vec!["INSERT 1", "INSERT 2", "INSERT 3"]);
        let metrics = listener.metrics();
        assert_eq!(metrics.successful_writes, 2);
        assert_eq!(metrics.failed_writes, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn fail_safe_delivers_failures() {
        let session = Arc::new(
            FakeSession::new().fail("INSERT 3", DriverError::WriteTimeout("error 3".into())),
        );
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .fail_safe(true)
            .build()
            .unwrap();

        let mut results = Vec::new();
        executor
            .write_stream(
                stream::iter(statements(&[
                    "INSERT 1", "INSERT 2", "INSERT 3", "INSERT 4", "INSERT 5",
                ])),
                |result| results.push(result),
            )
            .await
            .unwrap();

        assert_eq!(results.len(), 5);
        let failed: Vec<_> = results.iter().filter(|r| !r.is_success()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].statement().to_string(), "INSERT 3");
        assert_eq!(session.executions(), 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn in_flight_requests_are_bounded() {
        let session = Arc::new(FakeSession::new().with_latency(Duration::from_millis(5)));
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .max_in_flight_requests(Some(4))
            .listener(listener.clone())
            .build()
            .unwrap();

        let queries: Vec<Statement> = (0..100)
            .map(|i| Statement::from(format!("INSERT {i}").as_str()))
            .collect();
        let results: Vec<_> = executor.write_all_reactive(queries).collect().await;

        assert_eq!(results.len(), 100);
        assert!(results.iter().all(|r| r.is_ok()));
        assert!(session.max_in_flight() <= 4);
        assert_eq!(executor.admission_gate().available_permits(), Some(4));
        assert_eq!(listener.metrics().in_flight_requests, 0);
        assert_eq!(listener.metrics().successful_writes, 100);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_preserves_row_order() {
        let session = Arc::new(FakeSession::new().pages(
            "SELECT 1",
            vec![rows(0, 3), rows(3, 2), rows(5, 5)],
        ));
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .listener(listener.clone())
            .build()
            .unwrap();

        let mut results = Vec::new();
        executor
            .read("SELECT 1", |result| results.push(result))
            .await
            .unwrap();

        assert_eq!(
            ids(results.iter().filter_map(ReadResult::row)),
            (0..10).collect::<Vec<_>>()
        );
        let metrics = listener.metrics();
        assert_eq!(metrics.rows_received, 10);
        // One request per page.
        assert_eq!(metrics.successful_reads, 3);
        assert_eq!(session.executions(), 3);
        // Only the initial request consumed a permit, and it was returned.
        assert_eq!(executor.admission_gate().available_permits(), Some(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_fetches_pages_on_demand() {
        let session = Arc::new(FakeSession::new().pages(
            "SELECT 1",
            vec![rows(0, 2), rows(2, 2), rows(4, 2)],
        ));
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .listener(listener.clone())
            .build()
            .unwrap();

        let first: Vec<_> = executor
            .read_reactive("SELECT 1")
            .take(2)
            .collect()
            .await;
        assert_eq!(first.len(), 2);
        assert_eq!(session.executions(), 1);
        assert_eq!(listener.metrics().rows_received, 2);
        // Dropping the read with pages left releases its permit.
        assert_eq!(executor.admission_gate().available_permits(), Some(1000));

        // Pulling the third row requires the second page.
        let three: Vec<_> = executor
            .read_reactive("SELECT 1")
            .take(3)
            .collect()
            .await;
        assert_eq!(three.len(), 3);
        assert_eq!(session.executions(), 3);
        assert_eq!(listener.metrics().rows_received, 5);
        assert_eq!(executor.admission_gate().available_permits(), Some(1000));
        assert_eq!(listener.metrics().in_flight_requests, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn read_failure() {
        let session = Arc::new(
            FakeSession::new()
                .pages("SELECT 1", vec![rows(0, 2)])
                .fail("SELECT 2", DriverError::ReadTimeout("error 2".into())),
        );

        let fail_fast = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .max_in_flight_requests(Some(1))
            .build()
            .unwrap();
        let mut rows_read = 0;
        let error = fail_fast
            .read_all(statements(&["SELECT 1", "SELECT 2"]), |_| rows_read += 1)
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Statement execution failed: SELECT 2 (error 2)");
        assert_eq!(rows_read, 2);

        let fail_safe = BulkExecutor::builder(session)
            .runtime_handle(Handle::current())
            .fail_safe(true)
            .build()
            .unwrap();
        let results: Vec<_> = fail_safe
            .read_all_reactive(statements(&["SELECT 1", "SELECT 2"]))
            .collect()
            .await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.is_ok()));
        let failures = results
            .iter()
            .filter(|r| matches!(r, Ok(ReadResult::Failure(_))))
            .count();
        assert_eq!(failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continuous_read() {
        let continuous = Arc::new(
            FakeContinuousSession::new()
                .pages("SELECT 1", vec![rows(0, 4), rows(4, 4), rows(8, 2)]),
        );
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(Arc::new(FakeSession::new()))
            .runtime_handle(Handle::current())
            .continuous_paging(continuous.clone())
            .listener(listener.clone())
            .build()
            .unwrap();

        let mut results = Vec::new();
        executor
            .read("SELECT 1", |result| results.push(result))
            .await
            .unwrap();
        assert_eq!(
            ids(results.iter().filter_map(ReadResult::row)),
            (0..10).collect::<Vec<_>>()
        );
        assert_eq!(continuous.pages_sent(), 3);
        assert!(executor.shutdown().await);

        let metrics = listener.metrics();
        assert_eq!(metrics.rows_received, 10);
        // A continuous read is a single request.
        assert_eq!(metrics.successful_reads, 1);
        assert_eq!(metrics.in_flight_requests, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continuous_read_never_delivers_more_than_requested() {
        let continuous = Arc::new(
            FakeContinuousSession::new().pages("SELECT 1", vec![rows(0, 5), rows(5, 5)]),
        );
        let listener = Arc::new(MetricsCollectingListener::new());
        let executor = BulkExecutor::builder(Arc::new(FakeSession::new()))
            .runtime_handle(Handle::current())
            .continuous_paging(continuous)
            .listener(listener.clone())
            .build()
            .unwrap();

        let results: Vec<_> = executor.read_reactive("SELECT 1").take(3).collect().await;
        assert_eq!(results.len(), 3);
        assert_eq!(listener.metrics().rows_received, 3);
        assert!(executor.shutdown().await);
        assert_eq!(executor.admission_gate().available_permits(), Some(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continuous_read_stops_pulling_pages_while_consumer_stalls() {
        let continuous = Arc::new(
            FakeContinuousSession::new()
                .pages("SELECT 1", (0..1000u64).map(|page| rows(page, 1)).collect()),
        );
        let executor = BulkExecutor::builder(Arc::new(FakeSession::new()))
            .runtime_handle(Handle::current())
            .continuous_paging(continuous.clone())
            .continuous_paging_options(ContinuousPagingConfig {
                max_enqueued_pages: 4,
                ..ContinuousPagingConfig::default()
            })
            .build()
            .unwrap();

        let mut results = executor.read_reactive("SELECT 1");
        assert!(results.next().await.is_some());
        tokio::time::sleep(Duration::from_millis(200)).await;
        // The page being consumed, a full queue, and one page waiting for room.
        let pulled = continuous.pages_sent();
        assert!(pulled <= 6, "{pulled} pages pulled for one row");

        assert_eq!(results.count().await, 999);
        assert_eq!(continuous.pages_sent(), 1000);
        assert!(executor.shutdown().await);
        assert_eq!(executor.admission_gate().available_permits(), Some(1000));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn continuous_read_failure() {
        let mut continuous = MockContinuousPagingSession::new();
        continuous
            .expect_execute_continuously()
            .times(1)
            .returning(|_, _| {
                stream::iter(vec![
                    Ok(Page {
                        rows: rows(0, 2),
                        ..Page::default()
                    }),
                    Err(DriverError::ReadTimeout("error 1".into())),
                ])
                .boxed()
            });
        let executor = BulkExecutor::builder(Arc::new(FakeSession::new()))
            .runtime_handle(Handle::current())
            .fail_safe(true)
            .continuous_paging(Arc::new(continuous))
            .continuous_paging_options(ContinuousPagingConfig {
                page_size: 2,
                ..ContinuousPagingConfig::default()
            })
            .build()
            .unwrap();

        let results: Vec<_> = executor.read_reactive("SELECT 1").collect().await;
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0], Ok(ReadResult::Success { .. })));
        assert!(matches!(results[1], Ok(ReadResult::Success { .. })));
        assert!(matches!(results[2], Ok(ReadResult::Failure(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_after_shutdown_are_interrupted() {
        let session = Arc::new(FakeSession::new());
        let executor = BulkExecutor::builder(session.clone())
            .runtime_handle(Handle::current())
            .build()
            .unwrap();
        assert!(executor.shutdown().await);

        let error = executor.write("INSERT 1").await.unwrap_err();
        assert!(matches!(error.cause(), DriverError::Interrupted));
        assert_eq!(session.executions(), 0);
    }

    #[test]
    fn close_waits_for_in_flight_requests() {
        let session = Arc::new(FakeSession::new().with_latency(Duration::from_millis(50)));
        let executor = BulkExecutor::builder(session.clone())
            .worker_threads(2)
            .build()
            .unwrap();

        // Dropping the stream after the request was sent does not cancel it.
        let results = executor.write_reactive("INSERT 1");
        let started = executor.block_on(async move {
            let mut results = results;
            tokio::select! {
                _ = results.next() => false,
                _ = tokio::time::sleep(Duration::from_millis(10)) => true,
            }
        });
        assert!(started);
        assert!(executor.close());
        assert_eq!(session.executions(), 1);
    }
}
