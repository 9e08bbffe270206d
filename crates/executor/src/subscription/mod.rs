//! Demand-driven streams of results.
//!
//! A subscription executes one statement. Nothing happens until the stream
//! is polled: the first poll waits for admission, then the request is
//! spawned on the executor's runtime. Listener callbacks run inside the
//! spawned task so they fire exactly once even if the stream is dropped
//! while the request is in flight. Dropping a subscription never cancels a
//! request that was already sent; it only prevents further requests (such
//! as continuation pages) and further deliveries.
//!
//! ```text
//!  Idle ──poll──> Acquiring ──permit──> Requesting ──page──> Delivering (reads)
//!                                           │  ^                 │
//!                                           │  └──next page──────┘
//!                                           └──────────> Terminated <──┘
//! ```

mod continuous;
mod read;
mod write;

pub(crate) use continuous::ContinuousReadSubscription;
pub(crate) use read::ReadSubscription;
pub(crate) use write::WriteSubscription;

use crate::admission::{AdmissionGate, AdmissionPermit};
use crate::error::{BulkExecutionError, DriverError};
use crate::listener::ExecutionListener;
use crate::result::{ReadResult, WriteResult};
use crate::session::{ContinuousPagingSession, Session};
use bulkload_types::ContinuousPagingConfig;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// State shared by the executor and all of its subscriptions.
pub(crate) struct Dispatcher {
    pub session: Arc<dyn Session>,
    pub continuous: Option<(Arc<dyn ContinuousPagingSession>, ContinuousPagingConfig)>,
    pub gate: Arc<AdmissionGate>,
    pub listener: Option<Arc<dyn ExecutionListener>>,
    pub fail_safe: bool,
    pub handle: Handle,
    pub tracker: TaskTracker,
    /// Cancelled when the executor stops waiting for in-flight requests.
    pub shutdown: CancellationToken,
}

impl Dispatcher {
    pub fn acquire(&self) -> BoxFuture<'static, AdmissionPermit> {
        let gate = self.gate.clone();
        async move { gate.acquire().await }.boxed()
    }

    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn_on(task, &self.handle)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Runs a driver call, abandoning it if the executor is forcibly shut
    /// down.
    pub async fn guarded<F, T>(&self, call: F) -> Result<T, DriverError>
    where
        F: Future<Output = Result<T, DriverError>>,
    {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => Err(DriverError::Interrupted),
            result = call => result,
        }
    }

    pub fn deliver_write(&self, result: WriteResult) -> Result<WriteResult, BulkExecutionError> {
        match result {
            WriteResult::Failure(error) if !self.fail_safe => Err(error),
            result => Ok(result),
        }
    }

    pub fn deliver_read(&self, result: ReadResult) -> Result<ReadResult, BulkExecutionError> {
        match result {
            ReadResult::Failure(error) if !self.fail_safe => Err(error),
            result => Ok(result),
        }
    }
}
