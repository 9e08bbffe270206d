use super::Dispatcher;
use crate::admission::AdmissionPermit;
use crate::error::{BulkExecutionError, DriverError};
use crate::listener::ExecutionContext;
use crate::result::{ExecutionInfo, ReadResult, Row};
use crate::session::{ContinuousPagingSession, Page};
use crate::statement::Statement;
use bulkload_types::ContinuousPagingConfig;
use futures::future::BoxFuture;
use futures::{ready, Stream, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::vec;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

enum ContinuousState {
    Idle,
    Acquiring(BoxFuture<'static, AdmissionPermit>),
    Streaming {
        pages: Receiver<Result<Page, BulkExecutionError>>,
        rows: vec::IntoIter<Row>,
        info: Arc<ExecutionInfo>,
        context: Arc<ExecutionContext>,
        /// Stops the pump when the subscription is dropped.
        _pump: DropGuard,
    },
    Terminated,
}

/// Read subscription for continuous paging.
///
/// The server pushes pages without waiting for the client. A pump task
/// moves them into a queue of at most `max_enqueued_pages` pages and stops
/// reading from the driver while the queue is full. Rows are handed out one
/// per poll, so the consumer never receives more than it asks for. The
/// in-flight permit is held until the server has sent the last page.
pub(crate) struct ContinuousReadSubscription {
    dispatcher: Arc<Dispatcher>,
    session: Arc<dyn ContinuousPagingSession>,
    options: ContinuousPagingConfig,
    statement: Arc<Statement>,
    state: ContinuousState,
}

impl ContinuousReadSubscription {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        session: Arc<dyn ContinuousPagingSession>,
        options: ContinuousPagingConfig,
        statement: Arc<Statement>,
    ) -> Self {
        Self {
            dispatcher,
            session,
            options,
            statement,
            state: ContinuousState::Idle,
        }
    }

    fn interrupted(&self) -> ReadResult {
        ReadResult::Failure(BulkExecutionError::new(
            self.statement.clone(),
            DriverError::Interrupted,
        ))
    }

    fn start(&self, permit: AdmissionPermit) -> ContinuousState {
        let (tx, rx) = channel(self.options.max_enqueued_pages.max(1));
        let context = Arc::new(ExecutionContext::new());
        let cancel = CancellationToken::new();
        self.dispatcher.spawn(pump(
            self.dispatcher.clone(),
            self.session.clone(),
            self.options.clone(),
            self.statement.clone(),
            permit,
            context.clone(),
            tx,
            cancel.clone(),
        ));
        ContinuousState::Streaming {
            pages: rx,
            rows: Vec::new().into_iter(),
            info: Arc::new(ExecutionInfo::default()),
            context,
            _pump: cancel.drop_guard(),
        }
    }
}

impl Stream for ContinuousReadSubscription {
    type Item = Result<ReadResult, BulkExecutionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ContinuousState::Idle => {
                    if this.dispatcher.is_shut_down() {
                        this.state = ContinuousState::Terminated;
                        let result = this.interrupted();
                        return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                    }
                    this.state = ContinuousState::Acquiring(this.dispatcher.acquire());
                }
                ContinuousState::Acquiring(admission) => {
                    let permit = ready!(admission.as_mut().poll(cx));
                    this.state = this.start(permit);
                }
                ContinuousState::Streaming {
                    pages,
                    rows,
                    info,
                    context,
                    ..
                } => {
                    if let Some(row) = rows.next() {
                        if let Some(listener) = &this.dispatcher.listener {
                            listener.on_row_received(&row, context);
                        }
                        return Poll::Ready(Some(Ok(ReadResult::Success {
                            statement: this.statement.clone(),
                            info: info.clone(),
                            row,
                        })));
                    }
                    match ready!(pages.poll_recv(cx)) {
                        Some(Ok(page)) => {
                            *rows = page.rows.into_iter();
                            *info = Arc::new(page.info);
                        }
                        Some(Err(error)) => {
                            this.state = ContinuousState::Terminated;
                            let result = ReadResult::Failure(error);
                            return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                        }
                        None => {
                            this.state = ContinuousState::Terminated;
                            return Poll::Ready(None);
                        }
                    }
                }
                ContinuousState::Terminated => return Poll::Ready(None),
            }
        }
    }
}

/// Drains the driver's page stream into `pages`, waiting for room in the
/// queue before pulling the next page.
///
/// Ends when the server has sent the last page, on the first failure, when
/// the subscription is dropped, or when the executor shuts down. A dropped
/// subscription counts as a successful request: the consumer asked for no
/// more rows.
#[allow(clippy::too_many_arguments)]
async fn pump(
    dispatcher: Arc<Dispatcher>,
    session: Arc<dyn ContinuousPagingSession>,
    options: ContinuousPagingConfig,
    statement: Arc<Statement>,
    permit: AdmissionPermit,
    context: Arc<ExecutionContext>,
    pages: Sender<Result<Page, BulkExecutionError>>,
    cancel: CancellationToken,
) {
    context.start();
    if let Some(listener) = &dispatcher.listener {
        listener.on_read_request_started(&statement, &context);
    }

    let mut driver_pages = session.execute_continuously(statement.clone(), options);
    let mut page_count = 0usize;
    let failure = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break None,
            _ = dispatcher.shutdown.cancelled() => Some(Err(DriverError::Interrupted)),
            next = driver_pages.next() => next,
        };
        match next {
            Some(Ok(page)) => {
                page_count += 1;
                let sent = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    _ = dispatcher.shutdown.cancelled() => break Some(DriverError::Interrupted),
                    sent = pages.send(Ok(page)) => sent,
                };
                if sent.is_err() {
                    break None;
                }
            }
            Some(Err(cause)) => break Some(cause),
            None => break None,
        }
    };
    drop(driver_pages);
    context.stop();
    permit.release();
    trace!(pages = page_count, "continuous read finished");

    match failure {
        None => {
            if let Some(listener) = &dispatcher.listener {
                listener.on_read_request_successful(&statement, &context);
            }
        }
        Some(cause) => {
            let error = BulkExecutionError::new(statement, cause);
            if let Some(listener) = &dispatcher.listener {
                listener.on_read_request_failed(error.statement(), &error, &context);
            }
            // The receiver is gone if the subscription was dropped meanwhile.
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = pages.send(Err(error)) => {}
            }
        }
    }
}
