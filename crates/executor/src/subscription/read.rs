use super::Dispatcher;
use crate::admission::AdmissionPermit;
use crate::error::{BulkExecutionError, DriverError};
use crate::listener::ExecutionContext;
use crate::result::{ExecutionInfo, ReadResult, Row};
use crate::session::{Page, PagingState};
use crate::statement::Statement;
use futures::future::BoxFuture;
use futures::{ready, Stream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::vec;
use tokio::task::JoinHandle;
use tracing::trace;

type PageOutcome = (Result<Page, BulkExecutionError>, Arc<ExecutionContext>);

enum ReadState {
    Idle,
    Acquiring(BoxFuture<'static, AdmissionPermit>),
    Requesting(JoinHandle<PageOutcome>),
    Delivering {
        rows: vec::IntoIter<Row>,
        info: Arc<ExecutionInfo>,
        context: Arc<ExecutionContext>,
        paging_state: Option<PagingState>,
    },
    Terminated,
}

/// Stream yielding one result per row of a paged read.
///
/// Rows of a page are handed out one per poll. The next page is only
/// requested once the current one is exhausted and the consumer polls again;
/// continuation pages do not go through admission control.
pub(crate) struct ReadSubscription {
    dispatcher: Arc<Dispatcher>,
    statement: Arc<Statement>,
    state: ReadState,
}

impl ReadSubscription {
    pub fn new(dispatcher: Arc<Dispatcher>, statement: Arc<Statement>) -> Self {
        Self {
            dispatcher,
            statement,
            state: ReadState::Idle,
        }
    }

    fn interrupted(&self) -> ReadResult {
        ReadResult::Failure(BulkExecutionError::new(
            self.statement.clone(),
            DriverError::Interrupted,
        ))
    }

    fn fetch(
        &self,
        paging_state: Option<PagingState>,
        permit: Option<AdmissionPermit>,
    ) -> ReadState {
        let task = fetch_page(
            self.dispatcher.clone(),
            self.statement.clone(),
            paging_state,
            permit,
        );
        ReadState::Requesting(self.dispatcher.spawn(task))
    }
}

impl Stream for ReadSubscription {
    type Item = Result<ReadResult, BulkExecutionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                ReadState::Idle => {
                    if this.dispatcher.is_shut_down() {
                        this.state = ReadState::Terminated;
                        let result = this.interrupted();
                        return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                    }
                    this.state = ReadState::Acquiring(this.dispatcher.acquire());
                }
                ReadState::Acquiring(admission) => {
                    let permit = ready!(admission.as_mut().poll(cx));
                    this.state = this.fetch(None, Some(permit));
                }
                ReadState::Requesting(request) => match ready!(Pin::new(request).poll(cx)) {
                    Ok((Ok(page), context)) => {
                        this.state = ReadState::Delivering {
                            rows: page.rows.into_iter(),
                            info: Arc::new(page.info),
                            context,
                            paging_state: page.paging_state,
                        };
                    }
                    Ok((Err(error), _)) => {
                        this.state = ReadState::Terminated;
                        let result = ReadResult::Failure(error);
                        return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                    }
                    Err(error) => {
                        trace!("read request task failed: {error}");
                        this.state = ReadState::Terminated;
                        let result = this.interrupted();
                        return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                    }
                },
                ReadState::Delivering {
                    rows,
                    info,
                    context,
                    paging_state,
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
                    match paging_state.take() {
                        Some(paging_state) if !this.dispatcher.is_shut_down() => {
                            this.state = this.fetch(Some(paging_state), None);
                        }
                        Some(_) => {
                            this.state = ReadState::Terminated;
                            let result = this.interrupted();
                            return Poll::Ready(Some(this.dispatcher.deliver_read(result)));
                        }
                        None => {
                            this.state = ReadState::Terminated;
                            return Poll::Ready(None);
                        }
                    }
                }
                ReadState::Terminated => return Poll::Ready(None),
            }
        }
    }
}

/// Fetches one page. Each page is a separate request from the listener's
/// point of view, with its own context.
async fn fetch_page(
    dispatcher: Arc<Dispatcher>,
    statement: Arc<Statement>,
    paging_state: Option<PagingState>,
    permit: Option<AdmissionPermit>,
) -> PageOutcome {
    let context = Arc::new(ExecutionContext::new());
    context.start();
    if let Some(listener) = &dispatcher.listener {
        listener.on_read_request_started(&statement, &context);
    }

    let outcome = dispatcher
        .guarded(dispatcher.session.execute(statement.clone(), paging_state))
        .await;
    context.stop();
    drop(permit);

    let outcome = match outcome {
        Ok(page) => {
            if let Some(listener) = &dispatcher.listener {
                listener.on_read_request_successful(&statement, &context);
            }
            Ok(page)
        }
        Err(cause) => {
            let error = BulkExecutionError::new(statement, cause);
            if let Some(listener) = &dispatcher.listener {
                listener.on_read_request_failed(error.statement(), &error, &context);
            }
            Err(error)
        }
    };
    (outcome, context)
}
