use super::Dispatcher;
use crate::admission::AdmissionPermit;
use crate::error::{BulkExecutionError, DriverError};
use crate::listener::ExecutionContext;
use crate::result::WriteResult;
use crate::statement::Statement;
use futures::future::BoxFuture;
use futures::{ready, Stream};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::task::JoinHandle;
use tracing::trace;

enum WriteState {
    Idle,
    Acquiring(BoxFuture<'static, AdmissionPermit>),
    Requesting(JoinHandle<WriteResult>),
    Terminated,
}

/// Stream yielding the single result of a write.
pub(crate) struct WriteSubscription {
    dispatcher: Arc<Dispatcher>,
    statement: Arc<Statement>,
    state: WriteState,
}

impl WriteSubscription {
    pub fn new(dispatcher: Arc<Dispatcher>, statement: Arc<Statement>) -> Self {
        Self {
            dispatcher,
            statement,
            state: WriteState::Idle,
        }
    }

    fn interrupted(&self) -> WriteResult {
        WriteResult::Failure(BulkExecutionError::new(
            self.statement.clone(),
            DriverError::Interrupted,
        ))
    }
}

impl Stream for WriteSubscription {
    type Item = Result<WriteResult, BulkExecutionError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                WriteState::Idle => {
                    if this.dispatcher.is_shut_down() {
                        this.state = WriteState::Terminated;
                        let result = this.interrupted();
                        return Poll::Ready(Some(this.dispatcher.deliver_write(result)));
                    }
                    this.state = WriteState::Acquiring(this.dispatcher.acquire());
                }
                WriteState::Acquiring(admission) => {
                    let permit = ready!(admission.as_mut().poll(cx));
                    let task = execute(this.dispatcher.clone(), this.statement.clone(), permit);
                    this.state = WriteState::Requesting(this.dispatcher.spawn(task));
                }
                WriteState::Requesting(request) => {
                    let result = match ready!(Pin::new(request).poll(cx)) {
                        Ok(result) => result,
                        Err(error) => {
                            trace!("write request task failed: {error}");
                            this.interrupted()
                        }
                    };
                    this.state = WriteState::Terminated;
                    return Poll::Ready(Some(this.dispatcher.deliver_write(result)));
                }
                WriteState::Terminated => return Poll::Ready(None),
            }
        }
    }
}

async fn execute(
    dispatcher: Arc<Dispatcher>,
    statement: Arc<Statement>,
    permit: AdmissionPermit,
) -> WriteResult {
    let context = ExecutionContext::new();
    context.start();
    if let Some(listener) = &dispatcher.listener {
        listener.on_write_request_started(&statement, &context);
    }

    let outcome = dispatcher
        .guarded(dispatcher.session.execute(statement.clone(), None))
        .await;
    context.stop();
    permit.release();

    match outcome {
        Ok(page) => {
            if let Some(listener) = &dispatcher.listener {
                listener.on_write_request_successful(&statement, &context);
            }
            WriteResult::Success {
                statement,
                info: Arc::new(page.info),
            }
        }
        Err(cause) => {
            let error = BulkExecutionError::new(statement, cause);
            if let Some(listener) = &dispatcher.listener {
                listener.on_write_request_failed(error.statement(), &error, &context);
            }
            WriteResult::Failure(error)
        }
    }
}
