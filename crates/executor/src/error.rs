use crate::statement::Statement;
use bulkload_types::ConfigError;
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by the database driver for one request.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DriverError {
    /// The coordinator did not reply within the client-side timeout.
    #[error("{0}")]
    OperationTimedOut(String),

    /// Not enough replicas were alive to satisfy the consistency level.
    #[error("{0}")]
    Unavailable(String),

    /// Replicas failed to acknowledge a write in time.
    #[error("{0}")]
    WriteTimeout(String),

    /// Replicas failed to answer a read in time.
    #[error("{0}")]
    ReadTimeout(String),

    /// The server rejected the query.
    #[error("{0}")]
    InvalidQuery(String),

    /// The coordinator is overloaded and refused the request.
    #[error("{0}")]
    Overloaded(String),

    /// The request was abandoned before it completed, e.g. because the
    /// executor shut down.
    #[error("request interrupted")]
    Interrupted,

    /// The driver or the server violated the protocol. Unlike other variants
    /// this does not concern the statement itself and must never be counted
    /// as an ordinary per-item failure.
    #[error("{0}")]
    Internal(String),
}

impl DriverError {
    /// Returns `true` for failures that must stop the job regardless of the
    /// configured error budget.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// Name of the variant, used when printing cause chains.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OperationTimedOut(_) => "OperationTimedOut",
            Self::Unavailable(_) => "Unavailable",
            Self::WriteTimeout(_) => "WriteTimeout",
            Self::ReadTimeout(_) => "ReadTimeout",
            Self::InvalidQuery(_) => "InvalidQuery",
            Self::Overloaded(_) => "Overloaded",
            Self::Interrupted => "Interrupted",
            Self::Internal(_) => "Internal",
        }
    }
}

/// Execution of a statement failed.
///
/// For a batch, the failure applies to every child statement.
#[derive(Clone, Debug, Error)]
#[error("Statement execution failed: {statement} ({source})")]
pub struct BulkExecutionError {
    statement: Arc<Statement>,
    source: DriverError,
}

impl BulkExecutionError {
    pub fn new(statement: Arc<Statement>, source: DriverError) -> Self {
        Self { statement, source }
    }

    pub fn statement(&self) -> &Arc<Statement> {
        &self.statement
    }

    pub fn cause(&self) -> &DriverError {
        &self.source
    }

    pub fn is_unrecoverable(&self) -> bool {
        self.source.is_unrecoverable()
    }
}

/// Error constructing a [`BulkExecutor`](crate::BulkExecutor).
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The worker runtime could not be started.
    #[error("error starting executor runtime: {0}")]
    Runtime(#[source] std::io::Error),
}
