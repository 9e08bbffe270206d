//! Outcomes of statement execution.

use crate::error::BulkExecutionError;
use crate::statement::Statement;
use serde_json::Value;
use std::sync::Arc;

/// Information about a successful request, as reported by the driver.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionInfo {
    /// Coordinator that served the request.
    pub host: Option<String>,
    /// Number of times the request was sent, including retries.
    pub attempts: u32,
    /// Warnings returned by the server.
    pub warnings: Vec<String>,
}

/// One row returned by a read.
#[derive(Clone, Debug, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }
}

/// Accessors shared by [`WriteResult`] and [`ReadResult`].
pub trait BulkResult {
    /// The statement that was executed.
    fn statement(&self) -> &Arc<Statement>;

    /// Execution info of a successful result.
    fn execution_info(&self) -> Option<&ExecutionInfo>;

    /// The error of a failed result.
    fn error(&self) -> Option<&BulkExecutionError>;

    fn is_success(&self) -> bool {
        self.error().is_none()
    }
}

/// Outcome of a write.
#[derive(Clone, Debug)]
pub enum WriteResult {
    Success {
        statement: Arc<Statement>,
        info: Arc<ExecutionInfo>,
    },
    Failure(BulkExecutionError),
}

impl BulkResult for WriteResult {
    fn statement(&self) -> &Arc<Statement> {
        match self {
            Self::Success { statement, .. } => statement,
            Self::Failure(error) => error.statement(),
        }
    }

    fn execution_info(&self) -> Option<&ExecutionInfo> {
        match self {
            Self::Success { info, .. } => Some(info),
            Self::Failure(_) => None,
        }
    }

    fn error(&self) -> Option<&BulkExecutionError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(error) => Some(error),
        }
    }
}

/// Outcome of a read: one result per returned row, or a single failure.
#[derive(Clone, Debug)]
pub enum ReadResult {
    Success {
        statement: Arc<Statement>,
        info: Arc<ExecutionInfo>,
        row: Row,
    },
    Failure(BulkExecutionError),
}

impl ReadResult {
    pub fn row(&self) -> Option<&Row> {
        match self {
            Self::Success { row, .. } => Some(row),
            Self::Failure(_) => None,
        }
    }
}

impl BulkResult for ReadResult {
    fn statement(&self) -> &Arc<Statement> {
        match self {
            Self::Success { statement, .. } => statement,
            Self::Failure(error) => error.statement(),
        }
    }

    fn execution_info(&self) -> Option<&ExecutionInfo> {
        match self {
            Self::Success { info, .. } => Some(info),
            Self::Failure(_) => None,
        }
    }

    fn error(&self) -> Option<&BulkExecutionError> {
        match self {
            Self::Success { .. } => None,
            Self::Failure(error) => Some(error),
        }
    }
}
