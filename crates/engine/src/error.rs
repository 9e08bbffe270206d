use bulkload_executor::BulkExecutionError;
use bulkload_observability::LoggingError;
use bulkload_types::log::format_percentage;
use bulkload_types::ErrorBudget;
use std::fmt::{self, Display};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Terminal error of a job.
#[derive(Debug, Error)]
pub enum LogError {
    #[error(transparent)]
    TooManyErrors(#[from] TooManyErrors),

    /// A request failed for a reason unrelated to the statement itself.
    #[error("{}", .0.cause())]
    Fatal(#[source] BulkExecutionError),

    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Execution directory '{}' {reason}", .path.display())]
    ExecutionDirectory { path: PathBuf, reason: String },

    #[error(transparent)]
    Logging(#[from] LoggingError),
}

impl LogError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn is_too_many_errors(&self) -> bool {
        matches!(self, Self::TooManyErrors(_))
    }
}

/// The job's error budget was exhausted.
#[derive(Debug, Clone, PartialEq, Error)]
pub struct TooManyErrors {
    pub budget: ErrorBudget,
    /// Failures observed when the budget was exceeded.
    pub errors: u64,
    /// Items processed when the budget was exceeded.
    pub total_items: u64,
}

impl TooManyErrors {
    pub fn max_errors(&self) -> Option<u64> {
        match self.budget {
            ErrorBudget::Count { max } => Some(max),
            _ => None,
        }
    }

    pub fn max_error_ratio(&self) -> Option<f64> {
        match self.budget {
            ErrorBudget::Ratio { ratio, .. } => Some(ratio),
            _ => None,
        }
    }
}

impl Display for TooManyErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.budget {
            ErrorBudget::Count { max } => {
                write!(f, "Too many errors, the maximum allowed is {max}.")
            }
            ErrorBudget::Ratio { ratio, .. } => write!(
                f,
                "Too many errors, the maximum percentage allowed is {}%.",
                format_percentage(ratio)
            ),
            ErrorBudget::Unlimited => write!(f, "Too many errors."),
        }
    }
}
