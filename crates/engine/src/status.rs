use crate::error::LogError;
use std::fmt::{self, Display};
use std::process::ExitCode;

/// Outcome of a job, as reported to the shell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Every item was processed successfully.
    Ok,
    /// The job finished, but some items failed.
    CompletedWithErrors,
    /// The error budget was exhausted.
    AbortedTooManyErrors,
    /// The job was stopped by an unrecoverable error.
    AbortedFatalError,
}

impl ExitStatus {
    /// Status of a job that ended with `outcome` after `errors` failures
    /// were logged.
    pub fn of(outcome: &Result<(), LogError>, errors: u64) -> Self {
        match outcome {
            Ok(()) if errors == 0 => Self::Ok,
            Ok(()) => Self::CompletedWithErrors,
            Err(LogError::TooManyErrors(_)) => Self::AbortedTooManyErrors,
            Err(_) => Self::AbortedFatalError,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::CompletedWithErrors => 1,
            Self::AbortedTooManyErrors => 2,
            Self::AbortedFatalError => 3,
        }
    }
}

impl Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "STATUS_OK",
            Self::CompletedWithErrors => "STATUS_COMPLETED_WITH_ERRORS",
            Self::AbortedTooManyErrors => "STATUS_ABORTED_TOO_MANY_ERRORS",
            Self::AbortedFatalError => "STATUS_ABORTED_FATAL_ERROR",
        })
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}
