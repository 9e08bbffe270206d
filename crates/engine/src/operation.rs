//! Start and end of one bulk operation.

use crate::error::LogError;
use crate::execution::{new_execution_id, prepare_execution_directory, WorkflowType};
use crate::log::LogManager;
use crate::status::ExitStatus;
use bulkload_observability::{init_logging, LogFormat, OperationTag};
use bulkload_types::LogConfig;
use std::path::Path;
use tracing::{error, info};

/// A running operation: its execution id, its execution directory under
/// `log.directory`, and the [`LogManager`] writing there.
pub struct Operation {
    execution_id: String,
    log_manager: LogManager,
}

impl Operation {
    /// Creates the execution directory and installs process logging, with
    /// console output in `format` and a copy of every event in the
    /// directory's `operation.log`.
    ///
    /// Fails if the directory cannot be used or if process logging is
    /// already installed.
    pub fn start(
        workflow: WorkflowType,
        config: &LogConfig,
        format: LogFormat,
    ) -> Result<Self, LogError> {
        let execution_id = new_execution_id(workflow);
        let directory = prepare_execution_directory(&config.directory, &execution_id)?;
        let tag = OperationTag::new(workflow.to_string(), &execution_id);
        init_logging(&tag, format, Some(&directory))?;
        info!("{workflow} operation {execution_id} started");

        Ok(Self {
            log_manager: LogManager::from_config(workflow, directory, config),
            execution_id,
        })
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn workflow(&self) -> WorkflowType {
        self.log_manager.workflow()
    }

    pub fn execution_directory(&self) -> &Path {
        self.log_manager.execution_directory()
    }

    pub fn log_manager(&self) -> &LogManager {
        &self.log_manager
    }

    /// Closes the log manager and reports how the operation ended.
    ///
    /// The log manager is closed even when `outcome` is a failure. A close
    /// failure only replaces a successful outcome.
    pub fn finish(self, outcome: Result<(), LogError>) -> ExitStatus {
        let closed = self.log_manager.close();
        let outcome = outcome.and(closed);
        let status = ExitStatus::of(&outcome, self.log_manager.error_count());
        match &outcome {
            Ok(()) => info!(
                "{} operation {} finished: {status}",
                self.workflow(),
                self.execution_id
            ),
            Err(error) => error!(
                "{} operation {} aborted: {status}: {error}",
                self.workflow(),
                self.execution_id
            ),
        }
        status
    }
}
