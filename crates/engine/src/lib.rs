//! Failure accounting for bulk operations.
//!
//! The [`LogManager`] sits downstream of the executor and of the connector
//! and mapping layers. It persists every failure to per-category files in
//! the operation's execution directory, aborts the job once the configured
//! error budget is exhausted, and records which source positions were
//! processed so that an interrupted load can be resumed.

mod error;
mod execution;
mod log;
mod operation;
mod record;
mod status;

pub use error::{LogError, TooManyErrors};
pub use execution::{execution_id, new_execution_id, prepare_execution_directory, WorkflowType};
pub use log::positions::{add_position, merge_positions, PositionSet};
pub use log::statement::{format_single_line, FormattedStatement, StatementFormatter};
pub use log::{Category, LogManager};
pub use operation::Operation;
pub use record::{ErrorRecord, UnmappableRow, UnmappableStatement};
pub use status::ExitStatus;
