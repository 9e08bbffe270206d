//! Execution identifiers and directories.

use crate::error::LogError;
use chrono::{DateTime, Utc};
use std::fmt::{self, Display};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Kind of bulk operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkflowType {
    /// Records are read from a source and written to the database.
    Load,
    /// Rows are read from the database and written to a destination.
    Unload,
    /// Rows are read from the database and counted.
    Count,
}

impl Display for WorkflowType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "LOAD",
            Self::Unload => "UNLOAD",
            Self::Count => "COUNT",
        })
    }
}

/// Identifier of an operation started at `started`, e.g.
/// `LOAD_20180309-144101-093338`.
pub fn execution_id(workflow: WorkflowType, started: DateTime<Utc>) -> String {
    format!("{workflow}_{}", started.format("%Y%m%d-%H%M%S-%6f"))
}

pub fn new_execution_id(workflow: WorkflowType) -> String {
    execution_id(workflow, Utc::now())
}

/// Creates `<parent>/<execution_id>` and returns its path.
///
/// An existing path is accepted only if it is an empty, writable directory.
pub fn prepare_execution_directory(
    parent: &Path,
    execution_id: &str,
) -> Result<PathBuf, LogError> {
    let path = parent.join(execution_id);
    let reject = |reason: &str| LogError::ExecutionDirectory {
        path: path.clone(),
        reason: reason.to_string(),
    };

    match fs::metadata(&path) {
        Ok(metadata) => {
            if !metadata.is_dir() {
                return Err(reject("exists but is not a directory"));
            }
            if metadata.permissions().readonly() {
                return Err(reject("exists but is not writable"));
            }
            let mut entries = fs::read_dir(&path).map_err(|e| LogError::io(&path, e))?;
            if entries.next().is_some() {
                return Err(reject("exists but is not empty"));
            }
        }
        Err(_) => {
            fs::create_dir_all(&path).map_err(|e| LogError::io(&path, e))?;
            debug!("created execution directory {}", path.display());
        }
    }
    Ok(path)
}

#[cfg(test)]
mod test {
    use super::{execution_id, prepare_execution_directory, WorkflowType};
    use crate::LogError;
    use chrono::{TimeZone, Utc};
    use std::fs;

    #[test]
    fn id() {
        let started = Utc
            .with_ymd_and_hms(2018, 3, 9, 14, 41, 1)
            .unwrap()
            .checked_add_signed(chrono::Duration::microseconds(93_338))
            .unwrap();
        assert_eq!(
            execution_id(WorkflowType::Load, started),
            "LOAD_20180309-144101-093338"
        );
        assert_eq!(
            execution_id(WorkflowType::Unload, started),
            "UNLOAD_20180309-144101-093338"
        );
    }

    #[test]
    fn directory() {
        let parent = tempfile::tempdir().unwrap();

        let path = prepare_execution_directory(parent.path(), "LOAD_1").unwrap();
        assert!(path.is_dir());

        // Empty directories are reused.
        assert_eq!(
            prepare_execution_directory(parent.path(), "LOAD_1").unwrap(),
            path
        );

        fs::write(path.join("operation.log"), "").unwrap();
        let error = prepare_execution_directory(parent.path(), "LOAD_1").unwrap_err();
        assert!(matches!(error, LogError::ExecutionDirectory { .. }));
        assert!(error.to_string().ends_with("exists but is not empty"));

        fs::write(parent.path().join("LOAD_2"), "").unwrap();
        let error = prepare_execution_directory(parent.path(), "LOAD_2").unwrap_err();
        assert!(error.to_string().ends_with("exists but is not a directory"));
    }
}
