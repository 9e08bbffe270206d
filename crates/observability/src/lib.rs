//! Process logging of bulk operations.
//!
//! [`init_logging`] installs the global subscriber once the operation has an
//! execution id. Console events are text prefixed with that id, or JSON
//! objects carrying the workflow and execution id when [`LOG_JSON_ENV`] is
//! set. A plain text copy goes to [`OPERATION_LOG_FILE`] in the execution
//! directory.

mod format;

pub use format::{JsonEventFormat, LogFormat, OperationTag, TextEventFormat, LOG_JSON_ENV};

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// File inside the execution directory that receives a copy of all events.
pub const OPERATION_LOG_FILE: &str = "operation.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot install the process logger: {0}")]
    Init(#[from] TryInitError),
}

/// `RUST_LOG` if set, `info` otherwise.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn open_operation_log(directory: &Path) -> Result<File, LoggingError> {
    let path = directory.join(OPERATION_LOG_FILE);
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::Io { path, source })
}

/// Installs the global subscriber for the operation identified by `tag`.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(
    tag: &OperationTag,
    format: LogFormat,
    execution_directory: Option<&Path>,
) -> Result<(), LoggingError> {
    let console: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .event_format(JsonEventFormat::new(tag.clone()))
            .with_ansi(false)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .event_format(TextEventFormat::new(tag))
            .boxed(),
    };

    let file = match execution_directory {
        Some(directory) => Some(
            tracing_subscriber::fmt::layer()
                .event_format(TextEventFormat::new(tag))
                .with_ansi(false)
                .with_writer(Mutex::new(open_operation_log(directory)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .with(env_filter())
        .try_init()?;
    Ok(())
}
