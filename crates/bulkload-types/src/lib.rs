//! Configuration types shared by the bulkload crates.
//!
//! Every configuration struct can be deserialized from YAML or JSON and
//! carries defaults matching the engine's out-of-the-box behavior, so an
//! empty document yields a usable [`BulkLoadConfig`].

pub mod batch;
pub mod config;
pub mod error;
pub mod executor;
pub mod log;

pub use batch::{BatchConfig, BatchMode, BatchType};
pub use config::BulkLoadConfig;
pub use error::ConfigError;
pub use executor::{ContinuousPagingConfig, ExecutorConfig};
pub use log::{ErrorBudget, LogConfig, MaxErrors, StatementFormatConfig, StatementVerbosity};
