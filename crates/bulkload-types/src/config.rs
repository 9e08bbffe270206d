use crate::batch::BatchConfig;
use crate::error::ConfigError;
use crate::executor::ExecutorConfig;
use crate::log::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete configuration of a bulk load or unload job.
///
/// Every section is optional; missing sections take their defaults.
///
/// ```yaml
/// executor:
///   max_in_flight_requests: 500
///   fail_safe: true
/// batch:
///   mode: replica_set
///   max_batch_size: 16
/// log:
///   directory: /var/log/bulkload
///   max_errors: "1%"
/// ```
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkLoadConfig {
    #[serde(default)]
    pub executor: ExecutorConfig,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub log: LogConfig,
}

impl BulkLoadConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.executor.validate()?;
        self.batch.validate()?;
        self.log.validate()
    }
}
