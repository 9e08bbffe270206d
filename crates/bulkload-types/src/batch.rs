use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Default value of [`BatchConfig::max_batch_size`].
pub const fn default_max_batch_size() -> usize {
    32
}

/// How statements are grouped into batches.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchMode {
    /// Statements are never batched.
    Disabled,

    /// Statements sharing the same partition routing key are batched together.
    #[default]
    PartitionKey,

    /// Statements whose partitions are owned by the same replica set are
    /// batched together. Statements for which no replica can be determined
    /// fall back to their routing key.
    ReplicaSet,
}

/// Server-side semantics of a batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchType {
    Logged,
    #[default]
    Unlogged,
    Counter,
}

/// Statement batching settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub mode: BatchMode,

    /// Maximum number of child statements per batch. Default: 32.
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Set when the input is known to arrive grouped by key. Sorted batching
    /// only buffers the current group, unsorted batching buffers one group
    /// per key.
    #[serde(default)]
    pub sorted: bool,

    #[serde(default)]
    pub batch_type: BatchType,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            mode: BatchMode::default(),
            max_batch_size: default_max_batch_size(),
            sorted: false,
            batch_type: BatchType::default(),
        }
    }
}

impl BatchConfig {
    pub fn is_enabled(&self) -> bool {
        self.mode != BatchMode::Disabled
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::invalid_value(
                "batch.max_batch_size",
                "must be positive",
            ));
        }
        Ok(())
    }
}
