use std::path::PathBuf;
use thiserror::Error;

/// Error reported when a configuration document cannot be loaded or
/// contains values outside the accepted range.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// `max_errors` is neither a count nor a percentage in `(0, 100)`.
    #[error("maxErrors must either be a number, or percentage between 0 and 100 exclusive.")]
    InvalidMaxErrors { value: String },

    /// A numeric or enumerated setting has an unusable value.
    #[error("invalid value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },

    /// The document is not valid YAML, or does not match the schema.
    #[error("error parsing configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The configuration file could not be read.
    #[error("error reading configuration file '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    pub fn invalid_value(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}
