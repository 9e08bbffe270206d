use crate::error::ConfigError;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

fn default_directory() -> PathBuf {
    PathBuf::from("./logs")
}

const fn default_max_errors() -> MaxErrors {
    MaxErrors::Count(100)
}

const fn default_min_sample() -> u64 {
    100
}

const fn default_max_query_string_length() -> usize {
    500
}

const fn default_max_bound_value_length() -> usize {
    50
}

const fn default_max_bound_values() -> usize {
    50
}

const fn default_max_inner_statements() -> usize {
    10
}

/// Failure accounting and error log settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Parent directory of per-execution log directories.
    #[serde(default = "default_directory")]
    pub directory: PathBuf,

    /// Maximum tolerated failures before the job is aborted.
    ///
    /// Either an absolute count (`100`), a percentage of processed items
    /// (`"2%"`), or a negative number to disable the limit.
    #[serde(default = "default_max_errors")]
    pub max_errors: MaxErrors,

    /// Minimum number of processed items before a percentage limit is
    /// evaluated. Ignored for absolute limits.
    #[serde(default = "default_min_sample")]
    pub min_sample: u64,

    /// How statements are rendered in error logs.
    #[serde(default)]
    pub stmt: StatementFormatConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            max_errors: default_max_errors(),
            min_sample: default_min_sample(),
            stmt: StatementFormatConfig::default(),
        }
    }
}

impl LogConfig {
    pub fn error_budget(&self) -> ErrorBudget {
        match self.max_errors {
            MaxErrors::Unlimited => ErrorBudget::Unlimited,
            MaxErrors::Count(max) => ErrorBudget::Count { max },
            MaxErrors::Ratio(ratio) => ErrorBudget::Ratio {
                ratio,
                min_sample: self.min_sample,
            },
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let MaxErrors::Ratio(ratio) = self.max_errors {
            if !(ratio > 0.0 && ratio < 1.0) {
                return Err(ConfigError::InvalidMaxErrors {
                    value: self.max_errors.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// The `max_errors` setting as written by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MaxErrors {
    Unlimited,
    Count(u64),
    /// Fraction of processed items, strictly between 0 and 1.
    Ratio(f64),
}

impl FromStr for MaxErrors {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidMaxErrors {
            value: s.to_string(),
        };
        let trimmed = s.trim();
        if let Some(percent) = trimmed.strip_suffix('%') {
            let percent: f64 = percent.trim().parse().map_err(|_| invalid())?;
            let ratio = percent / 100.0;
            if ratio > 0.0 && ratio < 1.0 {
                Ok(Self::Ratio(ratio))
            } else {
                Err(invalid())
            }
        } else {
            let count: i64 = trimmed.parse().map_err(|_| invalid())?;
            Ok(Self::from_count(count))
        }
    }
}

impl MaxErrors {
    fn from_count(count: i64) -> Self {
        u64::try_from(count)
            .map(Self::Count)
            .unwrap_or(Self::Unlimited)
    }
}

impl fmt::Display for MaxErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "-1"),
            Self::Count(n) => write!(f, "{n}"),
            Self::Ratio(ratio) => write!(f, "{}%", format_percentage(*ratio)),
        }
    }
}

impl Serialize for MaxErrors {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Unlimited => serializer.serialize_i64(-1),
            Self::Count(n) => serializer.serialize_u64(*n),
            Self::Ratio(_) => serializer.serialize_str(&self.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for MaxErrors {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct MaxErrorsVisitor;

        impl Visitor<'_> for MaxErrorsVisitor {
            type Value = MaxErrors;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("an integer or a percentage such as \"2%\"")
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MaxErrors::from_count(v))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(MaxErrors::Count(v))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                v.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(MaxErrorsVisitor)
    }
}

/// Active failure budget of one job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ErrorBudget {
    Unlimited,
    /// Abort once more than `max` failures have been observed.
    Count { max: u64 },
    /// Abort once `failures / total > ratio`, evaluated only after at least
    /// `min_sample` items have been processed.
    Ratio { ratio: f64, min_sample: u64 },
}

/// Renders a ratio as a percentage with at least one decimal digit
/// (`0.01` becomes `1.0`).
pub fn format_percentage(ratio: f64) -> String {
    let percent = (ratio * 100.0 * 1e9).round() / 1e9;
    format!("{percent:?}")
}

/// Amount of detail used when printing statements.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementVerbosity {
    /// Query text only.
    Abridged,
    /// Query text and bound values.
    #[default]
    Normal,
    /// Query text, bound values, and statement metadata such as the routing
    /// key and the batch type.
    Extended,
}

/// Limits applied when printing statements to error logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementFormatConfig {
    #[serde(default)]
    pub level: StatementVerbosity,

    /// Longer query strings are truncated.
    #[serde(default = "default_max_query_string_length")]
    pub max_query_string_length: usize,

    /// Each bound value is truncated to this many characters.
    #[serde(default = "default_max_bound_value_length")]
    pub max_bound_value_length: usize,

    /// At most this many bound values are printed per statement.
    #[serde(default = "default_max_bound_values")]
    pub max_bound_values: usize,

    /// At most this many children are printed per batch.
    #[serde(default = "default_max_inner_statements")]
    pub max_inner_statements: usize,
}

impl Default for StatementFormatConfig {
    fn default() -> Self {
        Self {
            level: StatementVerbosity::default(),
            max_query_string_length: default_max_query_string_length(),
            max_bound_value_length: default_max_bound_value_length(),
            max_bound_values: default_max_bound_values(),
            max_inner_statements: default_max_inner_statements(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{format_percentage, ErrorBudget, LogConfig, MaxErrors};
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_max_errors() {
        assert_eq!("20".parse::<MaxErrors>().unwrap(), MaxErrors::Count(20));
        assert_eq!("0".parse::<MaxErrors>().unwrap(), MaxErrors::Count(0));
        assert_eq!("-1".parse::<MaxErrors>().unwrap(), MaxErrors::Unlimited);
        assert_eq!("1%".parse::<MaxErrors>().unwrap(), MaxErrors::Ratio(0.01));
        assert_eq!(" 50 % ".parse::<MaxErrors>().unwrap(), MaxErrors::Ratio(0.5));

        for invalid in ["0%", "100%", "120%", "abc", "1.5"] {
            let err = invalid.parse::<MaxErrors>().unwrap_err();
            assert_eq!(
                err.to_string(),
                "maxErrors must either be a number, or percentage between 0 and 100 exclusive."
            );
        }
    }

    #[test]
    fn deserialize_max_errors() {
        let config: LogConfig = serde_json::from_str(r#"{"max_errors": "2%"}"#).unwrap();
        assert_eq!(
            config.error_budget(),
            ErrorBudget::Ratio {
                ratio: 0.02,
                min_sample: 100
            }
        );

        let config: LogConfig = serde_json::from_str(r#"{"max_errors": 5}"#).unwrap();
        assert_eq!(config.error_budget(), ErrorBudget::Count { max: 5 });

        let config: LogConfig = serde_json::from_str(r#"{"max_errors": -1}"#).unwrap();
        assert_eq!(config.error_budget(), ErrorBudget::Unlimited);

        assert!(serde_json::from_str::<LogConfig>(r#"{"max_errors": "100%"}"#).is_err());
    }

    #[test]
    fn defaults() {
        let config: LogConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, LogConfig::default());
        assert_eq!(config.error_budget(), ErrorBudget::Count { max: 100 });
        assert_eq!(config.stmt.max_query_string_length, 500);
        assert_eq!(config.stmt.max_inner_statements, 10);
    }

    #[test]
    fn percentages() {
        assert_eq!(format_percentage(0.01), "1.0");
        assert_eq!(format_percentage(0.025), "2.5");
        assert_eq!(MaxErrors::Ratio(0.1).to_string(), "10.0%");
    }
}
