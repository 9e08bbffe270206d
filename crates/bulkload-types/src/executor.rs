use crate::error::ConfigError;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::thread::available_parallelism;
use std::time::Duration;

/// Default value of [`ExecutorConfig::max_in_flight_requests`].
pub const fn default_max_in_flight_requests() -> Option<u64> {
    Some(1_000)
}

/// Default value of [`ExecutorConfig::max_requests_per_second`].
pub const fn default_max_requests_per_second() -> Option<u64> {
    Some(100_000)
}

const fn default_shutdown_timeout_secs() -> u64 {
    10
}

const fn default_page_size() -> usize {
    5_000
}

const fn default_max_enqueued_pages() -> usize {
    4
}

/// Admission control and scheduling settings of the bulk executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Maximum number of requests that may be in flight at the same time.
    ///
    /// `null` or a negative value removes the limit. Default: 1000.
    #[serde(
        default = "default_max_in_flight_requests",
        deserialize_with = "deserialize_limit"
    )]
    pub max_in_flight_requests: Option<u64>,

    /// Maximum number of requests issued per second.
    ///
    /// `null` or a negative value removes the limit. Default: 100000.
    #[serde(
        default = "default_max_requests_per_second",
        deserialize_with = "deserialize_limit"
    )]
    pub max_requests_per_second: Option<u64>,

    /// When `true`, individual failures are delivered as failed results and
    /// processing continues. When `false` (the default), the first failure
    /// stops the whole operation.
    #[serde(default)]
    pub fail_safe: bool,

    /// Number of worker threads of the executor's runtime.
    ///
    /// Defaults to four times the number of available CPUs.
    #[serde(default)]
    pub worker_threads: Option<usize>,

    /// How long `close` waits for in-flight requests before giving up on them.
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Enables continuous paging for reads when set.
    #[serde(default)]
    pub continuous_paging: Option<ContinuousPagingConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_in_flight_requests: default_max_in_flight_requests(),
            max_requests_per_second: default_max_requests_per_second(),
            fail_safe: false,
            worker_threads: None,
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            continuous_paging: None,
        }
    }
}

impl ExecutorConfig {
    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .saturating_mul(4)
        })
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_in_flight_requests == Some(0) {
            return Err(ConfigError::invalid_value(
                "max_in_flight_requests",
                "must be positive; use a negative value to disable the limit",
            ));
        }
        match self.max_requests_per_second {
            Some(0) => {
                return Err(ConfigError::invalid_value(
                    "max_requests_per_second",
                    "must be positive; use a negative value to disable the limit",
                ))
            }
            Some(n) if n > u32::MAX as u64 => {
                return Err(ConfigError::invalid_value(
                    "max_requests_per_second",
                    format!("must not exceed {}", u32::MAX),
                ))
            }
            _ => {}
        }
        if self.worker_threads == Some(0) {
            return Err(ConfigError::invalid_value(
                "worker_threads",
                "at least one worker thread is required",
            ));
        }
        if let Some(paging) = &self.continuous_paging {
            paging.validate()?;
        }
        Ok(())
    }
}

/// Continuous paging lets the server push pages of a read without waiting
/// for the client to ask for each one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuousPagingConfig {
    /// Number of rows per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum number of pages to receive per request; 0 means unlimited.
    #[serde(default)]
    pub max_pages: usize,

    /// Maximum number of pages the server may push per second; 0 means
    /// unlimited.
    #[serde(default)]
    pub max_pages_per_second: u32,

    /// Maximum number of received pages waiting for the consumer. The
    /// driver is not read from while the queue is full.
    #[serde(default = "default_max_enqueued_pages")]
    pub max_enqueued_pages: usize,
}

impl Default for ContinuousPagingConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: 0,
            max_pages_per_second: 0,
            max_enqueued_pages: default_max_enqueued_pages(),
        }
    }
}

impl ContinuousPagingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::invalid_value(
                "continuous_paging.page_size",
                "must be positive",
            ));
        }
        if self.max_enqueued_pages == 0 {
            return Err(ConfigError::invalid_value(
                "continuous_paging.max_enqueued_pages",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Deserializes an optional limit.
///
/// Accepts `null` or a negative integer as "no limit".
fn deserialize_limit<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    struct LimitVisitor;

    impl<'de> Visitor<'de> for LimitVisitor {
        type Value = Option<u64>;

        fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
            formatter.write_str("an integer, or null")
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(u64::try_from(v).ok())
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(Some(v))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_none<E>(self) -> Result<Self::Value, E>
        where
            E: de::Error,
        {
            Ok(None)
        }

        fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
        where
            D: Deserializer<'de>,
        {
            deserializer.deserialize_any(self)
        }
    }

    deserializer.deserialize_option(LimitVisitor)
}
