//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum number of resources that may exist at once (default: 4).
    pub max_size: usize,

    /// How long [`Pool::hold`](crate::Pool::hold) waits for a free resource
    /// (default: 2 seconds).
    ///
    /// Zero means fail immediately when nothing is free.
    pub pool_timeout: Duration,

    /// Polling interval while waiting for a free resource (default: 1 ms).
    pub pool_sleep_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 4,
            pool_timeout: Duration::from_secs(2),
            pool_sleep_interval: Duration::from_millis(1),
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `;`-separated option string into configuration.
    ///
    /// Durations are given in (fractional) seconds:
    /// ```text
    /// max_size=8;pool_timeout=0.5;pool_sleep_interval=0.002
    /// ```
    pub fn from_options_string(options: &str) -> Result<Self, PoolError> {
        let mut config = Self::default();

        for part in options.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Config(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "max_size" | "size" | "max" => {
                    config.max_size = value
                        .parse()
                        .map_err(|_| PoolError::Config(format!("invalid max_size: {value}")))?;
                }
                "pool_timeout" | "timeout" => {
                    config.pool_timeout = parse_seconds(value)?;
                }
                "pool_sleep_interval" | "pool_sleep_time" | "sleep" => {
                    config.pool_sleep_interval = parse_seconds(value)?;
                }
                _ => {
                    tracing::debug!(key = key, value = value, "ignoring unknown pool option");
                }
            }
        }

        Ok(config)
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn max_size(mut self, size: usize) -> Self {
        self.max_size = size;
        self
    }

    /// Set the wait timeout.
    #[must_use]
    pub fn pool_timeout(mut self, timeout: Duration) -> Self {
        self.pool_timeout = timeout;
        self
    }

    /// Set the polling interval used while waiting.
    #[must_use]
    pub fn pool_sleep_interval(mut self, interval: Duration) -> Self {
        self.pool_sleep_interval = interval;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_size == 0 {
            return Err(PoolError::Config("max_size must be at least 1".into()));
        }

        if !self.pool_timeout.is_zero() && self.pool_sleep_interval.is_zero() {
            return Err(PoolError::Config(
                "pool_sleep_interval must be non-zero when pool_timeout is set".into(),
            ));
        }

        Ok(())
    }
}

fn parse_seconds(value: &str) -> Result<Duration, PoolError> {
    value
        .parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| PoolError::Config(format!("invalid duration: {value}")))
}
