//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building or using a pool.
///
/// Errors raised by the caller's own work closure are never wrapped in this
/// type. [`Pool::hold`](crate::Pool::hold) is generic over the caller's error
/// type and converts pool failures into it through `From<PoolError>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The resource factory returned no resource.
    ///
    /// This indicates a misconfigured factory and is never retried.
    #[error("resource factory returned no resource")]
    InvalidFactoryResult,

    /// No resource was free and the pool is configured not to wait.
    #[error("no resource available")]
    ResourceNotAvailable,

    /// No resource became free before the pool timeout elapsed.
    #[error("timed out after {waited:?} waiting for a pooled resource")]
    PoolTimeout {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    /// Invalid pool configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PoolError {
    /// Check if this error is a wait timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::PoolTimeout { .. })
    }

    /// Check if the operation may succeed when attempted again later.
    ///
    /// Capacity failures are transient. Factory and configuration failures
    /// indicate a setup problem and are not.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceNotAvailable | Self::PoolTimeout { .. })
    }
}
