//! Pool set configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Configuration for a set of native pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of native pools in the set.
    pub max_pools: u32,

    /// Maximum physical connections held by each native pool.
    pub connections_per_pool: u32,

    /// Lease count at which a connected pool stops being preferred.
    pub saturation_threshold: u32,

    /// Time allowed to establish a connection or check one out.
    pub connection_timeout: Duration,

    /// Time allowed for a single request (prepare, execute, unprepare).
    pub request_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pools: 1,
            connections_per_pool: 10,
            saturation_threshold: 5,
            connection_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of native pools.
    #[must_use]
    pub fn max_pools(mut self, count: u32) -> Self {
        self.max_pools = count;
        self
    }

    /// Set the per-pool connection cap.
    #[must_use]
    pub fn connections_per_pool(mut self, count: u32) -> Self {
        self.connections_per_pool = count;
        self
    }

    /// Set the saturation threshold.
    #[must_use]
    pub fn saturation_threshold(mut self, leases: u32) -> Self {
        self.saturation_threshold = leases;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_pools == 0 {
            return Err(PoolError::Configuration(
                "max_pools must be greater than 0".into(),
            ));
        }

        if self.connections_per_pool == 0 {
            return Err(PoolError::Configuration(
                "connections_per_pool must be greater than 0".into(),
            ));
        }

        if self.saturation_threshold == 0 {
            return Err(PoolError::Configuration(
                "saturation_threshold must be greater than 0".into(),
            ));
        }

        if self.connection_timeout.is_zero() || self.request_timeout.is_zero() {
            return Err(PoolError::Configuration(
                "timeouts must be non-zero".into(),
            ));
        }

        Ok(())
    }
}
