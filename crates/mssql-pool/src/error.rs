//! Pool error types.

use thiserror::Error;

use crate::native::NativeError;

/// Errors raised by the pool set.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The pool set has been closed.
    #[error("pool set is closed")]
    Closed,

    /// No pool could accept another lease.
    #[error("no pool available ({pools} pools, none connected)")]
    Exhausted {
        /// Number of pools in the set.
        pools: usize,
    },

    /// Bringing a native pool up failed.
    #[error("pool {index} failed to connect: {source}")]
    Connect {
        /// Pool position in the set.
        index: usize,
        /// Underlying native error.
        #[source]
        source: NativeError,
    },

    /// The lease does not belong to this pool set.
    #[error("lease belongs to a different pool set")]
    ForeignLease,

    /// The lease was already returned.
    #[error("lease already released")]
    AlreadyReleased,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Result type for pool operations.
pub type Result<T> = std::result::Result<T, PoolError>;
