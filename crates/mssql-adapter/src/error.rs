//! Adapter error types.

use std::fmt;

use mssql_adapter_pool::{NativeError, NativeErrorKind, PoolError};
use thiserror::Error;

/// Errors raised while binding values to a statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BindError {
    /// A statement column is missing from the schema catalog.
    #[error("{column} does not exist in table {table}, check your model")]
    UnknownColumn {
        /// Table the statement targets.
        table: String,
        /// Missing column.
        column: String,
    },

    /// A value is wider than its column allows.
    #[error("column {column} is too large for this value, the authorized length is {limit} (got {actual})")]
    ValueTooLarge {
        /// Column the value is bound to.
        column: String,
        /// Declared length plus wildcard allowance.
        limit: u64,
        /// Actual value width.
        actual: usize,
    },
}

/// Errors raised while building SQL from a JSON statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum BuildError {
    /// The statement is not valid.
    #[error("malformed statement: {0}")]
    Malformed(String),

    /// The statement uses a feature the builder does not implement.
    #[error("unsupported statement feature: {0}")]
    NotSupported(String),
}

/// Errors returned by the adapter.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// Invalid configuration or statement.
    #[error("malformed: {0}")]
    Malformed(String),

    /// Statement feature not implemented.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Could not connect or load schema metadata.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection handle is released, closed or foreign.
    #[error("bad connection: {0}")]
    BadConnection(String),

    /// No pool could accept another lease.
    #[error("no pool available")]
    Exhausted,

    /// The manager has been destroyed.
    #[error("manager has been destroyed")]
    ManagerDestroyed,

    /// Binding the values failed before anything was sent.
    #[error(transparent)]
    Bind(#[from] BindError),

    /// The server rejected the statement while executing it.
    #[error("query failed: {0}")]
    QueryFailed(NativeError),

    /// The server could not prepare the statement.
    #[error("statement could not be prepared: {0}")]
    PreparedStatement(NativeError),

    /// Infrastructure failure (checkout, timeout, transport).
    #[error("native driver error: {0}")]
    Native(NativeError),
}

impl Error {
    /// Classify the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Malformed(_) => ErrorKind::Malformed,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::ConnectionFailed(_) => ErrorKind::Failed,
            Self::BadConnection(_) => ErrorKind::BadConnection,
            Self::Exhausted => ErrorKind::Exhausted,
            Self::ManagerDestroyed => ErrorKind::ManagerDestroyed,
            Self::Bind(_) | Self::QueryFailed(_) => ErrorKind::QueryFailed,
            Self::PreparedStatement(_) => ErrorKind::PreparedStatement,
            Self::Native(_) => ErrorKind::Error,
        }
    }

    /// The native error behind this error, if any.
    #[must_use]
    pub fn native(&self) -> Option<&NativeError> {
        match self {
            Self::QueryFailed(e) | Self::PreparedStatement(e) | Self::Native(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn from_prepare(error: NativeError) -> Self {
        match error.kind() {
            NativeErrorKind::Connection | NativeErrorKind::Timeout => Self::Native(error),
            _ => Self::PreparedStatement(error),
        }
    }

    pub(crate) fn from_execute(error: NativeError) -> Self {
        match error.kind() {
            NativeErrorKind::Connection | NativeErrorKind::Timeout => Self::Native(error),
            _ => Self::QueryFailed(error),
        }
    }
}

impl From<PoolError> for Error {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Closed => Self::ManagerDestroyed,
            PoolError::Exhausted { .. } => Self::Exhausted,
            PoolError::ForeignLease => {
                Self::BadConnection("connection belongs to a different manager".into())
            }
            PoolError::AlreadyReleased => {
                Self::BadConnection("connection has already been released".into())
            }
            PoolError::Configuration(message) => Self::Malformed(message),
            other => Self::ConnectionFailed(other.to_string()),
        }
    }
}

impl From<BuildError> for Error {
    fn from(error: BuildError) -> Self {
        match error {
            BuildError::Malformed(message) => Self::Malformed(message),
            BuildError::NotSupported(message) => Self::NotSupported(message),
        }
    }
}

/// Closed set of error kinds, one per operation exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid input.
    Malformed,
    /// Unsupported statement feature.
    NotSupported,
    /// Connection or catalog failure.
    Failed,
    /// Invalid connection handle.
    BadConnection,
    /// No pool available.
    Exhausted,
    /// Manager destroyed.
    ManagerDestroyed,
    /// Query rejected.
    QueryFailed,
    /// Preparation rejected.
    PreparedStatement,
    /// Anything else.
    Error,
}

impl ErrorKind {
    /// The exit name used in reports.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::NotSupported => "notSupported",
            Self::Failed => "failed",
            Self::BadConnection => "badConnection",
            Self::Exhausted => "exhausted",
            Self::ManagerDestroyed => "managerDestroyed",
            Self::QueryFailed => "queryFailed",
            Self::PreparedStatement => "preparedStatement",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result type for adapter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_errors_are_query_failures() {
        let err = Error::from(BindError::UnknownColumn {
            table: "people".into(),
            column: "nope".into(),
        });
        assert_eq!(err.kind(), ErrorKind::QueryFailed);
        assert_eq!(
            err.to_string(),
            "nope does not exist in table people, check your model"
        );
    }

    #[test]
    fn test_prepare_errors_split_by_phase() {
        let prepare = NativeError::new(NativeErrorKind::Prepare, "Invalid object name 'x'.");
        assert_eq!(
            Error::from_prepare(prepare).kind(),
            ErrorKind::PreparedStatement
        );

        let timeout = NativeError::new(NativeErrorKind::Timeout, "slow");
        assert_eq!(Error::from_prepare(timeout.clone()).kind(), ErrorKind::Error);
        assert_eq!(Error::from_execute(timeout).kind(), ErrorKind::Error);

        let request = NativeError::new(NativeErrorKind::Request, "Divide by zero error encountered.");
        assert_eq!(Error::from_execute(request).kind(), ErrorKind::QueryFailed);
    }

    #[test]
    fn test_pool_error_mapping() {
        assert_eq!(
            Error::from(PoolError::Closed).kind(),
            ErrorKind::ManagerDestroyed
        );
        assert_eq!(
            Error::from(PoolError::ForeignLease).kind(),
            ErrorKind::BadConnection
        );
        assert_eq!(
            Error::from(PoolError::Exhausted { pools: 1 }).kind(),
            ErrorKind::Exhausted
        );
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(ErrorKind::QueryFailed.to_string(), "queryFailed");
        assert_eq!(ErrorKind::NotSupported.as_str(), "notSupported");
    }
}
