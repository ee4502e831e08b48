//! The seam between the adapter and a physical SQL Server driver.
//!
//! A [`Connector`] builds one [`NativePool`] per slot of the pool set. A
//! native pool multiplexes physical connections on its own; the adapter only
//! asks it to connect, to prepare statements and to close.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use mssql_adapter_types::{Row, TypedParameter};
use thiserror::Error;

/// Callback receiving asynchronous native pool failures.
///
/// Failures delivered here are never re-thrown into callers.
pub type FailureNotifier = Arc<dyn Fn(&PoolFailure) + Send + Sync>;

/// An asynchronous failure reported by a native pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolFailure {
    /// Pool position in the set.
    pub pool_index: usize,
    /// Driver message.
    pub message: String,
}

impl PoolFailure {
    /// Create a new failure report.
    pub fn new(pool_index: usize, message: impl Into<String>) -> Self {
        Self {
            pool_index,
            message: message.into(),
        }
    }
}

impl fmt::Display for PoolFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool {}: {}", self.pool_index, self.message)
    }
}

/// Phase in which a native error was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum NativeErrorKind {
    /// Establishing or checking out a physical connection.
    Connection,
    /// The request did not finish within the request timeout.
    Timeout,
    /// Preparing a statement.
    Prepare,
    /// Executing a prepared statement.
    Request,
    /// Releasing a prepared statement handle.
    Unprepare,
}

impl fmt::Display for NativeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Prepare => "prepare",
            Self::Request => "request",
            Self::Unprepare => "unprepare",
        };
        f.write_str(name)
    }
}

/// A diagnostic message sent by the server (ERROR or INFO token).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerMessage {
    /// Error number.
    pub number: u32,
    /// Error state.
    pub state: u8,
    /// Severity class.
    pub class: u8,
    /// Message text.
    pub message: String,
    /// Procedure name, empty for ad-hoc batches.
    pub procedure: String,
    /// Line number within the batch or procedure.
    pub line: u32,
}

impl ServerMessage {
    /// Create a message with the given number and text.
    pub fn new(number: u32, message: impl Into<String>) -> Self {
        Self {
            number,
            state: 1,
            class: 16,
            message: message.into(),
            procedure: String::new(),
            line: 1,
        }
    }
}

/// An error raised by the native driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct NativeError {
    kind: NativeErrorKind,
    number: Option<u32>,
    message: String,
    preceding: Vec<ServerMessage>,
}

impl NativeError {
    /// Create an error without a server error number.
    pub fn new(kind: NativeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            number: None,
            message: message.into(),
            preceding: Vec::new(),
        }
    }

    /// Create an error from a server diagnostic.
    #[must_use]
    pub fn server(kind: NativeErrorKind, diagnostic: ServerMessage) -> Self {
        Self {
            kind,
            number: Some(diagnostic.number),
            message: diagnostic.message,
            preceding: Vec::new(),
        }
    }

    /// Attach diagnostics the server sent before the failing one.
    #[must_use]
    pub fn with_preceding(mut self, preceding: Vec<ServerMessage>) -> Self {
        self.preceding = preceding;
        self
    }

    /// The phase the error was raised in.
    #[must_use]
    pub fn kind(&self) -> NativeErrorKind {
        self.kind
    }

    /// Server error number, when the server produced the error.
    #[must_use]
    pub fn number(&self) -> Option<u32> {
        self.number
    }

    /// Error text.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Diagnostics that preceded this error in the same batch.
    #[must_use]
    pub fn preceding(&self) -> &[ServerMessage] {
        &self.preceding
    }
}

/// Raw output of executing a prepared statement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    /// Every record set, in the order the server sent them.
    pub recordsets: Vec<Vec<Row>>,
    /// Rows affected by the statement.
    pub rows_affected: u64,
}

/// A statement prepared on one physical connection.
///
/// The connection stays checked out until [`unprepare`](Self::unprepare)
/// consumes the statement or it is dropped.
#[async_trait]
pub trait NativeStatement: Send {
    /// Execute the statement with the given parameters.
    async fn execute(&mut self, params: &[TypedParameter]) -> Result<RawResult, NativeError>;

    /// Release the server-side handle.
    async fn unprepare(self: Box<Self>) -> Result<(), NativeError>;
}

/// A native connection-multiplexing pool.
#[async_trait]
pub trait NativePool: Send + Sync {
    /// Establish connectivity. Called at most once per successful connect.
    async fn connect(&self) -> Result<(), NativeError>;

    /// Prepare `sql` with the declarations of `params`.
    ///
    /// Only the wire types of `params` are used; values are supplied on
    /// execute.
    async fn prepare(
        &self,
        sql: &str,
        params: &[TypedParameter],
    ) -> Result<Box<dyn NativeStatement>, NativeError>;

    /// Close the pool and every physical connection it holds.
    async fn close(&self);
}

/// Factory for native pools.
pub trait Connector: Send + Sync {
    /// Build (without connecting) the native pool for slot `index`.
    ///
    /// The pool reports asynchronous failures through `notifier`.
    fn create_pool(&self, index: usize, notifier: FailureNotifier) -> Arc<dyn NativePool>;
}
