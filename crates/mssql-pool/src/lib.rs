//! # mssql-adapter-pool
//!
//! Pool set management for the SQL Server adapter.
//!
//! A [`PoolSet`] holds a fixed number of native connection pools and hands
//! out [`Lease`]s on them. Pools connect lazily: only the first pool is
//! connected up front, the rest are brought up on demand when every
//! connected pool is busy.
//!
//! ## Features
//!
//! - Explicit [`PoolState`] per pool (`Disconnected`, `Connecting`,
//!   `Connected`, `Closed`)
//! - Tiered pool selection as a pure function ([`select_pool`])
//! - Lease counting with exactly-once release
//! - Asynchronous native failures routed to a [`FailureNotifier`]
//! - A [`NativePool`] seam so the physical driver can be swapped (the
//!   `tds` feature provides a tiberius + bb8 backend)
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_adapter_pool::{PoolConfig, PoolSet};
//!
//! let config = PoolConfig::new().max_pools(4);
//! let pools = PoolSet::new(config, connector, notifier)?;
//! pools.connect_first().await?;
//!
//! let mut lease = pools.acquire().await?;
//! let statement = lease.pool().native().prepare(sql, &params).await?;
//! // ...
//! lease.release()?;
//!
//! let status = pools.status();
//! println!("in use: {}", status.in_use());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod native;
pub mod pool;
#[cfg(feature = "tds")]
pub mod tds;

// Configuration
pub use config::PoolConfig;

// Error types
pub use error::{PoolError, Result};

// Pool types
pub use pool::{Lease, Pool, PoolMetrics, PoolSet, PoolSetStatus, PoolStatus};

// Lifecycle management
pub use lifecycle::{PoolState, Selection, SelectionTier, select_pool};

// Native engine seam
pub use native::{
    Connector, FailureNotifier, NativeError, NativeErrorKind, NativePool, NativeStatement,
    PoolFailure, RawResult, ServerMessage,
};

#[cfg(feature = "tds")]
pub use tds::{TdsConnector, TdsSettings};
