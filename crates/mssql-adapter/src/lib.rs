//! # mssql-adapter
//!
//! SQL Server adapter core for an ORM query layer.
//!
//! The adapter turns JSON statements into parameterized SQL, binds every
//! value with the exact wire type its target column declares, and runs each
//! query as a prepared statement over a set of lazily connected pools.
//!
//! ## Features
//!
//! - **Schema-aware binding**: parameter types come from a catalog loaded
//!   once per manager
//! - **Multi-pool management**: pools are connected on demand and leases
//!   are spread over the least loaded pool
//! - **Normalized results**: inserts, updates, deletes and aggregates are
//!   reduced to the shapes the ORM expects
//! - **Classified errors**: unique violations and prepare failures carry
//!   footprints the ORM can match on
//!
//! ## Example
//!
//! ```rust,ignore
//! use mssql_adapter::{ConnectionConfig, Meta, compile_statement, create_manager, send_native_query};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::from_connection_string(
//!         "Server=localhost;Database=library;User Id=sa;Password=Password123;",
//!     )?;
//!     let manager = create_manager(config).await?;
//!
//!     let compiled = compile_statement(
//!         &json!({"select": ["title"], "from": "books", "where": {"year": {">": 1990}}}),
//!         &Meta::default(),
//!     )?;
//!
//!     let mut connection = manager.get_connection().await?;
//!     let report = send_native_query(&connection, Some(&manager), compiled.into()).await?;
//!     for row in &report.result.rows {
//!         let title: Option<String> = row.try_get_by_name("title");
//!         println!("{title:?}");
//!     }
//!     manager.release_connection(&mut connection)?;
//!     manager.destroy().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod binder;
pub mod builder;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod instrumentation;
pub mod manager;
pub mod normalize;

// Re-export commonly used types
pub use binder::{BoundStatement, Statement, bind, rewrite_template_placeholders};
pub use builder::{BuiltQuery, MssqlBuilder, StatementBuilder};
pub use catalog::{ColumnMeta, SchemaCatalog};
pub use compiler::{CompiledStatement, Meta, compile_statement, compile_statement_with};
pub use config::{ConnectionConfig, ConnectionOptions};
pub use error::{BindError, BuildError, Error, ErrorKind, Result};
pub use executor::{NativeQuery, send_native_query};
pub use instrumentation::SanitizationConfig;
pub use manager::{
    Connection, Manager, create_manager_with, destroy_manager, get_connection, release_connection,
};
pub use normalize::{
    ErrorReport, Footprint, NativeResult, ParsedResult, QueryReport, QueryResult, QueryType,
    parse_native_query_error, parse_native_query_result,
};

#[cfg(feature = "tds")]
pub use manager::create_manager;

pub use mssql_adapter_pool::{
    Connector, NativeError, NativeErrorKind, PoolFailure, PoolMetrics, PoolSetStatus, RawResult,
    ServerMessage,
};
pub use mssql_adapter_types::{Row, SqlValue, TypedParameter, WireType};
