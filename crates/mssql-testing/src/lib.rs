//! # mssql-adapter-testing
//!
//! Test infrastructure for the SQL Server adapter.
//!
//! - [`MockConnector`]: a scripted native backend that records every
//!   prepare, execute and unprepare, and can inject failures at each step
//! - [`MssqlContainer`]: a throwaway SQL Server instance for live tests

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod container;
pub mod mock;

pub use container::{ContainerError, MssqlContainer};
pub use mock::{ExecuteHandler, MockConnector, PreparedCall, catalog_row};
