//! # mssql-adapter-types
//!
//! Value and type vocabulary shared by the SQL Server adapter crates.
//!
//! This crate provides:
//!
//! - [`SqlValue`]: the loosely-typed values callers hand to the adapter
//! - [`Row`]: an ordered, case-insensitively addressable result row
//! - [`WireType`]: the exact parameter declaration sent to the server
//! - [`TypedParameter`]: a value paired with its wire type and position
//!
//! ## Example
//!
//! ```
//! use mssql_adapter_types::{SqlValue, TypedParameter, WireLength, WireType};
//!
//! let param = TypedParameter::new(
//!     0,
//!     WireType::VarChar { length: WireLength::Fixed(255) },
//!     SqlValue::from("Batman"),
//! );
//!
//! assert_eq!(param.declaration(), "@p0 varchar(255)");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod from_sql;
pub mod param;
pub mod row;
pub mod value;
pub mod wire;

pub use error::TypeError;
pub use from_sql::FromSql;
pub use param::{TypedParameter, declaration_list};
pub use row::{Column, Row};
pub use value::SqlValue;
pub use wire::{WireLength, WireType};
