//! Type conversion error types.

use thiserror::Error;

/// Errors that can occur when converting adapter values.
#[derive(Debug, Clone, Error, PartialEq)]
#[non_exhaustive]
pub enum TypeError {
    /// The value has a different type than requested.
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type name.
        expected: &'static str,
        /// Description of what was found instead.
        actual: String,
    },

    /// A NULL was found where a value was required.
    #[error("unexpected NULL value")]
    UnexpectedNull,

    /// The value does not fit in the requested type.
    #[error("value out of range for {target}: {value}")]
    OutOfRange {
        /// Target type name.
        target: &'static str,
        /// The offending value, rendered.
        value: String,
    },
}
