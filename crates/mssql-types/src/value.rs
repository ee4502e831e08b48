//! Loosely-typed values exchanged between callers and the adapter.
//!
//! Callers (typically an ORM) do not know the exact SQL Server column type a
//! value is destined for. The adapter therefore accepts a small closed set of
//! runtime shapes and derives the wire type from schema metadata later.

use bytes::Bytes;
use serde::ser::{Serialize, Serializer};

/// A runtime value bound to a statement or read back from a result row.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum SqlValue {
    /// SQL NULL.
    #[default]
    Null,
    /// Boolean (`bit`).
    Bool(bool),
    /// Any integer.
    Int(i64),
    /// Any floating point or decimal number.
    Float(f64),
    /// Text, including dates rendered as ISO strings.
    String(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the text content, if this is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this value holds raw bytes.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary(_))
    }

    /// Length used for column width checks.
    ///
    /// Characters for text, bytes for binary; `None` for everything else.
    #[must_use]
    pub fn width(&self) -> Option<usize> {
        match self {
            Self::String(s) => Some(s.chars().count()),
            Self::Binary(b) => Some(b.len()),
            _ => None,
        }
    }

    /// Number of `%` wildcard characters in a text value.
    #[must_use]
    pub fn wildcard_count(&self) -> usize {
        self.as_str()
            .map_or(0, |s| s.chars().filter(|c| *c == '%').count())
    }

    /// Interpret the value as a number.
    ///
    /// Text is parsed, booleans map to 0/1, NULL and bytes yield `None`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null | Self::Binary(_) => None,
        }
    }

    /// Short name of the runtime shape, for diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Binary(_) => "binary",
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => f.write_str("NULL"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
            Self::Binary(b) => write!(f, "<{} bytes>", b.len()),
        }
    }
}

impl Serialize for SqlValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::Binary(b) => serializer.serialize_bytes(b),
        }
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i32> for SqlValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<Vec<u8>> for SqlValue {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(Bytes::from(value))
    }
}

impl From<Bytes> for SqlValue {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_width_counts_characters_not_bytes() {
        assert_eq!(SqlValue::from("héllo").width(), Some(5));
        assert_eq!(SqlValue::from(vec![1u8, 2, 3]).width(), Some(3));
        assert_eq!(SqlValue::Int(12345).width(), None);
    }

    #[test]
    fn test_wildcard_count() {
        assert_eq!(SqlValue::from("%bat%").wildcard_count(), 2);
        assert_eq!(SqlValue::from("batman").wildcard_count(), 0);
        assert_eq!(SqlValue::Int(5).wildcard_count(), 0);
    }

    #[test]
    fn test_as_f64() {
        assert_eq!(SqlValue::Int(5).as_f64(), Some(5.0));
        assert_eq!(SqlValue::from(" 2.5 ").as_f64(), Some(2.5));
        assert_eq!(SqlValue::Null.as_f64(), None);
        assert_eq!(SqlValue::from("five").as_f64(), None);
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(SqlValue::from(None::<i64>), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::String("x".into()));
    }

    #[test]
    fn test_serialize_json() {
        let json = serde_json::to_string(&vec![
            SqlValue::Null,
            SqlValue::Bool(true),
            SqlValue::Int(5),
            SqlValue::from("a"),
        ])
        .unwrap();
        assert_eq!(json, r#"[null,true,5,"a"]"#);
    }
}
