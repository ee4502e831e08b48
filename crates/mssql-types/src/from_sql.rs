//! Conversions from [`SqlValue`] into Rust types.

use crate::error::TypeError;
use crate::value::SqlValue;

/// Conversion from an adapter value into a Rust type.
pub trait FromSql: Sized {
    /// Convert a non-NULL value.
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError>;

    /// Convert a value that may be NULL.
    fn from_sql_nullable(value: &SqlValue) -> Result<Option<Self>, TypeError> {
        if value.is_null() {
            Ok(None)
        } else {
            Self::from_sql(value).map(Some)
        }
    }
}

fn mismatch(expected: &'static str, value: &SqlValue) -> TypeError {
    if value.is_null() {
        TypeError::UnexpectedNull
    } else {
        TypeError::TypeMismatch {
            expected,
            actual: value.type_name().to_string(),
        }
    }
}

impl FromSql for i64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Int(v) => Ok(*v),
            SqlValue::Float(v) if v.fract() == 0.0 => Ok(*v as i64),
            SqlValue::String(s) => s.trim().parse().map_err(|_| TypeError::TypeMismatch {
                expected: "i64",
                actual: format!("string '{s}'"),
            }),
            other => Err(mismatch("i64", other)),
        }
    }
}

impl FromSql for i32 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let wide = i64::from_sql(value)?;
        i32::try_from(wide).map_err(|_| TypeError::OutOfRange {
            target: "i32",
            value: wide.to_string(),
        })
    }
}

impl FromSql for u8 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        let wide = i64::from_sql(value)?;
        u8::try_from(wide).map_err(|_| TypeError::OutOfRange {
            target: "u8",
            value: wide.to_string(),
        })
    }
}

impl FromSql for f64 {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        value.as_f64().ok_or_else(|| mismatch("f64", value))
    }
}

impl FromSql for bool {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::Bool(b) => Ok(*b),
            SqlValue::Int(v) => Ok(*v != 0),
            other => Err(mismatch("bool", other)),
        }
    }
}

impl FromSql for String {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        match value {
            SqlValue::String(s) => Ok(s.clone()),
            SqlValue::Null | SqlValue::Binary(_) => Err(mismatch("string", value)),
            other => Ok(other.to_string()),
        }
    }
}

impl FromSql for SqlValue {
    fn from_sql(value: &SqlValue) -> Result<Self, TypeError> {
        Ok(value.clone())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conversions() {
        assert_eq!(i64::from_sql(&SqlValue::Int(42)).unwrap(), 42);
        assert_eq!(i64::from_sql(&SqlValue::from("17")).unwrap(), 17);
        assert_eq!(u8::from_sql(&SqlValue::Int(18)).unwrap(), 18);
        assert!(matches!(
            u8::from_sql(&SqlValue::Int(300)),
            Err(TypeError::OutOfRange { target: "u8", .. })
        ));
    }

    #[test]
    fn test_nullable() {
        assert_eq!(i32::from_sql_nullable(&SqlValue::Null).unwrap(), None);
        assert_eq!(i32::from_sql_nullable(&SqlValue::Int(-1)).unwrap(), Some(-1));
        assert_eq!(i32::from_sql(&SqlValue::Null), Err(TypeError::UnexpectedNull));
    }

    #[test]
    fn test_string_from_scalar() {
        assert_eq!(String::from_sql(&SqlValue::Int(5)).unwrap(), "5");
        assert!(String::from_sql(&SqlValue::from(vec![1u8])).is_err());
    }
}
