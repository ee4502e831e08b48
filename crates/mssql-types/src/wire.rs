//! Parameter wire types.
//!
//! SQL Server requires every parameter of a prepared statement to be declared
//! with an exact type up front (`@p0 varchar(255), @p1 int`). Guessing the
//! type from the runtime value either truncates data or triggers server-side
//! conversion errors, so the adapter derives a [`WireType`] from column
//! metadata and renders it with [`WireType::declaration`].

use std::fmt;

/// Width of a variable-length parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireLength {
    /// A concrete width in characters (or bytes for binary types).
    Fixed(u32),
    /// The `MAX` width.
    Max,
}

impl fmt::Display for WireLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(n) => write!(f, "{n}"),
            Self::Max => f.write_str("max"),
        }
    }
}

/// Parameter type declared to the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireType {
    /// DECIMAL with precision and scale.
    Decimal {
        /// Maximum number of digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// NUMERIC with precision and scale.
    Numeric {
        /// Maximum number of digits.
        precision: u8,
        /// Digits after the decimal point.
        scale: u8,
    },
    /// BIGINT.
    BigInt,
    /// INT.
    Int,
    /// BIT.
    Bit,
    /// FLOAT.
    Float,
    /// REAL.
    Real,
    /// MONEY.
    Money,
    /// CHAR with fixed width.
    Char {
        /// Width in characters.
        length: u32,
    },
    /// NCHAR with fixed width.
    NChar {
        /// Width in characters.
        length: u32,
    },
    /// VARCHAR.
    VarChar {
        /// Maximum width.
        length: WireLength,
    },
    /// NVARCHAR.
    NVarChar {
        /// Maximum width.
        length: WireLength,
    },
    /// TEXT (legacy unbounded text).
    Text,
    /// NTEXT (legacy unbounded Unicode text).
    NText,
    /// BINARY with fixed width.
    Binary {
        /// Width in bytes.
        length: u32,
    },
    /// VARBINARY.
    VarBinary {
        /// Maximum width.
        length: WireLength,
    },
    /// IMAGE (legacy blob).
    Image,
    /// DATE.
    Date,
    /// DATETIME.
    DateTime,
    /// TIME with fractional seconds scale.
    Time {
        /// Fractional seconds precision (0-7).
        scale: u8,
    },
    /// UNIQUEIDENTIFIER.
    UniqueIdentifier,
    /// XML document.
    Xml,
    /// Spatial GEOGRAPHY.
    Geography,
    /// Spatial GEOMETRY.
    Geometry,
}

impl WireType {
    /// Largest fixed width of a non-Unicode variable-length parameter.
    pub const MAX_FIXED_WIDTH: u32 = 8000;

    /// Largest fixed width of a Unicode variable-length parameter.
    pub const MAX_FIXED_UNICODE_WIDTH: u32 = 4000;

    /// Render the type as it appears in a parameter declaration list.
    #[must_use]
    pub fn declaration(&self) -> String {
        match self {
            Self::Decimal { precision, scale } => format!("decimal({precision}, {scale})"),
            Self::Numeric { precision, scale } => format!("numeric({precision}, {scale})"),
            Self::BigInt => "bigint".into(),
            Self::Int => "int".into(),
            Self::Bit => "bit".into(),
            Self::Float => "float".into(),
            Self::Real => "real".into(),
            Self::Money => "money".into(),
            Self::Char { length } => format!("char({})", (*length).max(1)),
            Self::NChar { length } => format!("nchar({})", (*length).max(1)),
            Self::VarChar { length } => format!("varchar({length})"),
            Self::NVarChar { length } => format!("nvarchar({length})"),
            Self::Text => "text".into(),
            Self::NText => "ntext".into(),
            Self::Binary { length } => format!("binary({})", (*length).max(1)),
            Self::VarBinary { length } => format!("varbinary({length})"),
            Self::Image => "image".into(),
            Self::Date => "date".into(),
            Self::DateTime => "datetime".into(),
            Self::Time { scale } => format!("time({scale})"),
            Self::UniqueIdentifier => "uniqueidentifier".into(),
            Self::Xml => "xml".into(),
            Self::Geography => "geography".into(),
            Self::Geometry => "geometry".into(),
        }
    }

    /// Check if the type carries character data.
    #[must_use]
    pub const fn is_textual(&self) -> bool {
        matches!(
            self,
            Self::Char { .. }
                | Self::NChar { .. }
                | Self::VarChar { .. }
                | Self::NVarChar { .. }
                | Self::Text
                | Self::NText
                | Self::Xml
        )
    }
}

impl fmt::Display for WireType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.declaration())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declarations() {
        assert_eq!(
            WireType::Decimal {
                precision: 18,
                scale: 2
            }
            .declaration(),
            "decimal(18, 2)"
        );
        assert_eq!(
            WireType::VarChar {
                length: WireLength::Fixed(255)
            }
            .declaration(),
            "varchar(255)"
        );
        assert_eq!(
            WireType::VarBinary {
                length: WireLength::Max
            }
            .declaration(),
            "varbinary(max)"
        );
        assert_eq!(WireType::Time { scale: 7 }.to_string(), "time(7)");
    }

    #[test]
    fn test_fixed_width_never_zero() {
        assert_eq!(WireType::Char { length: 0 }.declaration(), "char(1)");
    }

    #[test]
    fn test_is_textual() {
        assert!(WireType::Xml.is_textual());
        assert!(!WireType::BigInt.is_textual());
        assert!(
            !WireType::VarBinary {
                length: WireLength::Max
            }
            .is_textual()
        );
    }
}
