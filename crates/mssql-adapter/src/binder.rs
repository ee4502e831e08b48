//! Parameter binding.
//!
//! SQL Server needs an exact declaration for every parameter of a prepared
//! statement. The binder walks the columns a statement reports, looks each
//! one up in the [`SchemaCatalog`] and derives the [`WireType`] to declare.
//! Values that do not fit their column are rejected before anything is sent;
//! nothing is ever truncated.
//!
//! Placeholders are `@p0`, `@p1`, ... and are matched exactly: `@p1` never
//! matches inside `@p10`. Pagination placeholders (`top (@pN)` and
//! `@pN rows`) are synthetic and always bind as `bigint`.

use std::collections::HashMap;

use mssql_adapter_types::{SqlValue, TypedParameter, WireLength, WireType, declaration_list};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};

use crate::catalog::{ColumnMeta, SchemaCatalog};
use crate::error::BindError;

static TEMPLATE_PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([1-9][0-9]*)").unwrap());

/// Table and columns a statement's bindings belong to.
///
/// `columns[i]` describes `bindings[i]`, except for pagination placeholders
/// which have no column.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    /// Target table, possibly aliased or qualified.
    pub table_name: String,
    /// Column per binding, possibly qualified (`t.name`, `[name]`).
    #[serde(default)]
    pub columns: Vec<String>,
}

impl Statement {
    /// Create a statement description.
    pub fn new<I, S>(table_name: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table_name: table_name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    fn is_usable(&self) -> bool {
        !self.table_name.trim().is_empty() && !self.columns.is_empty()
    }
}

/// SQL plus the typed parameters to send with it.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    /// SQL text, unchanged.
    pub sql: String,
    /// Parameters in placeholder order.
    pub parameters: Vec<TypedParameter>,
}

impl BoundStatement {
    /// The `@p0 type, @p1 type` list sent with the prepare request.
    #[must_use]
    pub fn declarations(&self) -> Option<String> {
        declaration_list(&self.parameters)
    }

    /// Check if `position` received a parameter.
    #[must_use]
    pub fn is_bound(&self, position: usize) -> bool {
        self.parameters.iter().any(|p| p.position() == position)
    }
}

/// Bind `values` to the placeholders of `sql`.
///
/// With a usable `statement` the wire types come from the catalog; without
/// one they are inferred from the values themselves.
pub fn bind(
    sql: &str,
    statement: Option<&Statement>,
    values: &[SqlValue],
    catalog: &SchemaCatalog,
) -> Result<BoundStatement, BindError> {
    let lower = sql.to_lowercase();

    let parameters = match statement {
        _ if values.is_empty() => Vec::new(),
        Some(statement) if statement.is_usable() => {
            bind_columns(&lower, statement, values, catalog)?
        }
        _ => bind_ad_hoc(&lower, values),
    };

    tracing::debug!(
        values = values.len(),
        parameters = parameters.len(),
        "statement bound"
    );

    Ok(BoundStatement {
        sql: sql.to_string(),
        parameters,
    })
}

fn bind_columns(
    sql: &str,
    statement: &Statement,
    values: &[SqlValue],
    catalog: &SchemaCatalog,
) -> Result<Vec<TypedParameter>, BindError> {
    let mut parameters = Vec::with_capacity(values.len());
    let mut inferred: HashMap<String, WireType> = HashMap::new();
    let mut i = 0;

    for reference in &statement.columns {
        let column = unqualified_column(reference);

        if let Some(value) = values.get(i) {
            if is_pagination_marker(sql, i) {
                parameters.push(TypedParameter::new(i, WireType::BigInt, value.clone()));
                i += 1;
            }
        }

        let Some(value) = values.get(i) else {
            break;
        };
        let Some(at) = find_placeholder(sql, i) else {
            continue;
        };

        let start = i
            .checked_sub(1)
            .and_then(|prev| find_placeholder(sql, prev).map(|p| p + placeholder_len(prev)))
            .filter(|start| *start <= at)
            .unwrap_or(0);
        let segment = &sql[start..at + placeholder_len(i)];

        let key = column.to_lowercase();
        if only_null_checked(segment, &key) {
            tracing::trace!(column, position = i, "column only null-checked, not bound");
            continue;
        }

        let reused = inferred.get(&key).copied();
        if reused.is_none() && !sql.contains(&key) {
            continue;
        }
        let meta = catalog.column(&statement.table_name, column).ok_or_else(|| {
            BindError::UnknownColumn {
                table: statement.table_name.clone(),
                column: column.to_string(),
            }
        })?;
        check_length(column, meta, value)?;
        let candidate = column_wire_type(meta, value);
        let wire_type = reused.map_or(candidate, |reused| widen(reused, candidate));
        inferred.insert(key, wire_type);

        let (wire_type, value) = finalize(wire_type, value);
        tracing::trace!(column, position = i, wire_type = %wire_type, "parameter bound");
        parameters.push(TypedParameter::new(i, wire_type, value));
        i += 1;
    }

    // Pagination placeholders after the last column.
    for (position, value) in values.iter().enumerate().skip(i) {
        if is_pagination_marker(sql, position) {
            parameters.push(TypedParameter::new(position, WireType::BigInt, value.clone()));
        }
    }

    Ok(parameters)
}

fn bind_ad_hoc(sql: &str, values: &[SqlValue]) -> Vec<TypedParameter> {
    values
        .iter()
        .enumerate()
        .filter(|(position, _)| find_placeholder(sql, *position).is_some())
        .map(|(position, value)| {
            let wire_type = if is_pagination_marker(sql, position) {
                WireType::BigInt
            } else {
                value_wire_type(value)
            };
            let (wire_type, value) = finalize(wire_type, value);
            TypedParameter::new(position, wire_type, value)
        })
        .collect()
}

/// Reject values wider than their column's declared length.
///
/// `%` wildcards in text values widen the allowance; XML columns and
/// columns without a finite length are exempt.
fn check_length(column: &str, meta: &ColumnMeta, value: &SqlValue) -> Result<(), BindError> {
    if meta.data_type == "xml" {
        return Ok(());
    }
    let Some(declared) = meta.character_max_length.filter(|len| *len > 0) else {
        return Ok(());
    };
    let Some(actual) = value.width() else {
        return Ok(());
    };

    let limit = declared.unsigned_abs() + value.wildcard_count() as u64;
    if actual as u64 > limit {
        return Err(BindError::ValueTooLarge {
            column: column.to_string(),
            limit,
            actual,
        });
    }
    Ok(())
}

/// Wire type for a column, from its catalog metadata.
#[must_use]
pub fn column_wire_type(meta: &ColumnMeta, value: &SqlValue) -> WireType {
    let wildcards = u32::try_from(value.wildcard_count()).unwrap_or(u32::MAX);
    let declared = meta.character_max_length;
    let precision = meta.numeric_precision.unwrap_or(18);
    let scale = meta.numeric_scale.unwrap_or(0);

    match meta.data_type.as_str() {
        "decimal" => WireType::Decimal { precision, scale },
        "numeric" => WireType::Numeric { precision, scale },
        "varchar" => WireType::VarChar {
            length: variable_length(declared, wildcards, value, false),
        },
        "nvarchar" => WireType::NVarChar {
            length: variable_length(declared, wildcards, value, true),
        },
        "varbinary" => WireType::VarBinary {
            length: variable_length(declared, wildcards, value, false),
        },
        "binary" => WireType::Binary {
            length: fixed_length(declared),
        },
        "char" => WireType::Char {
            length: fixed_length(declared),
        },
        "nchar" => WireType::NChar {
            length: fixed_length(declared),
        },
        "bigint" => WireType::BigInt,
        "int" => WireType::Int,
        "bit" => WireType::Bit,
        "float" => WireType::Float,
        "real" => WireType::Real,
        "money" => WireType::Money,
        "date" => WireType::Date,
        "datetime" => WireType::DateTime,
        "timestamp" => WireType::Time { scale: 7 },
        "text" => WireType::Text,
        "ntext" => WireType::NText,
        "image" => WireType::Image,
        "uniqueidentifier" => WireType::UniqueIdentifier,
        "xml" => WireType::Xml,
        "geography" => WireType::Geography,
        "geometry" => WireType::Geometry,
        other => {
            tracing::debug!(
                data_type = other,
                column = %meta.name,
                "unmapped column type, binding as varchar"
            );
            WireType::VarChar {
                length: variable_length(declared, 0, value, false),
            }
        }
    }
}

/// Wire type for a value with no column metadata.
#[must_use]
pub fn value_wire_type(value: &SqlValue) -> WireType {
    match value {
        SqlValue::Bool(_) => WireType::Bit,
        SqlValue::Int(_) => WireType::BigInt,
        SqlValue::Float(_) => WireType::Float,
        SqlValue::String(s) => {
            let width = s.chars().count();
            let length = if width > WireType::MAX_FIXED_UNICODE_WIDTH as usize {
                WireLength::Max
            } else {
                WireLength::Fixed(u32::try_from(width.max(1)).unwrap_or(1))
            };
            WireType::NVarChar { length }
        }
        SqlValue::Binary(_) => WireType::VarBinary {
            length: WireLength::Max,
        },
        SqlValue::Null => WireType::NVarChar {
            length: WireLength::Fixed(1),
        },
    }
}

/// Width of a variable-length parameter.
///
/// A finite declared length is widened by the wildcard count and promoted
/// to `MAX` past the fixed-width cap. `MAX` (or unknown) columns get the
/// widest concrete width, or `MAX` when the value itself is wider.
fn variable_length(
    declared: Option<i64>,
    wildcards: u32,
    value: &SqlValue,
    unicode: bool,
) -> WireLength {
    let cap = if unicode {
        WireType::MAX_FIXED_UNICODE_WIDTH
    } else {
        WireType::MAX_FIXED_WIDTH
    };

    match declared {
        Some(len) if len > 0 => {
            let total = len.unsigned_abs() + u64::from(wildcards);
            match u32::try_from(total) {
                Ok(total) if total <= cap => WireLength::Fixed(total),
                _ => WireLength::Max,
            }
        }
        _ => {
            if value.width().unwrap_or(0) > cap as usize {
                WireLength::Max
            } else {
                WireLength::Fixed(cap)
            }
        }
    }
}

/// Keep a repeated column's wire type, growing its width to fit `candidate`.
fn widen(reused: WireType, candidate: WireType) -> WireType {
    match (reused, candidate) {
        (WireType::VarChar { length: a }, WireType::VarChar { length: b }) => WireType::VarChar {
            length: wider(a, b),
        },
        (WireType::NVarChar { length: a }, WireType::NVarChar { length: b }) => {
            WireType::NVarChar {
                length: wider(a, b),
            }
        }
        (WireType::VarBinary { length: a }, WireType::VarBinary { length: b }) => {
            WireType::VarBinary {
                length: wider(a, b),
            }
        }
        _ => reused,
    }
}

fn wider(a: WireLength, b: WireLength) -> WireLength {
    match (a, b) {
        (WireLength::Fixed(a), WireLength::Fixed(b)) => WireLength::Fixed(a.max(b)),
        _ => WireLength::Max,
    }
}

fn fixed_length(declared: Option<i64>) -> u32 {
    declared
        .and_then(|len| u32::try_from(len).ok())
        .unwrap_or(1)
        .max(1)
}

/// Apply value-dependent adjustments to a bound parameter.
fn finalize(wire_type: WireType, value: &SqlValue) -> (WireType, SqlValue) {
    match (wire_type, value) {
        (_, SqlValue::Binary(_)) => (
            WireType::VarBinary {
                length: WireLength::Max,
            },
            value.clone(),
        ),
        (WireType::Xml, SqlValue::String(s)) => {
            (WireType::Xml, SqlValue::String(strip_xml_prologue(s)))
        }
        _ => (wire_type, value.clone()),
    }
}

fn strip_xml_prologue(document: &str) -> String {
    if let Some(start) = document.find("<?xml") {
        if let Some(end) = document[start..].find("?>") {
            return document[start + end + 2..].to_string();
        }
    }
    document.to_string()
}

/// Drop a table qualifier and brackets from a column reference.
fn unqualified_column(reference: &str) -> &str {
    let name = reference.rsplit('.').next().unwrap_or(reference);
    name.trim().trim_matches(|c| c == '[' || c == ']')
}

fn placeholder_len(index: usize) -> usize {
    // "@p" plus the decimal digits of `index`.
    2 + index.checked_ilog10().map_or(1, |digits| digits as usize + 1)
}

/// Byte offset of the exact placeholder `@p{index}`.
pub(crate) fn find_placeholder(sql: &str, index: usize) -> Option<usize> {
    let needle = format!("@p{index}");
    sql.match_indices(&needle)
        .find(|(at, _)| !sql[at + needle.len()..].starts_with(|c: char| c.is_ascii_digit()))
        .map(|(at, _)| at)
}

/// Check for `top (@p{index})` or `@p{index} rows` in lower-cased SQL.
fn is_pagination_marker(sql: &str, index: usize) -> bool {
    sql.contains(&format!("top (@p{index})")) || sql.contains(&format!("@p{index} rows"))
}

/// Check if `segment` uses `column` only in `IS NULL` / `IS NOT NULL`.
fn only_null_checked(segment: &str, column: &str) -> bool {
    let bracketed = format!("[{column}]");
    let null_checked = segment.contains(&format!("{bracketed} is null"))
        || segment.contains(&format!("{bracketed} is not null"));
    if !null_checked {
        return false;
    }
    ![
        "=", "<>", "!=", ">", "<", "like ", "not like ", "in (", "not in (",
    ]
    .iter()
        .any(|op| segment.contains(&format!("{bracketed} {op}")))
}

/// Rewrite `$1, $2, ...` into `@p0, @p1, ...`.
///
/// References beyond `count` values are left as written.
#[must_use]
pub fn rewrite_template_placeholders(sql: &str, count: usize) -> String {
    TEMPLATE_PLACEHOLDER
        .replace_all(sql, |caps: &Captures<'_>| match caps[1].parse::<usize>() {
            Ok(n) if n <= count => format!("@p{}", n - 1),
            _ => caps[0].to_string(),
        })
        .into_owned()
}
