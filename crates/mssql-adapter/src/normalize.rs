//! Result and error normalization.
//!
//! Raw driver output is reduced to a small engine-independent vocabulary:
//! rows for selects, `{inserted}` / `{numRecordsUpdated}` /
//! `{numRecordsDeleted}` for writes, a number for aggregates, and one of
//! three error footprints.

use std::fmt;
use std::str::FromStr;

use mssql_adapter_pool::RawResult;
use mssql_adapter_types::{Row, SqlValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

use crate::compiler::Meta;
use crate::error::Error;

/// Unique constraint violation.
pub const ERROR_UNIQUE_CONSTRAINT: u32 = 2627;
/// Duplicate key in a unique index.
pub const ERROR_UNIQUE_INDEX: u32 = 2601;
/// Statement(s) could not be prepared.
pub const ERROR_NOT_PREPARED: u32 = 8180;

static CONSTRAINT_NAME: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"Violation of UNIQUE KEY constraint '(.*?)'").unwrap(),
        Regex::new(r"Violation of PRIMARY KEY constraint '(.*?)'").unwrap(),
        Regex::new(r"with unique index '(.*?)'").unwrap(),
    ]
});

/// Output of a native query.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NativeResult {
    /// Rows of the first record set.
    pub rows: Vec<Row>,
    /// Every record set, kept only when more than one holds rows.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub recordsets: Vec<Vec<Row>>,
    /// Rows affected by the statement.
    pub rows_affected: u64,
}

impl NativeResult {
    /// Collapse raw driver output.
    #[must_use]
    pub fn from_raw(raw: RawResult) -> Self {
        let populated = raw.recordsets.iter().filter(|set| !set.is_empty()).count();
        let mut recordsets = raw.recordsets;

        if populated > 1 {
            let rows = recordsets.first().cloned().unwrap_or_default();
            Self {
                rows,
                recordsets,
                rows_affected: raw.rows_affected,
            }
        } else {
            let rows = if recordsets.is_empty() {
                Vec::new()
            } else {
                recordsets.swap_remove(0)
            };
            Self {
                rows,
                recordsets: Vec::new(),
                rows_affected: raw.rows_affected,
            }
        }
    }
}

/// Successful output of `send_native_query`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryReport {
    /// The collapsed result.
    pub result: NativeResult,
    /// Meta passed through.
    pub meta: Meta,
}

/// Operation a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryType {
    /// Row read.
    Select,
    /// Row creation.
    Insert,
    /// Row modification.
    Update,
    /// Row removal.
    Delete,
    /// Row count.
    Count,
    /// Column sum.
    Sum,
    /// Column average.
    Avg,
}

impl QueryType {
    /// Name of the operation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Select => "select",
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Count => "count",
            Self::Sum => "sum",
            Self::Avg => "avg",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "select" => Ok(Self::Select),
            "insert" => Ok(Self::Insert),
            "update" => Ok(Self::Update),
            "delete" | "destroy" => Ok(Self::Delete),
            "count" => Ok(Self::Count),
            "sum" => Ok(Self::Sum),
            "avg" => Ok(Self::Avg),
            other => Err(Error::Malformed(format!("unknown query type `{other}`"))),
        }
    }
}

/// A normalized result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryResult {
    /// Rows read.
    Rows(Vec<Row>),
    /// Identity of the created row.
    Inserted {
        /// Identity value, NULL when none was reported.
        inserted: SqlValue,
    },
    /// Number of rows updated.
    Updated {
        /// Affected rows.
        #[serde(rename = "numRecordsUpdated")]
        num_records_updated: u64,
    },
    /// Number of rows deleted.
    Deleted {
        /// Affected rows.
        #[serde(rename = "numRecordsDeleted")]
        num_records_deleted: u64,
    },
    /// Aggregate value.
    Scalar(f64),
}

/// Output of [`parse_native_query_result`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResult {
    /// The normalized result.
    pub result: QueryResult,
    /// Meta passed through.
    pub meta: Meta,
}

/// Normalize `result` for `query_type`.
#[must_use]
pub fn parse_native_query_result(
    query_type: QueryType,
    result: &NativeResult,
    meta: &Meta,
) -> ParsedResult {
    let first = result.rows.first();
    let result = match query_type {
        QueryType::Select => QueryResult::Rows(result.rows.clone()),
        QueryType::Insert => QueryResult::Inserted {
            inserted: first
                .and_then(|row| row.get_raw_by_name("insertId").or_else(|| row.get_raw(0)))
                .cloned()
                .unwrap_or_default(),
        },
        QueryType::Update => QueryResult::Updated {
            num_records_updated: result.rows_affected,
        },
        QueryType::Delete => QueryResult::Deleted {
            num_records_deleted: result.rows_affected,
        },
        QueryType::Count | QueryType::Sum | QueryType::Avg => {
            QueryResult::Scalar(scalar(first.and_then(|row| row.get_raw(0))))
        }
    };

    ParsedResult {
        result,
        meta: meta.clone(),
    }
}

/// Aggregate value of a cell: missing or NULL is 0, unparseable is NaN.
fn scalar(value: Option<&SqlValue>) -> f64 {
    match value {
        None | Some(SqlValue::Null) => 0.0,
        Some(value) => value.as_f64().unwrap_or(f64::NAN),
    }
}

/// Closed set of error footprints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "identity", rename_all = "camelCase")]
pub enum Footprint {
    /// A unique constraint or index was violated.
    NotUnique {
        /// Name of the violated constraint, when known.
        keys: Vec<String>,
    },
    /// The query could not be bound or prepared.
    QueryFailed {
        /// Diagnostics the server sent before the failure.
        keys: Vec<String>,
    },
    /// Anything else.
    Catchall,
}

impl Footprint {
    /// Name of the footprint.
    #[must_use]
    pub fn identity(&self) -> &'static str {
        match self {
            Self::NotUnique { .. } => "notUnique",
            Self::QueryFailed { .. } => "queryFailed",
            Self::Catchall => "catchall",
        }
    }
}

/// Output of [`parse_native_query_error`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    /// The footprint.
    pub footprint: Footprint,
    /// Human readable message.
    pub message: String,
    /// Meta passed through.
    pub meta: Meta,
}

/// Classify an error into a footprint.
#[must_use]
pub fn parse_native_query_error(error: &Error, meta: &Meta) -> ErrorReport {
    let native = error.native();
    let message = native.map_or_else(|| error.to_string(), |n| n.message().to_string());

    let unique_number = native
        .and_then(|n| n.number())
        .is_some_and(|n| n == ERROR_UNIQUE_CONSTRAINT || n == ERROR_UNIQUE_INDEX);
    let constraint = native.and_then(|n| constraint_name(n.message()));

    let footprint = if unique_number || constraint.is_some() {
        Footprint::NotUnique {
            keys: constraint.into_iter().collect(),
        }
    } else if matches!(error, Error::PreparedStatement(_))
        || native.and_then(|n| n.number()) == Some(ERROR_NOT_PREPARED)
    {
        Footprint::QueryFailed {
            keys: native
                .map(|n| n.preceding().iter().map(|m| m.message.clone()).collect())
                .unwrap_or_default(),
        }
    } else if matches!(error, Error::Bind(_)) {
        Footprint::QueryFailed { keys: Vec::new() }
    } else {
        Footprint::Catchall
    };

    tracing::debug!(
        footprint = footprint.identity(),
        kind = %error.kind(),
        "query error normalized"
    );

    ErrorReport {
        footprint,
        message,
        meta: meta.clone(),
    }
}

fn constraint_name(message: &str) -> Option<String> {
    CONSTRAINT_NAME
        .iter()
        .find_map(|re| re.captures(message))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::error::BindError;
    use mssql_adapter_pool::{NativeError, NativeErrorKind, ServerMessage};
    use serde_json::json;

    fn rows(pairs: &[(&str, SqlValue)]) -> Vec<Row> {
        vec![Row::from_pairs(pairs.iter().cloned())]
    }

    fn result_with(rows: Vec<Row>, rows_affected: u64) -> NativeResult {
        NativeResult {
            rows,
            recordsets: Vec::new(),
            rows_affected,
        }
    }

    #[test]
    fn test_count_over_single_row() {
        let result = result_with(rows(&[("x", SqlValue::Int(5))]), 0);
        let parsed = parse_native_query_result(QueryType::Count, &result, &Meta::default());
        assert_eq!(parsed.result, QueryResult::Scalar(5.0));
    }

    #[test]
    fn test_scalar_coercions() {
        let parse = |value: SqlValue| {
            let result = result_with(rows(&[("v", value)]), 0);
            match parse_native_query_result(QueryType::Avg, &result, &Meta::default()).result {
                QueryResult::Scalar(v) => v,
                other => panic!("unexpected {other:?}"),
            }
        };
        assert_eq!(parse(SqlValue::from("12.5")), 12.5);
        assert_eq!(parse(SqlValue::Null), 0.0);
        assert!(parse(SqlValue::from("n/a")).is_nan());

        let empty =
            parse_native_query_result(QueryType::Sum, &NativeResult::default(), &Meta::default());
        assert_eq!(empty.result, QueryResult::Scalar(0.0));
    }

    #[test]
    fn test_insert_reads_identity() {
        let result = result_with(rows(&[("insertId", SqlValue::Int(42))]), 1);
        let parsed = parse_native_query_result(QueryType::Insert, &result, &Meta::default());
        assert_eq!(
            parsed.result,
            QueryResult::Inserted {
                inserted: SqlValue::Int(42)
            }
        );
        assert_eq!(
            serde_json::to_value(&parsed.result).unwrap(),
            json!({"inserted": 42})
        );
    }

    #[test]
    fn test_update_and_delete_counts() {
        let result = result_with(Vec::new(), 3);
        let updated = parse_native_query_result(QueryType::Update, &result, &Meta::default());
        assert_eq!(
            serde_json::to_value(&updated.result).unwrap(),
            json!({"numRecordsUpdated": 3})
        );
        let deleted =
            parse_native_query_result("destroy".parse().unwrap(), &result, &Meta::default());
        assert_eq!(
            serde_json::to_value(&deleted.result).unwrap(),
            json!({"numRecordsDeleted": 3})
        );
    }

    #[test]
    fn test_query_type_parse() {
        assert_eq!("SELECT".parse::<QueryType>().unwrap(), QueryType::Select);
        assert!("merge".parse::<QueryType>().is_err());
    }

    #[test]
    fn test_recordsets_collapse() {
        let first = rows(&[("a", SqlValue::Int(1))]);
        let raw = RawResult {
            recordsets: vec![first.clone(), Vec::new()],
            rows_affected: 1,
        };
        let result = NativeResult::from_raw(raw);
        assert_eq!(result.rows, first);
        assert!(result.recordsets.is_empty());

        let raw = RawResult {
            recordsets: vec![first.clone(), rows(&[("b", SqlValue::Int(2))])],
            rows_affected: 2,
        };
        let result = NativeResult::from_raw(raw);
        assert_eq!(result.rows, first);
        assert_eq!(result.recordsets.len(), 2);
    }

    #[test]
    fn test_unique_violation_by_number() {
        let native = NativeError::server(
            NativeErrorKind::Request,
            ServerMessage::new(
                ERROR_UNIQUE_CONSTRAINT,
                "Violation of UNIQUE KEY constraint 'AK_Name'. Cannot insert duplicate key in object 'dbo.people'.",
            ),
        );
        let report = parse_native_query_error(&Error::QueryFailed(native), &Meta::default());
        assert_eq!(
            report.footprint,
            Footprint::NotUnique {
                keys: vec!["AK_Name".into()]
            }
        );
        assert_eq!(
            serde_json::to_value(&report.footprint).unwrap(),
            json!({"identity": "notUnique", "keys": ["AK_Name"]})
        );
    }

    #[test]
    fn test_unique_index_by_text() {
        let native = NativeError::new(
            NativeErrorKind::Request,
            "Cannot insert duplicate key row in object 'dbo.people' with unique index 'IX_Email'.",
        );
        let report = parse_native_query_error(&Error::QueryFailed(native), &Meta::default());
        assert_eq!(
            report.footprint,
            Footprint::NotUnique {
                keys: vec!["IX_Email".into()]
            }
        );
    }

    #[test]
    fn test_prepare_failure_keys() {
        let native = NativeError::server(
            NativeErrorKind::Prepare,
            ServerMessage::new(ERROR_NOT_PREPARED, "Statement(s) could not be prepared."),
        )
        .with_preceding(vec![ServerMessage::new(208, "Invalid object name 'nope'.")]);
        let report = parse_native_query_error(&Error::PreparedStatement(native), &Meta::default());
        assert_eq!(
            report.footprint,
            Footprint::QueryFailed {
                keys: vec!["Invalid object name 'nope'.".into()]
            }
        );
        assert_eq!(report.message, "Statement(s) could not be prepared.");
    }

    #[test]
    fn test_bind_failure_and_catchall() {
        let err = Error::from(BindError::UnknownColumn {
            table: "t".into(),
            column: "c".into(),
        });
        let report = parse_native_query_error(&err, &Meta::default());
        assert_eq!(report.footprint, Footprint::QueryFailed { keys: Vec::new() });

        let report = parse_native_query_error(&Error::Exhausted, &Meta::default());
        assert_eq!(report.footprint, Footprint::Catchall);
        assert_eq!(
            serde_json::to_value(&report.footprint).unwrap(),
            json!({"identity": "catchall"})
        );
    }
}
