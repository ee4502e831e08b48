//! Statement compilation.
//!
//! Runs a [`StatementBuilder`] and applies the SQL Server specific
//! post-processing driven by [`Meta`]: collations on wildcard searches, a
//! caller supplied secondary ordering, and the identity read-back on
//! inserts.

use mssql_adapter_types::SqlValue;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::binder::{Statement, find_placeholder};
use crate::builder::{MssqlBuilder, StatementBuilder};
use crate::error::{Error, Result};

static SELECT_OR_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(select|output)\b").unwrap());

/// Bracketed identifiers and string literals, with their doubled escapes.
static QUOTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(?:[^\]]|\]\])*\]|'(?:[^']|'')*'").unwrap());

static COLLATION_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());

/// Check for a `select` or `output` keyword outside identifiers and literals.
fn returns_rows(sql: &str) -> bool {
    SELECT_OR_OUTPUT.is_match(&QUOTED.replace_all(sql, "''"))
}

/// Identity read-back appended to inserts with no result clause.
pub const IDENTITY_CLAUSE: &str = " SELECT SCOPE_IDENTITY() as insertId";

const NEUTRAL_ORDER: &str = "order by (select null)";

/// Driver-specific options attached to a query.
///
/// Unknown keys are carried through untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Meta {
    /// The SQL already uses `@pN` placeholders.
    pub is_using_question_marks: bool,
    /// Collation applied to wildcard-edged text bindings.
    pub collate: Option<String>,
    /// An `ORDER BY ...` clause spliced into the query.
    pub sort_query: Option<String>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Meta {
    /// Parse meta from JSON; `null` yields the default.
    pub fn from_value(value: &Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Malformed(format!("invalid meta: {e}")))
    }
}

/// A statement ready to be sent.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledStatement {
    /// SQL text.
    pub native_query: String,
    /// Values for `@p0, @p1, ...`.
    pub values_to_escape: Vec<SqlValue>,
    /// Table and per-binding columns, for the binder.
    pub statement: Statement,
    /// Meta to pass along with the query.
    pub meta: Meta,
}

/// Compile a JSON statement with the built-in builder.
pub fn compile_statement(statement: &Value, meta: &Meta) -> Result<CompiledStatement> {
    compile_statement_with(&MssqlBuilder, statement, meta)
}

/// Compile a JSON statement with `builder`.
pub fn compile_statement_with(
    builder: &dyn StatementBuilder,
    statement: &Value,
    meta: &Meta,
) -> Result<CompiledStatement> {
    let built = builder.build(statement)?;
    let mut sql = built.sql;

    if let Some(collation) = &meta.collate {
        if !COLLATION_NAME.is_match(collation) {
            return Err(Error::Malformed(format!("invalid collation name `{collation}`")));
        }
        sql = apply_collation(&sql, &built.bindings, collation);
    }

    if let Some(sort) = &meta.sort_query {
        sql = splice_sort(&sql, sort);
    }

    let is_insert = statement.get("insert").is_some();
    if is_insert && !returns_rows(&sql) {
        sql.push_str(IDENTITY_CLAUSE);
    }

    let mut meta = meta.clone();
    meta.is_using_question_marks = true;

    tracing::debug!(
        bindings = built.bindings.len(),
        table = built.table.as_deref().unwrap_or_default(),
        "statement compiled"
    );

    Ok(CompiledStatement {
        native_query: sql,
        values_to_escape: built.bindings,
        statement: Statement {
            table_name: built.table.unwrap_or_default(),
            columns: built.columns,
        },
        meta,
    })
}

/// Add `collate <name>` after every placeholder bound to `%text` or
/// `text%`.
fn apply_collation(sql: &str, bindings: &[SqlValue], collation: &str) -> String {
    let mut sql = sql.to_string();
    for (index, value) in bindings.iter().enumerate() {
        let Some(text) = value.as_str() else {
            continue;
        };
        if !(text.starts_with('%') || text.ends_with('%')) {
            continue;
        }
        if let Some(at) = find_placeholder(&sql, index) {
            let end = at + format!("@p{index}").len();
            sql.insert_str(end, &format!(" collate {collation}"));
        }
    }
    sql
}

/// Merge an `ORDER BY` clause into `sql`.
///
/// The builder's neutral ordering is replaced; an existing ordering is
/// extended. The clause always lands before `offset`.
fn splice_sort(sql: &str, sort: &str) -> String {
    let sort_lower = sort.to_ascii_lowercase();
    let Some(keyword) = sort_lower.find("order by") else {
        tracing::debug!("sort query has no ORDER BY, ignored");
        return sql.to_string();
    };
    let terms = sort[keyword + "order by".len()..].trim();
    if terms.is_empty() {
        return sql.to_string();
    }

    let lower = sql.to_ascii_lowercase();
    if let Some(at) = lower.find(NEUTRAL_ORDER) {
        return format!(
            "{}order by {terms}{}",
            &sql[..at],
            &sql[at + NEUTRAL_ORDER.len()..]
        );
    }

    let insert_at = lower.find(" offset ").unwrap_or(sql.len());
    let clause = if lower.contains(" order by ") {
        format!(", {terms}")
    } else {
        format!(" order by {terms}")
    };
    format!("{}{clause}{}", &sql[..insert_at], &sql[insert_at..])
}
