//! JSON statement to SQL Server SQL.
//!
//! Statements are JSON objects in the Waterline query language subset
//! adapters receive from the ORM:
//!
//! ```json
//! { "select": ["title", "author"], "from": "books",
//!   "where": { "year": { ">": 1990 } }, "orderBy": [{ "title": "asc" }],
//!   "limit": 10, "skip": 20 }
//! ```
//!
//! Output uses bracket-quoted identifiers and `@p0, @p1, ...` placeholders
//! numbered in textual order. Every placeholder bound to a column value is
//! reported with its column so the binder can type it.

use std::collections::BTreeSet;

use mssql_adapter_types::SqlValue;
use serde_json::{Map, Value};

use crate::error::BuildError;

/// Top-level keys the builder understands.
const KNOWN_KEYS: &[&str] = &[
    "select", "from", "where", "orderBy", "limit", "skip", "insert", "into", "returning", "update",
    "using", "del", "count", "sum", "avg", "opts",
];

/// Valid keys the builder does not implement.
const UNSUPPORTED_KEYS: &[&str] = &[
    "distinct",
    "groupBy",
    "having",
    "join",
    "innerJoin",
    "leftJoin",
    "leftOuterJoin",
    "rightJoin",
    "rightOuterJoin",
    "outerJoin",
    "fullOuterJoin",
    "crossJoin",
    "union",
    "unionAll",
    "whereExists",
    "min",
    "max",
];

/// Output of a statement builder.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    /// SQL text.
    pub sql: String,
    /// Placeholder values, `bindings[n]` for `@p{n}`.
    pub bindings: Vec<SqlValue>,
    /// Table the statement targets.
    pub table: Option<String>,
    /// Column of each non-pagination binding, in order.
    pub columns: Vec<String>,
}

/// Turns a JSON statement into SQL.
pub trait StatementBuilder: Send + Sync {
    /// Build `statement`.
    fn build(&self, statement: &Value) -> Result<BuiltQuery, BuildError>;
}

/// Built-in SQL Server builder.
#[derive(Debug, Clone, Copy, Default)]
pub struct MssqlBuilder;

impl StatementBuilder for MssqlBuilder {
    fn build(&self, statement: &Value) -> Result<BuiltQuery, BuildError> {
        let object = statement
            .as_object()
            .ok_or_else(|| malformed("statement must be an object"))?;

        for key in object.keys() {
            if UNSUPPORTED_KEYS.contains(&key.as_str()) {
                return Err(BuildError::NotSupported(format!("`{key}` clauses")));
            }
            if !KNOWN_KEYS.contains(&key.as_str()) {
                return Err(malformed(format!("unknown statement key `{key}`")));
            }
        }

        let mut query = QueryWriter::default();
        let (sql, table) = if object.contains_key("insert") {
            query.insert(object)?
        } else if object.contains_key("update") {
            query.update(object)?
        } else if object.contains_key("del") {
            query.delete(object)?
        } else if ["count", "sum", "avg"].iter().any(|k| object.contains_key(*k)) {
            query.aggregate(object)?
        } else if object.contains_key("select") {
            query.select(object)?
        } else {
            return Err(malformed("statement has no operation"));
        };

        Ok(BuiltQuery {
            sql,
            bindings: query.bindings,
            table: Some(table),
            columns: query.columns,
        })
    }
}

fn malformed(message: impl Into<String>) -> BuildError {
    BuildError::Malformed(message.into())
}

/// Accumulates placeholders while SQL is written.
#[derive(Default)]
struct QueryWriter {
    bindings: Vec<SqlValue>,
    columns: Vec<String>,
}

impl QueryWriter {
    fn placeholder(&mut self, column: Option<&str>, value: SqlValue) -> String {
        let name = format!("@p{}", self.bindings.len());
        self.bindings.push(value);
        if let Some(column) = column {
            self.columns.push(column.to_string());
        }
        name
    }

    fn select(&mut self, object: &Map<String, Value>) -> Result<(String, String), BuildError> {
        let table = required_str(object, "from")?;
        let columns = match object.get("select") {
            Some(Value::String(s)) => quote_column(s),
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(quote_column)
                        .ok_or_else(|| malformed("`select` entries must be strings"))
                })
                .collect::<Result<Vec<_>, _>>()?
                .join(", "),
            _ => return Err(malformed("`select` must be a string or a non-empty array")),
        };
        self.projection(object, &columns, table)
    }

    fn aggregate(&mut self, object: &Map<String, Value>) -> Result<(String, String), BuildError> {
        let table = required_str(object, "from")?;
        let projection = if let Some(count) = object.get("count") {
            match count {
                Value::Bool(true) => "count(*) as [count]".to_string(),
                Value::String(column) if column != "*" => {
                    format!("count({}) as [count]", quote_column(column))
                }
                Value::String(_) => "count(*) as [count]".to_string(),
                _ => return Err(malformed("`count` must be true or a column name")),
            }
        } else if let Some(sum) = object.get("sum") {
            let column = sum.as_str().ok_or_else(|| malformed("`sum` must be a column name"))?;
            format!("sum({}) as [sum]", quote_column(column))
        } else {
            let column = object
                .get("avg")
                .and_then(Value::as_str)
                .ok_or_else(|| malformed("`avg` must be a column name"))?;
            format!("avg({}) as [avg]", quote_column(column))
        };
        self.projection(object, &projection, table)
    }

    /// `select <projection> from <table> ...` with filters, ordering and
    /// pagination.
    fn projection(
        &mut self,
        object: &Map<String, Value>,
        projection: &str,
        table: &str,
    ) -> Result<(String, String), BuildError> {
        let limit = optional_count(object, "limit")?;
        let skip = optional_count(object, "skip")?;

        let mut sql = String::from("select ");
        if let (Some(limit), None) = (limit, skip) {
            let p = self.placeholder(None, SqlValue::Int(limit));
            sql.push_str(&format!("top ({p}) "));
        }
        sql.push_str(projection);
        sql.push_str(" from ");
        sql.push_str(&quote_table(table));

        self.where_clause(object, &mut sql)?;

        let ordering = order_by(object)?;
        match (&ordering, skip) {
            (Some(terms), _) => {
                sql.push_str(" order by ");
                sql.push_str(terms);
            }
            (None, Some(_)) => sql.push_str(" order by (select null)"),
            (None, None) => {}
        }

        if let Some(skip) = skip {
            let p = self.placeholder(None, SqlValue::Int(skip));
            sql.push_str(&format!(" offset {p} rows"));
            if let Some(limit) = limit {
                let p = self.placeholder(None, SqlValue::Int(limit));
                sql.push_str(&format!(" fetch next {p} rows only"));
            }
        }

        Ok((sql, table.to_string()))
    }

    fn insert(&mut self, object: &Map<String, Value>) -> Result<(String, String), BuildError> {
        let table = required_str(object, "into")?;
        let records: Vec<&Map<String, Value>> = match object.get("insert") {
            Some(Value::Object(record)) => vec![record],
            Some(Value::Array(items)) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_object()
                        .ok_or_else(|| malformed("`insert` records must be objects"))
                })
                .collect::<Result<_, _>>()?,
            _ => return Err(malformed("`insert` must be an object or a non-empty array")),
        };

        let columns: BTreeSet<&str> = records
            .iter()
            .flat_map(|record| record.keys().map(String::as_str))
            .collect();
        if columns.is_empty() {
            return Err(malformed("`insert` has no columns"));
        }

        let mut sql = format!(
            "insert into {} ({})",
            quote_table(table),
            columns.iter().map(|c| quote_column(c)).collect::<Vec<_>>().join(", ")
        );

        if let Some(returning) = object.get("returning") {
            sql.push_str(" output ");
            sql.push_str(&output_columns(returning)?);
        }

        let mut rows = Vec::with_capacity(records.len());
        for record in &records {
            let mut cells = Vec::with_capacity(columns.len());
            for column in &columns {
                match record.get(*column) {
                    Some(value) => cells.push(self.placeholder(Some(*column), json_value(value))),
                    None => cells.push("default".to_string()),
                }
            }
            rows.push(format!("({})", cells.join(", ")));
        }
        sql.push_str(" values ");
        sql.push_str(&rows.join(", "));

        Ok((sql, table.to_string()))
    }

    fn update(&mut self, object: &Map<String, Value>) -> Result<(String, String), BuildError> {
        let table = required_str(object, "using")?;
        let values = object
            .get("update")
            .and_then(Value::as_object)
            .filter(|values| !values.is_empty())
            .ok_or_else(|| malformed("`update` must be a non-empty object"))?;

        let mut assignments = Vec::with_capacity(values.len());
        for (column, value) in values {
            let p = self.placeholder(Some(column), json_value(value));
            assignments.push(format!("{} = {p}", quote_column(column)));
        }

        let mut sql = format!("update {} set {}", quote_table(table), assignments.join(", "));
        self.where_clause(object, &mut sql)?;
        Ok((sql, table.to_string()))
    }

    fn delete(&mut self, object: &Map<String, Value>) -> Result<(String, String), BuildError> {
        let table = required_str(object, "from")?;
        let mut sql = format!("delete from {}", quote_table(table));
        self.where_clause(object, &mut sql)?;
        Ok((sql, table.to_string()))
    }

    fn where_clause(
        &mut self,
        object: &Map<String, Value>,
        sql: &mut String,
    ) -> Result<(), BuildError> {
        let Some(criteria) = object.get("where") else {
            return Ok(());
        };
        let criteria = criteria
            .as_object()
            .ok_or_else(|| malformed("`where` must be an object"))?;

        let terms = self.conditions(criteria)?;
        if !terms.is_empty() {
            sql.push_str(" where ");
            sql.push_str(&terms.join(" and "));
        }
        Ok(())
    }

    /// Render every condition of a where object; the caller joins them
    /// with `and`.
    fn conditions(&mut self, criteria: &Map<String, Value>) -> Result<Vec<String>, BuildError> {
        let mut terms = Vec::new();
        for (key, value) in criteria {
            match key.as_str() {
                "and" => {
                    for branch in branches(value, "and")? {
                        terms.extend(self.conditions(branch)?);
                    }
                }
                "or" => {
                    let mut alternatives = Vec::new();
                    for branch in branches(value, "or")? {
                        let inner = self.conditions(branch)?;
                        match inner.len() {
                            0 => {}
                            1 => alternatives.extend(inner),
                            _ => alternatives.push(format!("({})", inner.join(" and "))),
                        }
                    }
                    match alternatives.len() {
                        0 => {}
                        1 => terms.extend(alternatives),
                        _ => terms.push(format!("({})", alternatives.join(" or "))),
                    }
                }
                column => terms.extend(self.column_conditions(column, value)?),
            }
        }
        Ok(terms)
    }

    fn column_conditions(
        &mut self,
        column: &str,
        value: &Value,
    ) -> Result<Vec<String>, BuildError> {
        let quoted = quote_column(column);
        match value {
            Value::Null => Ok(vec![format!("{quoted} is null")]),
            Value::Array(items) => Ok(vec![self.membership(column, &quoted, items, "in")]),
            Value::Object(modifiers) => {
                let mut terms = Vec::with_capacity(modifiers.len());
                for (modifier, operand) in modifiers {
                    terms.push(self.modifier(column, &quoted, modifier, operand)?);
                }
                Ok(terms)
            }
            scalar => {
                let p = self.placeholder(Some(column), json_value(scalar));
                Ok(vec![format!("{quoted} = {p}")])
            }
        }
    }

    fn modifier(
        &mut self,
        column: &str,
        quoted: &str,
        modifier: &str,
        operand: &Value,
    ) -> Result<String, BuildError> {
        match (modifier, operand) {
            ("!=" | "<>", Value::Null) => Ok(format!("{quoted} is not null")),
            ("=", Value::Null) => Ok(format!("{quoted} is null")),
            ("in" | "nin", Value::Array(items)) => {
                let keyword = if modifier == "in" { "in" } else { "not in" };
                Ok(self.membership(column, quoted, items, keyword))
            }
            ("in" | "nin", _) => Err(malformed(format!("`{modifier}` expects an array"))),
            (_, Value::Array(_) | Value::Object(_) | Value::Null) => Err(malformed(format!(
                "invalid operand for `{modifier}` on `{column}`"
            ))),
            ("=" | "<" | "<=" | ">" | ">=" | "!=", operand) => {
                let p = self.placeholder(Some(column), json_value(operand));
                Ok(format!("{quoted} {modifier} {p}"))
            }
            ("<>", operand) => {
                let p = self.placeholder(Some(column), json_value(operand));
                Ok(format!("{quoted} != {p}"))
            }
            ("like", operand) => {
                let p = self.placeholder(Some(column), json_value(operand));
                Ok(format!("{quoted} like {p}"))
            }
            ("nlike" | "not like", operand) => {
                let p = self.placeholder(Some(column), json_value(operand));
                Ok(format!("{quoted} not like {p}"))
            }
            (other, _) => Err(malformed(format!("unknown modifier `{other}`"))),
        }
    }

    fn membership(&mut self, column: &str, quoted: &str, items: &[Value], keyword: &str) -> String {
        if items.is_empty() {
            // An empty list matches nothing (`in`) or everything (`not in`).
            return if keyword == "in" { "1 = 0" } else { "1 = 1" }.to_string();
        }
        let placeholders: Vec<String> = items
            .iter()
            .map(|item| self.placeholder(Some(column), json_value(item)))
            .collect();
        format!("{quoted} {keyword} ({})", placeholders.join(", "))
    }
}

fn branches<'a>(value: &'a Value, key: &str) -> Result<Vec<&'a Map<String, Value>>, BuildError> {
    value
        .as_array()
        .ok_or_else(|| malformed(format!("`{key}` must be an array")))?
        .iter()
        .map(|branch| {
            branch
                .as_object()
                .ok_or_else(|| malformed(format!("`{key}` branches must be objects")))
        })
        .collect()
}

fn order_by(object: &Map<String, Value>) -> Result<Option<String>, BuildError> {
    let Some(order) = object.get("orderBy") else {
        return Ok(None);
    };
    let items = order
        .as_array()
        .ok_or_else(|| malformed("`orderBy` must be an array"))?;

    let mut terms = Vec::with_capacity(items.len());
    for item in items {
        let pairs = item
            .as_object()
            .ok_or_else(|| malformed("`orderBy` entries must be objects"))?;
        for (column, direction) in pairs {
            let direction = direction
                .as_str()
                .map(str::to_lowercase)
                .filter(|d| d == "asc" || d == "desc")
                .ok_or_else(|| malformed(format!("invalid sort direction for `{column}`")))?;
            terms.push(format!("{} {direction}", quote_column(column)));
        }
    }
    Ok((!terms.is_empty()).then(|| terms.join(", ")))
}

fn output_columns(returning: &Value) -> Result<String, BuildError> {
    let columns: Vec<&str> = match returning {
        Value::String(column) => vec![column.as_str()],
        Value::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| malformed("`returning` entries must be strings"))
            })
            .collect::<Result<_, _>>()?,
        _ => return Err(malformed("`returning` must be a string or an array")),
    };
    if columns.is_empty() {
        return Err(malformed("`returning` has no columns"));
    }
    Ok(columns
        .iter()
        .map(|c| {
            if *c == "*" {
                "inserted.*".to_string()
            } else {
                format!("inserted.{}", quote_column(c))
            }
        })
        .collect::<Vec<_>>()
        .join(", "))
}

fn required_str<'a>(object: &'a Map<String, Value>, key: &str) -> Result<&'a str, BuildError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| malformed(format!("`{key}` must be a non-empty string")))
}

fn optional_count(object: &Map<String, Value>, key: &str) -> Result<Option<i64>, BuildError> {
    match object.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| malformed(format!("`{key}` must be a non-negative integer"))),
    }
}

/// Convert a JSON value into a binding.
///
/// Arrays and objects are stored as their JSON text.
#[must_use]
pub fn json_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Int(i),
            None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => SqlValue::String(s.clone()),
        Value::Array(_) | Value::Object(_) => SqlValue::String(value.to_string()),
    }
}

/// Bracket-quote one identifier part.
fn quote_ident(ident: &str) -> String {
    format!("[{}]", ident.trim().replace(']', "]]"))
}

/// Quote a possibly qualified and aliased table reference.
fn quote_table(table: &str) -> String {
    let (name, alias) = split_alias(table);
    let quoted = name
        .split('.')
        .map(|part| quote_ident(strip_brackets(part)))
        .collect::<Vec<_>>()
        .join(".");
    match alias {
        Some(alias) => format!("{quoted} as {}", quote_ident(strip_brackets(alias))),
        None => quoted,
    }
}

/// Quote a possibly qualified and aliased column reference.
fn quote_column(column: &str) -> String {
    let (name, alias) = split_alias(column);
    let quoted = name
        .split('.')
        .map(|part| {
            if part == "*" {
                "*".to_string()
            } else {
                quote_ident(strip_brackets(part))
            }
        })
        .collect::<Vec<_>>()
        .join(".");
    match alias {
        Some(alias) => format!("{quoted} as {}", quote_ident(strip_brackets(alias))),
        None => quoted,
    }
}

fn split_alias(reference: &str) -> (&str, Option<&str>) {
    let trimmed = reference.trim();
    let lower = trimmed.to_ascii_lowercase();
    match lower.find(" as ") {
        Some(at) => (trimmed[..at].trim(), Some(trimmed[at + 4..].trim())),
        None => (trimmed, None),
    }
}

fn strip_brackets(part: &str) -> &str {
    let part = part.trim();
    part.strip_prefix('[')
        .and_then(|p| p.strip_suffix(']'))
        .unwrap_or(part)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(statement: Value) -> BuiltQuery {
        MssqlBuilder.build(&statement).unwrap()
    }

    #[test]
    fn test_simple_select() {
        let query = build(json!({"select": ["title", "author", "year"], "from": "books"}));
        assert_eq!(query.sql, "select [title], [author], [year] from [books]");
        assert!(query.bindings.is_empty());
        assert_eq!(query.table.as_deref(), Some("books"));
    }

    #[test]
    fn test_where_operators() {
        let query = build(json!({
            "select": ["*"],
            "from": "people",
            "where": {"age": {">": 18, "<=": 65}, "name": {"like": "B%"}, "nick": null}
        }));
        assert_eq!(
            query.sql,
            "select * from [people] where [age] <= @p0 and [age] > @p1 and [name] like @p2 and [nick] is null"
        );
        assert_eq!(query.columns, vec!["age", "age", "name"]);
        assert_eq!(query.bindings[0], SqlValue::Int(65));
    }

    #[test]
    fn test_or_groups_are_parenthesized() {
        let query = build(json!({
            "select": ["id"],
            "from": "people",
            "where": {"and": [
                {"team": 1},
                {"or": [{"name": "a"}, {"name": "b", "age": {"!=": null}}]}
            ]}
        }));
        assert_eq!(
            query.sql,
            "select [id] from [people] where [team] = @p0 and ([name] = @p1 or ([age] is not null and [name] = @p2))"
        );
        assert_eq!(query.columns, vec!["team", "name", "name"]);
    }

    #[test]
    fn test_in_and_nin() {
        let query = build(json!({
            "select": ["id"],
            "from": "people",
            "where": {"id": {"in": [1, 2]}, "team": {"nin": []}}
        }));
        assert_eq!(
            query.sql,
            "select [id] from [people] where [id] in (@p0, @p1) and 1 = 1"
        );
    }

    #[test]
    fn test_limit_only_uses_top() {
        let query = build(json!({
            "select": ["id"],
            "from": "people",
            "where": {"name": "x"},
            "limit": 5
        }));
        assert_eq!(
            query.sql,
            "select top (@p0) [id] from [people] where [name] = @p1"
        );
        assert_eq!(query.bindings, vec![SqlValue::Int(5), SqlValue::from("x")]);
        assert_eq!(query.columns, vec!["name"]);
    }

    #[test]
    fn test_skip_uses_offset_fetch() {
        let query = build(json!({
            "select": ["id"],
            "from": "people",
            "limit": 10,
            "skip": 20
        }));
        assert_eq!(
            query.sql,
            "select [id] from [people] order by (select null) offset @p0 rows fetch next @p1 rows only"
        );
        assert_eq!(query.bindings, vec![SqlValue::Int(20), SqlValue::Int(10)]);

        let query = build(json!({
            "select": ["id"],
            "from": "people",
            "orderBy": [{"name": "ASC"}, {"id": "desc"}],
            "skip": 20
        }));
        assert_eq!(
            query.sql,
            "select [id] from [people] order by [name] asc, [id] desc offset @p0 rows"
        );
    }

    #[test]
    fn test_insert() {
        let query = build(json!({
            "insert": [{"title": "a", "year": 1999}, {"title": "b"}],
            "into": "books",
            "returning": "id"
        }));
        assert_eq!(
            query.sql,
            "insert into [books] ([title], [year]) output inserted.[id] values (@p0, @p1), (@p2, default)"
        );
        assert_eq!(query.columns, vec!["title", "year", "title"]);
    }

    #[test]
    fn test_update_and_delete() {
        let query = build(json!({
            "update": {"title": "c", "year": null},
            "using": "books",
            "where": {"id": 3}
        }));
        assert_eq!(
            query.sql,
            "update [books] set [title] = @p0, [year] = @p1 where [id] = @p2"
        );
        assert_eq!(query.bindings[1], SqlValue::Null);

        let query = build(json!({"del": true, "from": "books", "where": {"id": 3}}));
        assert_eq!(query.sql, "delete from [books] where [id] = @p0");
    }

    #[test]
    fn test_aggregates() {
        assert_eq!(
            build(json!({"count": true, "from": "books"})).sql,
            "select count(*) as [count] from [books]"
        );
        assert_eq!(
            build(json!({"sum": "price", "from": "books", "where": {"year": 1}})).sql,
            "select sum([price]) as [sum] from [books] where [year] = @p0"
        );
        assert_eq!(
            build(json!({"avg": "price", "from": "books"})).sql,
            "select avg([price]) as [avg] from [books]"
        );
    }

    #[test]
    fn test_identifier_quoting() {
        assert_eq!(quote_table("dbo.books as b"), "[dbo].[books] as [b]");
        assert_eq!(quote_column("b.title"), "[b].[title]");
        assert_eq!(quote_column("odd]name"), "[odd]]name]");
        assert_eq!(quote_column("b.*"), "[b].*");
    }

    #[test]
    fn test_malformed_and_unsupported() {
        assert!(matches!(
            MssqlBuilder.build(&json!({"foo": "bar", "from": "books"})),
            Err(BuildError::Malformed(_))
        ));
        assert!(matches!(
            MssqlBuilder.build(&json!({"select": ["a"], "from": "books", "groupBy": ["a"]})),
            Err(BuildError::NotSupported(_))
        ));
        assert!(matches!(
            MssqlBuilder.build(&json!({"select": ["a"]})),
            Err(BuildError::Malformed(_))
        ));
        assert!(matches!(
            MssqlBuilder.build(&json!({"select": ["a"], "from": "t", "where": {"a": {"~": 1}}})),
            Err(BuildError::Malformed(_))
        ));
        assert!(matches!(
            MssqlBuilder.build(&json!("select 1")),
            Err(BuildError::Malformed(_))
        ));
    }
}
