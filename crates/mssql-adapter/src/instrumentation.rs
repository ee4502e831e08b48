//! Tracing helpers for adapter operations.
//!
//! Every query runs inside an `mssql.query` span carrying these fields:
//!
//! - `db.system`: "mssql"
//! - `db.statement`: SQL statement (sanitized if configured)
//! - `db.operation`: Query operation type (SELECT, INSERT, etc.)
//! - `db.mssql.pool`: index of the leased pool
//!
//! Statements are sanitized before they reach a span so literal values
//! never leak into trace output.

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record, in characters.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace literal values with placeholders.
///
/// Parameter names (`@p12`) and bracketed identifiers are left alone; only
/// quoted strings and free-standing numbers are replaced.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut in_string = false;
    let mut in_identifier = false;

    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    continue;
                }
                in_string = false;
                result.push_str(placeholder);
            }
            continue;
        }

        if in_identifier {
            result.push(c);
            if c == ']' {
                in_identifier = false;
            }
            continue;
        }

        match c {
            '\'' => {
                in_string = true;
                continue;
            }
            '[' => {
                in_identifier = true;
                result.push(c);
                continue;
            }
            _ => {}
        }

        if c.is_ascii_digit()
            && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_' || ch == '@')
        {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    if in_string {
        result.push_str(placeholder);
    }

    result
}

/// Truncate to at most `max_len` characters.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        return s.to_string();
    }
    let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
    format!("{kept}...")
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let sql_upper = sql.trim_start().to_uppercase();

    if sql_upper.starts_with("SELECT") {
        "SELECT"
    } else if sql_upper.starts_with("INSERT") {
        "INSERT"
    } else if sql_upper.starts_with("UPDATE") {
        "UPDATE"
    } else if sql_upper.starts_with("DELETE") {
        "DELETE"
    } else if sql_upper.starts_with("MERGE") {
        "MERGE"
    } else if sql_upper.starts_with("EXEC") {
        "EXECUTE"
    } else if sql_upper.starts_with("WITH") {
        "WITH"
    } else {
        "OTHER"
    }
}

/// Build the span wrapping one query.
pub(crate) fn query_span(
    sanitization: &SanitizationConfig,
    sql: &str,
    pool: usize,
) -> tracing::Span {
    tracing::debug_span!(
        "mssql.query",
        "db.system" = "mssql",
        "db.statement" = %sanitization.sanitize(sql),
        "db.operation" = extract_operation(sql),
        "db.mssql.pool" = pool,
    )
}

/// Helper for timing operations.
#[derive(Debug, Clone)]
pub struct OperationTimer {
    start: std::time::Instant,
    operation: &'static str,
}

impl OperationTimer {
    /// Start timing an operation.
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Get the elapsed time in milliseconds.
    #[must_use]
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Get the operation name.
    #[must_use]
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    /// Log the elapsed time.
    pub fn finish(self, success: bool) {
        tracing::debug!(
            operation = self.operation,
            elapsed_ms = self.elapsed_ms(),
            success,
            "operation finished"
        );
    }
}
