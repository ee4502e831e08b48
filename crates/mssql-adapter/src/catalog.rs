//! Schema metadata cache.
//!
//! The catalog is loaded once when a manager is created and consulted by
//! reference for every bind afterwards. It is never refreshed: columns
//! added or altered after the manager was created are not visible until a
//! new manager is built.

use std::collections::HashMap;

use mssql_adapter_pool::Pool;
use mssql_adapter_types::{Row, SqlValue};
use serde::Serialize;

use crate::error::{Error, Result};

/// Query loading every column of every visible table.
pub const CATALOG_QUERY: &str = "SELECT TABLE_NAME, COLUMN_NAME, DATA_TYPE, NUMERIC_PRECISION, \
     NUMERIC_SCALE, DATETIME_PRECISION, CHARACTER_MAXIMUM_LENGTH \
     FROM INFORMATION_SCHEMA.COLUMNS ORDER BY TABLE_NAME, ORDINAL_POSITION";

/// Metadata of one column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnMeta {
    /// Column name as declared.
    pub name: String,
    /// Engine type name, lower-cased (`nvarchar`, `decimal`, ...).
    pub data_type: String,
    /// Precision of numeric types.
    pub numeric_precision: Option<u8>,
    /// Scale of numeric types.
    pub numeric_scale: Option<u8>,
    /// Fractional seconds precision of temporal types.
    pub datetime_precision: Option<u8>,
    /// Declared width; `-1` stands for `MAX`.
    pub character_max_length: Option<i64>,
}

impl ColumnMeta {
    /// Column with no size information.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into().to_lowercase(),
            numeric_precision: None,
            numeric_scale: None,
            datetime_precision: None,
            character_max_length: None,
        }
    }

    /// Set the declared width.
    #[must_use]
    pub fn with_length(mut self, length: i64) -> Self {
        self.character_max_length = Some(length);
        self
    }

    /// Set numeric precision and scale.
    #[must_use]
    pub fn with_precision(mut self, precision: u8, scale: u8) -> Self {
        self.numeric_precision = Some(precision);
        self.numeric_scale = Some(scale);
        self
    }

    /// Build from one row of [`CATALOG_QUERY`].
    fn from_row(row: &Row) -> Option<(String, Self)> {
        let table: String = row.try_get_by_name("TABLE_NAME")?;
        let name: String = row.try_get_by_name("COLUMN_NAME")?;
        let data_type: String = row.try_get_by_name("DATA_TYPE")?;

        let column = Self {
            name,
            data_type: data_type.to_lowercase(),
            numeric_precision: small(row.get_raw_by_name("NUMERIC_PRECISION")),
            numeric_scale: small(row.get_raw_by_name("NUMERIC_SCALE")),
            datetime_precision: small(row.get_raw_by_name("DATETIME_PRECISION")),
            character_max_length: row.try_get_by_name("CHARACTER_MAXIMUM_LENGTH"),
        };
        Some((table, column))
    }
}

fn small(value: Option<&SqlValue>) -> Option<u8> {
    match value? {
        SqlValue::Int(v) => u8::try_from(*v).ok(),
        SqlValue::Float(v) if *v >= 0.0 && *v <= f64::from(u8::MAX) => Some(*v as u8),
        _ => None,
    }
}

/// Column metadata of every table, keyed case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    tables: HashMap<String, Vec<ColumnMeta>>,
}

impl SchemaCatalog {
    /// Build a catalog from already known tables.
    pub fn from_tables<I, S>(tables: I) -> Self
    where
        I: IntoIterator<Item = (S, Vec<ColumnMeta>)>,
        S: AsRef<str>,
    {
        let tables = tables
            .into_iter()
            .map(|(name, columns)| (name.as_ref().to_lowercase(), columns))
            .collect();
        Self { tables }
    }

    /// Build a catalog from rows shaped like [`CATALOG_QUERY`] output.
    ///
    /// Rows missing a table, column or type name are skipped.
    pub fn from_rows<'a, I>(rows: I) -> Self
    where
        I: IntoIterator<Item = &'a Row>,
    {
        let mut tables: HashMap<String, Vec<ColumnMeta>> = HashMap::new();
        for row in rows {
            match ColumnMeta::from_row(row) {
                Some((table, column)) => {
                    tables.entry(table.to_lowercase()).or_default().push(column);
                }
                None => tracing::debug!(?row, "skipping incomplete catalog row"),
            }
        }
        Self { tables }
    }

    /// Load the catalog through `pool`.
    ///
    /// Runs [`CATALOG_QUERY`] as a prepared statement. Any failure is
    /// reported as [`Error::ConnectionFailed`].
    pub async fn load(pool: &Pool) -> Result<Self> {
        let failed = |e: mssql_adapter_pool::NativeError| {
            Error::ConnectionFailed(format!("could not load schema metadata: {e}"))
        };

        let mut statement = pool
            .native()
            .prepare(CATALOG_QUERY, &[])
            .await
            .map_err(failed)?;
        pool.record_prepare();

        let executed = statement.execute(&[]).await;
        if let Err(e) = statement.unprepare().await {
            pool.record_unprepare_failure();
            tracing::warn!(error = %e, "failed to unprepare catalog query");
        }
        let raw = executed.map_err(failed)?;

        let catalog = Self::from_rows(raw.recordsets.iter().flatten());
        tracing::info!(
            tables = catalog.table_count(),
            pool = pool.index(),
            "schema catalog loaded"
        );
        Ok(catalog)
    }

    /// Columns of `table`, in declaration order.
    ///
    /// Accepts aliased (`users as u`), schema-qualified (`dbo.users`) and
    /// bracketed (`[users]`) names. Unknown tables yield an empty slice.
    #[must_use]
    pub fn lookup(&self, table: &str) -> &[ColumnMeta] {
        self.tables
            .get(&base_table_name(table))
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// One column of `table`, matched case-insensitively.
    #[must_use]
    pub fn column(&self, table: &str, column: &str) -> Option<&ColumnMeta> {
        self.lookup(table)
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(column))
    }

    /// Number of tables known.
    #[must_use]
    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Check if no table is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

/// Reduce a table reference to its lower-cased base name.
#[must_use]
pub fn base_table_name(table: &str) -> String {
    let name = table.trim().split_whitespace().next().unwrap_or_default();
    let name = name.rsplit('.').next().unwrap_or(name);
    name.trim_matches(|c| c == '[' || c == ']').to_lowercase()
}
