//! Query execution.
//!
//! Every query is prepared, executed once and unprepared. The prepared
//! handle is released on every exit path, including when the caller drops
//! the future mid-flight.

use std::sync::Arc;

use mssql_adapter_pool::{NativeStatement, Pool};
use mssql_adapter_types::SqlValue;
use tracing::Instrument;

use crate::binder::{Statement, bind, rewrite_template_placeholders};
use crate::compiler::{CompiledStatement, Meta};
use crate::error::{Error, Result};
use crate::instrumentation::{OperationTimer, query_span};
use crate::manager::{Connection, Manager};
use crate::normalize::{NativeResult, QueryReport};

/// A query as handed to [`send_native_query`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NativeQuery {
    /// SQL text with `@pN` or `$N` placeholders.
    pub sql: String,
    /// Values, one per placeholder.
    pub values: Vec<SqlValue>,
    /// Target table and per-value columns, when known.
    pub statement: Option<Statement>,
    /// Driver options.
    pub meta: Meta,
}

impl NativeQuery {
    /// Create a query with no values.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// Set the values.
    #[must_use]
    pub fn values(mut self, values: Vec<SqlValue>) -> Self {
        self.values = values;
        self
    }

    /// Set the statement.
    #[must_use]
    pub fn statement(mut self, statement: Statement) -> Self {
        self.statement = Some(statement);
        self
    }

    /// Set the meta.
    #[must_use]
    pub fn meta(mut self, meta: Meta) -> Self {
        self.meta = meta;
        self
    }
}

impl From<CompiledStatement> for NativeQuery {
    fn from(compiled: CompiledStatement) -> Self {
        let statement = (!compiled.statement.table_name.is_empty()).then_some(compiled.statement);
        Self {
            sql: compiled.native_query,
            values: compiled.values_to_escape,
            statement,
            meta: compiled.meta,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryPhase {
    Idle,
    ConnectionValidated,
    ParametersBound,
    Prepared,
    Executed,
    Unprepared,
    Normalized,
}

struct PhaseTracker {
    phase: QueryPhase,
}

impl PhaseTracker {
    fn new() -> Self {
        Self {
            phase: QueryPhase::Idle,
        }
    }

    fn advance(&mut self, next: QueryPhase) {
        tracing::trace!(from = ?self.phase, to = ?next, "query phase");
        self.phase = next;
    }
}

/// Owns a prepared handle until it is unprepared.
///
/// If dropped while still holding the handle, the unprepare is spawned on
/// the current runtime.
struct PreparedGuard {
    statement: Option<Box<dyn NativeStatement>>,
    pool: Arc<Pool>,
}

impl PreparedGuard {
    fn new(statement: Box<dyn NativeStatement>, pool: Arc<Pool>) -> Self {
        Self {
            statement: Some(statement),
            pool,
        }
    }

    async fn execute(
        &mut self,
        parameters: &[mssql_adapter_types::TypedParameter],
    ) -> Result<mssql_adapter_pool::RawResult> {
        let statement = self
            .statement
            .as_mut()
            .ok_or_else(|| Error::BadConnection("prepared statement already released".into()))?;
        statement.execute(parameters).await.map_err(Error::from_execute)
    }

    async fn unprepare(mut self) {
        if let Some(statement) = self.statement.take() {
            unprepare(statement, &self.pool).await;
        }
    }
}

impl Drop for PreparedGuard {
    fn drop(&mut self) {
        let Some(statement) = self.statement.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let pool = Arc::clone(&self.pool);
                handle.spawn(async move { unprepare(statement, &pool).await });
            }
            Err(_) => {
                self.pool.record_unprepare_failure();
                tracing::warn!(
                    pool = self.pool.index(),
                    "no runtime to unprepare an abandoned statement"
                );
            }
        }
    }
}

async fn unprepare(statement: Box<dyn NativeStatement>, pool: &Pool) {
    if let Err(e) = statement.unprepare().await {
        pool.record_unprepare_failure();
        tracing::warn!(pool = pool.index(), error = %e, "failed to unprepare statement");
    }
}

/// Reject handles that cannot run a query.
fn validate(connection: &Connection, manager: Option<&Manager>) -> Result<()> {
    if connection.is_released() {
        return Err(Error::BadConnection(
            "connection has already been released".into(),
        ));
    }
    if let Some(manager) = manager {
        if !manager.owns(connection) {
            return Err(Error::BadConnection(
                "connection belongs to a different manager".into(),
            ));
        }
        if manager.is_destroyed() {
            return Err(Error::BadConnection("manager has been destroyed".into()));
        }
    }
    if connection.lease().pool().is_closed() {
        return Err(Error::BadConnection("connection pool is closed".into()));
    }
    Ok(())
}

/// Bind, prepare, execute and unprepare one query.
///
/// `$N` placeholders are rewritten to `@p{N-1}` unless
/// [`Meta::is_using_question_marks`] is set. Bind failures surface as
/// [`Error::Bind`] before anything reaches the server; execution failures
/// as [`Error::QueryFailed`].
pub async fn send_native_query(
    connection: &Connection,
    manager: Option<&Manager>,
    query: NativeQuery,
) -> Result<QueryReport> {
    let mut phase = PhaseTracker::new();
    validate(connection, manager)?;
    phase.advance(QueryPhase::ConnectionValidated);

    let NativeQuery {
        sql,
        values,
        statement,
        meta,
    } = query;

    let sql = if meta.is_using_question_marks {
        sql
    } else {
        rewrite_template_placeholders(&sql, values.len())
    };
    let bound = bind(&sql, statement.as_ref(), &values, connection.catalog())?;
    phase.advance(QueryPhase::ParametersBound);

    let pool = Arc::clone(connection.lease().pool());
    let span = query_span(connection.sanitization(), &bound.sql, pool.index());

    async move {
        let timer = OperationTimer::start("query");

        let prepared = match pool.native().prepare(&bound.sql, &bound.parameters).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!(error = %e, "prepare failed");
                timer.finish(false);
                return Err(Error::from_prepare(e));
            }
        };
        pool.record_prepare();
        phase.advance(QueryPhase::Prepared);

        let mut guard = PreparedGuard::new(prepared, Arc::clone(&pool));
        let executed = guard.execute(&bound.parameters).await;
        phase.advance(QueryPhase::Executed);

        guard.unprepare().await;
        phase.advance(QueryPhase::Unprepared);

        let raw = match executed {
            Ok(raw) => raw,
            Err(e) => {
                tracing::debug!(error = %e, "execute failed");
                timer.finish(false);
                return Err(e);
            }
        };

        let result = NativeResult::from_raw(raw);
        phase.advance(QueryPhase::Normalized);
        tracing::debug!(
            rows = result.rows.len(),
            rows_affected = result.rows_affected,
            "query complete"
        );
        timer.finish(true);

        Ok(QueryReport { result, meta })
    }
    .instrument(span)
    .await
}
