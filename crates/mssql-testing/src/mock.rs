//! Scripted native backend.
//!
//! Every pool built by a [`MockConnector`] shares one state, so a test can
//! keep a clone of the connector and inspect what the adapter did.
//!
//! ```rust,ignore
//! let connector = MockConnector::new()
//!     .with_catalog(vec![catalog_row("books", "title", "nvarchar", Some(255))])
//!     .on_execute(|sql, _params| Ok(RawResult::default()));
//! let manager = create_manager_with(config, &connector).await?;
//! assert_eq!(connector.prepare_count(), 1);
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use mssql_adapter_pool::{
    Connector, FailureNotifier, NativeError, NativeErrorKind, NativePool, NativeStatement,
    PoolFailure, RawResult,
};
use mssql_adapter_types::{Column, Row, SqlValue, TypedParameter};
use parking_lot::Mutex;

/// Marker identifying the schema catalog query.
const CATALOG_MARKER: &str = "INFORMATION_SCHEMA.COLUMNS";

/// Answers execute calls: receives the prepared SQL and the parameters.
pub type ExecuteHandler =
    Arc<dyn Fn(&str, &[TypedParameter]) -> Result<RawResult, NativeError> + Send + Sync>;

/// One prepare request seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedCall {
    /// Pool the statement was prepared on.
    pub pool_index: usize,
    /// SQL text.
    pub sql: String,
    /// Parameters as sent with the prepare request.
    pub parameters: Vec<TypedParameter>,
}

impl PreparedCall {
    /// The declaration list, as the server would receive it.
    #[must_use]
    pub fn declarations(&self) -> Option<String> {
        mssql_adapter_types::declaration_list(&self.parameters)
    }
}

#[derive(Default)]
struct MockState {
    catalog: Mutex<Vec<Row>>,
    handler: Mutex<Option<ExecuteHandler>>,
    connect_error: Mutex<Option<NativeError>>,
    prepare_error: Mutex<Option<NativeError>>,
    unprepare_error: Mutex<Option<NativeError>>,
    execute_delay: Mutex<Option<Duration>>,
    notifiers: Mutex<Vec<(usize, FailureNotifier)>>,
    prepared: Mutex<Vec<PreparedCall>>,
    pools_created: AtomicUsize,
    connects: AtomicUsize,
    prepares: AtomicUsize,
    executes: AtomicUsize,
    unprepares: AtomicUsize,
    closes: AtomicUsize,
}

/// A [`Connector`] whose pools never touch the network.
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<MockState>,
}

impl MockConnector {
    /// Create a backend with an empty catalog that answers every execute
    /// with an empty result.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rows returned for the schema catalog query.
    #[must_use]
    pub fn with_catalog(self, rows: Vec<Row>) -> Self {
        *self.state.catalog.lock() = rows;
        self
    }

    /// Answer every other execute with `handler`.
    #[must_use]
    pub fn on_execute<F>(self, handler: F) -> Self
    where
        F: Fn(&str, &[TypedParameter]) -> Result<RawResult, NativeError> + Send + Sync + 'static,
    {
        *self.state.handler.lock() = Some(Arc::new(handler));
        self
    }

    /// Make connects fail with `error` until cleared with `None`.
    pub fn fail_connect(&self, error: Option<NativeError>) {
        *self.state.connect_error.lock() = error;
    }

    /// Make prepares fail with `error` until cleared with `None`.
    pub fn fail_prepare(&self, error: Option<NativeError>) {
        *self.state.prepare_error.lock() = error;
    }

    /// Make unprepares fail with `error` until cleared with `None`.
    pub fn fail_unprepare(&self, error: Option<NativeError>) {
        *self.state.unprepare_error.lock() = error;
    }

    /// Delay every execute by `delay`.
    pub fn set_execute_delay(&self, delay: Option<Duration>) {
        *self.state.execute_delay.lock() = delay;
    }

    /// Report an asynchronous failure from pool `index`.
    ///
    /// Returns `false` if no such pool was created.
    pub fn emit_error(&self, index: usize, message: &str) -> bool {
        let notifier = self
            .state
            .notifiers
            .lock()
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, n)| Arc::clone(n));
        match notifier {
            Some(notifier) => {
                notifier(&PoolFailure::new(index, message));
                true
            }
            None => false,
        }
    }

    /// Every prepare request, in order.
    #[must_use]
    pub fn prepared(&self) -> Vec<PreparedCall> {
        self.state.prepared.lock().clone()
    }

    /// The last prepare request that was not the catalog query.
    #[must_use]
    pub fn last_prepared(&self) -> Option<PreparedCall> {
        self.state
            .prepared
            .lock()
            .iter()
            .rev()
            .find(|call| !call.sql.contains(CATALOG_MARKER))
            .cloned()
    }

    /// Native pools built so far.
    #[must_use]
    pub fn pools_created(&self) -> usize {
        self.state.pools_created.load(Ordering::SeqCst)
    }

    /// Successful connects.
    #[must_use]
    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Successful prepares.
    #[must_use]
    pub fn prepare_count(&self) -> usize {
        self.state.prepares.load(Ordering::SeqCst)
    }

    /// Executes started.
    #[must_use]
    pub fn execute_count(&self) -> usize {
        self.state.executes.load(Ordering::SeqCst)
    }

    /// Unprepare calls, failed ones included.
    #[must_use]
    pub fn unprepare_count(&self) -> usize {
        self.state.unprepares.load(Ordering::SeqCst)
    }

    /// Prepared handles not yet unprepared.
    #[must_use]
    pub fn open_statements(&self) -> usize {
        self.prepare_count()
            .saturating_sub(self.unprepare_count())
    }

    /// Native pools closed.
    #[must_use]
    pub fn close_count(&self) -> usize {
        self.state.closes.load(Ordering::SeqCst)
    }
}

impl Connector for MockConnector {
    fn create_pool(&self, index: usize, notifier: FailureNotifier) -> Arc<dyn NativePool> {
        self.state.pools_created.fetch_add(1, Ordering::SeqCst);
        self.state.notifiers.lock().push((index, notifier));
        Arc::new(MockPool {
            index,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        })
    }
}

struct MockPool {
    index: usize,
    state: Arc<MockState>,
    closed: AtomicBool,
}

#[async_trait]
impl NativePool for MockPool {
    async fn connect(&self) -> Result<(), NativeError> {
        if let Some(error) = self.state.connect_error.lock().clone() {
            return Err(error);
        }
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(pool = self.index, "mock pool connected");
        Ok(())
    }

    async fn prepare(
        &self,
        sql: &str,
        params: &[TypedParameter],
    ) -> Result<Box<dyn NativeStatement>, NativeError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(NativeError::new(
                NativeErrorKind::Connection,
                "pool is closed",
            ));
        }
        self.state.prepared.lock().push(PreparedCall {
            pool_index: self.index,
            sql: sql.to_string(),
            parameters: params.to_vec(),
        });
        if let Some(error) = self.state.prepare_error.lock().clone() {
            return Err(error);
        }
        self.state.prepares.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockStatement {
            sql: sql.to_string(),
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closes.fetch_add(1, Ordering::SeqCst);
        }
    }
}

struct MockStatement {
    sql: String,
    state: Arc<MockState>,
}

#[async_trait]
impl NativeStatement for MockStatement {
    async fn execute(&mut self, params: &[TypedParameter]) -> Result<RawResult, NativeError> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.state.execute_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.sql.contains(CATALOG_MARKER) {
            let rows = self.state.catalog.lock().clone();
            return Ok(RawResult {
                recordsets: vec![rows],
                rows_affected: 0,
            });
        }

        let handler = self.state.handler.lock().clone();
        match handler {
            Some(handler) => handler(&self.sql, params),
            None => Ok(RawResult::default()),
        }
    }

    async fn unprepare(self: Box<Self>) -> Result<(), NativeError> {
        self.state.unprepares.fetch_add(1, Ordering::SeqCst);
        match self.state.unprepare_error.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Build one row shaped like the schema catalog query output.
#[must_use]
pub fn catalog_row(table: &str, column: &str, data_type: &str, max_length: Option<i64>) -> Row {
    Row::new(
        Column::list([
            "TABLE_NAME",
            "COLUMN_NAME",
            "DATA_TYPE",
            "NUMERIC_PRECISION",
            "NUMERIC_SCALE",
            "DATETIME_PRECISION",
            "CHARACTER_MAXIMUM_LENGTH",
        ]),
        vec![
            table.into(),
            column.into(),
            data_type.into(),
            SqlValue::Null,
            SqlValue::Null,
            SqlValue::Null,
            max_length.into(),
        ],
    )
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mssql_adapter_types::WireType;

    fn pool(connector: &MockConnector) -> Arc<dyn NativePool> {
        connector.create_pool(0, Arc::new(|_: &PoolFailure| {}))
    }

    #[tokio::test]
    async fn test_catalog_query_returns_catalog_rows() {
        let connector =
            MockConnector::new().with_catalog(vec![catalog_row("books", "title", "nvarchar", Some(255))]);
        let pool = pool(&connector);
        pool.connect().await.unwrap();

        let mut statement = pool
            .prepare("SELECT * FROM INFORMATION_SCHEMA.COLUMNS", &[])
            .await
            .unwrap();
        let raw = statement.execute(&[]).await.unwrap();
        statement.unprepare().await.unwrap();

        assert_eq!(raw.recordsets[0].len(), 1);
        assert_eq!(connector.connect_count(), 1);
        assert_eq!(connector.open_statements(), 0);
    }

    #[tokio::test]
    async fn test_handler_sees_parameters() {
        let connector = MockConnector::new().on_execute(|sql, params| {
            assert_eq!(sql, "select @p0");
            Ok(RawResult {
                recordsets: vec![vec![Row::from_pairs([("v", params[0].value().clone())])]],
                rows_affected: 0,
            })
        });
        let pool = pool(&connector);
        let params = [TypedParameter::new(0, WireType::Int, SqlValue::Int(7))];

        let mut statement = pool.prepare("select @p0", &params).await.unwrap();
        let raw = statement.execute(&params).await.unwrap();
        assert_eq!(raw.recordsets[0][0].get_raw(0), Some(&SqlValue::Int(7)));
        assert_eq!(connector.open_statements(), 1);
        assert_eq!(
            connector.last_prepared().unwrap().declarations().as_deref(),
            Some("@p0 int")
        );
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let connector = MockConnector::new();
        let pool = pool(&connector);

        connector.fail_connect(Some(NativeError::new(NativeErrorKind::Connection, "refused")));
        assert!(pool.connect().await.is_err());
        connector.fail_connect(None);
        pool.connect().await.unwrap();

        connector.fail_prepare(Some(NativeError::new(NativeErrorKind::Prepare, "bad")));
        assert!(pool.prepare("select 1", &[]).await.is_err());
        assert_eq!(connector.prepare_count(), 0);
        assert_eq!(connector.prepared().len(), 1);
    }

    #[test]
    fn test_emit_error_reaches_notifier() {
        let connector = MockConnector::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _pool = connector.create_pool(
            3,
            Arc::new(move |failure: &PoolFailure| sink.lock().push(failure.clone())),
        );

        assert!(connector.emit_error(3, "socket reset"));
        assert!(!connector.emit_error(4, "nobody listens"));
        assert_eq!(seen.lock().as_slice(), &[PoolFailure::new(3, "socket reset")]);
    }
}
