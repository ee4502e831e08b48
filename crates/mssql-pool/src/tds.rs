//! Native backend over tiberius and bb8.
//!
//! Every slot of the pool set gets its own bb8 pool of tiberius clients.
//! Prepared statements use the server's `sp_prepare` / `sp_execute` /
//! `sp_unprepare` procedures; the handle is tied to the physical connection
//! it was created on, so a [`TdsStatement`] keeps that connection checked
//! out until it is unprepared.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bb8::{ErrorSink, ManageConnection, PooledConnection, RunError};
use mssql_adapter_types::{Column, Row, SqlValue, TypedParameter, declaration_list};
use parking_lot::Mutex;
use tiberius::{AuthMethod, Client, ColumnData, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::native::{
    Connector, FailureNotifier, NativeError, NativeErrorKind, NativePool, NativeStatement,
    PoolFailure, RawResult, ServerMessage,
};

type TdsClient = Client<Compat<TcpStream>>;

/// Maximum number of connect attempts when the server redirects the client.
const MAX_ROUTING_ATTEMPTS: u8 = 2;

/// Column name carrying the affected-row count of an execute batch.
const ROWS_AFFECTED_COLUMN: &str = "__rows_affected";

/// Settings for the tiberius backend.
#[derive(Clone)]
pub struct TdsSettings {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// SQL login.
    pub user: String,
    /// SQL password.
    pub password: String,
    /// Initial database.
    pub database: Option<String>,
    /// Application name reported to the server.
    pub application_name: String,
    /// Require TLS for the whole session.
    pub encrypt: bool,
    /// Skip server certificate validation.
    pub trust_server_certificate: bool,
    /// Run `SET ARITHABORT ON` on every new connection.
    pub arith_abort: bool,
    /// Physical connections per native pool.
    pub connections_per_pool: u32,
    /// Connect and checkout timeout.
    pub connection_timeout: Duration,
    /// Per-request timeout.
    pub request_timeout: Duration,
}

impl Default for TdsSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            database: None,
            application_name: "mssql-adapter".into(),
            encrypt: false,
            trust_server_certificate: true,
            arith_abort: true,
            connections_per_pool: 10,
            connection_timeout: Duration::from_secs(15),
            request_timeout: Duration::from_secs(15),
        }
    }
}

impl fmt::Debug for TdsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TdsSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("encrypt", &self.encrypt)
            .field("arith_abort", &self.arith_abort)
            .field("connections_per_pool", &self.connections_per_pool)
            .finish_non_exhaustive()
    }
}

impl TdsSettings {
    fn client_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.authentication(AuthMethod::sql_server(&self.user, &self.password));
        config.application_name(&self.application_name);
        if let Some(db) = self.database.as_deref().filter(|db| !db.is_empty()) {
            config.database(db);
        }
        config.encryption(if self.encrypt {
            EncryptionLevel::Required
        } else {
            EncryptionLevel::NotSupported
        });
        if self.trust_server_certificate {
            config.trust_cert();
        }
        config
    }
}

/// Builds [`TdsPool`]s from shared settings.
#[derive(Debug, Clone)]
pub struct TdsConnector {
    settings: Arc<TdsSettings>,
}

impl TdsConnector {
    /// Create a connector.
    #[must_use]
    pub fn new(settings: TdsSettings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

impl Connector for TdsConnector {
    fn create_pool(&self, index: usize, notifier: FailureNotifier) -> Arc<dyn NativePool> {
        Arc::new(TdsPool {
            index,
            settings: Arc::clone(&self.settings),
            notifier,
            inner: Mutex::new(None),
        })
    }
}

/// bb8 manager producing tiberius clients.
struct TdsConnectionManager {
    settings: Arc<TdsSettings>,
}

#[async_trait]
impl ManageConnection for TdsConnectionManager {
    type Connection = TdsClient;
    type Error = tiberius::error::Error;

    async fn connect(&self) -> Result<TdsClient, Self::Error> {
        let mut config = self.settings.client_config();
        let mut attempts = 0;

        loop {
            attempts += 1;
            let tcp = TcpStream::connect(config.get_addr()).await?;
            tcp.set_nodelay(true)?;

            match Client::connect(config.clone(), tcp.compat_write()).await {
                Ok(mut client) => {
                    if self.settings.arith_abort {
                        client
                            .simple_query("SET ARITHABORT ON")
                            .await?
                            .into_results()
                            .await?;
                    }
                    tracing::trace!(host = %self.settings.host, attempts, "physical connection opened");
                    return Ok(client);
                }
                Err(tiberius::error::Error::Routing { host, port })
                    if attempts < MAX_ROUTING_ATTEMPTS =>
                {
                    tracing::info!(host = %host, port, "following server routing redirect");
                    config.host(&host);
                    config.port(port);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn is_valid(&self, conn: &mut TdsClient) -> Result<(), Self::Error> {
        conn.simple_query("SELECT 1").await?.into_row().await?;
        Ok(())
    }

    fn has_broken(&self, _conn: &mut TdsClient) -> bool {
        false
    }
}

/// Forwards background connection errors to the failure notifier.
#[derive(Clone)]
struct NotifierSink {
    index: usize,
    notifier: FailureNotifier,
}

impl fmt::Debug for NotifierSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotifierSink")
            .field("index", &self.index)
            .finish_non_exhaustive()
    }
}

impl ErrorSink<tiberius::error::Error> for NotifierSink {
    fn sink(&self, error: tiberius::error::Error) {
        tracing::warn!(pool = self.index, error = %error, "native pool reported a failure");
        (self.notifier)(&PoolFailure::new(self.index, error.to_string()));
    }

    fn boxed_clone(&self) -> Box<dyn ErrorSink<tiberius::error::Error>> {
        Box::new(self.clone())
    }
}

/// One bb8 pool of tiberius clients.
pub struct TdsPool {
    index: usize,
    settings: Arc<TdsSettings>,
    notifier: FailureNotifier,
    inner: Mutex<Option<bb8::Pool<TdsConnectionManager>>>,
}

impl TdsPool {
    fn current(&self) -> Result<bb8::Pool<TdsConnectionManager>, NativeError> {
        self.inner
            .lock()
            .clone()
            .ok_or_else(|| NativeError::new(NativeErrorKind::Connection, "pool is not connected"))
    }

    async fn checkout(
        &self,
    ) -> Result<PooledConnection<'static, TdsConnectionManager>, NativeError> {
        self.current()?
            .get_owned()
            .await
            .map_err(|e| match e {
                RunError::User(e) => native_error(NativeErrorKind::Connection, e),
                RunError::TimedOut => NativeError::new(
                    NativeErrorKind::Timeout,
                    "timed out waiting for a pooled connection",
                ),
            })
    }
}

#[async_trait]
impl NativePool for TdsPool {
    async fn connect(&self) -> Result<(), NativeError> {
        if self.inner.lock().is_some() {
            return Ok(());
        }

        let manager = TdsConnectionManager {
            settings: Arc::clone(&self.settings),
        };
        let sink = NotifierSink {
            index: self.index,
            notifier: Arc::clone(&self.notifier),
        };
        let pool = bb8::Pool::builder()
            .max_size(self.settings.connections_per_pool)
            .connection_timeout(self.settings.connection_timeout)
            .test_on_check_out(true)
            .error_sink(Box::new(sink))
            .build(manager)
            .await
            .map_err(|e| native_error(NativeErrorKind::Connection, e))?;

        // Probe one connection so an unreachable server fails the connect.
        {
            let _probe = pool.get().await.map_err(|e| match e {
                RunError::User(e) => native_error(NativeErrorKind::Connection, e),
                RunError::TimedOut => NativeError::new(
                    NativeErrorKind::Connection,
                    format!(
                        "could not reach {}:{} within {:?}",
                        self.settings.host, self.settings.port, self.settings.connection_timeout
                    ),
                ),
            })?;
        }

        *self.inner.lock() = Some(pool);
        Ok(())
    }

    async fn prepare(
        &self,
        sql: &str,
        params: &[TypedParameter],
    ) -> Result<Box<dyn NativeStatement>, NativeError> {
        let mut conn = self.checkout().await?;

        let mut query = Query::new(
            "DECLARE @handle int; \
             EXEC sp_prepare @handle OUTPUT, @P1, @P2; \
             SELECT @handle AS [handle];",
        );
        query.bind(declaration_list(params));
        query.bind(sql.to_string());

        let recordsets = run(&mut conn, query, self.settings.request_timeout)
            .await
            .map_err(|e| relabel(e, NativeErrorKind::Prepare))?;

        let handle = recordsets
            .iter()
            .flatten()
            .find_map(|row| row.try_get::<i32, _>("handle").ok().flatten())
            .ok_or_else(|| {
                NativeError::new(NativeErrorKind::Prepare, "server returned no statement handle")
            })?;

        tracing::trace!(pool = self.index, handle, "statement prepared");
        Ok(Box::new(TdsStatement {
            conn,
            handle,
            request_timeout: self.settings.request_timeout,
        }))
    }

    async fn close(&self) {
        // Dropping the last pool handle closes idle connections; checked out
        // ones close when their statements finish.
        if self.inner.lock().take().is_some() {
            tracing::debug!(pool = self.index, "bb8 pool dropped");
        }
    }
}

/// A statement handle plus the connection it lives on.
pub struct TdsStatement {
    conn: PooledConnection<'static, TdsConnectionManager>,
    handle: i32,
    request_timeout: Duration,
}

#[async_trait]
impl NativeStatement for TdsStatement {
    async fn execute(&mut self, params: &[TypedParameter]) -> Result<RawResult, NativeError> {
        let mut sql = String::from("EXEC sp_execute @P1");
        for n in 0..params.len() {
            sql.push_str(&format!(", @P{}", n + 2));
        }
        sql.push_str(&format!("; SELECT @@ROWCOUNT AS [{ROWS_AFFECTED_COLUMN}];"));

        let mut query = Query::new(sql);
        query.bind(self.handle);
        for param in params {
            bind_value(&mut query, param.value());
        }

        let mut recordsets = run(&mut self.conn, query, self.request_timeout).await?;

        let rows_affected = recordsets
            .pop()
            .and_then(|last| last.into_iter().next())
            .and_then(|row| row.try_get::<i32, _>(ROWS_AFFECTED_COLUMN).ok().flatten())
            .map_or(0, |n| u64::try_from(n).unwrap_or(0));

        Ok(RawResult {
            recordsets: recordsets.iter().map(|set| convert_recordset(set)).collect(),
            rows_affected,
        })
    }

    async fn unprepare(mut self: Box<Self>) -> Result<(), NativeError> {
        let mut query = Query::new("EXEC sp_unprepare @P1");
        query.bind(self.handle);
        run(&mut self.conn, query, self.request_timeout)
            .await
            .map_err(|e| relabel(e, NativeErrorKind::Unprepare))?;
        tracing::trace!(handle = self.handle, "statement unprepared");
        Ok(())
    }
}

async fn run(
    conn: &mut TdsClient,
    query: Query<'_>,
    timeout: Duration,
) -> Result<Vec<Vec<tiberius::Row>>, NativeError> {
    let request = async { query.query(conn).await?.into_results().await };
    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(recordsets)) => Ok(recordsets),
        Ok(Err(e)) => Err(native_error(NativeErrorKind::Request, e)),
        Err(_) => Err(NativeError::new(
            NativeErrorKind::Timeout,
            format!("request exceeded {timeout:?}"),
        )),
    }
}

fn native_error(kind: NativeErrorKind, error: tiberius::error::Error) -> NativeError {
    match error {
        tiberius::error::Error::Server(token) => NativeError::server(
            kind,
            ServerMessage {
                number: token.code(),
                state: token.state(),
                class: token.class(),
                message: token.message().to_string(),
                procedure: token.procedure().to_string(),
                line: token.line(),
            },
        ),
        other => NativeError::new(kind, other.to_string()),
    }
}

/// Move a request error into another phase; timeouts keep their kind.
fn relabel(error: NativeError, kind: NativeErrorKind) -> NativeError {
    if error.kind() != NativeErrorKind::Request {
        return error;
    }
    let preceding = error.preceding().to_vec();
    let relabeled = match error.number() {
        Some(number) => NativeError::server(kind, ServerMessage::new(number, error.message())),
        None => NativeError::new(kind, error.message()),
    };
    relabeled.with_preceding(preceding)
}

fn bind_value(query: &mut Query<'_>, value: &SqlValue) {
    match value {
        SqlValue::Null => query.bind(Option::<String>::None),
        SqlValue::Bool(b) => query.bind(*b),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Float(v) => query.bind(*v),
        SqlValue::String(s) => query.bind(s.clone()),
        SqlValue::Binary(b) => query.bind(b.to_vec()),
    }
}

fn convert_recordset(rows: &[tiberius::Row]) -> Vec<Row> {
    let Some(first) = rows.first() else {
        return Vec::new();
    };
    let columns = Column::list(first.columns().iter().map(|c| c.name().to_string()));
    rows.iter()
        .map(|row| Row::new(Arc::clone(&columns), convert_row(row)))
        .collect()
}

fn convert_row(row: &tiberius::Row) -> Vec<SqlValue> {
    row.cells()
        .enumerate()
        .map(|(i, (_, data))| match data {
            ColumnData::DateTime(Some(_))
            | ColumnData::SmallDateTime(Some(_))
            | ColumnData::DateTime2(Some(_)) => row
                .try_get::<chrono::NaiveDateTime, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, |dt| {
                    SqlValue::String(dt.format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
                }),
            ColumnData::DateTimeOffset(Some(_)) => row
                .try_get::<chrono::DateTime<chrono::Utc>, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, |dt| SqlValue::String(dt.to_rfc3339())),
            ColumnData::Date(Some(_)) => row
                .try_get::<chrono::NaiveDate, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, |d| {
                    SqlValue::String(d.format("%Y-%m-%d").to_string())
                }),
            ColumnData::Time(Some(_)) => row
                .try_get::<chrono::NaiveTime, _>(i)
                .ok()
                .flatten()
                .map_or(SqlValue::Null, |t| {
                    SqlValue::String(t.format("%H:%M:%S%.f").to_string())
                }),
            other => convert_column_data(other),
        })
        .collect()
}

fn convert_column_data(data: &ColumnData<'_>) -> SqlValue {
    match data {
        ColumnData::Bit(Some(b)) => SqlValue::Bool(*b),
        ColumnData::U8(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I16(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I32(Some(v)) => SqlValue::Int(i64::from(*v)),
        ColumnData::I64(Some(v)) => SqlValue::Int(*v),
        ColumnData::F32(Some(v)) => SqlValue::Float(f64::from(*v)),
        ColumnData::F64(Some(v)) => SqlValue::Float(*v),
        ColumnData::Numeric(Some(n)) if n.scale() == 0 => i64::try_from(n.value())
            .map_or_else(|_| SqlValue::Float(n.value() as f64), SqlValue::Int),
        ColumnData::Numeric(Some(n)) => {
            SqlValue::Float(n.value() as f64 / 10f64.powi(i32::from(n.scale())))
        }
        ColumnData::String(Some(s)) => SqlValue::String(s.to_string()),
        ColumnData::Guid(Some(g)) => SqlValue::String(g.to_string()),
        ColumnData::Binary(Some(b)) => SqlValue::Binary(bytes::Bytes::copy_from_slice(b)),
        ColumnData::Xml(Some(xml)) => SqlValue::String(xml.to_string()),
        _ => SqlValue::Null,
    }
}
