//! Connection configuration.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use mssql_adapter_pool::{FailureNotifier, PoolConfig, PoolFailure};
use serde::Deserialize;

use crate::error::Error;
use crate::instrumentation::SanitizationConfig;

/// Driver options passed through to the native pools.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionOptions {
    /// Require TLS.
    pub encrypt: bool,

    /// Skip server certificate validation.
    pub trust_server_certificate: bool,

    /// Run `SET ARITHABORT ON` on every connection. Always forced on.
    pub enable_arith_abort: bool,

    /// Application name reported to the server.
    pub app_name: Option<String>,

    /// Options this adapter does not interpret.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            encrypt: false,
            trust_server_certificate: true,
            enable_arith_abort: true,
            app_name: None,
            extra: BTreeMap::new(),
        }
    }
}

/// Configuration for a manager.
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Server hostname or IP address.
    pub host: String,

    /// Server port (default: 1433).
    pub port: u16,

    /// SQL login.
    pub user: String,

    /// SQL password.
    pub password: String,

    /// Database name.
    pub database: Option<String>,

    /// Driver options.
    pub options: ConnectionOptions,

    /// Number of native pools (`pool.max`).
    pub pool_max: u32,

    /// Physical connections per native pool.
    pub connections_per_pool: u32,

    /// Per-request timeout.
    pub request_timeout: Duration,

    /// Connect and checkout timeout.
    pub connection_timeout: Duration,

    /// How statements are rendered in traces.
    pub sanitization: SanitizationConfig,

    notifier: Option<FailureNotifier>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let pool = PoolConfig::default();
        Self {
            host: "localhost".to_string(),
            port: 1433,
            user: String::new(),
            password: String::new(),
            database: None,
            options: ConnectionOptions::default(),
            pool_max: pool.max_pools,
            connections_per_pool: pool.connections_per_pool,
            request_timeout: pool.request_timeout,
            connection_timeout: pool.connection_timeout,
            sanitization: SanitizationConfig::default(),
            notifier: None,
        }
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("database", &self.database)
            .field("options", &self.options)
            .field("pool_max", &self.pool_max)
            .field("connections_per_pool", &self.connections_per_pool)
            .field("request_timeout", &self.request_timeout)
            .field("connection_timeout", &self.connection_timeout)
            .field("sanitization", &self.sanitization)
            .field("notifier", &self.notifier.is_some())
            .finish()
    }
}

/// Raw JSON shape accepted by [`ConnectionConfig::from_json`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    host: Option<String>,
    port: Option<RawPort>,
    user: Option<String>,
    password: Option<String>,
    database: Option<String>,
    options: Option<ConnectionOptions>,
    pool: Option<RawPool>,
    /// Milliseconds.
    request_timeout: Option<u64>,
    /// Milliseconds.
    connection_timeout: Option<u64>,
    #[serde(flatten)]
    unknown: BTreeMap<String, serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawPort {
    Number(u64),
    Text(String),
}

#[derive(Deserialize)]
struct RawPool {
    max: Option<u32>,
    #[serde(rename = "connectionsPerPool")]
    connections_per_pool: Option<u32>,
}

impl ConnectionConfig {
    /// Create a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration object.
    ///
    /// Keys follow the camelCase surface: `host`, `port`, `user`,
    /// `password`, `database`, `options`, `pool.max`, `requestTimeout` and
    /// `connectionTimeout` (both in milliseconds). Missing keys keep their
    /// defaults; unknown keys are ignored.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let value: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| Error::Malformed(format!("invalid connection config: {e}")))?;
        Self::from_value(value)
    }

    /// Build a configuration from an already parsed JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self, Error> {
        if !value.is_object() {
            return Err(Error::Malformed(format!(
                "connection config must be an object, got `{value}`"
            )));
        }
        let raw: RawConfig = serde_json::from_value(value)
            .map_err(|e| Error::Malformed(format!("invalid connection config: {e}")))?;

        let mut config = Self::default();

        if let Some(host) = raw.host.filter(|h| !h.is_empty()) {
            config.host = host;
        }

        match raw.port {
            None | Some(RawPort::Number(0)) => {}
            Some(RawPort::Number(n)) => {
                config.port = u16::try_from(n)
                    .map_err(|_| Error::Malformed(format!("invalid port: {n}")))?;
            }
            Some(RawPort::Text(text)) if text.trim().is_empty() => {}
            Some(RawPort::Text(text)) => {
                config.port = text
                    .trim()
                    .parse()
                    .map_err(|_| Error::Malformed(format!("invalid port: {text}")))?;
            }
        }

        if let Some(user) = raw.user {
            config.user = user;
        }
        if let Some(password) = raw.password {
            config.password = password;
        }
        config.database = raw.database;

        if let Some(options) = raw.options {
            config.options = options;
        }
        if let Some(pool) = raw.pool {
            if let Some(max) = pool.max {
                config.pool_max = max;
            }
            if let Some(n) = pool.connections_per_pool {
                config.connections_per_pool = n;
            }
        }
        if let Some(ms) = raw.request_timeout {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = raw.connection_timeout {
            config.connection_timeout = Duration::from_millis(ms);
        }

        for key in raw.unknown.keys() {
            tracing::debug!(key = %key, "ignoring unknown connection config key");
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a connection string into configuration.
    ///
    /// Supports ADO.NET-style connection strings:
    /// ```text
    /// Server=localhost;Database=mydb;User Id=sa;Password=secret;
    /// ```
    pub fn from_connection_string(conn_str: &str) -> Result<Self, Error> {
        let mut config = Self::default();

        for part in conn_str.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| Error::Malformed(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = value.trim();

            match key.as_str() {
                "server" | "data source" | "host" => {
                    let value = value.strip_prefix("tcp:").unwrap_or(value);
                    if let Some((host, port)) = value.split_once(',') {
                        config.host = host.to_string();
                        config.port = port
                            .parse()
                            .map_err(|_| Error::Malformed(format!("invalid port: {port}")))?;
                    } else {
                        config.host = value.to_string();
                    }
                }
                "port" => {
                    config.port = value
                        .parse()
                        .map_err(|_| Error::Malformed(format!("invalid port: {value}")))?;
                }
                "database" | "initial catalog" => {
                    config.database = Some(value.to_string());
                }
                "user id" | "uid" | "user" => {
                    config.user = value.to_string();
                }
                "password" | "pwd" => {
                    config.password = value.to_string();
                }
                "application name" | "app" => {
                    config.options.app_name = Some(value.to_string());
                }
                "connect timeout" | "connection timeout" => {
                    config.connection_timeout = Duration::from_secs(parse_secs(value)?);
                }
                "command timeout" | "request timeout" => {
                    config.request_timeout = Duration::from_secs(parse_secs(value)?);
                }
                "max pool size" | "pool max" => {
                    config.pool_max = value
                        .parse()
                        .map_err(|_| Error::Malformed(format!("invalid pool size: {value}")))?;
                }
                "trustservercertificate" | "trust server certificate" => {
                    config.options.trust_server_certificate = parse_flag(value);
                }
                "encrypt" => {
                    config.options.encrypt = parse_flag(value);
                }
                _ => {
                    tracing::debug!(
                        key = key,
                        "ignoring unknown connection string option"
                    );
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Set the server host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the server port.
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the login.
    #[must_use]
    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Set the password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    /// Set the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the number of native pools.
    #[must_use]
    pub fn pool_max(mut self, max: u32) -> Self {
        self.pool_max = max;
        self
    }

    /// Set the per-pool connection cap.
    #[must_use]
    pub fn connections_per_pool(mut self, count: u32) -> Self {
        self.connections_per_pool = count;
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set trust server certificate option.
    #[must_use]
    pub fn trust_server_certificate(mut self, trust: bool) -> Self {
        self.options.trust_server_certificate = trust;
        self
    }

    /// Set statement sanitization for traces.
    #[must_use]
    pub fn sanitization(mut self, sanitization: SanitizationConfig) -> Self {
        self.sanitization = sanitization;
        self
    }

    /// Register a callback for asynchronous pool failures.
    #[must_use]
    pub fn on_unexpected_failure<F>(mut self, callback: F) -> Self
    where
        F: Fn(&PoolFailure) + Send + Sync + 'static,
    {
        self.notifier = Some(Arc::new(callback));
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::Malformed("host must not be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::Malformed("port must be greater than 0".into()));
        }
        self.pool_config()
            .validate()
            .map_err(|e| Error::Malformed(e.to_string()))
    }

    /// Pool settings derived from this configuration.
    #[must_use]
    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig::new()
            .max_pools(self.pool_max)
            .connections_per_pool(self.connections_per_pool)
            .connection_timeout(self.connection_timeout)
            .request_timeout(self.request_timeout)
    }

    /// The notifier every native pool reports to.
    ///
    /// Failures are always logged; the registered callback, if any, is
    /// invoked afterwards.
    #[must_use]
    pub fn failure_notifier(&self) -> FailureNotifier {
        let callback = self.notifier.clone();
        Arc::new(move |failure: &PoolFailure| {
            tracing::warn!(
                pool = failure.pool_index,
                error = %failure.message,
                "unexpected failure in database manager"
            );
            if let Some(callback) = &callback {
                callback(failure);
            }
        })
    }

    /// Settings for the tiberius backend.
    #[cfg(feature = "tds")]
    #[must_use]
    pub fn tds_settings(&self) -> mssql_adapter_pool::TdsSettings {
        mssql_adapter_pool::TdsSettings {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            application_name: self
                .options
                .app_name
                .clone()
                .unwrap_or_else(|| "mssql-adapter".to_string()),
            encrypt: self.options.encrypt,
            trust_server_certificate: self.options.trust_server_certificate,
            arith_abort: true,
            connections_per_pool: self.connections_per_pool,
            connection_timeout: self.connection_timeout,
            request_timeout: self.request_timeout,
        }
    }

    /// Force dialect options the adapter depends on.
    pub(crate) fn normalized(mut self) -> Self {
        self.options.enable_arith_abort = true;
        self
    }
}

fn parse_secs(value: &str) -> Result<u64, Error> {
    value
        .parse()
        .map_err(|_| Error::Malformed(format!("invalid timeout: {value}")))
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes") || value == "1"
}
