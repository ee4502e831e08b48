//! Connection manager.
//!
//! A [`Manager`] owns a [`PoolSet`] and the [`SchemaCatalog`] loaded when it
//! was created. Connections are leases on one pool of the set; they carry
//! the catalog so that binding never has to go back to the manager.
//!
//! ```rust,ignore
//! use mssql_adapter::{ConnectionConfig, create_manager};
//!
//! let manager = create_manager(config).await?;
//! let mut connection = manager.get_connection().await?;
//! // ... send_native_query(&connection, Some(&manager), query).await?
//! manager.release_connection(&mut connection)?;
//! manager.destroy().await;
//! ```

use std::sync::Arc;

use mssql_adapter_pool::{Connector, Lease, PoolMetrics, PoolSet, PoolSetStatus};

use crate::catalog::SchemaCatalog;
use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::instrumentation::{OperationTimer, SanitizationConfig};

/// State shared by a manager and every connection it hands out.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) catalog: SchemaCatalog,
    pub(crate) sanitization: SanitizationConfig,
}

struct ManagerInner {
    config: ConnectionConfig,
    pools: PoolSet,
    shared: Arc<Shared>,
}

/// Owner of the pool set and the schema catalog.
///
/// Cloning is cheap; clones refer to the same pools.
#[derive(Clone)]
pub struct Manager {
    inner: Arc<ManagerInner>,
}

impl Manager {
    /// Create a manager over the tiberius backend.
    #[cfg(feature = "tds")]
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let connector = mssql_adapter_pool::TdsConnector::new(config.tds_settings());
        Self::connect_with(config, &connector).await
    }

    /// Create a manager over any native backend.
    ///
    /// Connects the first pool and loads the schema catalog through it. If
    /// either step fails every pool is closed and
    /// [`Error::ConnectionFailed`] is returned.
    pub async fn connect_with(config: ConnectionConfig, connector: &dyn Connector) -> Result<Self> {
        let config = config.normalized();
        config.validate()?;

        let timer = OperationTimer::start("create_manager");
        let pools = PoolSet::new(
            config.pool_config(),
            connector,
            config.failure_notifier(),
        )?;

        let loaded = match pools.connect_first().await {
            Ok(first) => SchemaCatalog::load(&first).await,
            Err(e) => Err(Error::ConnectionFailed(e.to_string())),
        };
        let catalog = match loaded {
            Ok(catalog) => catalog,
            Err(e) => {
                tracing::error!(error = %e, host = %config.host, "manager creation failed");
                pools.close().await;
                timer.finish(false);
                return Err(e);
            }
        };

        tracing::info!(
            set = pools.id(),
            host = %config.host,
            port = config.port,
            pools = pools.len(),
            tables = catalog.table_count(),
            "manager created"
        );
        timer.finish(true);

        let shared = Arc::new(Shared {
            catalog,
            sanitization: config.sanitization.clone(),
        });
        Ok(Self {
            inner: Arc::new(ManagerInner {
                config,
                pools,
                shared,
            }),
        })
    }

    /// Identity shared with every connection handed out.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.inner.pools.id()
    }

    /// Get the normalized configuration.
    #[must_use]
    pub fn config(&self) -> &ConnectionConfig {
        &self.inner.config
    }

    /// Get the schema catalog.
    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.inner.shared.catalog
    }

    /// Lease a connection.
    ///
    /// Fails with [`Error::ManagerDestroyed`] once [`Manager::destroy`] ran,
    /// [`Error::Exhausted`] when every pool is saturated and connected, and
    /// [`Error::ConnectionFailed`] when a pool could not be connected.
    pub async fn get_connection(&self) -> Result<Connection> {
        let lease = self.inner.pools.acquire().await?;
        tracing::debug!(
            pool = lease.pool().index(),
            lease = lease.id(),
            "connection acquired"
        );
        Ok(Connection {
            lease,
            shared: Arc::clone(&self.inner.shared),
        })
    }

    /// Return a connection.
    ///
    /// A connection from another manager, or one already released, yields
    /// [`Error::BadConnection`] and changes nothing.
    pub fn release_connection(&self, connection: &mut Connection) -> Result<()> {
        self.inner.pools.release(&mut connection.lease)?;
        Ok(())
    }

    /// Close every pool.
    ///
    /// Connections still out keep their handles but can no longer run
    /// queries. Calling this twice is a no-op.
    pub async fn destroy(&self) {
        self.inner.pools.close().await;
    }

    /// Check if the manager has been destroyed.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.pools.is_closed()
    }

    /// Get the status of every pool.
    #[must_use]
    pub fn status(&self) -> PoolSetStatus {
        self.inner.pools.status()
    }

    /// Get metrics aggregated over every pool.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.pools.metrics()
    }

    pub(crate) fn owns(&self, connection: &Connection) -> bool {
        self.inner.pools.owns(&connection.lease)
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.inner.config)
            .field("pools", &self.inner.pools)
            .field("tables", &self.inner.shared.catalog.table_count())
            .finish()
    }
}

/// A leased connection.
///
/// Dropping a connection that was never released returns it to its pool.
pub struct Connection {
    lease: Lease,
    shared: Arc<Shared>,
}

impl Connection {
    /// Lease number, unique within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.lease.id()
    }

    /// Position of the leased pool in its set.
    #[must_use]
    pub fn pool_index(&self) -> usize {
        self.lease.pool().index()
    }

    /// Identity of the manager that handed out this connection.
    #[must_use]
    pub fn manager_id(&self) -> u64 {
        self.lease.set_id()
    }

    /// Check if the connection has been released.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.lease.is_released()
    }

    /// Check if the connection can still run queries.
    #[must_use]
    pub fn is_usable(&self) -> bool {
        self.lease.is_usable()
    }

    /// Get the schema catalog of the owning manager.
    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.shared.catalog
    }

    pub(crate) fn lease(&self) -> &Lease {
        &self.lease
    }

    pub(crate) fn sanitization(&self) -> &SanitizationConfig {
        &self.shared.sanitization
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("lease", &self.lease)
            .field("manager", &self.manager_id())
            .finish()
    }
}

/// Create a manager over the tiberius backend.
#[cfg(feature = "tds")]
pub async fn create_manager(config: ConnectionConfig) -> Result<Manager> {
    Manager::connect(config).await
}

/// Create a manager over any native backend.
pub async fn create_manager_with(
    config: ConnectionConfig,
    connector: &dyn Connector,
) -> Result<Manager> {
    Manager::connect_with(config, connector).await
}

/// Lease a connection from `manager`.
pub async fn get_connection(manager: &Manager) -> Result<Connection> {
    manager.get_connection().await
}

/// Return `connection` to `manager`.
pub fn release_connection(connection: &mut Connection, manager: &Manager) -> Result<()> {
    manager.release_connection(connection)
}

/// Close every pool of `manager`.
pub async fn destroy_manager(manager: &Manager) {
    manager.destroy().await;
}
