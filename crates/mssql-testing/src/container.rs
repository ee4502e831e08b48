//! Throwaway SQL Server instances for live tests.
//!
//! Requires a local Docker daemon. Tests using this are `#[ignore]`d by
//! default and run with `cargo test -- --ignored`.

use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage, ImageExt, TestcontainersError};
use thiserror::Error;

const IMAGE: &str = "mcr.microsoft.com/mssql/server";
const TAG: &str = "2022-latest";
const PORT: u16 = 1433;
const READY_MESSAGE: &str = "SQL Server is now ready for client connections";

/// Default `sa` password; satisfies the server's complexity policy.
pub const DEFAULT_PASSWORD: &str = "Adapter_Test_Passw0rd";

/// Errors starting a container.
#[derive(Debug, Error)]
pub enum ContainerError {
    /// Docker or the image failed.
    #[error("container error: {0}")]
    Container(#[from] TestcontainersError),
}

/// A running SQL Server container.
///
/// The container is removed when this value is dropped.
pub struct MssqlContainer {
    _container: ContainerAsync<GenericImage>,
    host: String,
    port: u16,
    password: String,
}

impl MssqlContainer {
    /// Start a container with [`DEFAULT_PASSWORD`].
    pub async fn start() -> Result<Self, ContainerError> {
        Self::start_with_password(DEFAULT_PASSWORD).await
    }

    /// Start a container with the given `sa` password.
    pub async fn start_with_password(password: &str) -> Result<Self, ContainerError> {
        let container = GenericImage::new(IMAGE, TAG)
            .with_exposed_port(PORT.tcp())
            .with_wait_for(WaitFor::message_on_stdout(READY_MESSAGE))
            .with_env_var("ACCEPT_EULA", "Y")
            .with_env_var("MSSQL_SA_PASSWORD", password)
            .start()
            .await?;

        let host = container.get_host().await?.to_string();
        let port = container.get_host_port_ipv4(PORT.tcp()).await?;
        tracing::info!(%host, port, "sql server container started");

        Ok(Self {
            _container: container,
            host,
            port,
            password: password.to_string(),
        })
    }

    /// Host the server is reachable on.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Mapped host port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// The `sa` password.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    /// ADO-style connection string for the `master` database.
    #[must_use]
    pub fn connection_string(&self) -> String {
        format!(
            "Server={},{};Database=master;User Id=sa;Password={};TrustServerCertificate=true",
            self.host, self.port, self.password
        )
    }
}

impl std::fmt::Debug for MssqlContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlContainer")
            .field("host", &self.host)
            .field("port", &self.port)
            .finish_non_exhaustive()
    }
}
