//! Storage driver seam between the registry and the physical database server
//!
//! The registry never issues SQL itself. It asks a [`StorageDriver`] to open,
//! probe and close per-database connections and to create, enumerate and drop
//! databases and collections. [`SeaOrmDriver`] is the MySQL implementation.

use std::sync::Arc;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Mutex;

use super::connection::{database_url, establish_connection};
use super::statements;
use super::InitMarker;
use crate::config::RegistryConfig;
use crate::{debug, error, info};

#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Pooled connection to one database. Cloning shares the pool.
    type Conn: Clone + Send + Sync + 'static;

    /// Open a pooled connection to `database`
    async fn connect(&self, database: &str) -> Result<Self::Conn, DbErr>;

    /// Lightweight liveness probe
    async fn ping(&self, conn: &Self::Conn) -> Result<(), DbErr>;

    /// Close the pool behind `conn`
    async fn close(&self, conn: Self::Conn) -> Result<(), DbErr>;

    /// Create `database` if it does not exist yet
    async fn create_database(&self, database: &str) -> Result<(), DbErr>;

    async fn list_databases(&self) -> Result<Vec<String>, DbErr>;

    async fn drop_database(&self, database: &str) -> Result<(), DbErr>;

    /// Collections (tables) of the database `conn` points at
    async fn list_collections(&self, conn: &Self::Conn) -> Result<Vec<String>, DbErr>;

    /// Create an empty collection if it does not exist yet
    async fn create_collection(&self, conn: &Self::Conn, name: &str) -> Result<(), DbErr>;

    async fn drop_collection(&self, conn: &Self::Conn, name: &str) -> Result<(), DbErr>;

    /// Initialization marker, `None` when the database was never provisioned
    async fn read_marker(&self, conn: &Self::Conn) -> Result<Option<InitMarker>, DbErr>;

    async fn write_marker(&self, conn: &Self::Conn, marker: &InitMarker) -> Result<(), DbErr>;

    /// Release driver-level resources (server connection). Called once at shutdown.
    async fn shutdown(&self) {}
}

/// Shared handle to one SeaORM pool
pub type SharedConnection = Arc<DatabaseConnection>;

/// MySQL driver on top of SeaORM
#[derive(Debug)]
pub struct SeaOrmDriver {
    config: RegistryConfig,
    // Server-level connection for CREATE/DROP/SHOW DATABASES, opened lazily
    server: Mutex<Option<SharedConnection>>,
}

impl SeaOrmDriver {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            server: Mutex::new(None),
        }
    }

    async fn server(&self) -> Result<SharedConnection, DbErr> {
        let mut server = self.server.lock().await;
        if let Some(conn) = server.as_ref() {
            return Ok(Arc::clone(conn));
        }

        debug!("[DRIVER] Opening server-level connection");
        let url = database_url(&self.config.base_url, None)?;
        let conn = Arc::new(establish_connection(&url, &self.config).await?);
        *server = Some(Arc::clone(&conn));
        Ok(conn)
    }
}

/// Close the pool when this is the last handle. Otherwise the pool closes
/// once the remaining holders drop theirs.
async fn close_shared(conn: SharedConnection) -> Result<(), DbErr> {
    match Arc::try_unwrap(conn) {
        Ok(conn) => conn.close().await,
        Err(_) => {
            debug!("[DRIVER] Pool still borrowed, closing when released");
            Ok(())
        }
    }
}

#[async_trait]
impl StorageDriver for SeaOrmDriver {
    type Conn = SharedConnection;

    async fn connect(&self, database: &str) -> Result<SharedConnection, DbErr> {
        let url = database_url(&self.config.base_url, Some(database))?;
        Ok(Arc::new(establish_connection(&url, &self.config).await?))
    }

    async fn ping(&self, conn: &SharedConnection) -> Result<(), DbErr> {
        conn.ping().await
    }

    async fn close(&self, conn: SharedConnection) -> Result<(), DbErr> {
        close_shared(conn).await
    }

    async fn create_database(&self, database: &str) -> Result<(), DbErr> {
        let server = self.server().await?;
        statements::create_database(server.as_ref(), database).await?;
        info!("[DRIVER] Database {} created (or already present)", database);
        Ok(())
    }

    async fn list_databases(&self) -> Result<Vec<String>, DbErr> {
        let server = self.server().await?;
        statements::list_databases(server.as_ref()).await
    }

    async fn drop_database(&self, database: &str) -> Result<(), DbErr> {
        let server = self.server().await?;
        statements::drop_database(server.as_ref(), database).await?;
        info!("[DRIVER] Database {} dropped", database);
        Ok(())
    }

    async fn list_collections(&self, conn: &SharedConnection) -> Result<Vec<String>, DbErr> {
        statements::list_tables(conn.as_ref()).await
    }

    async fn create_collection(&self, conn: &SharedConnection, name: &str) -> Result<(), DbErr> {
        statements::create_document_table(conn.as_ref(), name).await
    }

    async fn drop_collection(&self, conn: &SharedConnection, name: &str) -> Result<(), DbErr> {
        statements::drop_table(conn.as_ref(), name).await
    }

    async fn read_marker(&self, conn: &SharedConnection) -> Result<Option<InitMarker>, DbErr> {
        statements::ensure_marker_table(conn.as_ref()).await?;
        statements::read_marker(conn.as_ref()).await
    }

    async fn write_marker(&self, conn: &SharedConnection, marker: &InitMarker) -> Result<(), DbErr> {
        statements::ensure_marker_table(conn.as_ref()).await?;
        statements::write_marker(conn.as_ref(), marker).await
    }

    async fn shutdown(&self) {
        if let Some(conn) = self.server.lock().await.take() {
            if let Err(e) = close_shared(conn).await {
                error!("[DRIVER] Failed to close server connection: {}", e);
            }
        }
    }
}
