//! Database connection management

use sea_orm::{ConnectOptions, Database as SeaOrmDatabase, DatabaseConnection, DbErr};
use url::Url;

use crate::config::RegistryConfig;
use crate::{error, info};

/// Build the URL of `database` on the configured server. `None` addresses the
/// server itself (used for CREATE/DROP/SHOW DATABASES).
pub fn database_url(base_url: &str, database: Option<&str>) -> Result<String, DbErr> {
    let mut url = Url::parse(base_url)
        .map_err(|e| DbErr::Custom(format!("Invalid database URL: {}", e)))?;
    url.set_path(&format!("/{}", database.unwrap_or("")));
    Ok(url.to_string())
}

/// URL with the password removed, safe for logs
pub fn redacted(database_url: &str) -> String {
    match Url::parse(database_url) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<invalid url>".to_string(),
    }
}

/// Establish a pooled SeaORM connection sized and bounded by the registry config
pub async fn establish_connection(
    database_url: &str,
    config: &RegistryConfig,
) -> Result<DatabaseConnection, DbErr> {
    info!(
        "[DB] Connecting to MySQL database {} with SeaORM...",
        redacted(database_url)
    );

    let mut options = ConnectOptions::new(database_url.to_owned());
    options
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .connect_timeout(config.connect_timeout)
        .acquire_timeout(config.connect_timeout)
        .sqlx_logging(false);

    let orm_conn = SeaOrmDatabase::connect(options).await.map_err(|e| {
        error!("[DB] Failed to create SeaORM connection: {}", e);
        e
    })?;

    info!("[DB] Successfully connected to {}", redacted(database_url));

    Ok(orm_conn)
}
