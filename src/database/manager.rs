use sqlx::{postgres::PgPoolOptions, PgPool};
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use crate::config::config;

/// Errors from DatabaseManager and the repositories built on it
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Missing configuration: {0}")]
    ConfigMissing(&'static str),

    #[error("Invalid database URL")]
    InvalidDatabaseUrl,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    #[error("Query error: {0}")]
    QueryError(String),

    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

impl From<crate::filter::FilterError> for DatabaseError {
    fn from(err: crate::filter::FilterError) -> Self {
        DatabaseError::InvalidFilter(err.to_string())
    }
}

/// Process-wide owner of the PostgreSQL connection pool
pub struct DatabaseManager;

impl DatabaseManager {
    fn cell() -> &'static OnceLock<PgPool> {
        static POOL: OnceLock<PgPool> = OnceLock::new();
        &POOL
    }

    /// Get the shared pool, creating it on first use. Connections are opened lazily,
    /// so this only fails on configuration problems.
    pub fn pool() -> Result<PgPool, DatabaseError> {
        if let Some(pool) = Self::cell().get() {
            return Ok(pool.clone());
        }

        let connection_string = Self::build_connection_string()?;
        let settings = &config().database;
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(Duration::from_secs(settings.connection_timeout))
            .connect_lazy(&connection_string)?;

        // Another caller may have won the race; either pool is equivalent
        let pool = Self::cell().get_or_init(|| pool).clone();
        info!("Created database pool (max {} connections)", settings.max_connections);
        Ok(pool)
    }

    /// DATABASE_URL, with the path swapped for DATABASE_NAME when that is set
    fn build_connection_string() -> Result<String, DatabaseError> {
        let base = std::env::var("DATABASE_URL")
            .map_err(|_| DatabaseError::ConfigMissing("DATABASE_URL"))?;

        let mut url = url::Url::parse(&base).map_err(|_| DatabaseError::InvalidDatabaseUrl)?;
        if !matches!(url.scheme(), "postgres" | "postgresql") {
            return Err(DatabaseError::InvalidDatabaseUrl);
        }
        if let Ok(name) = std::env::var("DATABASE_NAME") {
            if !Self::is_valid_db_name(&name) {
                return Err(DatabaseError::InvalidDatabaseUrl);
            }
            url.set_path(&format!("/{}", name));
        }
        Ok(url.into())
    }

    /// Pings the pool to ensure connectivity
    pub async fn health_check(pool: &PgPool) -> Result<(), DatabaseError> {
        sqlx::query("SELECT 1").execute(pool).await?;
        Ok(())
    }

    /// Close the shared pool (e.g., on shutdown)
    pub async fn close() {
        if let Some(pool) = Self::cell().get() {
            pool.close().await;
            info!("Closed database pool");
        }
    }

    fn is_valid_db_name(name: &str) -> bool {
        !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}
