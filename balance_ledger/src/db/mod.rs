//! Database module providing PostgreSQL connection pooling and the ledger's
//! storage adapters.
//!
//! This module manages the database connection pool using sqlx, applies the
//! schema migrations, and provides the PostgreSQL and in-process
//! implementations of the repository traits the ledger engine runs on.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;

pub mod config;
pub mod memory;
pub mod postgres;
pub mod repository;

pub use config::{ConfigError, DatabaseConfig};
pub use memory::{MemoryLedgerStore, MemoryTransaction, MemoryUserDirectory};
pub use postgres::{PgLedgerStore, PgUnitOfWork};
pub use repository::{LedgerStore, PgUserDirectory, StoreTransaction, UserDirectory};

/// PostgreSQL pool shared by the ledger store and the user directory
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Open a pool sized and timed by `config`
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use balance_ledger::db::{Database, DatabaseConfig};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let config = DatabaseConfig::from_env()?;
    ///     let db = Database::connect(&config).await?;
    ///     db.migrate().await?;
    ///     Ok(())
    /// }
    /// ```
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Open the pool and make sure the server answers before handing it out
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let db = Self::new(config).await?;
        db.health_check().await?;
        log::debug!(
            "Connected to database (pool {}..{} connections)",
            config.min_connections,
            config.max_connections
        );
        Ok(db)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply pending schema migrations from `migrations/`
    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await
    }

    /// Round-trip a trivial query
    pub async fn health_check(&self) -> Result<(), sqlx::Error> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Wait for checked-out connections to return, then close the pool
    pub async fn close(self) {
        self.pool.close().await;
    }
}
