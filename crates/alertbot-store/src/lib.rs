//! SQLite persistence for alert subscriptions and forwarded news.
//!
//! # Example
//!
//! ```no_run
//! use alertbot_store::{Database, SqliteSubscriptionStore};
//!
//! # async fn example() -> alertbot_store::Result<()> {
//! let db = Database::connect("sqlite:bot_database.db?mode=rwc").await?;
//! db.migrate().await?;
//! let store = SqliteSubscriptionStore::new(db);
//! # let _ = store;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod news;
pub mod subscription;

pub use error::{Result, StoreError};
pub use news::SqliteProcessedNewsStore;
pub use subscription::SqliteSubscriptionStore;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

/// Database connection wrapper.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Default pool size. Command handlers and the dispatcher share it.
    const DEFAULT_POOL_SIZE: u32 = 5;

    /// Connect to a SQLite database.
    ///
    /// The URL should be in the format `sqlite:path/to/db.sqlite?mode=rwc`.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_pool_size(url, Self::DEFAULT_POOL_SIZE).await
    }

    /// Connect with a custom pool size. In-memory databases need a size of 1,
    /// since every connection would otherwise see its own empty database.
    pub async fn connect_with_pool_size(url: &str, pool_size: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .acquire_timeout(std::time::Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!("Connected to database: {} (pool size: {})", url, pool_size);

        Ok(Self { pool })
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        tracing::info!("Migrations complete");
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
pub(crate) async fn test_db() -> Database {
    let db = Database::connect_with_pool_size("sqlite::memory:", 1)
        .await
        .unwrap();
    db.migrate().await.unwrap();
    db
}
