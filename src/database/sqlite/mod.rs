use sqlx::pool::PoolConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info};

use crate::Result;
use crate::config::Config;
use crate::documents::{Document, Point};


pub type DbPool = Pool<Sqlite>;

/// Owner of a connection pool for callers that don't manage connections themselves.
///
/// The document and point query sets never touch the pool directly; they take a
/// `&mut SqliteConnection`, which is what [`Database::acquire`] hands out.
#[derive(Debug, Clone)]
pub struct Database {
    pool: DbPool,
}

impl Database {
    #[inline]
    pub async fn new<P: AsRef<Path>>(database_path: P) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(database_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(10)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.touch_all().await?;

        Ok(database)
    }

    /// Single-connection in-memory database; the connection is pinned so the data survives
    #[inline]
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        let database = Self { pool };
        database.touch_all().await?;

        Ok(database)
    }

    #[inline]
    pub async fn initialize_from_config(config: &Config) -> Result<Self> {
        let db_path = config.database_path();

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening document store at {}", db_path.display());
        Self::new(db_path).await
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub async fn acquire(&self) -> Result<PoolConnection<Sqlite>> {
        Ok(self.pool.acquire().await?)
    }

    /// Ensure both the `documents` and `points` tables exist
    #[inline]
    pub async fn touch_all(&self) -> Result<()> {
        let mut conn = self.acquire().await?;
        Document::objects().touch(&mut conn).await?;
        Point::objects().touch(&mut conn).await?;
        debug!("Document store tables ready");
        Ok(())
    }

    /// Optimize database performance by running VACUUM and ANALYZE
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        info!("Optimizing database performance");

        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;

        debug!("Database optimization completed");
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
