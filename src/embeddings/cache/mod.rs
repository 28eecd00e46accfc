
use chrono::Utc;
use md5::{Digest, Md5};
use sqlx::SqliteConnection;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::Result;
use crate::documents::{blob_to_vec, vec_to_blob};

const CACHE_FILE_NAME: &str = "cache.db";
const CACHE_MAX_CONNECTIONS: u32 = 4;
const CACHE_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistent, size-bounded map from text to embedding vector for one model.
///
/// Each model gets its own SQLite file so vectors from different models never
/// mix; the directory name carries a hash of the exact model name. Entries carry a monotonically increasing access sequence; after every
/// write the least recently used entries are dropped until the stored volume
/// fits the size limit.
#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    pool: SqlitePool,
    directory: PathBuf,
    size_limit: u64,
}

impl EmbeddingCache {
    /// Open (creating if needed) the cache of `model` under `directory`
    #[inline]
    pub async fn open<P: AsRef<Path>>(directory: P, model: &str, size_limit: u64) -> Result<Self> {
        let directory = directory.as_ref().join(cache_directory_name(model));
        std::fs::create_dir_all(&directory)?;

        let options = SqliteConnectOptions::new()
            .filename(directory.join(CACHE_FILE_NAME))
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(CACHE_BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(CACHE_MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS embedding_cache (
                key TEXT PRIMARY KEY NOT NULL,
                vector BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                access_seq INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_embedding_cache_access ON embedding_cache(access_seq)",
        )
        .execute(&pool)
        .await?;

        info!(
            "Opened embedding cache for model {} at {}",
            model,
            directory.display()
        );

        Ok(Self {
            pool,
            directory,
            size_limit,
        })
    }

    #[inline]
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    #[inline]
    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Look up a vector, marking the entry as most recently used
    #[inline]
    pub async fn get(&self, key: &str) -> Result<Option<Vec<f32>>> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(
            r#"
            UPDATE embedding_cache
            SET access_seq = (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM embedding_cache)
            WHERE key = ?
            RETURNING vector
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(blob.as_deref().map(blob_to_vec))
    }

    /// Store a vector (last writer wins) and evict down to the size limit
    #[inline]
    pub async fn set(&self, key: &str, vector: &[f32]) -> Result<()> {
        {
            let mut conn = self.pool.acquire().await?;
            upsert(&mut conn, key, vector).await?;
        }
        self.evict().await
    }

    /// Store several vectors in one transaction, evicting once afterwards
    #[inline]
    pub async fn set_many<K: AsRef<str>>(&self, entries: &[(K, Vec<f32>)]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for (key, vector) in entries {
            upsert(&mut tx, key.as_ref(), vector).await?;
        }
        tx.commit().await?;

        self.evict().await
    }

    async fn evict(&self) -> Result<()> {
        let limit = i64::try_from(self.size_limit).unwrap_or(i64::MAX);
        if self.volume().await? <= limit {
            return Ok(());
        }

        // Keep the most recent entries whose running total fits the limit
        let result = sqlx::query(
            r#"
            DELETE FROM embedding_cache WHERE key IN (
                SELECT key FROM (
                    SELECT key, SUM(size_bytes) OVER (
                        ORDER BY access_seq DESC, key
                        ROWS BETWEEN UNBOUNDED PRECEDING AND CURRENT ROW
                    ) AS running_total
                    FROM embedding_cache
                )
                WHERE running_total > ?
            )
            "#,
        )
        .bind(limit)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            debug!(
                "Evicted {} embedding cache entries from {}",
                result.rows_affected(),
                self.directory.display()
            );
        }
        Ok(())
    }

    #[inline]
    pub async fn len(&self) -> Result<i64> {
        let count = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    #[inline]
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Total stored bytes (keys plus vectors)
    #[inline]
    pub async fn volume(&self) -> Result<i64> {
        let volume = sqlx::query_scalar("SELECT COALESCE(SUM(size_bytes), 0) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await?;
        Ok(volume)
    }

    #[inline]
    pub async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM embedding_cache")
            .execute(&self.pool)
            .await?;
        info!("Cleared embedding cache at {}", self.directory.display());
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn upsert(conn: &mut SqliteConnection, key: &str, vector: &[f32]) -> Result<()> {
    let blob = vec_to_blob(vector);
    let size_bytes = i64::try_from(key.len() + blob.len()).unwrap_or(i64::MAX);

    sqlx::query(
        r#"
        INSERT INTO embedding_cache (key, vector, size_bytes, access_seq, created_at)
        VALUES (?, ?, ?, (SELECT COALESCE(MAX(access_seq), 0) + 1 FROM embedding_cache), ?)
        ON CONFLICT(key) DO UPDATE SET
            vector = excluded.vector,
            size_bytes = excluded.size_bytes,
            access_seq = excluded.access_seq
        "#,
    )
    .bind(key)
    .bind(blob)
    .bind(size_bytes)
    .bind(Utc::now().timestamp())
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Directory holding the cache of `model`: the readable sanitized name plus
/// the md5 of the raw name, so distinct models never share a file
#[inline]
pub fn cache_directory_name(model: &str) -> String {
    format!(
        "{}-{}",
        sanitize_model_name(model),
        hex::encode(Md5::digest(model.as_bytes()))
    )
}

/// Directory-safe form of a model name
#[inline]
pub fn sanitize_model_name(model: &str) -> String {
    let sanitized: String = model
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        "default".to_string()
    } else {
        sanitized
    }
}
