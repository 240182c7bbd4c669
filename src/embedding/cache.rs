//! Persistent embedding cache.
//!
//! Keyed by `sha256(model_id + ":" + normalized_text)` so a model change
//! rolls the whole namespace. Entries expire after 30 days; a hit returns a
//! vector byte-equal to what the upstream returned on the miss that filled
//! it. The ingest path always goes through this cache; the query path is
//! wired through it by configuration.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};

use super::{check_input, Embedder, EmbeddingError};
use crate::vector::quant::{bytes_to_vector, vector_to_bytes};

/// 30 days, in seconds.
const TTL_SECS: i64 = 30 * 24 * 60 * 60;

#[derive(Clone)]
pub struct EmbeddingCache {
    db_path: PathBuf,
}

impl EmbeddingCache {
    /// Open (creating if needed) the cache database at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self, EmbeddingError> {
        let cache = Self {
            db_path: db_path.to_path_buf(),
        };
        let conn = cache.conn()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS embedding_cache (
                 cache_key  TEXT PRIMARY KEY,
                 model_id   TEXT NOT NULL,
                 created_at INTEGER NOT NULL,
                 vector     BLOB NOT NULL
             );",
        )
        .map_err(|e| EmbeddingError::Cache(e.to_string()))?;
        Ok(cache)
    }

    fn conn(&self) -> Result<Connection, EmbeddingError> {
        Connection::open(&self.db_path).map_err(|e| EmbeddingError::Cache(e.to_string()))
    }

    /// Cache key for a model/text pair.
    pub fn key(model_id: &str, text: &str) -> String {
        let normalized = normalize_text(text);
        let mut hasher = Sha256::new();
        hasher.update(model_id.as_bytes());
        hasher.update(b":");
        hasher.update(normalized.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a fresh entry. Expired rows are deleted and reported as a miss.
    pub fn get(&self, key: &str, now_secs: i64) -> Result<Option<Vec<f32>>, EmbeddingError> {
        let conn = self.conn()?;
        let row: Option<(i64, Vec<u8>)> = conn
            .query_row(
                "SELECT created_at, vector FROM embedding_cache WHERE cache_key = ?1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|e| EmbeddingError::Cache(e.to_string()))?;

        match row {
            Some((created_at, blob)) if now_secs - created_at <= TTL_SECS => {
                Ok(Some(bytes_to_vector(&blob)))
            }
            Some(_) => {
                conn.execute(
                    "DELETE FROM embedding_cache WHERE cache_key = ?1",
                    params![key],
                )
                .map_err(|e| EmbeddingError::Cache(e.to_string()))?;
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn put(
        &self,
        key: &str,
        model_id: &str,
        vector: &[f32],
        now_secs: i64,
    ) -> Result<(), EmbeddingError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO embedding_cache (cache_key, model_id, created_at, vector)
             VALUES (?1, ?2, ?3, ?4)",
            params![key, model_id, now_secs, vector_to_bytes(vector)],
        )
        .map_err(|e| EmbeddingError::Cache(e.to_string()))?;
        Ok(())
    }

    pub fn len(&self) -> Result<usize, EmbeddingError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM embedding_cache", [], |r| r.get(0))
            .map_err(|e| EmbeddingError::Cache(e.to_string()))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, EmbeddingError> {
        Ok(self.len()? == 0)
    }
}

/// Case/whitespace-insensitive key normalization. The embedded text itself
/// is never altered.
fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// An [`Embedder`] that consults the cache before its inner client.
pub struct CachedEmbedder<E> {
    inner: E,
    cache: EmbeddingCache,
}

impl<E: Embedder> CachedEmbedder<E> {
    pub fn new(inner: E, cache: EmbeddingCache) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl<E: Embedder> Embedder for CachedEmbedder<E> {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let trimmed = check_input(text)?.to_string();
        let key = EmbeddingCache::key(self.inner.model_id(), &trimmed);
        let now = chrono::Utc::now().timestamp();

        let cache = self.cache.clone();
        let lookup_key = key.clone();
        let hit = tokio::task::spawn_blocking(move || cache.get(&lookup_key, now))
            .await
            .map_err(|e| EmbeddingError::Cache(e.to_string()))??;
        if let Some(vector) = hit {
            return Ok(vector);
        }

        let vector = self.inner.embed(&trimmed).await?;

        let cache = self.cache.clone();
        let model_id = self.inner.model_id().to_string();
        let stored = vector.clone();
        tokio::task::spawn_blocking(move || cache.put(&key, &model_id, &stored, now))
            .await
            .map_err(|e| EmbeddingError::Cache(e.to_string()))??;

        Ok(vector)
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }
}
