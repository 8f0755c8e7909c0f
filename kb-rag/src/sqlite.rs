//! Persistent on-disk vector store backed by SQLite.
//!
//! Provides [`SqliteVectorStore`], which keeps collection metadata and
//! entries in a single SQLite database file and ranks by brute-force
//! distance over the stored vectors. Reopening the same file resumes every
//! collection it holds.
//!
//! This module is only available when the `sqlite` feature is enabled.
//!
//! # Example
//!
//! ```rust,ignore
//! use kb_rag::sqlite::SqliteVectorStore;
//!
//! let store = SqliteVectorStore::open_in_dir("./travel_vs").await?;
//! let travel = CollectionInfo::new("travel", 384, DistanceMetric::Cosine, "all-MiniLM-L6-v2");
//! store.get_or_create_collection(&travel).await?;
//! store.add("travel", &entries).await?;
//! let results = store.query("travel", &query_embedding, 5).await?;
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::document::{Chunk, IndexEntry, Metadata, SearchResult};
use crate::error::{RagError, Result};
use crate::vectorstore::{
    CollectionInfo, VectorStore, ensure_compatible, nearest, validate_entries, validate_info,
    validate_query,
};

const BACKEND: &str = "sqlite";

/// File name of the database inside a store directory.
pub const DATABASE_FILE: &str = "store.sqlite3";

/// A [`VectorStore`] persisted in a SQLite database file.
///
/// Every `add` runs in one transaction, so its entries become visible
/// together and a failed call leaves no partial rows behind. The pool is
/// closed when the store is dropped.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore").field("path", &self.path).finish()
    }
}

impl SqliteVectorStore {
    /// Open (or create) the store database at `path`, creating parent directories.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                RagError::store(BACKEND, format!("failed to create '{}': {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(Self::map_err)?;

        let store = Self { pool, path };
        store.init_schema().await?;
        debug!(path = %store.path.display(), "opened sqlite vector store");
        Ok(store)
    }

    /// Open (or create) the store kept in directory `dir`.
    pub async fn open_in_dir(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(dir.as_ref().join(DATABASE_FILE)).await
    }

    /// Path of the database file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Close every pooled connection, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn map_err(e: sqlx::Error) -> RagError {
        RagError::store(BACKEND, e.to_string())
    }

    async fn init_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimensions INTEGER NOT NULL,
                metric TEXT NOT NULL,
                model TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT (STRFTIME('%Y-%m-%dT%H:%M:%fZ', 'now'))
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS entries (
                collection TEXT NOT NULL REFERENCES collections(name) ON DELETE CASCADE,
                id TEXT NOT NULL,
                document_id TEXT NOT NULL,
                chunk_index INTEGER NOT NULL,
                text TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                PRIMARY KEY (collection, id)
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        Ok(())
    }

    async fn collection_info(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query(
            "SELECT name, dimensions, metric, model FROM collections WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Self::map_err)?;

        row.as_ref().map(Self::row_to_info).transpose()
    }

    async fn require_collection(&self, name: &str) -> Result<CollectionInfo> {
        self.collection_info(name).await?.ok_or_else(|| {
            RagError::store(BACKEND, format!("collection '{name}' does not exist"))
        })
    }

    fn row_to_info(row: &sqlx::sqlite::SqliteRow) -> Result<CollectionInfo> {
        let name: String = row.try_get("name").map_err(Self::map_err)?;
        let dimensions: i64 = row.try_get("dimensions").map_err(Self::map_err)?;
        let metric: String = row.try_get("metric").map_err(Self::map_err)?;
        let model: String = row.try_get("model").map_err(Self::map_err)?;
        Ok(CollectionInfo {
            name,
            dimensions: dimensions as usize,
            metric: metric.parse().map_err(|e| RagError::store(BACKEND, format!("{e}")))?,
            model,
        })
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<(Chunk, Vec<f32>)> {
        let text: String = row.try_get("text").map_err(Self::map_err)?;
        let document_id: String = row.try_get("document_id").map_err(Self::map_err)?;
        let chunk_index: i64 = row.try_get("chunk_index").map_err(Self::map_err)?;
        let metadata_str: String = row.try_get("metadata").map_err(Self::map_err)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(Self::map_err)?;

        let metadata: Metadata = serde_json::from_str(&metadata_str)
            .map_err(|e| RagError::store(BACKEND, format!("corrupt metadata: {e}")))?;

        let chunk = Chunk { text, document_id, index: chunk_index as usize, metadata };
        Ok((chunk, deserialize_embedding(&blob)))
    }
}

fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn deserialize_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend(&self) -> &str {
        BACKEND
    }

    async fn get_or_create_collection(
        &self,
        requested: &CollectionInfo,
    ) -> Result<CollectionInfo> {
        validate_info(BACKEND, requested)?;

        sqlx::query(
            "INSERT INTO collections (name, dimensions, metric, model) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&requested.name)
        .bind(requested.dimensions as i64)
        .bind(requested.metric.as_str())
        .bind(&requested.model)
        .execute(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let info = self.require_collection(&requested.name).await?;
        ensure_compatible(BACKEND, &info, requested)?;
        debug!(
            collection = %info.name,
            dimensions = info.dimensions,
            metric = %info.metric,
            model = %info.model,
            "opened sqlite collection"
        );
        Ok(info)
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        sqlx::query("DELETE FROM entries WHERE collection = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        sqlx::query("DELETE FROM collections WHERE name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        tx.commit().await.map_err(Self::map_err)?;

        debug!(collection = name, "deleted sqlite collection");
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows =
            sqlx::query("SELECT name, dimensions, metric, model FROM collections ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(Self::map_err)?;
        rows.iter().map(Self::row_to_info).collect()
    }

    async fn add(&self, collection: &str, entries: &[IndexEntry]) -> Result<()> {
        let info = self.require_collection(collection).await?;
        validate_entries(BACKEND, &info, entries)?;
        if entries.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Self::map_err)?;
        for entry in entries {
            let metadata = serde_json::to_string(&entry.chunk.metadata)
                .map_err(|e| RagError::store(BACKEND, format!("failed to encode metadata: {e}")))?;

            sqlx::query(
                "INSERT INTO entries
                    (collection, id, document_id, chunk_index, text, metadata, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    document_id = excluded.document_id,
                    chunk_index = excluded.chunk_index,
                    text = excluded.text,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding",
            )
            .bind(collection)
            .bind(&entry.id)
            .bind(&entry.chunk.document_id)
            .bind(entry.chunk.index as i64)
            .bind(&entry.chunk.text)
            .bind(&metadata)
            .bind(serialize_embedding(&entry.embedding))
            .execute(&mut *tx)
            .await
            .map_err(Self::map_err)?;
        }
        tx.commit().await.map_err(Self::map_err)?;

        debug!(collection, count = entries.len(), "added entries to sqlite");
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<SearchResult>> {
        let info = self.require_collection(collection).await?;
        validate_query(BACKEND, &info, embedding, k)?;

        let rows = sqlx::query(
            "SELECT document_id, chunk_index, text, metadata, embedding
             FROM entries
             WHERE collection = ?1",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await
        .map_err(Self::map_err)?;

        let stored = rows.iter().map(Self::row_to_entry).collect::<Result<Vec<_>>>()?;
        let candidates = stored.iter().map(|(chunk, vector)| (chunk.clone(), vector.as_slice()));
        Ok(nearest(info.metric, embedding, candidates, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        self.require_collection(collection).await?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries WHERE collection = ?1")
            .bind(collection)
            .fetch_one(&self.pool)
            .await
            .map_err(Self::map_err)?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_round_trips() {
        let v = vec![0.25f32, -1.5, 3.0e-7];
        assert_eq!(deserialize_embedding(&serialize_embedding(&v)), v);
    }
}
