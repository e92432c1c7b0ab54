//! SQLite vector store implementation.
//!
//! This module provides a SQLite-based implementation of the `VectorStore`
//! trait. It uses rusqlite for database access, stores embeddings as
//! little-endian f32 BLOBs and ranks a collection by brute-force cosine
//! similarity, which is plenty for per-paper collections of a few hundred
//! chunks.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{
    rank_records, CollectionInfo, QueryFilter, StorageError, StorageResult, VectorMatch,
    VectorRecord, VectorStore,
};
use crate::models::{ChunkMetadata, EmbeddingConfig};

const CONFIG_KEY: &str = "embedding_config";

/// SQLite-backed vector store.
///
/// # Schema
/// - `config`: embedding configuration (model name, dimension) as JSON
/// - `collections`: one row per paper collection, with a completion flag set
///   after the last batch of an indexing run commits
/// - `chunks`: chunk text, JSON metadata and embedding BLOB per collection
#[derive(Clone)]
pub struct SqliteVectorStore {
    connection: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore").finish_non_exhaustive()
    }
}

fn sql_err(e: rusqlite::Error) -> StorageError {
    StorageError::QueryError(e.to_string())
}

impl SqliteVectorStore {
    /// Open (or create) a database file and ensure the schema exists.
    ///
    /// # Errors
    /// Returns `StorageError::ConnectionError` if the file cannot be opened
    pub fn open(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let connection = Connection::open(db_path.as_ref())
            .map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::from_connection(connection)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let connection =
            Connection::open_in_memory().map_err(|e| StorageError::ConnectionError(e.to_string()))?;
        Self::from_connection(connection)
    }

    fn from_connection(connection: Connection) -> StorageResult<Self> {
        Self::create_schema(&connection)?;
        Ok(Self {
            connection: Arc::new(Mutex::new(connection)),
        })
    }

    /// Create the database schema.
    fn create_schema(connection: &Connection) -> StorageResult<()> {
        connection
            .execute_batch(
                "PRAGMA foreign_keys = ON;
                 CREATE TABLE IF NOT EXISTS config (
                     key TEXT PRIMARY KEY,
                     value TEXT NOT NULL
                 );
                 CREATE TABLE IF NOT EXISTS collections (
                     collection_id TEXT PRIMARY KEY,
                     title TEXT NOT NULL,
                     complete INTEGER NOT NULL DEFAULT 0
                 );
                 CREATE TABLE IF NOT EXISTS chunks (
                     collection_id TEXT NOT NULL REFERENCES collections(collection_id) ON DELETE CASCADE,
                     chunk_id TEXT NOT NULL,
                     order_index INTEGER NOT NULL,
                     metadata TEXT NOT NULL,
                     text TEXT NOT NULL,
                     embedding BLOB NOT NULL,
                     PRIMARY KEY (collection_id, chunk_id)
                 );",
            )
            .map_err(|e| StorageError::SchemaError(e.to_string()))
    }

    /// Serialize an embedding vector to bytes for BLOB storage.
    fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    /// Deserialize an embedding vector from BLOB bytes.
    ///
    /// # Errors
    /// Returns `StorageError::SerializationError` if the byte length is not a
    /// multiple of four
    fn deserialize_embedding(bytes: &[u8]) -> StorageResult<Vec<f32>> {
        if bytes.len() % 4 != 0 {
            return Err(StorageError::SerializationError(format!(
                "Embedding blob length {} is not a multiple of 4",
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    /// Run a closure against the connection on the blocking pool.
    async fn with_connection<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let connection = Arc::clone(&self.connection);
        tokio::task::spawn_blocking(move || {
            let mut guard = connection
                .lock()
                .map_err(|_| StorageError::ConnectionError("connection mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StorageError::Other(format!("blocking task failed: {}", e)))?
    }

    fn collection_exists(connection: &Connection, collection_id: &str) -> StorageResult<bool> {
        connection
            .query_row(
                "SELECT 1 FROM collections WHERE collection_id = ?1",
                params![collection_id],
                |_| Ok(()),
            )
            .optional()
            .map(|row| row.is_some())
            .map_err(sql_err)
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn replace_collection(&self, collection_id: &str, title: &str) -> StorageResult<()> {
        let collection_id = collection_id.to_string();
        let title = title.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            tx.execute("DELETE FROM chunks WHERE collection_id = ?1", params![collection_id])
                .map_err(sql_err)?;
            tx.execute(
                "INSERT INTO collections (collection_id, title, complete) VALUES (?1, ?2, 0)
                 ON CONFLICT(collection_id) DO UPDATE SET title = excluded.title, complete = 0",
                params![collection_id, title],
            )
            .map_err(sql_err)?;
            tx.commit().map_err(sql_err)
        })
        .await
    }

    async fn upsert(&self, collection_id: &str, records: &[VectorRecord]) -> StorageResult<()> {
        let collection_id = collection_id.to_string();
        let rows = records
            .iter()
            .map(|r| {
                let metadata = serde_json::to_string(&r.metadata)
                    .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                Ok((
                    r.chunk_id.clone(),
                    r.metadata.order_index as i64,
                    metadata,
                    r.text.clone(),
                    Self::serialize_embedding(&r.vector),
                ))
            })
            .collect::<StorageResult<Vec<_>>>()?;

        self.with_connection(move |conn| {
            if !Self::collection_exists(conn, &collection_id)? {
                return Err(StorageError::NotFound(format!("Collection '{}'", collection_id)));
            }
            let tx = conn.transaction().map_err(sql_err)?;
            {
                let mut stmt = tx
                    .prepare(
                        "INSERT INTO chunks (collection_id, chunk_id, order_index, metadata, text, embedding)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                         ON CONFLICT(collection_id, chunk_id) DO UPDATE SET
                             order_index = excluded.order_index,
                             metadata = excluded.metadata,
                             text = excluded.text,
                             embedding = excluded.embedding",
                    )
                    .map_err(sql_err)?;
                for (chunk_id, order_index, metadata, text, embedding) in &rows {
                    stmt.execute(params![collection_id, chunk_id, order_index, metadata, text, embedding])
                        .map_err(sql_err)?;
                }
            }
            tx.commit().map_err(sql_err)?;
            debug!(collection_id = %collection_id, rows = rows.len(), "Upserted chunk vectors");
            Ok(())
        })
        .await
    }

    async fn query(
        &self,
        collection_id: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&QueryFilter>,
    ) -> StorageResult<Vec<VectorMatch>> {
        let collection_id = collection_id.to_string();
        let records = self
            .with_connection(move |conn| {
                if !Self::collection_exists(conn, &collection_id)? {
                    return Err(StorageError::NotFound(format!("Collection '{}'", collection_id)));
                }
                let mut stmt = conn
                    .prepare(
                        "SELECT chunk_id, metadata, text, embedding FROM chunks
                         WHERE collection_id = ?1 ORDER BY order_index",
                    )
                    .map_err(sql_err)?;
                let rows = stmt
                    .query_map(params![collection_id], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    })
                    .map_err(sql_err)?;

                let mut records = Vec::new();
                for row in rows {
                    let (chunk_id, metadata, text, blob) = row.map_err(sql_err)?;
                    let metadata: ChunkMetadata = serde_json::from_str(&metadata)
                        .map_err(|e| StorageError::SerializationError(e.to_string()))?;
                    records.push(VectorRecord {
                        chunk_id,
                        vector: Self::deserialize_embedding(&blob)?,
                        metadata,
                        text,
                    });
                }
                Ok(records)
            })
            .await?;

        Ok(rank_records(&records, query_vector, k, filter))
    }

    async fn mark_complete(&self, collection_id: &str) -> StorageResult<()> {
        let collection_id = collection_id.to_string();
        self.with_connection(move |conn| {
            let updated = conn
                .execute(
                    "UPDATE collections SET complete = 1 WHERE collection_id = ?1",
                    params![collection_id],
                )
                .map_err(sql_err)?;
            if updated == 0 {
                return Err(StorageError::NotFound(format!("Collection '{}'", collection_id)));
            }
            Ok(())
        })
        .await
    }

    async fn delete_collection(&self, collection_id: &str) -> StorageResult<()> {
        let collection_id = collection_id.to_string();
        self.with_connection(move |conn| {
            let tx = conn.transaction().map_err(sql_err)?;
            tx.execute("DELETE FROM chunks WHERE collection_id = ?1", params![collection_id])
                .map_err(sql_err)?;
            let removed = tx
                .execute("DELETE FROM collections WHERE collection_id = ?1", params![collection_id])
                .map_err(sql_err)?;
            if removed == 0 {
                return Err(StorageError::NotFound(format!("Collection '{}'", collection_id)));
            }
            tx.commit().map_err(sql_err)
        })
        .await
    }

    async fn list_collections(&self) -> StorageResult<Vec<CollectionInfo>> {
        self.with_connection(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT c.collection_id, c.title, c.complete, COUNT(ch.chunk_id)
                     FROM collections c
                     LEFT JOIN chunks ch ON ch.collection_id = c.collection_id
                     GROUP BY c.collection_id, c.title, c.complete
                     ORDER BY c.collection_id",
                )
                .map_err(sql_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(CollectionInfo {
                        collection_id: row.get(0)?,
                        title: row.get(1)?,
                        complete: row.get::<_, i64>(2)? != 0,
                        num_chunks: row.get::<_, i64>(3)? as usize,
                    })
                })
                .map_err(sql_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
        })
        .await
    }

    async fn store_config(&self, config: &EmbeddingConfig) -> StorageResult<()> {
        let value = serde_json::to_string(config)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;
        self.with_connection(move |conn| {
            conn.execute(
                "INSERT INTO config (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![CONFIG_KEY, value],
            )
            .map(|_| ())
            .map_err(sql_err)
        })
        .await
    }

    async fn get_config(&self) -> StorageResult<Option<EmbeddingConfig>> {
        let value: Option<String> = self
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT value FROM config WHERE key = ?1",
                    params![CONFIG_KEY],
                    |row| row.get(0),
                )
                .optional()
                .map_err(sql_err)
            })
            .await?;

        value
            .map(|v| {
                serde_json::from_str(&v).map_err(|e| StorageError::SerializationError(e.to_string()))
            })
            .transpose()
    }

    async fn ping(&self) -> StorageResult<()> {
        self.with_connection(|conn| {
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| StorageError::ConnectionError(e.to_string()))
        })
        .await
    }
}
