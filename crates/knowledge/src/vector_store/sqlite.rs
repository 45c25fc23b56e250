//! SQLite-backed vector store: one database file per knowledge base.
//!
//! Files live at `<root>/{collection_name}.sqlite3`. Open handles are kept in a
//! registry keyed by knowledge base id; all SQL runs on the blocking pool.

use super::{missing_collection, rank, validate_query, VectorStore};
use crate::types::{collection_name, ChunkOutcome, CollectionStats, DocumentChunk, Metadata, UpsertReport};
use chrono::{DateTime, Utc};
use lumen_core::{AppError, AppResult};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS chunks (
    id TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    content TEXT NOT NULL,
    metadata TEXT NOT NULL,
    embedding BLOB NOT NULL,
    degraded INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id);

CREATE TABLE IF NOT EXISTS collection_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

const CHUNK_COLUMNS: &str =
    "id, document_id, chunk_index, content, metadata, embedding, degraded, created_at, updated_at";

type Handle = Arc<Mutex<Connection>>;

/// Vector store persisting each collection to its own SQLite file.
#[derive(Debug)]
pub struct SqliteVectorStore {
    root: PathBuf,
    collections: RwLock<HashMap<String, Handle>>,
}

impl SqliteVectorStore {
    /// Store rooted at `root`; the directory is created on first use.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            collections: RwLock::new(HashMap::new()),
        }
    }

    fn db_path(&self, kb_id: &str) -> PathBuf {
        self.root.join(format!("{}.sqlite3", collection_name(kb_id)))
    }

    async fn handle(&self, kb_id: &str) -> AppResult<Handle> {
        self.collections
            .read()
            .await
            .get(kb_id)
            .cloned()
            .ok_or_else(|| missing_collection(kb_id))
    }

    /// Run `f` against the collection's connection on the blocking pool.
    async fn with_conn<T, F>(&self, kb_id: &str, f: F) -> AppResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> AppResult<T> + Send + 'static,
    {
        let handle = self.handle(kb_id).await?;
        tokio::task::spawn_blocking(move || {
            let mut conn = handle
                .lock()
                .map_err(|_| AppError::Storage("collection lock poisoned".to_string()))?;
            f(&mut conn)
        })
        .await
        .map_err(|e| AppError::Storage(format!("blocking task failed: {}", e)))?
    }
}

fn open_collection(path: &Path, kb_id: &str) -> AppResult<Connection> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AppError::Storage(format!("Failed to create {:?}: {}", parent, e)))?;
    }

    let conn = Connection::open(path)
        .map_err(|e| AppError::Storage(format!("Failed to open {:?}: {}", path, e)))?;
    conn.execute_batch(SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO collection_meta (key, value) VALUES ('kb_id', ?1)",
        params![kb_id],
    )?;

    let owner: String = conn.query_row(
        "SELECT value FROM collection_meta WHERE key = 'kb_id'",
        [],
        |row| row.get(0),
    )?;
    if owner != kb_id {
        return Err(AppError::Storage(format!(
            "{:?} belongs to knowledge base '{}', not '{}'",
            path, owner, kb_id
        )));
    }
    Ok(conn)
}

fn pinned_dimensions(conn: &Connection) -> AppResult<Option<usize>> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM collection_meta WHERE key = 'dimensions'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.parse().ok()))
}

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|v| v.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn conversion_error<E>(column: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(err))
}

fn parse_time(row: &Row<'_>, column: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(column)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(column, e))
}

fn row_to_chunk(row: &Row<'_>) -> rusqlite::Result<DocumentChunk> {
    let metadata_json: String = row.get(4)?;
    let metadata: Metadata = serde_json::from_str(&metadata_json).map_err(|e| conversion_error(4, e))?;
    let blob: Vec<u8> = row.get(5)?;
    let embedding = bytes_to_embedding(&blob).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(5, Type::Blob, "embedding length not a multiple of 4".into())
    })?;

    Ok(DocumentChunk {
        id: row.get(0)?,
        document_id: row.get(1)?,
        chunk_index: row.get::<_, i64>(2)? as u32,
        content: row.get(3)?,
        metadata,
        embedding,
        degraded: row.get::<_, i64>(6)? != 0,
        similarity_score: None,
        created_at: parse_time(row, 7)?,
        updated_at: parse_time(row, 8)?,
    })
}

fn upsert_one(conn: &Connection, chunk: &DocumentChunk, now: &str) -> AppResult<()> {
    let metadata = serde_json::to_string(&chunk.metadata)?;
    conn.execute(
        "INSERT INTO chunks (id, document_id, chunk_index, content, metadata, embedding, degraded, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
         ON CONFLICT(id) DO UPDATE SET
             document_id = excluded.document_id,
             chunk_index = excluded.chunk_index,
             content = excluded.content,
             metadata = excluded.metadata,
             embedding = excluded.embedding,
             degraded = excluded.degraded,
             updated_at = excluded.updated_at",
        params![
            chunk.id,
            chunk.document_id,
            chunk.chunk_index as i64,
            chunk.content,
            metadata,
            embedding_to_bytes(&chunk.embedding),
            chunk.degraded as i64,
            now,
        ],
    )?;
    Ok(())
}

#[async_trait::async_trait]
impl VectorStore for SqliteVectorStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn create_collection(&self, kb_id: &str) -> AppResult<()> {
        let mut collections = self.collections.write().await;
        if collections.contains_key(kb_id) {
            return Ok(());
        }

        let path = self.db_path(kb_id);
        let id = kb_id.to_string();
        let conn = tokio::task::spawn_blocking(move || open_collection(&path, &id))
            .await
            .map_err(|e| AppError::Storage(format!("blocking task failed: {}", e)))??;

        collections.insert(kb_id.to_string(), Arc::new(Mutex::new(conn)));
        tracing::debug!(kb_id, path = ?self.db_path(kb_id), "Opened SQLite collection");
        Ok(())
    }

    async fn collection_exists(&self, kb_id: &str) -> AppResult<bool> {
        Ok(self.collections.read().await.contains_key(kb_id))
    }

    async fn upsert_chunks(&self, kb_id: &str, chunks: Vec<DocumentChunk>) -> AppResult<UpsertReport> {
        self.with_conn(kb_id, move |conn| {
            let tx = conn.transaction()?;
            let mut pinned = pinned_dimensions(&tx)?;
            let now = Utc::now().to_rfc3339();
            let mut report = UpsertReport::default();

            for chunk in &chunks {
                let dims = chunk.embedding.len();
                let mismatch = match pinned {
                    _ if dims == 0 => Some("empty embedding".to_string()),
                    Some(p) if p != dims => Some(format!(
                        "embedding has {} dimensions, collection stores {}",
                        dims, p
                    )),
                    _ => None,
                };
                if let Some(reason) = mismatch {
                    report.outcomes.push(ChunkOutcome::failed(&chunk.id, reason));
                    continue;
                }

                match upsert_one(&tx, chunk, &now) {
                    Ok(()) => {
                        if pinned.is_none() {
                            tx.execute(
                                "INSERT OR REPLACE INTO collection_meta (key, value) VALUES ('dimensions', ?1)",
                                params![dims.to_string()],
                            )?;
                            pinned = Some(dims);
                        }
                        report.outcomes.push(ChunkOutcome::ok(&chunk.id));
                    }
                    Err(e) => report.outcomes.push(ChunkOutcome::failed(&chunk.id, e.to_string())),
                }
            }

            tx.commit()?;
            Ok(report)
        })
        .await
    }

    async fn search_similar(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> AppResult<Vec<DocumentChunk>> {
        let query = query_vector.to_vec();
        self.with_conn(kb_id, move |conn| {
            validate_query(&query, pinned_dimensions(conn)?)?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chunks WHERE degraded = 0",
                CHUNK_COLUMNS
            ))?;
            let candidates = stmt
                .query_map([], row_to_chunk)?
                .collect::<Result<Vec<_>, _>>()?;

            Ok(rank(&candidates, &query, k, threshold))
        })
        .await
    }

    async fn get_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<Vec<DocumentChunk>> {
        let document_id = document_id.to_string();
        self.with_conn(kb_id, move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM chunks WHERE document_id = ?1 ORDER BY chunk_index",
                CHUNK_COLUMNS
            ))?;
            let chunks = stmt
                .query_map(params![document_id], row_to_chunk)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(chunks)
        })
        .await
    }

    async fn delete_chunks(&self, kb_id: &str, chunk_ids: &[String]) -> AppResult<usize> {
        let chunk_ids = chunk_ids.to_vec();
        self.with_conn(kb_id, move |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM chunks WHERE id = ?1")?;
                for id in &chunk_ids {
                    removed += stmt.execute(params![id])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })
        .await
    }

    async fn delete_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<usize> {
        let document_id = document_id.to_string();
        self.with_conn(kb_id, move |conn| {
            Ok(conn.execute("DELETE FROM chunks WHERE document_id = ?1", params![document_id])?)
        })
        .await
    }

    async fn delete_collection(&self, kb_id: &str) -> AppResult<bool> {
        // Dropping the handle closes the connection before the file is unlinked.
        let existed = self.collections.write().await.remove(kb_id).is_some();

        let path = self.db_path(kb_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(existed),
            Err(e) => Err(AppError::Storage(format!("Failed to delete {:?}: {}", path, e))),
        }
    }

    async fn stats(&self, kb_id: &str) -> AppResult<CollectionStats> {
        self.with_conn(kb_id, |conn| {
            let (total, documents, avg): (i64, i64, Option<f64>) = conn.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT document_id), AVG(LENGTH(content)) FROM chunks",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;
            Ok(CollectionStats {
                total_chunks: total as u64,
                unique_documents: documents as u64,
                avg_chunk_length: avg.unwrap_or(0.0),
            })
        })
        .await
    }
}
