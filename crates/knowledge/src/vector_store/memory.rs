//! In-process vector store.

use super::{missing_collection, rank, validate_query, VectorStore};
use crate::types::{ChunkOutcome, CollectionStats, DocumentChunk, UpsertReport};
use chrono::Utc;
use lumen_core::AppResult;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    dimensions: Option<usize>,
    chunks: BTreeMap<String, DocumentChunk>,
}

/// Collections held in memory, one lock per knowledge base.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Arc<RwLock<Collection>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn collection(&self, kb_id: &str) -> AppResult<Arc<RwLock<Collection>>> {
        self.collections
            .read()
            .await
            .get(kb_id)
            .cloned()
            .ok_or_else(|| missing_collection(kb_id))
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create_collection(&self, kb_id: &str) -> AppResult<()> {
        let mut collections = self.collections.write().await;
        if !collections.contains_key(kb_id) {
            collections.insert(kb_id.to_string(), Arc::default());
            tracing::debug!(kb_id, "Created in-memory collection");
        }
        Ok(())
    }

    async fn collection_exists(&self, kb_id: &str) -> AppResult<bool> {
        Ok(self.collections.read().await.contains_key(kb_id))
    }

    async fn upsert_chunks(&self, kb_id: &str, chunks: Vec<DocumentChunk>) -> AppResult<UpsertReport> {
        let collection = self.collection(kb_id).await?;
        let mut collection = collection.write().await;
        let mut report = UpsertReport::default();

        for mut chunk in chunks {
            let dims = chunk.embedding.len();
            if dims == 0 {
                report.outcomes.push(ChunkOutcome::failed(&chunk.id, "empty embedding"));
                continue;
            }
            let pinned = collection.dimensions;
            match pinned {
                Some(pinned) if pinned != dims => {
                    report.outcomes.push(ChunkOutcome::failed(
                        &chunk.id,
                        format!("embedding has {} dimensions, collection stores {}", dims, pinned),
                    ));
                    continue;
                }
                None => collection.dimensions = Some(dims),
                _ => {}
            }

            let now = Utc::now();
            if let Some(existing) = collection.chunks.get(&chunk.id) {
                chunk.created_at = existing.created_at;
            }
            chunk.updated_at = now;
            chunk.similarity_score = None;

            report.outcomes.push(ChunkOutcome::ok(&chunk.id));
            collection.chunks.insert(chunk.id.clone(), chunk);
        }

        Ok(report)
    }

    async fn search_similar(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> AppResult<Vec<DocumentChunk>> {
        let collection = self.collection(kb_id).await?;
        let collection = collection.read().await;
        validate_query(query_vector, collection.dimensions)?;
        Ok(rank(collection.chunks.values(), query_vector, k, threshold))
    }

    async fn get_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<Vec<DocumentChunk>> {
        let collection = self.collection(kb_id).await?;
        let collection = collection.read().await;
        let mut chunks: Vec<DocumentChunk> = collection
            .chunks
            .values()
            .filter(|c| c.document_id == document_id)
            .cloned()
            .collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn delete_chunks(&self, kb_id: &str, chunk_ids: &[String]) -> AppResult<usize> {
        let collection = self.collection(kb_id).await?;
        let mut collection = collection.write().await;
        Ok(chunk_ids
            .iter()
            .filter(|id| collection.chunks.remove(id.as_str()).is_some())
            .count())
    }

    async fn delete_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<usize> {
        let collection = self.collection(kb_id).await?;
        let mut collection = collection.write().await;
        let before = collection.chunks.len();
        collection.chunks.retain(|_, c| c.document_id != document_id);
        Ok(before - collection.chunks.len())
    }

    async fn delete_collection(&self, kb_id: &str) -> AppResult<bool> {
        Ok(self.collections.write().await.remove(kb_id).is_some())
    }

    async fn stats(&self, kb_id: &str) -> AppResult<CollectionStats> {
        let collection = self.collection(kb_id).await?;
        let collection = collection.read().await;

        let total = collection.chunks.len();
        let documents: std::collections::HashSet<&str> = collection
            .chunks
            .values()
            .map(|c| c.document_id.as_str())
            .collect();
        let chars: usize = collection
            .chunks
            .values()
            .map(|c| c.content.chars().count())
            .sum();

        Ok(CollectionStats {
            total_chunks: total as u64,
            unique_documents: documents.len() as u64,
            avg_chunk_length: if total == 0 { 0.0 } else { chars as f64 / total as f64 },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lumen_core::AppError;

    fn chunk(document_id: &str, index: u32, content: &str, embedding: Vec<f32>) -> DocumentChunk {
        let mut chunk = DocumentChunk::new(document_id, index, content);
        chunk.embedding = embedding;
        chunk
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_per_chunk() {
        let store = InMemoryVectorStore::new();
        store.create_collection("kb").await.unwrap();

        let report = store
            .upsert_chunks(
                "kb",
                vec![
                    chunk("d", 0, "first", vec![1.0, 0.0, 0.0]),
                    chunk("d", 1, "wrong", vec![1.0, 0.0]),
                    chunk("d", 2, "empty", vec![]),
                    chunk("d", 3, "third", vec![0.0, 1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        assert_eq!(report.succeeded(), 2);
        let failed: Vec<&str> = report.failures().map(|o| o.chunk_id.as_str()).collect();
        assert_eq!(failed, vec!["d_chunk_1", "d_chunk_2"]);
        assert!(store.search_similar("kb", &[1.0, 0.0], 5, 0.0).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_collection_is_a_storage_error() {
        let store = InMemoryVectorStore::new();
        let err = store
            .upsert_chunks("nope", vec![chunk("d", 0, "x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Storage(_)));
        assert!(matches!(
            store.search_similar("nope", &[1.0], 1, 0.0).await,
            Err(AppError::Storage(_))
        ));
        assert!(!store.delete_collection("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent() {
        let store = InMemoryVectorStore::new();
        store.create_collection("kb").await.unwrap();
        store
            .upsert_chunks("kb", vec![chunk("d", 0, "kept", vec![1.0])])
            .await
            .unwrap();
        store.create_collection("kb").await.unwrap();
        assert_eq!(store.stats("kb").await.unwrap().total_chunks, 1);
    }

    #[tokio::test]
    async fn test_stats_and_document_deletion() {
        let store = InMemoryVectorStore::new();
        store.create_collection("kb").await.unwrap();
        store
            .upsert_chunks(
                "kb",
                vec![
                    chunk("a", 1, "bbbb", vec![1.0, 0.0]),
                    chunk("a", 0, "aa", vec![1.0, 0.0]),
                    chunk("b", 0, "cccccc", vec![0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let stats = store.stats("kb").await.unwrap();
        assert_eq!(stats.total_chunks, 3);
        assert_eq!(stats.unique_documents, 2);
        assert!((stats.avg_chunk_length - 4.0).abs() < 1e-9);

        let chunks = store.get_document_chunks("kb", "a").await.unwrap();
        let indexes: Vec<u32> = chunks.iter().map(|c| c.chunk_index).collect();
        assert_eq!(indexes, vec![0, 1]);

        let ids = vec!["b_chunk_0".to_string(), "missing_chunk_9".to_string()];
        assert_eq!(store.delete_chunks("kb", &ids).await.unwrap(), 1);
        assert!(store.get_document_chunks("kb", "b").await.unwrap().is_empty());

        assert_eq!(store.delete_document_chunks("kb", "a").await.unwrap(), 2);
        assert_eq!(store.delete_document_chunks("kb", "a").await.unwrap(), 0);
        let stats = store.stats("kb").await.unwrap();
        assert_eq!(stats.total_chunks, 0);
        assert_eq!(stats.unique_documents, 0);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.create_collection("kb").await.unwrap();
        store
            .upsert_chunks("kb", vec![chunk("d", 0, "old", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert_chunks("kb", vec![chunk("d", 0, "new", vec![0.0, 1.0])])
            .await
            .unwrap();

        let results = store.search_similar("kb", &[0.0, 1.0], 5, 0.5).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "new");
    }
}
