//! Per-knowledge-base chunk storage with similarity search.
//!
//! Every backend keeps an explicit registry from knowledge base id to its
//! storage handle. Collections are created by an explicit, idempotent
//! `create_collection` call; operations on an unknown collection fail with
//! `AppError::Storage`.
//!
//! Similarity is cosine similarity clamped to `[0, 1]`. Ranking is by score
//! descending with ties broken by ascending chunk id. Degraded chunks are
//! stored but never ranked.

pub mod memory;
pub mod sqlite;

pub use memory::InMemoryVectorStore;
pub use sqlite::SqliteVectorStore;

use crate::types::{CollectionStats, DocumentChunk, UpsertReport};
use lumen_core::{AppError, AppResult};
use std::cmp::Ordering;

/// Storage backend for chunks and their embeddings.
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Backend name for logs ("memory", "sqlite").
    fn backend_name(&self) -> &str;

    /// Create the collection for `kb_id` if it does not exist yet.
    async fn create_collection(&self, kb_id: &str) -> AppResult<()>;

    async fn collection_exists(&self, kb_id: &str) -> AppResult<bool>;

    /// Insert or fully replace each chunk by id.
    ///
    /// Each chunk succeeds or fails on its own; the report lists outcomes in
    /// input order. The first stored vector pins the collection's dimension.
    async fn upsert_chunks(&self, kb_id: &str, chunks: Vec<DocumentChunk>) -> AppResult<UpsertReport>;

    /// Up to `k` chunks scoring at least `threshold`, best first.
    async fn search_similar(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> AppResult<Vec<DocumentChunk>>;

    /// All chunks of one document, ordered by chunk index.
    async fn get_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<Vec<DocumentChunk>>;

    /// Remove the chunks with the given ids; returns how many existed.
    async fn delete_chunks(&self, kb_id: &str, chunk_ids: &[String]) -> AppResult<usize>;

    /// Remove every chunk of one document; returns how many were removed.
    async fn delete_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<usize>;

    /// Drop the whole collection; returns whether it existed.
    async fn delete_collection(&self, kb_id: &str) -> AppResult<bool>;

    async fn stats(&self, kb_id: &str) -> AppResult<CollectionStats>;
}

/// Raw cosine similarity in `[-1, 1]`; zero for empty, zero-norm or
/// mismatched vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Canonical similarity score: cosine similarity clamped to `[0, 1]`.
pub fn similarity_score(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity(a, b).clamp(0.0, 1.0)
}

/// Order by score descending, then chunk id ascending.
pub fn compare_ranked(a: &DocumentChunk, b: &DocumentChunk) -> Ordering {
    let sa = a.similarity_score.unwrap_or(0.0);
    let sb = b.similarity_score.unwrap_or(0.0);
    sb.total_cmp(&sa).then_with(|| a.id.cmp(&b.id))
}

/// Score, filter and order candidate chunks.
pub(crate) fn rank<'a, I>(candidates: I, query: &[f32], k: usize, threshold: f32) -> Vec<DocumentChunk>
where
    I: IntoIterator<Item = &'a DocumentChunk>,
{
    if k == 0 {
        return Vec::new();
    }

    let mut scored: Vec<(f32, &DocumentChunk)> = candidates
        .into_iter()
        .filter(|chunk| !chunk.degraded)
        .map(|chunk| (similarity_score(query, &chunk.embedding), chunk))
        .filter(|(score, _)| *score >= threshold)
        .collect();

    scored.sort_by(|(sa, a), (sb, b)| sb.total_cmp(sa).then_with(|| a.id.cmp(&b.id)));
    scored.truncate(k);

    scored
        .into_iter()
        .map(|(score, chunk)| {
            let mut ranked = chunk.clone();
            ranked.similarity_score = Some(score);
            ranked
        })
        .collect()
}

pub(crate) fn validate_query(query: &[f32], pinned: Option<usize>) -> AppResult<()> {
    if query.is_empty() {
        return Err(AppError::Validation("query vector is empty".to_string()));
    }
    match pinned {
        Some(dims) if dims != query.len() => Err(AppError::Validation(format!(
            "query vector has {} dimensions, collection stores {}",
            query.len(),
            dims
        ))),
        _ => Ok(()),
    }
}

pub(crate) fn missing_collection(kb_id: &str) -> AppError {
    AppError::Storage(format!("no collection for knowledge base '{}'", kb_id))
}
