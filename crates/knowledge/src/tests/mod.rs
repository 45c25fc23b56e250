//! Cross-module tests driving the orchestrator end to end.

mod ingestion;

use crate::blob::MemoryBlobStore;
use crate::cache::{CacheService, MemoryKvStore};
use crate::chunker::DocumentProcessor;
use crate::embeddings::{EmbeddingProvider, EmbeddingService};
use crate::rag::{RagComponents, RagOrchestrator};
use crate::types::{CollectionStats, DocumentChunk, UpsertReport};
use crate::vector_store::{InMemoryVectorStore, VectorStore};
use lumen_core::config::{CacheSettings, EmbeddingSettings, RagSettings};
use lumen_core::{AppError, AppResult};
use lumen_llm::{LlmClient, LlmRequest, LlmResponse, LlmUsage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Maps text to fixed vectors by keyword so similarities are exact.
///
/// The first matching keyword wins. Text containing "FAIL" errors.
#[derive(Debug)]
pub(crate) struct KeywordProvider;

pub(crate) const HALF: [f32; 3] = [0.5, 0.866_025_4, 0.0];

impl KeywordProvider {
    fn vector_for(text: &str) -> Vec<f32> {
        let rules: [(&str, [f32; 3]); 4] = [
            ("half", HALF),
            ("mix", [0.8, 0.6, 0.0]),
            ("alpha", [1.0, 0.0, 0.0]),
            ("beta", [0.0, 1.0, 0.0]),
        ];
        rules
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, v)| v.to_vec())
            .unwrap_or_else(|| vec![0.0, 0.0, 1.0])
    }
}

#[async_trait::async_trait]
impl EmbeddingProvider for KeywordProvider {
    fn provider_name(&self) -> &str {
        "keyword"
    }
    fn model_name(&self) -> &str {
        "keyword-v1"
    }
    fn dimensions(&self) -> usize {
        3
    }
    async fn embed(&self, text: &str) -> AppResult<Vec<f32>> {
        if text.contains("FAIL") {
            return Err(AppError::Provider("embedding backend returned 500".into()));
        }
        Ok(Self::vector_for(text))
    }
}

/// Generation client that records prompts.
#[derive(Debug, Default)]
pub(crate) struct RecordingClient {
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
    pub fail: AtomicBool,
}

impl RecordingClient {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> String {
        self.prompts.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl LlmClient for RecordingClient {
    fn provider_name(&self) -> &str {
        "recording"
    }

    async fn complete(&self, request: &LlmRequest) -> AppResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(request.prompt.clone());
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Provider("generation rate limited".into()));
        }
        Ok(LlmResponse {
            content: "generated answer".to_string(),
            model: request.model.clone(),
            usage: LlmUsage::new(10, 3),
        })
    }
}

/// In-memory store whose upserts can be switched to fail wholesale.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryVectorStore,
    pub fail_upserts: AtomicBool,
}

#[async_trait::async_trait]
impl VectorStore for FlakyStore {
    fn backend_name(&self) -> &str {
        "flaky"
    }
    async fn create_collection(&self, kb_id: &str) -> AppResult<()> {
        self.inner.create_collection(kb_id).await
    }
    async fn collection_exists(&self, kb_id: &str) -> AppResult<bool> {
        self.inner.collection_exists(kb_id).await
    }
    async fn upsert_chunks(&self, kb_id: &str, chunks: Vec<DocumentChunk>) -> AppResult<UpsertReport> {
        if self.fail_upserts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("disk full".into()));
        }
        self.inner.upsert_chunks(kb_id, chunks).await
    }
    async fn search_similar(
        &self,
        kb_id: &str,
        query_vector: &[f32],
        k: usize,
        threshold: f32,
    ) -> AppResult<Vec<DocumentChunk>> {
        self.inner.search_similar(kb_id, query_vector, k, threshold).await
    }
    async fn get_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<Vec<DocumentChunk>> {
        self.inner.get_document_chunks(kb_id, document_id).await
    }
    async fn delete_chunks(&self, kb_id: &str, chunk_ids: &[String]) -> AppResult<usize> {
        self.inner.delete_chunks(kb_id, chunk_ids).await
    }
    async fn delete_document_chunks(&self, kb_id: &str, document_id: &str) -> AppResult<usize> {
        self.inner.delete_document_chunks(kb_id, document_id).await
    }
    async fn delete_collection(&self, kb_id: &str) -> AppResult<bool> {
        self.inner.delete_collection(kb_id).await
    }
    async fn stats(&self, kb_id: &str) -> AppResult<CollectionStats> {
        self.inner.stats(kb_id).await
    }
}

pub(crate) struct Harness {
    pub orchestrator: RagOrchestrator,
    pub store: Arc<dyn VectorStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub llm: Arc<RecordingClient>,
}

pub(crate) fn harness() -> Harness {
    harness_with(
        DocumentProcessor::default(),
        RagSettings::default(),
        None,
        Arc::new(InMemoryVectorStore::new()),
    )
}

pub(crate) fn harness_with(
    processor: DocumentProcessor,
    settings: RagSettings,
    registry_path: Option<PathBuf>,
    store: Arc<dyn VectorStore>,
) -> Harness {
    let embedding_settings = EmbeddingSettings {
        dimensions: 3,
        ..Default::default()
    };
    let blobs = Arc::new(MemoryBlobStore::new());
    let llm = Arc::new(RecordingClient::default());

    let components = RagComponents {
        processor,
        embeddings: EmbeddingService::new(Arc::new(KeywordProvider), &embedding_settings),
        store: store.clone(),
        cache: Arc::new(CacheService::new(
            Some(Arc::new(MemoryKvStore::default())),
            &CacheSettings::default(),
        )),
        blobs: blobs.clone(),
        llm: llm.clone(),
        model: "test-model".to_string(),
    };

    Harness {
        orchestrator: RagOrchestrator::new(components, settings, registry_path),
        store,
        blobs,
        llm,
    }
}
