//! Ingestion and retrieval-augmented answering across knowledge bases.

use super::context::{build_prompt, system_prompt};
use super::types::{mean_confidence, QueryOptions, RagAnswer, SourceRef, LOW_CONFIDENCE_THRESHOLD};
use crate::blob::{document_key, kb_prefix, BlobStore, FsBlobStore};
use crate::cache::CacheService;
use crate::chunker::{content_hash, DocumentProcessor};
use crate::embeddings::{create_provider, EmbeddingService};
use crate::registry::{load_registry, registry_path, save_registry};
use crate::types::{
    DocumentMetadata, IngestionReport, IngestionStage, IngestionState, KnowledgeBase,
    KnowledgeBaseStats,
};
use crate::vector_store::{compare_ranked, InMemoryVectorStore, SqliteVectorStore, VectorStore};
use chrono::Utc;
use lumen_core::config::RagSettings;
use lumen_core::{AppConfig, AppError, AppResult};
use lumen_llm::{create_client, LlmClient, LlmRequest, RetryPolicy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Collaborators injected into the orchestrator.
#[derive(Clone)]
pub struct RagComponents {
    pub processor: DocumentProcessor,
    pub embeddings: EmbeddingService,
    pub store: Arc<dyn VectorStore>,
    pub cache: Arc<CacheService>,
    pub blobs: Arc<dyn BlobStore>,
    pub llm: Arc<dyn LlmClient>,
    /// Generation model passed with every request
    pub model: String,
}

pub struct RagOrchestrator {
    processor: DocumentProcessor,
    embeddings: EmbeddingService,
    store: Arc<dyn VectorStore>,
    cache: Arc<CacheService>,
    blobs: Arc<dyn BlobStore>,
    llm: Arc<dyn LlmClient>,
    model: String,
    settings: RagSettings,
    /// Registry file; `None` keeps the registry in memory only
    registry_path: Option<PathBuf>,
    bases: RwLock<BTreeMap<String, KnowledgeBase>>,
    /// Latest ingestion report per (kb_id, document_id)
    statuses: RwLock<HashMap<(String, String), IngestionReport>>,
}

impl RagOrchestrator {
    pub fn new(components: RagComponents, settings: RagSettings, registry_path: Option<PathBuf>) -> Self {
        Self {
            processor: components.processor,
            embeddings: components.embeddings,
            store: components.store,
            cache: components.cache,
            blobs: components.blobs,
            llm: components.llm,
            model: components.model,
            settings,
            registry_path,
            bases: RwLock::new(BTreeMap::new()),
            statuses: RwLock::new(HashMap::new()),
        }
    }

    /// Wire every component from configuration.
    ///
    /// Nothing touches the disk or network until [`start`](Self::start),
    /// except a Redis cache which connects eagerly.
    pub async fn from_config(config: &AppConfig) -> AppResult<Self> {
        let retry = RetryPolicy::from(&config.retry);
        let data_dir = config.data_dir();

        let provider = create_provider(&config.embedding, retry.clone())?;
        let embeddings = EmbeddingService::new(provider, &config.embedding);

        let store: Arc<dyn VectorStore> = match config.storage.vector_backend.as_str() {
            "memory" => Arc::new(InMemoryVectorStore::new()),
            _ => Arc::new(SqliteVectorStore::new(data_dir.join("collections"))),
        };

        let components = RagComponents {
            processor: DocumentProcessor::new(config.rag.chunk_size, config.rag.chunk_overlap),
            embeddings,
            store,
            cache: Arc::new(CacheService::from_settings(&config.cache).await),
            blobs: Arc::new(FsBlobStore::new(&data_dir)),
            llm: create_client(&config.provider, config.endpoint.as_deref(), retry)?,
            model: config.model.clone(),
        };

        tracing::debug!(
            provider = %config.provider,
            embedding = %config.embedding.provider,
            vector_backend = components.store.backend_name(),
            data_dir = ?data_dir,
            "Configured orchestrator"
        );
        Ok(Self::new(components, config.rag.clone(), Some(registry_path(&data_dir))))
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheService {
        &self.cache
    }

    /// Load the registry, reopen every collection and connect the cache.
    pub async fn start(&self) -> AppResult<()> {
        if let Some(path) = &self.registry_path {
            let loaded = load_registry(path)?;
            *self.bases.write().await = loaded;
        }

        let ids: Vec<String> = self.bases.read().await.keys().cloned().collect();
        for kb_id in &ids {
            self.store.create_collection(kb_id).await?;
        }

        self.cache.connect().await;
        tracing::info!(
            knowledge_bases = ids.len(),
            backend = self.store.backend_name(),
            "Orchestrator started"
        );
        Ok(())
    }

    /// Persist the registry and disconnect the cache.
    pub async fn stop(&self) -> AppResult<()> {
        self.persist(&*self.bases.read().await)?;
        self.cache.disconnect().await;
        tracing::debug!("Orchestrator stopped");
        Ok(())
    }

    fn persist(&self, bases: &BTreeMap<String, KnowledgeBase>) -> AppResult<()> {
        match &self.registry_path {
            Some(path) => save_registry(path, bases),
            None => Ok(()),
        }
    }

    async fn require_kb(&self, kb_id: &str) -> AppResult<KnowledgeBase> {
        self.bases
            .read()
            .await
            .get(kb_id)
            .cloned()
            .ok_or_else(|| AppError::kb_not_found(kb_id))
    }

    pub async fn create_knowledge_base(
        &self,
        name: &str,
        description: &str,
        settings: BTreeMap<String, serde_json::Value>,
    ) -> AppResult<KnowledgeBase> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("knowledge base name is empty".to_string()));
        }

        let kb = KnowledgeBase::new(name.trim(), description, settings);
        self.store.create_collection(&kb.id).await?;

        let mut bases = self.bases.write().await;
        bases.insert(kb.id.clone(), kb.clone());
        self.persist(&bases)?;

        tracing::info!(kb_id = %kb.id, name = %kb.name, "Created knowledge base");
        Ok(kb)
    }

    /// All knowledge bases, ordered by name.
    pub async fn list_knowledge_bases(&self) -> Vec<KnowledgeBase> {
        let mut bases: Vec<KnowledgeBase> = self.bases.read().await.values().cloned().collect();
        bases.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        bases
    }

    pub async fn get_knowledge_base(&self, kb_id: &str) -> AppResult<KnowledgeBase> {
        self.require_kb(kb_id).await
    }

    async fn record(&self, report: &IngestionReport) {
        self.statuses
            .write()
            .await
            .insert(
                (report.kb_id.clone(), report.document_id.clone()),
                report.clone(),
            );
    }

    async fn advance(&self, report: &mut IngestionReport, next: IngestionState) {
        report.advance(next);
        self.record(report).await;
    }

    async fn fail_ingestion(
        &self,
        mut report: IngestionReport,
        stage: IngestionStage,
        err: AppError,
    ) -> AppResult<IngestionReport> {
        report.fail(stage, err.to_string());
        self.record(&report).await;
        tracing::warn!(
            kb_id = %report.kb_id,
            document_id = %report.document_id,
            ?stage,
            error = %err,
            "Ingestion failed"
        );
        Err(err)
    }

    /// Chunk, embed, store and archive one document.
    ///
    /// Passing an existing `document_id` replaces that document's chunks.
    /// Items that fail to embed are stored as degraded; chunks the store
    /// rejects are listed in the report without failing the document.
    pub async fn add_document(
        &self,
        kb_id: &str,
        content: &str,
        metadata: DocumentMetadata,
        document_id: Option<&str>,
    ) -> AppResult<IngestionReport> {
        self.require_kb(kb_id).await?;
        let document_id = document_id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let mut report = IngestionReport::new(kb_id, &document_id);
        self.record(&report).await;

        self.advance(&mut report, IngestionState::Chunking).await;
        let mut chunks = self.processor.process_document(&document_id, content, &metadata);
        if chunks.is_empty() {
            let err = AppError::Validation("document has no text to index".to_string());
            return self.fail_ingestion(report, IngestionStage::Chunking, err).await;
        }
        report.chunks_total = chunks.len();

        self.advance(&mut report, IngestionState::Embedding).await;
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embeddings.embed(&texts).await;
        for (chunk, embedding) in chunks.iter_mut().zip(embeddings) {
            chunk.degraded = embedding.is_degraded();
            chunk.embedding = embedding.into_vector();
        }
        report.chunks_degraded = chunks.iter().filter(|c| c.degraded).count();
        if report.chunks_degraded == report.chunks_total {
            let err = AppError::Provider(format!(
                "all {} chunks failed to embed",
                report.chunks_total
            ));
            return self.fail_ingestion(report, IngestionStage::Embedding, err).await;
        }

        self.advance(&mut report, IngestionState::Storing).await;
        let previous = match self.store.get_document_chunks(kb_id, &document_id).await {
            Ok(previous) => previous,
            Err(err) => return self.fail_storing(report, err, 0).await,
        };
        let is_new = previous.is_empty();

        // New chunks go in first; the previous version stays intact until they land.
        let upsert = match self.store.upsert_chunks(kb_id, chunks).await {
            Ok(upsert) => upsert,
            Err(err) => return self.fail_storing(report, err, 0).await,
        };
        report.chunks_stored = upsert.succeeded();
        report.chunk_failures = upsert.failures().cloned().collect();
        if report.chunks_stored == 0 {
            let reason = report
                .chunk_failures
                .first()
                .and_then(|f| f.error.clone())
                .unwrap_or_default();
            let err = AppError::Storage(format!("no chunk could be stored: {}", reason));
            return self.fail_storing(report, err, 0).await;
        }
        let document_delta = if is_new { 1 } else { 0 };

        let stored: HashSet<&str> = upsert
            .outcomes
            .iter()
            .filter(|o| o.is_ok())
            .map(|o| o.chunk_id.as_str())
            .collect();
        let stale: Vec<String> = previous
            .into_iter()
            .map(|c| c.id)
            .filter(|id| !stored.contains(id.as_str()))
            .collect();
        if !stale.is_empty() {
            match self.store.delete_chunks(kb_id, &stale).await {
                Ok(removed) => {
                    tracing::debug!(kb_id, document_id = %document_id, removed, "Removed stale chunks")
                }
                Err(err) => return self.fail_storing(report, err, document_delta).await,
            }
        }

        if let Err(err) = self
            .blobs
            .put(&document_key(kb_id, &document_id), content.as_bytes())
            .await
        {
            return self.fail_storing(report, err, document_delta).await;
        }

        if let Err(err) = self.refresh_counters(kb_id, document_delta).await {
            return self.fail_ingestion(report, IngestionStage::Storing, err).await;
        }

        self.advance(&mut report, IngestionState::Completed).await;
        tracing::info!(
            kb_id,
            document_id = %document_id,
            chunks = report.chunks_total,
            stored = report.chunks_stored,
            degraded = report.chunks_degraded,
            failed = report.chunk_failures.len(),
            "Ingested document"
        );
        Ok(report)
    }

    /// Fail at Storing after bringing the KB counters back in line with the store.
    async fn fail_storing(
        &self,
        report: IngestionReport,
        err: AppError,
        document_delta: i64,
    ) -> AppResult<IngestionReport> {
        let kb_id = report.kb_id.clone();
        if let Err(e) = self.refresh_counters(&kb_id, document_delta).await {
            tracing::warn!(kb_id = %kb_id, error = %e, "Could not refresh counters after failed ingestion");
        }
        self.fail_ingestion(report, IngestionStage::Storing, err).await
    }

    /// Recompute `total_chunks` from the store and adjust `document_count`.
    async fn refresh_counters(&self, kb_id: &str, document_delta: i64) -> AppResult<()> {
        let stats = self.store.stats(kb_id).await?;
        let mut bases = self.bases.write().await;
        let kb = bases.get_mut(kb_id).ok_or_else(|| AppError::kb_not_found(kb_id))?;

        kb.document_count = if document_delta >= 0 {
            kb.document_count + document_delta as u64
        } else {
            kb.document_count.saturating_sub(document_delta.unsigned_abs())
        };
        kb.total_chunks = stats.total_chunks;
        kb.updated_at = Utc::now();
        self.persist(&bases)
    }

    /// Latest ingestion state of a document.
    pub async fn document_status(&self, kb_id: &str, document_id: &str) -> AppResult<IngestionReport> {
        self.statuses
            .read()
            .await
            .get(&(kb_id.to_string(), document_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "document '{}' in knowledge base '{}'",
                    document_id, kb_id
                ))
            })
    }

    /// Remove a document's chunks and raw content; returns removed chunk count.
    pub async fn delete_document(&self, kb_id: &str, document_id: &str) -> AppResult<usize> {
        self.require_kb(kb_id).await?;

        let removed = self.store.delete_document_chunks(kb_id, document_id).await?;
        if removed == 0 {
            return Err(AppError::NotFound(format!(
                "document '{}' in knowledge base '{}'",
                document_id, kb_id
            )));
        }
        self.blobs.delete(&document_key(kb_id, document_id)).await?;
        self.statuses
            .write()
            .await
            .remove(&(kb_id.to_string(), document_id.to_string()));
        self.refresh_counters(kb_id, -1).await?;

        tracing::info!(kb_id, document_id, removed, "Deleted document");
        Ok(removed)
    }

    /// Answer `query` from one knowledge base.
    ///
    /// Embedding, search and generation failures are fatal here.
    pub async fn query(&self, kb_id: &str, query: &str, options: &QueryOptions) -> AppResult<RagAnswer> {
        options.validate(query)?;
        self.require_kb(kb_id).await?;
        let started = Instant::now();
        let kb_ids = vec![kb_id.to_string()];

        let cache_key = response_cache_key(&kb_ids, query, options);
        if let Some(hit) = self.cached_answer(&cache_key, query, options, started).await {
            return Ok(hit);
        }

        let vector = self.embeddings.embed_query(query).await?;
        let chunks = self
            .store
            .search_similar(kb_id, &vector, options.k, options.threshold)
            .await?;
        let total = chunks.len();
        let sources: Vec<SourceRef> = chunks
            .into_iter()
            .map(|c| SourceRef::from_chunk(kb_id, c))
            .collect();

        let answer = self.generate(query, sources, total, kb_ids, started).await?;
        self.store_answer(&cache_key, &answer, options).await;
        Ok(answer)
    }

    /// Answer `query` from several knowledge bases at once.
    ///
    /// Each knowledge base is searched concurrently for `k / n + 1`
    /// candidates; the merged list is re-sorted and cut to `k`. A failing or
    /// unknown knowledge base is logged and left out. An empty `kb_ids`
    /// searches every knowledge base.
    pub async fn query_multiple(
        &self,
        kb_ids: &[String],
        query: &str,
        options: &QueryOptions,
    ) -> AppResult<RagAnswer> {
        options.validate(query)?;
        let started = Instant::now();

        let targets = self.resolve_targets(kb_ids).await?;
        if targets.is_empty() {
            tracing::info!("No knowledge bases to search");
            return Ok(RagAnswer::insufficient_context(query, Vec::new()));
        }

        let cache_key = response_cache_key(&targets, query, options);
        if let Some(hit) = self.cached_answer(&cache_key, query, options, started).await {
            return Ok(hit);
        }

        let vector = Arc::new(self.embeddings.embed_query(query).await?);
        let per_kb_k = options.k / targets.len() + 1;

        let handles: Vec<_> = targets
            .iter()
            .map(|kb_id| {
                let store = Arc::clone(&self.store);
                let vector = Arc::clone(&vector);
                let kb_id = kb_id.clone();
                let threshold = options.threshold;
                tokio::spawn(async move {
                    let result = store.search_similar(&kb_id, &vector, per_kb_k, threshold).await;
                    (kb_id, result)
                })
            })
            .collect();

        let mut merged = Vec::new();
        let mut searched = Vec::new();
        for outcome in futures::future::join_all(handles).await {
            match outcome {
                Ok((kb_id, Ok(chunks))) => {
                    merged.extend(chunks.into_iter().map(|c| (kb_id.clone(), c)));
                    searched.push(kb_id);
                }
                Ok((kb_id, Err(e))) => {
                    tracing::warn!(kb_id = %kb_id, error = %e, "Knowledge base search failed, excluding it");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Knowledge base search task aborted");
                }
            }
        }

        merged.sort_by(|(_, a), (_, b)| compare_ranked(a, b));
        let total = merged.len();
        merged.truncate(options.k);
        let sources: Vec<SourceRef> = merged
            .into_iter()
            .map(|(kb_id, chunk)| SourceRef::from_chunk(&kb_id, chunk))
            .collect();

        tracing::debug!(
            requested = targets.len(),
            searched = searched.len(),
            per_kb_k,
            found = total,
            kept = sources.len(),
            "Merged multi-knowledge-base results"
        );

        let answer = self.generate(query, sources, total, searched, started).await?;
        self.store_answer(&cache_key, &answer, options).await;
        Ok(answer)
    }

    async fn resolve_targets(&self, kb_ids: &[String]) -> AppResult<Vec<String>> {
        let bases = self.bases.read().await;
        if kb_ids.is_empty() {
            return Ok(bases.keys().cloned().collect());
        }

        let mut targets: Vec<String> = Vec::new();
        for kb_id in kb_ids {
            if targets.contains(kb_id) {
                continue;
            }
            if bases.contains_key(kb_id) {
                targets.push(kb_id.clone());
            } else {
                tracing::warn!(kb_id = %kb_id, "Unknown knowledge base, excluding it");
            }
        }

        if targets.is_empty() {
            return Err(AppError::NotFound(format!(
                "none of the knowledge bases {:?}",
                kb_ids
            )));
        }
        Ok(targets)
    }

    async fn cached_answer(
        &self,
        key: &str,
        query: &str,
        options: &QueryOptions,
        started: Instant,
    ) -> Option<RagAnswer> {
        if !options.use_cache {
            return None;
        }
        let mut hit: RagAnswer = self.cache.get_cached_response(key).await?;
        hit.cached = true;
        // The key ignores surrounding whitespace; echo this caller's text
        hit.query = query.to_string();
        hit.processing_time_ms = started.elapsed().as_millis() as u64;
        tracing::debug!(key, "Served answer from cache");
        Some(hit)
    }

    async fn store_answer(&self, key: &str, answer: &RagAnswer, options: &QueryOptions) {
        // Insufficient-context answers are never cached
        if options.use_cache && answer.context_used {
            self.cache.cache_response(key, answer).await;
        }
    }

    async fn generate(
        &self,
        query: &str,
        sources: Vec<SourceRef>,
        total_sources_found: usize,
        knowledge_bases_searched: Vec<String>,
        started: Instant,
    ) -> AppResult<RagAnswer> {
        if sources.is_empty() {
            tracing::info!(query_len = query.len(), "No sources above threshold");
            let mut answer = RagAnswer::insufficient_context(query, knowledge_bases_searched);
            answer.processing_time_ms = started.elapsed().as_millis() as u64;
            return Ok(answer);
        }

        let prompt = build_prompt(query, &sources, self.settings.max_context_length);
        let mut sources = sources;
        if prompt.sources_used < sources.len() {
            tracing::debug!(
                kept = prompt.sources_used,
                dropped = sources.len() - prompt.sources_used,
                "Sources cut from the prompt"
            );
            sources.truncate(prompt.sources_used);
        }
        if sources.is_empty() {
            tracing::info!(
                max_context_length = self.settings.max_context_length,
                "No room for any source in the prompt"
            );
            let mut answer = RagAnswer::insufficient_context(query, knowledge_bases_searched);
            answer.total_sources_found = total_sources_found;
            answer.processing_time_ms = started.elapsed().as_millis() as u64;
            return Ok(answer);
        }

        let confidence = mean_confidence(&sources);

        let request = LlmRequest::new(prompt.text, &self.model)
            .with_system(system_prompt(confidence < LOW_CONFIDENCE_THRESHOLD))
            .with_temperature(0.3)
            .with_max_tokens(1000);
        let response = self.llm.complete(&request).await?;

        tracing::info!(
            sources = sources.len(),
            confidence,
            truncated = prompt.truncated,
            provider = self.llm.provider_name(),
            "Generated answer"
        );

        Ok(RagAnswer {
            response: response.content,
            sources,
            confidence,
            query: query.to_string(),
            context_used: true,
            total_sources_found,
            knowledge_bases_searched,
            processing_time_ms: started.elapsed().as_millis() as u64,
            cached: false,
        })
    }

    /// Delete a knowledge base with its collection and raw documents.
    ///
    /// Cached answers are left to expire.
    pub async fn delete_knowledge_base(&self, kb_id: &str) -> AppResult<()> {
        self.require_kb(kb_id).await?;

        self.store.delete_collection(kb_id).await?;
        let blobs = self.blobs.delete_prefix(&kb_prefix(kb_id)).await?;
        self.statuses.write().await.retain(|(owner, _), _| owner != kb_id);

        let mut bases = self.bases.write().await;
        bases.remove(kb_id);
        self.persist(&bases)?;

        tracing::info!(kb_id, blobs, "Deleted knowledge base");
        Ok(())
    }

    pub async fn stats(&self, kb_id: &str) -> AppResult<KnowledgeBaseStats> {
        let kb = self.require_kb(kb_id).await?;
        let collection = self.store.stats(kb_id).await?;
        Ok(KnowledgeBaseStats {
            id: kb.id,
            name: kb.name,
            document_count: kb.document_count,
            total_chunks: collection.total_chunks,
            unique_documents: collection.unique_documents,
            avg_chunk_length: collection.avg_chunk_length,
            created_at: kb.created_at,
            updated_at: kb.updated_at,
        })
    }
}

/// Cache key over the sorted knowledge base ids and retrieval parameters.
fn response_cache_key(kb_ids: &[String], query: &str, options: &QueryOptions) -> String {
    let mut ids = kb_ids.to_vec();
    ids.sort();
    content_hash(&format!(
        "{}|{}|{}|{:.4}",
        ids.join(","),
        query.trim(),
        options.k,
        options.threshold
    ))
}
