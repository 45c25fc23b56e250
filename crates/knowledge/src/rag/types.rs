//! Query options and answer types.

use crate::types::{DocumentChunk, Metadata};
use lumen_core::config::RagSettings;
use lumen_core::{AppError, AppResult};
use serde::{Deserialize, Serialize};

/// Answer returned when no chunk clears the similarity threshold.
pub const INSUFFICIENT_CONTEXT_RESPONSE: &str = "I don't have enough information in the knowledge base to answer this question: \
     no source met the similarity threshold, so there is insufficient context for an answer.";

/// Mean similarity below which the model is told to hedge.
pub const LOW_CONFIDENCE_THRESHOLD: f32 = 0.30;

/// Retrieval parameters for one query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryOptions {
    pub k: usize,
    pub threshold: f32,
    /// Consult and fill the response cache
    pub use_cache: bool,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self::from(&RagSettings::default())
    }
}

impl From<&RagSettings> for QueryOptions {
    fn from(settings: &RagSettings) -> Self {
        Self {
            k: settings.default_k,
            threshold: settings.similarity_threshold,
            use_cache: settings.cache_responses,
        }
    }
}

impl QueryOptions {
    pub fn new(k: usize, threshold: f32) -> Self {
        Self {
            k,
            threshold,
            ..Self::default()
        }
    }

    pub fn without_cache(mut self) -> Self {
        self.use_cache = false;
        self
    }

    /// Reject malformed parameters before any provider call.
    pub fn validate(&self, query: &str) -> AppResult<()> {
        if query.trim().is_empty() {
            return Err(AppError::Validation("query text is empty".to_string()));
        }
        if self.k == 0 {
            return Err(AppError::Validation("k must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(AppError::Validation(format!(
                "similarity threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        Ok(())
    }
}

/// A retrieved chunk as shown to callers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub chunk_id: String,
    pub document_id: String,
    pub kb_id: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub similarity_score: f32,
}

impl SourceRef {
    pub fn from_chunk(kb_id: &str, chunk: DocumentChunk) -> Self {
        Self {
            title: chunk.title().to_string(),
            similarity_score: chunk.similarity_score.unwrap_or(0.0),
            chunk_id: chunk.id,
            document_id: chunk.document_id,
            kb_id: kb_id.to_string(),
            content: chunk.content,
            metadata: chunk.metadata,
        }
    }
}

/// Generated answer with its supporting sources.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagAnswer {
    pub response: String,
    pub sources: Vec<SourceRef>,
    /// Mean similarity of `sources`, zero when there are none
    pub confidence: f32,
    pub query: String,
    pub context_used: bool,
    /// Candidates found before the final truncation to k
    pub total_sources_found: usize,
    pub knowledge_bases_searched: Vec<String>,
    pub processing_time_ms: u64,
    #[serde(default)]
    pub cached: bool,
}

impl RagAnswer {
    pub fn insufficient_context(query: &str, knowledge_bases_searched: Vec<String>) -> Self {
        Self {
            response: INSUFFICIENT_CONTEXT_RESPONSE.to_string(),
            sources: Vec::new(),
            confidence: 0.0,
            query: query.to_string(),
            context_used: false,
            total_sources_found: 0,
            knowledge_bases_searched,
            processing_time_ms: 0,
            cached: false,
        }
    }
}

/// Mean similarity of `sources`.
pub fn mean_confidence(sources: &[SourceRef]) -> f32 {
    if sources.is_empty() {
        return 0.0;
    }
    sources.iter().map(|s| s.similarity_score).sum::<f32>() / sources.len() as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_options() {
        assert!(QueryOptions::new(5, 0.7).validate("what?").is_ok());
        assert!(QueryOptions::new(0, 0.7).validate("what?").is_err());
        assert!(QueryOptions::new(5, 1.5).validate("what?").is_err());
        assert!(QueryOptions::new(5, f32::NAN).validate("what?").is_err());
        assert!(matches!(
            QueryOptions::new(5, 0.5).validate("  "),
            Err(AppError::Validation(_))
        ));
    }

    #[test]
    fn test_defaults_follow_settings() {
        let options = QueryOptions::default();
        assert_eq!(options.k, 5);
        assert!((options.threshold - 0.7).abs() < f32::EPSILON);
        assert!(options.use_cache);
        assert!(!options.without_cache().use_cache);
    }

    #[test]
    fn test_source_from_chunk_and_confidence() {
        let mut chunk = DocumentChunk::new("doc", 2, "body");
        chunk.metadata.insert("title".into(), "Guide".into());
        chunk.similarity_score = Some(0.8);
        let a = SourceRef::from_chunk("kb1", chunk);
        assert_eq!(a.chunk_id, "doc_chunk_2");
        assert_eq!(a.title, "Guide");

        let mut b = a.clone();
        b.similarity_score = 0.6;
        assert!((mean_confidence(&[a, b]) - 0.7).abs() < 1e-6);
        assert_eq!(mean_confidence(&[]), 0.0);
    }

    #[test]
    fn test_insufficient_context_answer() {
        let answer = RagAnswer::insufficient_context("q", vec!["kb".into()]);
        assert!(answer.response.contains("insufficient context"));
        assert!(!answer.context_used);
        assert!(answer.sources.is_empty());
    }
}
