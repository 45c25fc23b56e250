//! Core types for knowledge bases, chunks and ingestion.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Open metadata map attached to chunks.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A named, isolated collection of documents and chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBase {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub document_count: u64,
    #[serde(default)]
    pub total_chunks: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub settings: BTreeMap<String, serde_json::Value>,
}

impl KnowledgeBase {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        settings: BTreeMap<String, serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name: name.into(),
            description: description.into(),
            document_count: 0,
            total_chunks: 0,
            created_at: now,
            updated_at: now,
            settings,
        }
    }

    /// Storage collection name for this knowledge base.
    pub fn collection_name(&self) -> String {
        collection_name(&self.id)
    }
}

/// Deterministic, injective collection name for a knowledge base id.
///
/// Ids made only of `[a-z0-9]` map to `kb_{id}`. Any other id is
/// hex-encoded as `kb__{hex}`; the double underscore cannot occur in the
/// plain form, so distinct ids never share a name.
pub fn collection_name(kb_id: &str) -> String {
    let plain = !kb_id.is_empty()
        && kb_id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit());
    if plain {
        return format!("kb_{}", kb_id);
    }
    let hex: String = kb_id.bytes().map(|b| format!("{:02x}", b)).collect();
    format!("kb__{}", hex)
}

/// A bounded piece of a document with its embedding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentChunk {
    /// `{document_id}_chunk_{chunk_index}`
    pub id: String,
    pub document_id: String,
    pub chunk_index: u32,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    /// Embedding is a zero-vector placeholder; never ranked
    #[serde(default)]
    pub degraded: bool,
    /// Set only on search results, always within [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentChunk {
    pub fn chunk_id(document_id: &str, chunk_index: u32) -> String {
        format!("{}_chunk_{}", document_id, chunk_index)
    }

    pub fn new(document_id: &str, chunk_index: u32, content: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Self::chunk_id(document_id, chunk_index),
            document_id: document_id.to_string(),
            chunk_index,
            content: content.into(),
            metadata: Metadata::new(),
            embedding: Vec::new(),
            degraded: false,
            similarity_score: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Title recorded at ingestion, falling back to the document id.
    pub fn title(&self) -> &str {
        self.metadata
            .get("title")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.document_id)
    }
}

/// Document format, detected from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    #[default]
    Text,
    Markdown,
    Html,
    Json,
    Csv,
    Code,
    Unknown,
}

impl DocumentType {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("txt") | Some("text") => Self::Text,
            Some("md") | Some("markdown") => Self::Markdown,
            Some("html") | Some("htm") => Self::Html,
            Some("json") => Self::Json,
            Some("csv") => Self::Csv,
            Some("rs") | Some("py") | Some("js") | Some("ts") | Some("go") | Some("c")
            | Some("cpp") | Some("java") | Some("sh") | Some("yaml") | Some("yml")
            | Some("toml") => Self::Code,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Html => "html",
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Code => "code",
            Self::Unknown => "unknown",
        }
    }
}

/// Descriptive metadata supplied with a document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DocumentMetadata {
    pub title: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub document_type: DocumentType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: Metadata,
}

fn default_language() -> String {
    "en".to_string()
}

impl DocumentMetadata {
    pub fn new(title: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source: source.into(),
            language: default_language(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = document_type;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// Flatten into the map stored on each chunk.
    pub fn to_chunk_metadata(&self) -> Metadata {
        let mut map = self.custom_fields.clone();
        map.insert("title".into(), self.title.clone().into());
        map.insert("source".into(), self.source.clone().into());
        map.insert("document_type".into(), self.document_type.as_str().into());
        map.insert("language".into(), self.language.clone().into());
        if let Some(author) = &self.author {
            map.insert("author".into(), author.clone().into());
        }
        if !self.tags.is_empty() {
            map.insert("tags".into(), self.tags.clone().into());
        }
        map
    }
}

/// Aggregate numbers for one storage collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct CollectionStats {
    pub total_chunks: u64,
    pub unique_documents: u64,
    pub avg_chunk_length: f64,
}

/// Registry record merged with live collection numbers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KnowledgeBaseStats {
    pub id: String,
    pub name: String,
    pub document_count: u64,
    pub total_chunks: u64,
    pub unique_documents: u64,
    pub avg_chunk_length: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-chunk result of an upsert call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkOutcome {
    pub chunk_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ChunkOutcome {
    pub fn ok(chunk_id: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            error: None,
        }
    }

    pub fn failed(chunk_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            chunk_id: chunk_id.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of `upsert_chunks`, in input order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct UpsertReport {
    pub outcomes: Vec<ChunkOutcome>,
}

impl UpsertReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_ok()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ChunkOutcome> {
        self.outcomes.iter().filter(|o| !o.is_ok())
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }
}

/// Pipeline stage that can fail during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStage {
    Chunking,
    Embedding,
    Storing,
}

/// Ingestion state machine.
///
/// `Pending -> Chunking -> Embedding -> Storing -> Completed`, with `Failed`
/// reachable from the three middle states only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum IngestionState {
    Pending,
    Chunking,
    Embedding,
    Storing,
    Completed,
    Failed { stage: IngestionStage, reason: String },
}

impl IngestionState {
    pub fn can_transition_to(&self, next: &IngestionState) -> bool {
        use IngestionState::*;
        match (self, next) {
            (Pending, Chunking) | (Chunking, Embedding) | (Embedding, Storing) | (Storing, Completed) => true,
            (Chunking, Failed { stage, .. }) => *stage == IngestionStage::Chunking,
            (Embedding, Failed { stage, .. }) => *stage == IngestionStage::Embedding,
            (Storing, Failed { stage, .. }) => *stage == IngestionStage::Storing,
            _ => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Storing => "storing",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Progress and result of one document ingestion.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionReport {
    pub kb_id: String,
    pub document_id: String,
    pub state: IngestionState,
    /// Every state entered, in order
    pub history: Vec<IngestionState>,
    pub chunks_total: usize,
    pub chunks_stored: usize,
    pub chunks_degraded: usize,
    #[serde(default)]
    pub chunk_failures: Vec<ChunkOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionReport {
    pub fn new(kb_id: &str, document_id: &str) -> Self {
        Self {
            kb_id: kb_id.to_string(),
            document_id: document_id.to_string(),
            state: IngestionState::Pending,
            history: vec![IngestionState::Pending],
            chunks_total: 0,
            chunks_stored: 0,
            chunks_degraded: 0,
            chunk_failures: Vec::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `next`; illegal transitions are ignored and logged.
    pub fn advance(&mut self, next: IngestionState) {
        if !self.state.can_transition_to(&next) {
            tracing::error!(
                document_id = %self.document_id,
                from = self.state.name(),
                to = next.name(),
                "Illegal ingestion transition"
            );
            return;
        }
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        self.history.push(next.clone());
        self.state = next;
    }

    pub fn fail(&mut self, stage: IngestionStage, reason: impl Into<String>) {
        self.advance(IngestionState::Failed {
            stage,
            reason: reason.into(),
        });
    }
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// One message in a chat session's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: Metadata::new(),
        }
    }
}

/// Chat session summary kept in the session cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatSession {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub model_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    pub fn new(model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: None,
            model_id: model_id.into(),
            user_id: None,
            message_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
