//! Multi-tenant knowledge engine.
//!
//! Documents are chunked, embedded and stored per knowledge base, then
//! retrieved by similarity to ground generated answers. The
//! [`RagOrchestrator`] ties the pieces together; each component can also be
//! used on its own.

pub mod blob;
pub mod cache;
pub mod chunker;
pub mod embeddings;
pub mod parser;
pub mod rag;
pub mod registry;
pub mod types;
pub mod vector_store;

#[cfg(test)]
mod tests;

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use cache::{CacheService, CacheStats, KvStore, MemoryKvStore, Namespace, RedisKvStore};
pub use chunker::DocumentProcessor;
pub use embeddings::{Embedding, EmbeddingProvider, EmbeddingService};
pub use parser::{read_document, ParsedDocument};
pub use rag::{QueryOptions, RagAnswer, RagComponents, RagOrchestrator, SourceRef};
pub use types::{
    ChatMessage, ChatSession, DocumentChunk, DocumentMetadata, DocumentType, IngestionReport,
    IngestionState, KnowledgeBase, KnowledgeBaseStats, MessageRole,
};
pub use vector_store::{InMemoryVectorStore, SqliteVectorStore, VectorStore};
