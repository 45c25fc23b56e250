//! Retrieval-augmented answering over knowledge bases.

pub mod context;
pub mod orchestrator;
pub mod types;

pub use orchestrator::{RagComponents, RagOrchestrator};
pub use types::{QueryOptions, RagAnswer, SourceRef, INSUFFICIENT_CONTEXT_RESPONSE};
