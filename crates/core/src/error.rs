//! Error types for the Lumen knowledge engine.
//!
//! One enum covers every failure category. Validation, not-found and storage
//! errors reach callers; provider errors are either fatal to a query or
//! degraded locally; cache errors never leave the cache facade.

use thiserror::Error;

/// Unified error type for all Lumen crates.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input: bad query parameters, empty names, dimension mismatch
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown knowledge base, document or collection
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generation or embedding provider failure after retries
    #[error("Provider error: {0}")]
    Provider(String),

    /// Vector store or blob store failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Cache backend unreachable
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

impl AppError {
    /// Shorthand for a not-found knowledge base.
    pub fn kb_not_found(kb_id: &str) -> Self {
        AppError::NotFound(format!("knowledge base '{}'", kb_id))
    }

    /// Whether this error should be shown to users as a 404-style miss.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(err: rusqlite::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
