//! Configuration management.
//!
//! Settings are layered in this order, later layers winning:
//! - built-in defaults
//! - the YAML config file (`.lumen/config.yaml` or `LUMEN_CONFIG`)
//! - `LUMEN_*` environment variables
//! - command-line flags (`with_overrides`)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AppError, AppResult};

/// Name of the per-workspace state directory.
pub const LUMEN_DIR: &str = ".lumen";

const KNOWN_PROVIDERS: [&str; 2] = ["ollama", "mock"];

/// Main application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to the workspace root (contains .lumen/)
    pub workspace: PathBuf,

    /// Optional config file path
    pub config_file: Option<PathBuf>,

    /// Generation provider ("ollama", "mock")
    pub provider: String,

    /// Generation model identifier
    pub model: String,

    /// Provider endpoint override
    pub endpoint: Option<String>,

    /// Log level override
    pub log_level: Option<String>,

    /// Log output format ("pretty" or "json")
    pub log_format: String,

    /// Verbose mode (enables debug logging)
    pub verbose: bool,

    /// Disable colored output
    pub no_color: bool,

    pub embedding: EmbeddingSettings,
    pub rag: RagSettings,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    pub storage: StorageSettings,
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    /// Texts per upstream batch
    pub batch_size: usize,
    /// Concurrent requests inside one batch
    pub max_concurrency: usize,
    /// Per-item timeout in seconds
    pub item_timeout_secs: u64,
    pub endpoint: Option<String>,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            model: "nomic-embed-text".to_string(),
            dimensions: 768,
            batch_size: 10,
            max_concurrency: 4,
            item_timeout_secs: 30,
            endpoint: None,
        }
    }
}

/// Chunking and retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub default_k: usize,
    pub similarity_threshold: f32,
    /// Upper bound on prompt length (context + question), in characters
    pub max_context_length: usize,
    /// Serve repeated queries from the response cache
    pub cache_responses: bool,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
            default_k: 5,
            similarity_threshold: 0.7,
            max_context_length: 4000,
            cache_responses: true,
        }
    }
}

/// Cache layer settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CacheSettings {
    /// "memory", "redis" or "none"
    pub backend: String,
    pub redis_url: Option<String>,
    pub key_prefix: Option<String>,
    pub session_ttl_secs: u64,
    pub messages_ttl_secs: u64,
    pub response_ttl_secs: u64,
    pub max_messages: usize,
    pub max_capacity: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            redis_url: None,
            key_prefix: Some("lumen".to_string()),
            session_ttl_secs: 24 * 60 * 60,
            messages_ttl_secs: 7 * 24 * 60 * 60,
            response_ttl_secs: 60 * 60,
            max_messages: 1000,
            max_capacity: 10_000,
        }
    }
}

/// Retry/backoff settings for outbound provider calls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_base: f64,
    /// Fractional jitter, 0.25 means +/-25%
    pub jitter: f64,
    pub request_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_base: 2.0,
            jitter: 0.25,
            request_timeout_secs: 60,
        }
    }
}

/// Persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Defaults to `<workspace>/.lumen/data`
    pub data_dir: Option<PathBuf>,
    /// "sqlite" or "memory"
    pub vector_backend: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            vector_backend: "sqlite".to_string(),
        }
    }
}

/// Full configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    provider: Option<String>,
    model: Option<String>,
    endpoint: Option<String>,
    logging: Option<LoggingConfig>,
    embedding: Option<EmbeddingSettings>,
    rag: Option<RagSettings>,
    cache: Option<CacheSettings>,
    retry: Option<RetrySettings>,
    storage: Option<StorageSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LoggingConfig {
    level: Option<String>,
    format: Option<String>,
    color: Option<bool>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            workspace: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            config_file: None,
            provider: "ollama".to_string(),
            model: "llama3.2".to_string(),
            endpoint: None,
            log_level: None,
            log_format: "pretty".to_string(),
            verbose: false,
            no_color: false,
            embedding: EmbeddingSettings::default(),
            rag: RagSettings::default(),
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            storage: StorageSettings::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, config file and environment.
    ///
    /// Environment variables:
    /// - `LUMEN_WORKSPACE`, `LUMEN_CONFIG`
    /// - `LUMEN_PROVIDER`, `LUMEN_MODEL`, `LUMEN_ENDPOINT`
    /// - `LUMEN_EMBEDDING_PROVIDER`, `LUMEN_EMBEDDING_MODEL`
    /// - `LUMEN_REDIS_URL` (also switches the cache backend to redis)
    /// - `LUMEN_DATA_DIR`, `LUMEN_LOG_FORMAT`
    /// - `RUST_LOG`, `NO_COLOR`
    pub fn load() -> AppResult<Self> {
        let mut config = Self::default();

        if let Ok(workspace) = std::env::var("LUMEN_WORKSPACE") {
            config.workspace = PathBuf::from(workspace);
        }

        if let Ok(config_file) = std::env::var("LUMEN_CONFIG") {
            config.config_file = Some(PathBuf::from(config_file));
        }

        if !config.workspace.exists() {
            return Err(AppError::Config(format!(
                "Workspace directory does not exist: {:?}",
                config.workspace
            )));
        }

        let config_path = config
            .config_file
            .clone()
            .unwrap_or_else(|| config.lumen_dir().join("config.yaml"));

        if config_path.exists() {
            config = config.merge_yaml(&config_path)?;
        }

        config.apply_env();

        Ok(config)
    }

    fn apply_env(&mut self) {
        if let Ok(provider) = std::env::var("LUMEN_PROVIDER") {
            self.provider = provider;
        }
        if let Ok(model) = std::env::var("LUMEN_MODEL") {
            self.model = model;
        }
        if let Ok(endpoint) = std::env::var("LUMEN_ENDPOINT") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(provider) = std::env::var("LUMEN_EMBEDDING_PROVIDER") {
            self.embedding.provider = provider;
        }
        if let Ok(model) = std::env::var("LUMEN_EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
        if let Ok(url) = std::env::var("LUMEN_REDIS_URL") {
            self.cache.backend = "redis".to_string();
            self.cache.redis_url = Some(url);
        }
        if let Ok(dir) = std::env::var("LUMEN_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
        if let Ok(format) = std::env::var("LUMEN_LOG_FORMAT") {
            self.log_format = format;
        }
        if let Ok(level) = std::env::var("RUST_LOG") {
            self.log_level = Some(level);
        }
        if std::env::var("NO_COLOR").is_ok() {
            self.no_color = true;
        }
    }

    /// Merge a YAML configuration file into this config.
    fn merge_yaml(&self, path: &Path) -> AppResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AppError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        self.merge_yaml_str(&contents).map_err(|e| match e {
            AppError::Config(msg) => AppError::Config(format!("{:?}: {}", path, msg)),
            other => other,
        })
    }

    fn merge_yaml_str(&self, contents: &str) -> AppResult<Self> {
        let file: ConfigFile = serde_yaml::from_str(contents)
            .map_err(|e| AppError::Config(format!("Failed to parse config file: {}", e)))?;

        let mut result = self.clone();

        if let Some(provider) = file.provider {
            result.provider = provider;
        }
        if let Some(model) = file.model {
            result.model = model;
        }
        if file.endpoint.is_some() {
            result.endpoint = file.endpoint;
        }

        if let Some(logging) = file.logging {
            if let Some(level) = logging.level {
                result.log_level = Some(level);
            }
            if let Some(format) = logging.format {
                result.log_format = format;
            }
            if let Some(color) = logging.color {
                result.no_color = !color;
            }
        }

        if let Some(embedding) = file.embedding {
            result.embedding = embedding;
        }
        if let Some(rag) = file.rag {
            result.rag = rag;
        }
        if let Some(cache) = file.cache {
            result.cache = cache;
        }
        if let Some(retry) = file.retry {
            result.retry = retry;
        }
        if let Some(storage) = file.storage {
            result.storage = storage;
        }

        Ok(result)
    }

    /// Apply CLI overrides to the configuration.
    #[allow(clippy::too_many_arguments)]
    pub fn with_overrides(
        mut self,
        workspace: Option<PathBuf>,
        config_file: Option<PathBuf>,
        provider: Option<String>,
        model: Option<String>,
        log_level: Option<String>,
        verbose: bool,
        no_color: bool,
    ) -> Self {
        if let Some(workspace) = workspace {
            self.workspace = workspace;
        }

        if let Some(config_file) = config_file {
            self.config_file = Some(config_file);
        }

        if let Some(provider) = provider {
            self.provider = provider;
        }

        if let Some(model) = model {
            self.model = model;
        }

        if let Some(log_level) = log_level {
            self.log_level = Some(log_level);
        }

        if verbose {
            self.verbose = true;
            if self.log_level.is_none() {
                self.log_level = Some("debug".to_string());
            }
        }

        if no_color {
            self.no_color = true;
        }

        self
    }

    /// Path to the .lumen directory.
    pub fn lumen_dir(&self) -> PathBuf {
        self.workspace.join(LUMEN_DIR)
    }

    /// Directory holding the KB registry, collections and raw documents.
    pub fn data_dir(&self) -> PathBuf {
        self.storage
            .data_dir
            .clone()
            .unwrap_or_else(|| self.lumen_dir().join("data"))
    }

    /// Ensure the .lumen and data directories exist.
    pub fn ensure_lumen_dir(&self) -> AppResult<()> {
        for dir in [self.lumen_dir(), self.data_dir()] {
            if !dir.exists() {
                std::fs::create_dir_all(&dir).map_err(|e| {
                    AppError::Config(format!("Failed to create {:?}: {}", dir, e))
                })?;
            }
        }
        Ok(())
    }

    /// Validate provider names and numeric ranges.
    pub fn validate(&self) -> AppResult<()> {
        for (kind, provider) in [
            ("generation", self.provider.as_str()),
            ("embedding", self.embedding.provider.as_str()),
        ] {
            if !KNOWN_PROVIDERS.contains(&provider) {
                return Err(AppError::Config(format!(
                    "Unknown {} provider: {}. Supported: {}",
                    kind,
                    provider,
                    KNOWN_PROVIDERS.join(", ")
                )));
            }
        }

        let rag = &self.rag;
        if rag.chunk_size == 0 {
            return Err(AppError::Config("rag.chunk_size must be positive".into()));
        }
        if rag.chunk_overlap >= rag.chunk_size {
            return Err(AppError::Config(format!(
                "rag.chunk_overlap ({}) must be smaller than rag.chunk_size ({})",
                rag.chunk_overlap, rag.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&rag.similarity_threshold) {
            return Err(AppError::Config(
                "rag.similarity_threshold must be within [0, 1]".into(),
            ));
        }
        if rag.default_k == 0 {
            return Err(AppError::Config("rag.default_k must be at least 1".into()));
        }

        if self.embedding.batch_size == 0 || self.embedding.max_concurrency == 0 {
            return Err(AppError::Config(
                "embedding.batch_size and embedding.max_concurrency must be positive".into(),
            ));
        }
        if self.embedding.dimensions == 0 {
            return Err(AppError::Config("embedding.dimensions must be positive".into()));
        }

        match self.cache.backend.as_str() {
            "memory" | "none" => {}
            "redis" if self.cache.redis_url.is_some() => {}
            "redis" => {
                return Err(AppError::Config(
                    "cache.backend is redis but cache.redis_url is not set".into(),
                ))
            }
            other => {
                return Err(AppError::Config(format!("Unknown cache backend: {}", other)));
            }
        }

        match self.storage.vector_backend.as_str() {
            "sqlite" | "memory" => {}
            other => {
                return Err(AppError::Config(format!("Unknown vector backend: {}", other)));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".into()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.provider, "ollama");
        assert_eq!(config.rag.chunk_size, 1000);
        assert_eq!(config.rag.chunk_overlap, 200);
        assert_eq!(config.rag.max_context_length, 4000);
        assert_eq!(config.cache.session_ttl_secs, 86_400);
        assert_eq!(config.cache.messages_ttl_secs, 604_800);
        assert_eq!(config.cache.response_ttl_secs, 3_600);
        assert_eq!(config.cache.max_messages, 1000);
        assert_eq!(config.embedding.batch_size, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lumen_and_data_dirs() {
        let config = AppConfig::default();
        assert!(config.lumen_dir().ends_with(".lumen"));
        assert!(config.data_dir().ends_with(".lumen/data"));

        let mut config = config;
        config.storage.data_dir = Some(PathBuf::from("/var/lib/lumen"));
        assert_eq!(config.data_dir(), PathBuf::from("/var/lib/lumen"));
    }

    #[test]
    fn test_with_overrides() {
        let config = AppConfig::default();
        let overridden = config.with_overrides(
            None,
            None,
            Some("mock".to_string()),
            Some("tiny".to_string()),
            None,
            true,
            false,
        );

        assert_eq!(overridden.provider, "mock");
        assert_eq!(overridden.model, "tiny");
        assert!(overridden.verbose);
        assert_eq!(overridden.log_level, Some("debug".to_string()));
    }

    #[test]
    fn test_merge_yaml_partial_sections() {
        let yaml = r#"
provider: mock
logging:
  level: warn
  format: json
rag:
  chunk_size: 500
  chunk_overlap: 50
cache:
  backend: redis
  redis_url: redis://127.0.0.1:6379
"#;
        let merged = AppConfig::default().merge_yaml_str(yaml).unwrap();
        assert_eq!(merged.provider, "mock");
        assert_eq!(merged.log_level.as_deref(), Some("warn"));
        assert_eq!(merged.log_format, "json");
        assert_eq!(merged.rag.chunk_size, 500);
        assert_eq!(merged.rag.chunk_overlap, 50);
        // Fields missing from a section keep their defaults
        assert_eq!(merged.rag.max_context_length, 4000);
        assert_eq!(merged.cache.session_ttl_secs, 86_400);
        assert!(merged.validate().is_ok());
    }

    #[test]
    fn test_merge_yaml_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "model: qwen2\nstorage:\n  vector_backend: memory\n").unwrap();

        let merged = AppConfig::default().merge_yaml(&path).unwrap();
        assert_eq!(merged.model, "qwen2");
        assert_eq!(merged.storage.vector_backend, "memory");
    }

    #[test]
    fn test_invalid_yaml_is_config_error() {
        let result = AppConfig::default().merge_yaml_str("rag: [unclosed");
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = AppConfig::default();
        config.provider = "unknown".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_overlap_and_threshold() {
        let mut config = AppConfig::default();
        config.rag.chunk_overlap = config.rag.chunk_size;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.rag.similarity_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_redis_requires_url() {
        let mut config = AppConfig::default();
        config.cache.backend = "redis".to_string();
        assert!(config.validate().is_err());

        config.cache.redis_url = Some("redis://localhost".to_string());
        assert!(config.validate().is_ok());
    }
}
