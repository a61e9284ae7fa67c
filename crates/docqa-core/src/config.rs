//! Application configuration.
//!
//! Configuration is loaded from a TOML file. String values may embed
//! `${NAME}` placeholders which are resolved from the environment at load
//! time; unset variables are left in place with a warning.

use crate::error::{DocQaError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub vectordb: VectorDbConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub queue: QueueConfig,
    pub document: DocumentConfig,
    pub search: SearchConfig,
    pub embed: ModelConfig,
    pub llm: ModelConfig,
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

/// Blob storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend tag: local or minio
    #[serde(rename = "type")]
    pub backend: String,
    pub path: PathBuf,
    pub bucket: String,
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub use_ssl: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "local".to_string(),
            path: PathBuf::from("data/files"),
            bucket: String::new(),
            endpoint: String::new(),
            access_key: String::new(),
            secret_key: String::new(),
            use_ssl: false,
        }
    }
}

/// Vector index backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorDbConfig {
    /// Backend tag: memory or flat-file
    #[serde(rename = "type")]
    pub backend: String,
    pub path: PathBuf,
    pub dim: usize,
    /// Distance: cosine, l2, or dot
    pub distance: String,
}

impl Default for VectorDbConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            path: PathBuf::from("data/vectors.idx"),
            dim: 1536,
            distance: "cosine".to_string(),
        }
    }
}

/// Relational database connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Backend tag: sqlite
    #[serde(rename = "type")]
    pub backend: String,
    pub dsn: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: "sqlite".to_string(),
            dsn: "data/docqa.db".to_string(),
        }
    }
}

/// Answer cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enable: bool,
    /// Backend tag: memory or redis
    #[serde(rename = "type")]
    pub backend: String,
    pub address: String,
    pub password: String,
    pub db: i64,
    /// Default TTL in seconds
    pub ttl: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enable: true,
            backend: "memory".to_string(),
            address: "127.0.0.1:6379".to_string(),
            password: String::new(),
            db: 0,
            ttl: 24 * 60 * 60,
        }
    }
}

/// Task queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub enable: bool,
    /// Backend tag: memory or redis
    #[serde(rename = "type")]
    pub backend: String,
    pub redis_addr: String,
    pub redis_password: String,
    pub redis_db: i64,
    /// Worker pool size
    pub concurrency: usize,
    /// Maximum redeliveries for a retryable failure
    pub retry_limit: u32,
    /// Seconds between redeliveries
    pub retry_delay: u64,
    /// URL the external processor posts callbacks to
    pub callback_url: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            enable: true,
            backend: "memory".to_string(),
            redis_addr: "127.0.0.1:6379".to_string(),
            redis_password: String::new(),
            redis_db: 0,
            concurrency: 10,
            retry_limit: 3,
            retry_delay: 5,
            callback_url: String::new(),
        }
    }
}

/// Chunking settings for document splitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// External processor endpoint; empty selects synchronous ingestion
    pub processor_endpoint: String,
}

impl Default for DocumentConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
            processor_endpoint: String::new(),
        }
    }
}

/// Similarity search defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub limit: usize,
    pub min_score: f32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            limit: 10,
            min_score: 0.5,
        }
    }
}

/// Remote model settings, shared by the embedder and the LLM sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Provider tag: openai or mock
    pub provider: String,
    pub model: String,
    pub api_key: String,
    pub endpoint: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: String::new(),
            api_key: String::new(),
            endpoint: String::new(),
            max_tokens: 2048,
            temperature: 0.7,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub async fn load_from_path(path: &Path) -> Result<Self> {
        debug!("loading configuration from {}", path.display());

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DocQaError::config(format!("failed to read config file: {}", e)))?;

        let config = Self::from_toml(&content)?;
        info!("configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a TOML string, resolving `${NAME}` values.
    pub fn from_toml(content: &str) -> Result<Self> {
        let resolved = resolve_env_vars(content);
        let config: Self = toml::from_str(&resolved)
            .map_err(|e| DocQaError::config(format!("failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let valid = |field: &str, value: &str, allowed: &[&str]| -> Result<()> {
            if allowed.contains(&value) {
                Ok(())
            } else {
                Err(DocQaError::config(format!(
                    "invalid {} '{}', must be one of: {}",
                    field,
                    value,
                    allowed.join(", ")
                )))
            }
        };

        valid("storage.type", &self.storage.backend, &["local", "minio"])?;
        valid("vectordb.type", &self.vectordb.backend, &["memory", "flat-file"])?;
        valid(
            "vectordb.distance",
            &self.vectordb.distance,
            &["cosine", "l2", "dot"],
        )?;
        valid("database.type", &self.database.backend, &["sqlite"])?;
        valid("cache.type", &self.cache.backend, &["memory", "redis"])?;
        valid("queue.type", &self.queue.backend, &["memory", "redis"])?;

        if self.vectordb.dim == 0 {
            return Err(DocQaError::config("vectordb.dim must be greater than 0"));
        }
        if self.queue.concurrency == 0 {
            return Err(DocQaError::config("queue.concurrency must be greater than 0"));
        }
        if self.document.chunk_size == 0 {
            return Err(DocQaError::config("document.chunk_size must be greater than 0"));
        }
        if self.document.chunk_overlap >= self.document.chunk_size {
            return Err(DocQaError::config(
                "document.chunk_overlap must be smaller than chunk_size",
            ));
        }
        if !(0.0..=1.0).contains(&self.search.min_score) {
            return Err(DocQaError::config("search.min_score must be in [0, 1]"));
        }

        debug!("configuration validation passed");
        Ok(())
    }
}

/// Replace `${NAME}` placeholders with environment values.
///
/// Unset variables stay as-is so parse errors point at the real problem.
fn resolve_env_vars(content: &str) -> String {
    let pattern = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env pattern");

    pattern
        .replace_all(content, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => {
                    warn!("environment variable '{}' is not set", name);
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
