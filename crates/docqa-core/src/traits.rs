//! Collaborator interfaces required by the core.
//!
//! Implementations live in adapter crates; the core only sees these traits.

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Metadata of a stored blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub path: String,
    pub uploaded_at: DateTime<Utc>,
}

/// Trait for blob storage backends (local filesystem, MinIO, ...).
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store a blob under a fresh id
    async fn save(&self, content: &[u8], name: &str) -> Result<FileInfo>;

    /// Fetch a blob by id
    async fn get(&self, id: &str) -> Result<Vec<u8>>;

    /// Delete a blob by id
    async fn delete(&self, id: &str) -> Result<()>;

    /// Check whether a blob exists
    async fn exists(&self, id: &str) -> Result<bool>;

    /// List all stored blobs
    async fn list(&self) -> Result<Vec<FileInfo>>;
}

/// Trait for extracting plain text from uploaded files.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    /// Parse a file on disk into text
    async fn parse(&self, path: &Path) -> Result<String>;

    /// Parse in-memory content into text
    async fn parse_bytes(&self, content: &[u8], name: &str) -> Result<String>;
}

/// Trait for embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// A chat message exchanged with the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }
}

/// Per-call generation options; unset fields fall back to client defaults.
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub model: Option<String>,
}

/// A completed generation.
#[derive(Debug, Clone)]
pub struct Generation {
    pub text: String,
    pub token_count: u32,
    pub model_name: String,
    pub finished_at: DateTime<Utc>,
}

/// Trait for large language model clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Complete a single prompt
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation>;

    /// Complete a chat conversation
    async fn chat(&self, messages: &[ChatMessage], opts: &GenerateOptions) -> Result<Generation>;
}

/// Trait for key-value caches (in-process or remote).
///
/// Stale reads are acceptable; corrupted reads are not.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Look up a key; `None` on miss or expiry
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store a value, optionally bounded by a TTL
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Drop all entries
    async fn clear(&self) -> Result<()>;
}
