//! Question answering over the vector index.
//!
//! Composes retrieval, similarity filtering, RAG prompt assembly, and
//! answer/document-list caching. Greetings short-circuit retrieval; empty
//! retrievals fall back to LLM-only answers.

use crate::greeting::GreetingDetector;
use crate::prompt::{render, RagConfig};
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::{Cache, Embedder, GenerateOptions, LlmClient};
use docqa_index::{SearchFilter, VectorDocument, VectorRepository};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const GREETING_PROMPT: &str =
    "Reply to this greeting in one short friendly sentence: {{question}}";
const DEFAULT_GREETING_REPLY: &str = "Hello! How can I help you today?";
const NO_CONTEXT_APOLOGY: &str =
    "I'm sorry, I could not find anything relevant in your documents to answer that.";

/// QA service settings.
#[derive(Debug, Clone)]
pub struct QaConfig {
    /// Cache key namespace
    pub namespace: String,
    /// Results below this score are dropped
    pub min_score: f32,
    /// Top-K for retrieval
    pub max_results: usize,
    /// Answer cache TTL (distinct from the index's query cache TTL)
    pub answer_ttl: Duration,
    /// Budget for one RAG answer
    pub answer_timeout: Duration,
}

impl Default for QaConfig {
    fn default() -> Self {
        Self {
            namespace: "qa".to_string(),
            min_score: 0.5,
            max_results: 10,
            answer_ttl: Duration::from_secs(24 * 60 * 60),
            answer_timeout: Duration::from_secs(30),
        }
    }
}

/// An answer with the source documents it was grounded on.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<VectorDocument>,
}

/// Question answering service.
pub struct QaService {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LlmClient>,
    index: Arc<VectorRepository>,
    cache: Option<Arc<dyn Cache>>,
    greetings: GreetingDetector,
    rag: RwLock<RagConfig>,
    config: QaConfig,
}

impl QaService {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LlmClient>,
        index: Arc<VectorRepository>,
        cache: Option<Arc<dyn Cache>>,
        config: QaConfig,
    ) -> Self {
        Self {
            embedder,
            llm,
            index,
            cache,
            greetings: GreetingDetector::default(),
            rag: RwLock::new(RagConfig::default()),
            config,
        }
    }

    /// Replace the greeting word set.
    pub fn with_greetings(mut self, detector: GreetingDetector) -> Self {
        self.greetings = detector;
        self
    }

    /// Swap the RAG configuration; safe against in-flight answers.
    pub fn set_rag_config(&self, config: RagConfig) {
        *self.rag.write() = config;
    }

    pub fn rag_config(&self) -> RagConfig {
        self.rag.read().clone()
    }

    /// Answer a question over the whole index.
    pub async fn answer(&self, question: &str) -> Result<Answer> {
        self.answer_inner(question, None, None).await
    }

    /// Answer restricted to one document; fails with `NotFound` when the
    /// document has no indexed content at all.
    pub async fn answer_with_file(&self, question: &str, file_id: &str) -> Result<Answer> {
        self.answer_inner(question, Some(file_id), None).await
    }

    /// Answer restricted by metadata equality filters.
    pub async fn answer_with_metadata(
        &self,
        question: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Answer> {
        self.answer_inner(question, None, Some(metadata)).await
    }

    async fn answer_inner(
        &self,
        question: &str,
        file_id: Option<&str>,
        metadata: Option<&HashMap<String, String>>,
    ) -> Result<Answer> {
        if question.trim().is_empty() {
            return Err(DocQaError::invalid_argument("empty question"));
        }

        if self.greetings.is_greeting(question) {
            return Ok(self.greet(question).await);
        }

        let answer_key = self.cache_key(question, file_id, metadata);
        let sources_key = format!("{}_docs", answer_key);

        if let Some(answer) = self.cached_answer(&answer_key, &sources_key).await {
            debug!("answer cache hit");
            return Ok(answer);
        }

        if let Some(file_id) = file_id {
            self.ensure_file_indexed(file_id).await?;
        }

        let query = self.embedder.embed(question).await?;

        let filter = SearchFilter {
            file_ids: file_id.map(|f| vec![f.to_string()]),
            metadata: metadata.cloned().unwrap_or_default(),
            min_score: self.config.min_score,
            max_results: self.config.max_results,
        };
        let results = self.index.search(&query, &filter).await?;

        if results.is_empty() {
            let text = self.answer_without_context(question).await;
            self.cache_set(&answer_key, &text).await;
            return Ok(Answer {
                text,
                sources: Vec::new(),
            });
        }

        let contexts: Vec<String> = results.iter().map(|r| r.document.text.clone()).collect();
        let sources: Vec<VectorDocument> =
            results.into_iter().map(|r| r.document).collect();

        let prompt = {
            let rag = self.rag.read();
            render(rag.answer_template(), question, &contexts)
        };

        let generation = tokio::time::timeout(
            self.config.answer_timeout,
            self.llm.generate(&prompt, &GenerateOptions::default()),
        )
        .await
        .map_err(|_| DocQaError::timeout("RAG answer exceeded its budget"))??;

        self.cache_set(&answer_key, &generation.text).await;
        if let Ok(serialised) = serde_json::to_string(&sources) {
            self.cache_set(&sources_key, &serialised).await;
        }

        info!("answered question with {} sources", sources.len());
        Ok(Answer {
            text: generation.text,
            sources,
        })
    }

    /// Greeting replies are generated but never cached.
    async fn greet(&self, question: &str) -> Answer {
        let prompt = GREETING_PROMPT.replace("{{question}}", question);
        let text = match self
            .llm
            .generate(&prompt, &GenerateOptions::default())
            .await
        {
            Ok(generation) => generation.text,
            Err(e) => {
                warn!("greeting generation failed: {}", e);
                DEFAULT_GREETING_REPLY.to_string()
            }
        };
        Answer {
            text,
            sources: Vec::new(),
        }
    }

    /// LLM-only fallback when retrieval produced nothing. An LLM failure on
    /// this path degrades to a default apology instead of an error.
    async fn answer_without_context(&self, question: &str) -> String {
        let prompt = {
            let rag = self.rag.read();
            render(&rag.empty_template, question, &[])
        };
        match self
            .llm
            .generate(&prompt, &GenerateOptions::default())
            .await
        {
            Ok(generation) => generation.text,
            Err(e) => {
                warn!("no-context answer failed: {}", e);
                NO_CONTEXT_APOLOGY.to_string()
            }
        }
    }

    /// Dummy-vector search restricted to the file, to distinguish "nothing
    /// relevant" from "document not indexed".
    async fn ensure_file_indexed(&self, file_id: &str) -> Result<()> {
        let probe = vec![0.0; self.index.dimension()];
        let filter = SearchFilter {
            file_ids: Some(vec![file_id.to_string()]),
            max_results: 1,
            min_score: 0.0,
            ..Default::default()
        };
        let hits = self.index.search(&probe, &filter).await?;
        if hits.is_empty() {
            return Err(DocQaError::not_found("document", file_id));
        }
        Ok(())
    }

    async fn cached_answer(&self, answer_key: &str, sources_key: &str) -> Option<Answer> {
        let cache = self.cache.as_ref()?;
        let text = cache.get(answer_key).await.ok()??;
        let sources = match cache.get(sources_key).await {
            Ok(Some(serialised)) => serde_json::from_str(&serialised).unwrap_or_default(),
            _ => Vec::new(),
        };
        Some(Answer { text, sources })
    }

    async fn cache_set(&self, key: &str, value: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.set(key, value, Some(self.config.answer_ttl)).await {
                warn!("answer cache write failed: {}", e);
            }
        }
    }

    /// SHA-256 cache key over namespace, question, and filter variant.
    fn cache_key(
        &self,
        question: &str,
        file_id: Option<&str>,
        metadata: Option<&HashMap<String, String>>,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.namespace.as_bytes());
        hasher.update(b":answer:");
        hasher.update(question.as_bytes());

        if let Some(file_id) = file_id {
            hasher.update(b":file:");
            hasher.update(file_id.as_bytes());
        }
        if let Some(metadata) = metadata {
            let mut pairs: Vec<_> = metadata.iter().collect();
            pairs.sort_by(|a, b| a.0.cmp(b.0));
            for (key, value) in pairs {
                hasher.update(b":meta:");
                hasher.update(key.as_bytes());
                hasher.update(b"=");
                hasher.update(value.as_bytes());
            }
        }

        hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect()
    }
}
