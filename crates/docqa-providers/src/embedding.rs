//! Embedding providers.

use async_trait::async_trait;
use docqa_core::config::ModelConfig;
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::Embedder;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// OpenAI-compatible HTTP embedder.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

#[derive(Serialize)]
struct EmbeddingRequest {
    input: Vec<String>,
    model: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(config: &ModelConfig, dimension: usize) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(DocQaError::config("embedder API key not configured"));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth_header = format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|e| DocQaError::config(format!("invalid authorization header: {}", e)))?;
        headers.insert("Authorization", auth_header);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .build()?;

        let endpoint = if config.endpoint.is_empty() {
            "https://api.openai.com/v1/embeddings".to_string()
        } else {
            config.endpoint.clone()
        };

        info!("initialised embedder with model {}", config.model);
        Ok(Self {
            client,
            endpoint,
            model: config.model.clone(),
            dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .pop()
            .ok_or_else(|| DocQaError::permanent("embedding API returned no rows"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        debug!("requesting {} embeddings", texts.len());

        let request = EmbeddingRequest {
            input: texts.to_vec(),
            model: self.model.clone(),
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("embedding API error {}: {}", status, body);
            return if status.is_server_error() {
                Err(DocQaError::transient(message))
            } else {
                Err(DocQaError::permanent(message))
            };
        }

        let response: EmbeddingResponse = response.json().await?;
        let embeddings: Vec<Vec<f32>> = response.data.into_iter().map(|row| row.embedding).collect();

        if embeddings.len() != texts.len() {
            return Err(DocQaError::permanent(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Deterministic embedder for tests: the vector depends only on the text.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for MockEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let seed = text.bytes().fold(0u64, |acc, b| {
            acc.wrapping_mul(31).wrapping_add(u64::from(b))
        }) as f32;

        let mut vector = vec![0.0; self.dimension];
        for (i, value) in vector.iter_mut().enumerate() {
            *value = ((seed + i as f32) * 0.01).sin();
        }
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());
        for text in texts {
            embeddings.push(self.embed(text).await?);
        }
        Ok(embeddings)
    }

    fn model_name(&self) -> &str {
        "mock-embedder"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_config(endpoint: String) -> ModelConfig {
        ModelConfig {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            api_key: "test-key".to_string(),
            endpoint,
            ..Default::default()
        }
    }

    fn embedder_against(server: &MockServer, dimension: usize) -> OpenAiEmbedder {
        let config = http_config(format!("{}/v1/embeddings", server.uri()));
        OpenAiEmbedder::new(&config, dimension).unwrap()
    }

    #[tokio::test]
    async fn test_mock_embedder_deterministic() {
        let embedder = MockEmbedder::new(16);
        let a = embedder.embed("hello").await.unwrap();
        let b = embedder.embed("hello").await.unwrap();
        let c = embedder.embed("world").await.unwrap();

        assert_eq!(a.len(), 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_mock_embed_batch() {
        let embedder = MockEmbedder::default();
        let texts = vec!["one".to_string(), "two".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();
        assert_eq!(embeddings.len(), 2);
        assert_eq!(embeddings[0].len(), 384);
    }

    #[test]
    fn test_openai_embedder_requires_key() {
        let config = ModelConfig::default();
        assert!(OpenAiEmbedder::new(&config, 1536).is_err());
    }

    #[tokio::test]
    async fn test_openai_embed_batch_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("Authorization", "Bearer test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [
                    {"embedding": [1.0, 2.0, 3.0]},
                    {"embedding": [4.0, 5.0, 6.0]}
                ]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_against(&server, 3);
        let texts = vec!["one".to_string(), "two".to_string()];
        let embeddings = embedder.embed_batch(&texts).await.unwrap();

        assert_eq!(embeddings, vec![vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
    }

    #[tokio::test]
    async fn test_openai_embed_single_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [0.5, 0.5]}]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_against(&server, 2);
        assert_eq!(embedder.embed("text").await.unwrap(), vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn test_openai_embed_client_error_is_permanent() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid input"))
            .mount(&server)
            .await;

        let embedder = embedder_against(&server, 3);
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, DocQaError::Permanent(_)));
        assert!(err.to_string().contains("invalid input"));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_openai_embed_server_error_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let embedder = embedder_against(&server, 3);
        let err = embedder.embed("text").await.unwrap_err();
        assert!(matches!(err, DocQaError::Transient(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_openai_embed_row_count_mismatch() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"embedding": [1.0, 2.0, 3.0]}]
            })))
            .mount(&server)
            .await;

        let embedder = embedder_against(&server, 3);
        let texts = vec!["one".to_string(), "two".to_string()];
        let err = embedder.embed_batch(&texts).await.unwrap_err();
        assert!(matches!(err, DocQaError::Permanent(_)));
        assert!(err.to_string().contains("expected 2 embeddings"));
    }
}
