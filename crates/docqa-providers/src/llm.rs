//! Large language model clients.

use async_trait::async_trait;
use chrono::Utc;
use docqa_core::config::ModelConfig;
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::{ChatMessage, GenerateOptions, Generation, LlmClient};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// OpenAI-compatible chat completion client.
pub struct OpenAiChatClient {
    client: Client,
    endpoint: String,
    config: ModelConfig,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<ChatUsage>,
    #[serde(default)]
    model: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Deserialize)]
struct ChatUsage {
    #[serde(default)]
    completion_tokens: u32,
}

impl OpenAiChatClient {
    pub fn new(config: &ModelConfig) -> Result<Self> {
        if config.api_key.is_empty() {
            return Err(DocQaError::config("LLM API key not configured"));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        let auth_header = format!("Bearer {}", config.api_key)
            .parse()
            .map_err(|e| DocQaError::config(format!("invalid authorization header: {}", e)))?;
        headers.insert("Authorization", auth_header);

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .default_headers(headers)
            .build()?;

        let endpoint = if config.endpoint.is_empty() {
            "https://api.openai.com/v1/chat/completions".to_string()
        } else {
            config.endpoint.clone()
        };

        info!("initialised LLM client with model {}", config.model);
        Ok(Self {
            client,
            endpoint,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for OpenAiChatClient {
    async fn generate(&self, prompt: &str, opts: &GenerateOptions) -> Result<Generation> {
        self.chat(&[ChatMessage::user(prompt)], opts).await
    }

    async fn chat(&self, messages: &[ChatMessage], opts: &GenerateOptions) -> Result<Generation> {
        let request = ChatRequest {
            model: opts.model.clone().unwrap_or_else(|| self.config.model.clone()),
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.clone(),
                    content: m.content.clone(),
                })
                .collect(),
            max_tokens: opts.max_tokens.unwrap_or(self.config.max_tokens),
            temperature: opts.temperature.unwrap_or(self.config.temperature),
        };

        debug!("requesting chat completion with {} messages", messages.len());
        let response = self.client.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("LLM API error {}: {}", status, body);
            return if status.is_server_error() {
                Err(DocQaError::transient(message))
            } else {
                Err(DocQaError::permanent(message))
            };
        }

        let response: ChatResponse = response.json().await?;
        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| DocQaError::permanent("LLM API returned no choices"))?;

        Ok(Generation {
            text: choice.message.content,
            token_count: response.usage.map(|u| u.completion_tokens).unwrap_or(0),
            model_name: response.model,
            finished_at: Utc::now(),
        })
    }
}

/// Canned-response client for tests. Replies with the configured text and
/// records nothing.
pub struct MockLlm {
    reply: String,
}

impl MockLlm {
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            reply: reply.into(),
        }
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new("mock answer")
    }
}

#[async_trait]
impl LlmClient for MockLlm {
    async fn generate(&self, _prompt: &str, _opts: &GenerateOptions) -> Result<Generation> {
        Ok(Generation {
            text: self.reply.clone(),
            token_count: self.reply.split_whitespace().count() as u32,
            model_name: "mock-llm".to_string(),
            finished_at: Utc::now(),
        })
    }

    async fn chat(&self, _messages: &[ChatMessage], opts: &GenerateOptions) -> Result<Generation> {
        self.generate("", opts).await
    }
}
