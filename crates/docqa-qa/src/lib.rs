//! Question answering service for the document QA system.
//!
//! Embeds questions, searches the vector index with filters, assembles RAG
//! prompts, and caches answers and their source lists.

pub mod greeting;
pub mod prompt;
pub mod service;

pub use greeting::GreetingDetector;
pub use prompt::{render, RagConfig, TemplateMode};
pub use service::{Answer, QaConfig, QaService};
