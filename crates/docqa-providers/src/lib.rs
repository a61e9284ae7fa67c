//! Provider adapters for the document QA core.
//!
//! Concrete implementations of the collaborator traits: embedding and LLM
//! clients, cache backends, blob storage, and text parsing. Mock variants
//! back the test suites.

pub mod cache;
pub mod embedding;
pub mod llm;
pub mod parser;
pub mod storage;

pub use cache::{MemoryCache, NoopCache, RedisCache};
pub use embedding::{MockEmbedder, OpenAiEmbedder};
pub use llm::{MockLlm, OpenAiChatClient};
pub use parser::PlainTextParser;
pub use storage::LocalBlobStore;
