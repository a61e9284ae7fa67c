//! Document ingestion and question-answering backend.
//!
//! Re-exports the component crates and provides the [`Services`] wiring
//! that composes them from configuration.

pub mod services;

pub use docqa_core as core;
pub use docqa_index as index;
pub use docqa_ingest as ingest;
pub use docqa_providers as providers;
pub use docqa_qa as qa;
pub use docqa_queue as queue;
pub use docqa_store as store;
pub use services::Services;
