//! Document ingestion pipeline.
//!
//! Splits parsed documents into segments, embeds them, and writes vectors
//! and segment rows, either synchronously in-process or asynchronously via
//! an external processor and its callbacks.

pub mod chunker;
mod handlers;
pub mod service;

pub use chunker::{Chunker, SplitType};
pub use service::{DocumentService, IngestConfig, IngestMode};
