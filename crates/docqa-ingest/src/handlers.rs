//! Callback handlers driving the asynchronous pipeline.
//!
//! The external processor reports each stage through the callback
//! dispatcher; these handlers translate stage completions into document
//! progress and, at the end, into vector and segment writes.

use crate::service::Inner;
use async_trait::async_trait;
use docqa_core::error::{DocQaError, Result};
use docqa_core::types::{DocumentSegment, Task, TaskType, VectorInfo, VectorizeResult};
use docqa_index::VectorDocument;
use docqa_queue::TaskHandler;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Flatten opaque document metadata into the string map the index stores.
pub(crate) fn metadata_map(metadata: &Value) -> HashMap<String, String> {
    let Some(object) = metadata.as_object() else {
        return HashMap::new();
    };
    object
        .iter()
        .map(|(key, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (key.clone(), rendered)
        })
        .collect()
}

/// Translate processor vectors into index rows and segment rows, then
/// complete the document.
pub(crate) async fn save_vectors_to_database(
    inner: &Inner,
    document_id: &str,
    vectors: &[VectorInfo],
) -> Result<()> {
    let doc = inner.status.get_document(document_id).await?;
    let metadata = metadata_map(&doc.metadata);

    let mut vector_docs = Vec::with_capacity(vectors.len());
    let mut segment_rows = Vec::new();

    for info in vectors {
        let vector_id = format!("{}_{}", document_id, info.chunk_index);
        let text = info.text.clone().unwrap_or_default();

        let mut vector_doc = VectorDocument::new(
            &vector_id,
            document_id,
            info.chunk_index,
            text.clone(),
            info.vector.clone(),
        );
        vector_doc.file_name = doc.file_name.clone();
        vector_doc.metadata = metadata.clone();
        vector_docs.push(vector_doc);

        if !text.is_empty() {
            let mut row = DocumentSegment::new(document_id, info.chunk_index as i64, text);
            row.metadata = doc.metadata.clone();
            row.vector_id = Some(vector_id);
            segment_rows.push(row);
        }
    }

    inner.index.add_batch(vector_docs).await?;
    if !segment_rows.is_empty() {
        inner.status.repository().save_segments(&segment_rows).await?;
    }

    info!(
        "saved {} vectors for document {}",
        vectors.len(),
        document_id
    );
    Ok(())
}

/// DocumentParse completion: fail on empty content, otherwise advance.
struct ParseCallbackHandler {
    inner: Arc<Inner>,
}

#[async_trait]
impl TaskHandler for ParseCallbackHandler {
    async fn handle(&self, task: &Task, result: Option<&Value>) -> Result<Option<Value>> {
        let content = result
            .and_then(|r| r.get("content"))
            .and_then(Value::as_str)
            .unwrap_or_default();

        if content.trim().is_empty() {
            let message = "parse produced no content".to_string();
            self.inner
                .status
                .mark_as_failed(&task.document_id, &message)
                .await?;
            return Err(DocQaError::permanent(message));
        }

        self.inner.status.update_progress(&task.document_id, 30).await?;
        debug!("document {} parsed ({} chars)", task.document_id, content.len());
        Ok(None)
    }
}

/// TextChunk completion: advance progress.
struct ChunkCallbackHandler {
    inner: Arc<Inner>,
}

#[async_trait]
impl TaskHandler for ChunkCallbackHandler {
    async fn handle(&self, task: &Task, _result: Option<&Value>) -> Result<Option<Value>> {
        self.inner.status.update_progress(&task.document_id, 60).await?;
        Ok(None)
    }
}

/// Vectorize / ProcessComplete: persist the vectors and finish the
/// document.
struct VectorizeCallbackHandler {
    inner: Arc<Inner>,
}

#[async_trait]
impl TaskHandler for VectorizeCallbackHandler {
    async fn handle(&self, task: &Task, result: Option<&Value>) -> Result<Option<Value>> {
        let result = result.ok_or_else(|| {
            DocQaError::invalid_argument("vectorize callback carried no result")
        })?;
        let parsed: VectorizeResult = serde_json::from_value(result.clone())?;

        save_vectors_to_database(&self.inner, &task.document_id, &parsed.vectors).await?;
        self.inner
            .status
            .mark_as_completed(&task.document_id, parsed.vectors.len() as i64)
            .await?;
        Ok(None)
    }
}

/// Register the ingestion handlers with the shared registry, replacing any
/// default chain entries.
pub(crate) fn register_ingest_handlers(inner: Arc<Inner>) {
    let handlers = Arc::clone(&inner.handlers);
    handlers.register(
        TaskType::DocumentParse,
        Arc::new(ParseCallbackHandler {
            inner: Arc::clone(&inner),
        }),
    );
    handlers.register(
        TaskType::TextChunk,
        Arc::new(ChunkCallbackHandler {
            inner: Arc::clone(&inner),
        }),
    );
    handlers.register(
        TaskType::Vectorize,
        Arc::new(VectorizeCallbackHandler {
            inner: Arc::clone(&inner),
        }),
    );
    handlers.register(
        TaskType::ProcessComplete,
        Arc::new(VectorizeCallbackHandler { inner }),
    );
}
