//! Document ingestion service.
//!
//! Orchestrates the parse → chunk → embed → index pipeline either fully
//! in-process (sync mode) or by dispatching to an external processor whose
//! callbacks drive the pipeline (async mode).

use crate::chunker::{Chunker, SplitType};
use crate::handlers::{metadata_map, register_ingest_handlers};
use docqa_core::error::{DocQaError, Result};
use docqa_core::traits::{BlobStore, DocumentParser, Embedder};
use docqa_core::types::{Document, DocumentSegment, ProcessingStage, TaskStatus};
use docqa_index::{VectorDocument, VectorRepository};
use docqa_queue::{HandlerRegistry, TaskQueue};
use docqa_store::DocumentStatusManager;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Which pipeline the service runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestMode {
    #[default]
    Sync,
    Async,
}

/// Ingestion settings, folded into one record.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub mode: IngestMode,
    /// Segments embedded and flushed per batch
    pub batch_size: usize,
    /// Overall budget for one synchronous ingestion
    pub sync_timeout: Duration,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub split_type: SplitType,
    /// External processor endpoint (async mode)
    pub processor_endpoint: String,
    /// Where the processor posts callbacks
    pub callback_url: String,
    /// Embedding model name forwarded to the processor
    pub embed_model: String,
    /// Budget for the processor dispatch request
    pub dispatch_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Sync,
            batch_size: 16,
            sync_timeout: Duration::from_secs(5 * 60),
            chunk_size: 500,
            chunk_overlap: 50,
            split_type: SplitType::Paragraph,
            processor_endpoint: String::new(),
            callback_url: String::new(),
            embed_model: String::new(),
            dispatch_timeout: Duration::from_secs(10),
        }
    }
}

pub(crate) struct Inner {
    pub status: Arc<DocumentStatusManager>,
    pub index: Arc<VectorRepository>,
    pub queue: Arc<dyn TaskQueue>,
    pub handlers: Arc<HandlerRegistry>,
    pub storage: Arc<dyn BlobStore>,
    pub parser: Arc<dyn DocumentParser>,
    pub embedder: Arc<dyn Embedder>,
    pub chunker: Chunker,
    pub http: reqwest::Client,
    pub config: IngestConfig,
    handlers_registered: AtomicBool,
}

/// The document service.
#[derive(Clone)]
pub struct DocumentService {
    inner: Arc<Inner>,
}

#[derive(Deserialize)]
struct ProcessorResponse {
    task_id: String,
    #[serde(default)]
    status: String,
}

impl DocumentService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        status: Arc<DocumentStatusManager>,
        index: Arc<VectorRepository>,
        queue: Arc<dyn TaskQueue>,
        handlers: Arc<HandlerRegistry>,
        storage: Arc<dyn BlobStore>,
        parser: Arc<dyn DocumentParser>,
        embedder: Arc<dyn Embedder>,
        config: IngestConfig,
    ) -> Self {
        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap, config.split_type);
        Self {
            inner: Arc::new(Inner {
                status,
                index,
                queue,
                handlers,
                storage,
                parser,
                embedder,
                chunker,
                http: reqwest::Client::new(),
                config,
                handlers_registered: AtomicBool::new(false),
            }),
        }
    }

    pub fn status(&self) -> &Arc<DocumentStatusManager> {
        &self.inner.status
    }

    /// Store an uploaded file and register the document as Uploaded.
    pub async fn upload_document(
        &self,
        id: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<Document> {
        if id.is_empty() {
            return Err(DocQaError::invalid_argument("empty document id"));
        }

        let info = self.inner.storage.save(content, file_name).await?;
        let file_type = Path::new(file_name)
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();

        let doc = Document::new(id, file_name, file_type, info.path, info.size);
        self.inner.status.mark_as_uploaded(&doc).await?;
        Ok(doc)
    }

    /// Run the configured pipeline for an uploaded document.
    pub async fn process_document(&self, id: &str) -> Result<()> {
        match self.inner.config.mode {
            IngestMode::Sync => self.process_document_sync(id).await,
            IngestMode::Async => self.process_document_async(id).await,
        }
    }

    /// Synchronous pipeline: parse, chunk, embed in batches, index, done.
    pub async fn process_document_sync(&self, id: &str) -> Result<()> {
        let budget = self.inner.config.sync_timeout;
        match tokio::time::timeout(budget, self.run_sync(id)).await {
            Ok(result) => result,
            Err(_) => {
                let message = format!("synchronous processing exceeded {:?}", budget);
                self.fail_document(id, &message).await;
                Err(DocQaError::timeout(message))
            }
        }
    }

    async fn run_sync(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        inner.status.mark_as_processing(id).await?;

        let doc = inner.status.get_document(id).await?;

        let text = match inner.parser.parse(Path::new(&doc.file_path)).await {
            Ok(text) => text,
            Err(e) => {
                let message = format!("parse failed: {}", e);
                self.fail_document(id, &message).await;
                return Err(DocQaError::permanent(message));
            }
        };
        inner.status.update_stage(id, ProcessingStage::Parsing).await?;

        let segments = inner.chunker.split(&text);
        if segments.is_empty() {
            let message = "parsed document produced no content".to_string();
            self.fail_document(id, &message).await;
            return Err(DocQaError::permanent(message));
        }
        debug!("document {} split into {} segments", id, segments.len());

        if let Err(e) = self.process_batches(&doc, &segments).await {
            let message = format!("vectorization failed: {}", e);
            self.fail_document(id, &message).await;
            return Err(e);
        }

        inner.status.mark_as_completed(id, segments.len() as i64).await?;
        info!("document {} ingested with {} segments", id, segments.len());
        Ok(())
    }

    /// Embed and flush segments in batches, interpolating progress from 20
    /// to 90. Work already flushed is not rolled back on failure.
    async fn process_batches(&self, doc: &Document, segments: &[String]) -> Result<()> {
        let inner = &self.inner;
        let metadata = metadata_map(&doc.metadata);
        let batches = segments.len().div_ceil(inner.config.batch_size);

        for (batch_index, batch) in segments.chunks(inner.config.batch_size).enumerate() {
            let texts: Vec<String> = batch.to_vec();
            let vectors = inner.embedder.embed_batch(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(DocQaError::permanent(format!(
                    "embedder returned {} vectors for {} segments",
                    vectors.len(),
                    batch.len()
                )));
            }

            let base = batch_index * inner.config.batch_size;
            let mut vector_docs = Vec::with_capacity(batch.len());
            let mut segment_rows = Vec::with_capacity(batch.len());

            for (offset, (text, vector)) in batch.iter().zip(vectors).enumerate() {
                let position = base + offset;
                let vector_id = format!("{}_{}", doc.id, position);

                let mut vector_doc =
                    VectorDocument::new(&vector_id, &doc.id, position, text.clone(), vector);
                vector_doc.file_name = doc.file_name.clone();
                vector_doc.metadata = metadata.clone();
                vector_docs.push(vector_doc);

                let mut row = DocumentSegment::new(&doc.id, position as i64, text.clone());
                row.metadata = doc.metadata.clone();
                row.vector_id = Some(vector_id);
                segment_rows.push(row);
            }

            inner.index.add_batch(vector_docs).await?;
            inner
                .status
                .repository()
                .save_segments(&segment_rows)
                .await?;

            let progress = 20 + (((batch_index + 1) * 70) / batches) as i32;
            inner.status.update_progress(&doc.id, progress.min(90)).await?;
        }

        Ok(())
    }

    /// Asynchronous pipeline: hand the document to the external processor
    /// and let its callbacks drive the stages.
    pub async fn process_document_async(&self, id: &str) -> Result<()> {
        let inner = &self.inner;
        inner.status.mark_as_processing(id).await?;
        self.register_handlers();

        let doc = inner.status.get_document(id).await?;
        let request = json!({
            "document_id": doc.id,
            "file_path": doc.file_path,
            "file_name": doc.file_name,
            "file_type": doc.file_type,
            "chunk_size": inner.config.chunk_size,
            "overlap": inner.config.chunk_overlap,
            "split_type": inner.config.split_type.as_str(),
            "model": inner.config.embed_model,
            "metadata": doc.metadata,
            "callback_url": inner.config.callback_url,
        });

        let response = inner
            .http
            .post(&inner.config.processor_endpoint)
            .timeout(inner.config.dispatch_timeout)
            .json(&request)
            .send()
            .await;

        let response = match response {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                let message = format!("processor dispatch returned {}", response.status());
                self.fail_document(id, &message).await;
                return Err(DocQaError::transient(message));
            }
            Err(e) => {
                let message = format!("processor dispatch failed: {}", e);
                self.fail_document(id, &message).await;
                return Err(DocQaError::from(e));
            }
        };

        // The vector save happens in the callback path; the processor's
        // task id is recorded as the document's current task.
        match response.json::<ProcessorResponse>().await {
            Ok(accepted) => {
                inner
                    .status
                    .update_current_task(id, &accepted.task_id, TaskStatus::Processing)
                    .await?;
                info!(
                    "document {} dispatched, processor task {} ({})",
                    id, accepted.task_id, accepted.status
                );
            }
            Err(e) => warn!("processor response for {} unreadable: {}", id, e),
        }

        Ok(())
    }

    /// Register the callback handlers once.
    pub fn register_handlers(&self) {
        if self
            .inner
            .handlers_registered
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            register_ingest_handlers(Arc::clone(&self.inner));
        }
    }

    /// Remove a document everywhere: vectors, blob, rows, and queue state.
    /// Already-deleted documents are a no-op.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let inner = &self.inner;

        let removed = inner.index.delete_by_file_id(id).await?;
        debug!("removed {} vectors for document {}", removed, id);

        match inner.status.get_document(id).await {
            Ok(doc) => {
                let blob_id = Path::new(&doc.file_path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if !blob_id.is_empty() {
                    if let Err(e) = inner.storage.delete(&blob_id).await {
                        warn!("blob cleanup for document {} failed: {}", id, e);
                    }
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }

        inner.status.delete_document(id).await?;

        let tasks = inner.queue.get_tasks_by_document(id).await?;
        for task in tasks {
            match inner.queue.delete_task(&task.id).await {
                Ok(()) => {}
                Err(e) if e.is_not_found() => {}
                Err(e) => warn!("task cleanup for document {} failed: {}", id, e),
            }
        }

        info!("document {} deleted", id);
        Ok(())
    }

    /// Best-effort failure marking; the original error wins.
    async fn fail_document(&self, id: &str, message: &str) {
        if let Err(e) = self.inner.status.mark_as_failed(id, message).await {
            warn!("could not mark document {} failed: {}", id, e);
        }
    }
}
