//! Document lifecycle state machine.
//!
//! Wraps the document repository with validated status transitions and
//! progress semantics. A single mutex serialises state-changing calls so
//! each load-check-save is atomic against the underlying repository.

use crate::documents::DocumentRepository;
use chrono::Utc;
use docqa_core::error::{DocQaError, Result};
use docqa_core::types::{Document, DocumentStatus, ProcessingStage, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Valid lifecycle transitions. Uploaded may go anywhere, Processing may
/// only terminate, Failed may be retried, Completed is final.
fn can_transition(from: DocumentStatus, to: DocumentStatus) -> bool {
    use DocumentStatus::*;
    matches!(
        (from, to),
        (Uploaded, Processing)
            | (Uploaded, Completed)
            | (Uploaded, Failed)
            | (Processing, Completed)
            | (Processing, Failed)
            | (Failed, Processing)
    )
}

/// Enforces the document lifecycle state machine over the repository.
pub struct DocumentStatusManager {
    repo: Arc<DocumentRepository>,
    lock: Mutex<()>,
}

impl DocumentStatusManager {
    pub fn new(repo: Arc<DocumentRepository>) -> Self {
        Self {
            repo,
            lock: Mutex::new(()),
        }
    }

    pub fn repository(&self) -> &Arc<DocumentRepository> {
        &self.repo
    }

    /// Register a freshly uploaded document.
    pub async fn mark_as_uploaded(&self, doc: &Document) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = doc.clone();
        doc.status = DocumentStatus::Uploaded;
        doc.progress = 0;
        doc.processed_at = None;
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await?;
        info!("document {} uploaded", doc.id);
        Ok(())
    }

    /// Move a document into Processing (initial run or retry).
    pub async fn mark_as_processing(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.checked(id, DocumentStatus::Processing).await?;
        doc.status = DocumentStatus::Processing;
        doc.processed_at = None;
        doc.error = None;
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await?;
        debug!("document {} processing", id);
        Ok(())
    }

    /// Complete a document with its final segment count.
    pub async fn mark_as_completed(&self, id: &str, segment_count: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.checked(id, DocumentStatus::Completed).await?;
        let now = Utc::now();
        doc.status = DocumentStatus::Completed;
        doc.progress = 100;
        doc.segment_count = segment_count;
        doc.processed_at = Some(now);
        doc.updated_at = now;
        doc.current_stage = Some(ProcessingStage::Completed);
        self.repo.save(&doc).await?;
        info!("document {} completed with {} segments", id, segment_count);
        Ok(())
    }

    /// Fail a document with a human-readable error.
    pub async fn mark_as_failed(&self, id: &str, error: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.checked(id, DocumentStatus::Failed).await?;
        let now = Utc::now();
        doc.status = DocumentStatus::Failed;
        doc.error = Some(error.to_string());
        doc.processed_at = Some(now);
        doc.updated_at = now;
        self.repo.save(&doc).await?;
        info!("document {} failed: {}", id, error);
        Ok(())
    }

    /// Update progress; only valid while Processing. Values are clamped
    /// to [0, 100].
    pub async fn update_progress(&self, id: &str, progress: i32) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.repo.get_by_id(id).await?;
        if doc.status != DocumentStatus::Processing {
            return Err(DocQaError::invalid_argument(format!(
                "progress update requires processing status, document {} is {}",
                id, doc.status
            )));
        }
        doc.progress = progress.clamp(0, 100);
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await
    }

    /// Record the current pipeline stage, raising progress to the stage
    /// floor.
    pub async fn update_stage(&self, id: &str, stage: ProcessingStage) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.repo.get_by_id(id).await?;
        doc.current_stage = Some(stage);
        doc.progress = doc.progress.max(stage.progress_floor()).min(100);
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await
    }

    /// Record which task currently drives the document.
    pub async fn update_current_task(
        &self,
        id: &str,
        task_id: &str,
        task_status: TaskStatus,
    ) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.repo.get_by_id(id).await?;
        doc.current_task_id = Some(task_id.to_string());
        doc.updated_at = Utc::now();
        debug!(
            "document {} current task {} ({})",
            id, task_id, task_status
        );
        self.repo.save(&doc).await
    }

    pub async fn increment_retry_count(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc = self.repo.get_by_id(id).await?;
        doc.retry_count += 1;
        doc.updated_at = Utc::now();
        self.repo.save(&doc).await
    }

    pub async fn get_status(&self, id: &str) -> Result<DocumentStatus> {
        Ok(self.repo.get_by_id(id).await?.status)
    }

    pub async fn get_document(&self, id: &str) -> Result<Document> {
        self.repo.get_by_id(id).await
    }

    pub async fn list_documents(
        &self,
        offset: i64,
        limit: i64,
        filters: &HashMap<String, String>,
    ) -> Result<Vec<Document>> {
        self.repo.list(offset, limit, filters).await
    }

    /// Delete a document and its segments. Idempotent.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.repo.delete(id).await
    }

    /// Load a document and verify the requested transition is legal.
    async fn checked(&self, id: &str, to: DocumentStatus) -> Result<Document> {
        let doc = self.repo.get_by_id(id).await?;
        if !can_transition(doc.status, to) {
            return Err(DocQaError::invalid_transition(
                doc.status.to_string(),
                to.to_string(),
            ));
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn manager() -> DocumentStatusManager {
        let repo = Arc::new(DocumentRepository::connect(":memory:").await.unwrap());
        DocumentStatusManager::new(repo)
    }

    async fn uploaded(manager: &DocumentStatusManager, id: &str) {
        let doc = Document::new(id, format!("{}.txt", id), "txt", "/tmp/x", 1);
        manager.mark_as_uploaded(&doc).await.unwrap();
    }

    #[test]
    fn test_transition_matrix() {
        use DocumentStatus::*;
        // allowed
        assert!(can_transition(Uploaded, Processing));
        assert!(can_transition(Uploaded, Completed));
        assert!(can_transition(Uploaded, Failed));
        assert!(can_transition(Processing, Completed));
        assert!(can_transition(Processing, Failed));
        assert!(can_transition(Failed, Processing));
        // forbidden
        assert!(!can_transition(Processing, Processing));
        assert!(!can_transition(Completed, Processing));
        assert!(!can_transition(Completed, Completed));
        assert!(!can_transition(Completed, Failed));
        assert!(!can_transition(Failed, Completed));
        assert!(!can_transition(Failed, Failed));
    }

    #[tokio::test]
    async fn test_happy_path_lifecycle() {
        let m = manager().await;
        uploaded(&m, "d1").await;

        m.mark_as_processing("d1").await.unwrap();
        assert_eq!(m.get_status("d1").await.unwrap(), DocumentStatus::Processing);

        m.update_progress("d1", 40).await.unwrap();
        m.mark_as_completed("d1", 7).await.unwrap();

        let doc = m.get_document("d1").await.unwrap();
        assert_eq!(doc.status, DocumentStatus::Completed);
        assert_eq!(doc.progress, 100);
        assert_eq!(doc.segment_count, 7);
        assert!(doc.processed_at.is_some());
        assert_eq!(doc.current_stage, Some(ProcessingStage::Completed));
    }

    #[tokio::test]
    async fn test_uploaded_straight_to_completed_then_locked() {
        let m = manager().await;
        uploaded(&m, "c").await;

        // uploaded -> completed is allowed
        m.mark_as_completed("c", 0).await.unwrap();

        // completed is final
        let err = m.mark_as_processing("c").await.unwrap_err();
        assert!(err.is_invalid_transition());
    }

    #[tokio::test]
    async fn test_failed_retry() {
        let m = manager().await;
        uploaded(&m, "d1").await;
        m.mark_as_processing("d1").await.unwrap();
        m.mark_as_failed("d1", "parser exploded").await.unwrap();

        let doc = m.get_document("d1").await.unwrap();
        assert_eq!(doc.error.as_deref(), Some("parser exploded"));
        assert!(doc.processed_at.is_some());

        // failed -> processing clears the terminal marker
        m.mark_as_processing("d1").await.unwrap();
        let doc = m.get_document("d1").await.unwrap();
        assert!(doc.processed_at.is_none());
        assert!(doc.error.is_none());
    }

    #[tokio::test]
    async fn test_progress_clamped() {
        let m = manager().await;
        uploaded(&m, "d1").await;
        m.mark_as_processing("d1").await.unwrap();

        m.update_progress("d1", -10).await.unwrap();
        assert_eq!(m.get_document("d1").await.unwrap().progress, 0);

        m.update_progress("d1", 150).await.unwrap();
        assert_eq!(m.get_document("d1").await.unwrap().progress, 100);
    }

    #[tokio::test]
    async fn test_progress_requires_processing() {
        let m = manager().await;
        uploaded(&m, "d1").await;
        assert!(m.update_progress("d1", 50).await.is_err());
    }

    #[tokio::test]
    async fn test_stage_floors() {
        let m = manager().await;
        uploaded(&m, "d1").await;
        m.mark_as_processing("d1").await.unwrap();

        m.update_stage("d1", ProcessingStage::Chunking).await.unwrap();
        let doc = m.get_document("d1").await.unwrap();
        assert_eq!(doc.current_stage, Some(ProcessingStage::Chunking));
        assert_eq!(doc.progress, 50);

        // a floor never lowers existing progress
        m.update_progress("d1", 90).await.unwrap();
        m.update_stage("d1", ProcessingStage::Vectorizing).await.unwrap();
        assert_eq!(m.get_document("d1").await.unwrap().progress, 90);
    }

    #[tokio::test]
    async fn test_retry_count_and_current_task() {
        let m = manager().await;
        uploaded(&m, "d1").await;

        m.increment_retry_count("d1").await.unwrap();
        m.increment_retry_count("d1").await.unwrap();
        m.update_current_task("d1", "task-9", TaskStatus::Processing)
            .await
            .unwrap();

        let doc = m.get_document("d1").await.unwrap();
        assert_eq!(doc.retry_count, 2);
        assert_eq!(doc.current_task_id.as_deref(), Some("task-9"));
    }

    #[tokio::test]
    async fn test_delete_idempotent() {
        let m = manager().await;
        uploaded(&m, "d1").await;
        m.delete_document("d1").await.unwrap();
        m.delete_document("d1").await.unwrap();
        assert!(m.get_document("d1").await.unwrap_err().is_not_found());
    }
}
