//! In-process task queue backend.
//!
//! Keeps the full queue contract without external infrastructure: dashmap
//! records, per-document id sets, weighted in-memory work streams, and
//! per-task broadcast channels standing in for pub/sub. Records never
//! expire here; the 7-day TTL is enforced by the Redis backend only.

use crate::queue::{weighted_order, EnqueueOptions, QueuePriority, TaskQueue};
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use docqa_core::error::{DocQaError, Result};
use docqa_core::types::{Task, TaskStatus, TaskType};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, Notify};
use tracing::debug;

const DEFAULT_MAX_RETRIES: u32 = 3;

struct Inner {
    tasks: DashMap<String, Task>,
    doc_tasks: DashMap<String, HashSet<String>>,
    priorities: DashMap<String, QueuePriority>,
    queues: [Mutex<VecDeque<String>>; 3],
    arrival: Notify,
    subscribers: DashMap<String, broadcast::Sender<Task>>,
    cursor: AtomicUsize,
}

impl Inner {
    fn queue(&self, priority: QueuePriority) -> &Mutex<VecDeque<String>> {
        let index = match priority {
            QueuePriority::Critical => 0,
            QueuePriority::Default => 1,
            QueuePriority::Low => 2,
        };
        &self.queues[index]
    }

    async fn push(&self, priority: QueuePriority, id: String) {
        self.queue(priority).lock().await.push_back(id);
        self.arrival.notify_one();
    }

    fn publish(&self, task: &Task) {
        if let Some(tx) = self.subscribers.get(&task.id) {
            // No receivers is fine; the poll loop is the safety net.
            let _ = tx.send(task.clone());
        }
    }

    fn subscribe(&self, id: &str) -> broadcast::Receiver<Task> {
        self.subscribers
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(16).0)
            .subscribe()
    }
}

/// In-memory implementation of [`TaskQueue`].
pub struct MemoryTaskQueue {
    inner: Arc<Inner>,
    default_max_retries: u32,
}

impl Default for MemoryTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTaskQueue {
    pub fn new() -> Self {
        Self {
            default_max_retries: DEFAULT_MAX_RETRIES,
            inner: Arc::new(Inner {
                tasks: DashMap::new(),
                doc_tasks: DashMap::new(),
                priorities: DashMap::new(),
                queues: [
                    Mutex::new(VecDeque::new()),
                    Mutex::new(VecDeque::new()),
                    Mutex::new(VecDeque::new()),
                ],
                arrival: Notify::new(),
                subscribers: DashMap::new(),
                cursor: AtomicUsize::new(0),
            }),
        }
    }

    /// Override the retry budget applied when enqueue options leave it
    /// unset.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    async fn try_pop(&self) -> Option<Task> {
        let cursor = self.inner.cursor.fetch_add(1, Ordering::Relaxed);
        for priority in weighted_order(cursor) {
            let mut queue = self.inner.queue(priority).lock().await;
            while let Some(id) = queue.pop_front() {
                if let Some(task) = self.inner.tasks.get(&id) {
                    return Some(task.clone());
                }
                // Record deleted while queued; drop the stale job.
            }
        }
        None
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue_with(
        &self,
        task_type: TaskType,
        document_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String> {
        if document_id.is_empty() {
            return Err(DocQaError::invalid_argument("empty document id"));
        }

        let max_retries = opts.max_retries.unwrap_or(self.default_max_retries);
        let task = Task::new(task_type, document_id, payload, max_retries);
        let id = task.id.clone();

        self.inner.tasks.insert(id.clone(), task);
        self.inner
            .doc_tasks
            .entry(document_id.to_string())
            .or_default()
            .insert(id.clone());
        self.inner.priorities.insert(id.clone(), opts.priority);

        let delay = match (opts.process_at, opts.delay) {
            (Some(at), _) => (at - Utc::now()).to_std().unwrap_or(Duration::ZERO),
            (None, Some(delay)) => delay,
            (None, None) => Duration::ZERO,
        };

        if delay.is_zero() {
            self.inner.push(opts.priority, id.clone()).await;
        } else {
            let inner = Arc::clone(&self.inner);
            let scheduled = id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                inner.push(opts.priority, scheduled).await;
            });
        }

        debug!("enqueued {} task {} for document {}", task_type, id, document_id);
        Ok(id)
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.inner
            .tasks
            .get(id)
            .map(|entry| entry.clone())
            .ok_or_else(|| DocQaError::not_found("task", id))
    }

    async fn get_tasks_by_document(&self, document_id: &str) -> Result<Vec<Task>> {
        let Some(ids) = self.inner.doc_tasks.get(document_id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.inner.tasks.get(id).map(|entry| entry.clone()))
            .collect())
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let updated = {
            let mut entry = self
                .inner
                .tasks
                .get_mut(id)
                .ok_or_else(|| DocQaError::not_found("task", id))?;
            let now = Utc::now();
            entry.status = status;
            entry.updated_at = now;
            if status == TaskStatus::Processing && entry.started_at.is_none() {
                entry.started_at = Some(now);
            }
            if status.is_terminal() && entry.completed_at.is_none() {
                entry.completed_at = Some(now);
            }
            if let Some(result) = result {
                entry.result = Some(result);
            }
            if let Some(error) = error {
                entry.error = Some(error);
            }
            entry.clone()
        };

        self.inner.publish(&updated);
        Ok(())
    }

    async fn notify_task_update(&self, id: &str) -> Result<()> {
        if let Some(task) = self.inner.tasks.get(id) {
            self.inner.publish(&task);
        }
        Ok(())
    }

    async fn wait_for_task(&self, id: &str, timeout: Duration) -> Result<Task> {
        let mut rx = self.inner.subscribe(id);

        // Fast path when the record is already terminal.
        let task = self.get_task(id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            tokio::select! {
                received = rx.recv() => {
                    if let Ok(task) = received {
                        if task.status.is_terminal() {
                            return Ok(task);
                        }
                    }
                    // Lagged or closed channels fall back to polling.
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    match self.get_task(id).await {
                        Ok(task) if task.status.is_terminal() => return Ok(task),
                        Ok(_) => {}
                        // NotFound here means the record was evicted mid-wait.
                        Err(e) => return Err(e),
                    }
                }
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(DocQaError::timeout(format!(
                        "task {} not terminal within {:?}", id, timeout
                    )));
                }
            }
        }
    }

    async fn delete_task(&self, id: &str) -> Result<()> {
        let (_, task) = self
            .inner
            .tasks
            .remove(id)
            .ok_or_else(|| DocQaError::not_found("task", id))?;

        self.inner.priorities.remove(id);
        self.inner.subscribers.remove(id);

        if let Some(mut ids) = self.inner.doc_tasks.get_mut(&task.document_id) {
            ids.remove(id);
        }

        // Best-effort removal from the work streams.
        for priority in QueuePriority::ALL {
            self.inner
                .queue(priority)
                .lock()
                .await
                .retain(|queued| queued != id);
        }

        debug!("deleted task {}", id);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(task) = self.try_pop().await {
                return Ok(Some(task));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::select! {
                _ = self.inner.arrival.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                _ = tokio::time::sleep_until(deadline) => return Ok(None),
            }
        }
    }

    async fn redeliver(&self, id: &str, delay: Duration) -> Result<()> {
        if !self.inner.tasks.contains_key(id) {
            return Err(DocQaError::not_found("task", id));
        }
        let priority = self
            .inner
            .priorities
            .get(id)
            .map(|entry| *entry)
            .unwrap_or_default();

        let inner = Arc::clone(&self.inner);
        let id = id.to_string();
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            inner.push(priority, id).await;
        });
        Ok(())
    }

    async fn record_attempt(&self, id: &str) -> Result<u32> {
        let mut entry = self
            .inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| DocQaError::not_found("task", id))?;
        entry.attempts += 1;
        entry.updated_at = Utc::now();
        Ok(entry.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_enqueue_get_round_trip() {
        let queue = MemoryTaskQueue::new();
        let id = queue
            .enqueue(TaskType::DocumentParse, "doc-1", json!({"path": "/tmp/a"}))
            .await
            .unwrap();

        let task = queue.get_task(&id).await.unwrap();
        assert_eq!(task.task_type, TaskType::DocumentParse);
        assert_eq!(task.document_id, "doc-1");
        assert_eq!(task.payload, json!({"path": "/tmp/a"}));
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn test_empty_document_id_rejected() {
        let queue = MemoryTaskQueue::new();
        let err = queue
            .enqueue(TaskType::DocumentParse, "", json!(null))
            .await
            .unwrap_err();
        assert!(matches!(err, DocQaError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_update_status_round_trip() {
        let queue = MemoryTaskQueue::new();
        let id = queue
            .enqueue(TaskType::Vectorize, "doc-1", json!(null))
            .await
            .unwrap();

        queue
            .update_task_status(&id, TaskStatus::Processing, None, None)
            .await
            .unwrap();
        let task = queue.get_task(&id).await.unwrap();
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_none());

        queue
            .update_task_status(
                &id,
                TaskStatus::Completed,
                Some(json!({"n": 2})),
                None,
            )
            .await
            .unwrap();
        let task = queue.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!({"n": 2})));
        assert!(task.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_update_missing_task() {
        let queue = MemoryTaskQueue::new();
        let err = queue
            .update_task_status("nope", TaskStatus::Completed, None, None)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_tasks_by_document_skips_evicted() {
        let queue = MemoryTaskQueue::new();
        let a = queue.enqueue(TaskType::DocumentParse, "doc-1", json!(null)).await.unwrap();
        let b = queue.enqueue(TaskType::TextChunk, "doc-1", json!(null)).await.unwrap();
        queue.enqueue(TaskType::Vectorize, "doc-2", json!(null)).await.unwrap();

        // Simulate record expiry without touching the set.
        queue.inner.tasks.remove(&b);

        let tasks = queue.get_tasks_by_document("doc-1").await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, a);
    }

    #[tokio::test]
    async fn test_delete_task() {
        let queue = MemoryTaskQueue::new();
        let id = queue.enqueue(TaskType::Vectorize, "doc-1", json!(null)).await.unwrap();

        queue.delete_task(&id).await.unwrap();
        assert!(queue.get_task(&id).await.unwrap_err().is_not_found());
        assert!(queue.get_tasks_by_document("doc-1").await.unwrap().is_empty());

        // missing id is NotFound
        assert!(queue.delete_task(&id).await.unwrap_err().is_not_found());

        // the queued job was removed too
        assert!(queue.dequeue(Duration::from_millis(50)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_notify_any_id_is_ok() {
        let queue = MemoryTaskQueue::new();
        queue.notify_task_update("never-enqueued").await.unwrap();
    }

    #[tokio::test]
    async fn test_dequeue_prefers_critical() {
        let queue = MemoryTaskQueue::new();
        queue
            .enqueue_with(
                TaskType::Vectorize,
                "doc-low",
                json!(null),
                EnqueueOptions {
                    priority: QueuePriority::Low,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        queue
            .enqueue_with(
                TaskType::Vectorize,
                "doc-critical",
                json!(null),
                EnqueueOptions {
                    priority: QueuePriority::Critical,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Over two pulls both documents come out; the critical one first for
        // most cursor positions.
        let first = queue.dequeue(Duration::from_millis(100)).await.unwrap().unwrap();
        let second = queue.dequeue(Duration::from_millis(100)).await.unwrap().unwrap();
        let mut docs = vec![first.document_id, second.document_id];
        docs.sort();
        assert_eq!(docs, vec!["doc-critical", "doc-low"]);
    }

    #[tokio::test]
    async fn test_delayed_enqueue_visibility() {
        let queue = MemoryTaskQueue::new();
        queue
            .enqueue_in(
                TaskType::Vectorize,
                "doc-1",
                json!(null),
                Duration::from_millis(150),
            )
            .await
            .unwrap();

        assert!(queue.dequeue(Duration::from_millis(30)).await.unwrap().is_none());
        let task = queue.dequeue(Duration::from_millis(500)).await.unwrap();
        assert!(task.is_some());
    }

    #[tokio::test]
    async fn test_wait_for_task_timeout_then_completion() {
        let queue = Arc::new(MemoryTaskQueue::new());
        let id = queue.enqueue(TaskType::Vectorize, "doc-1", json!(null)).await.unwrap();

        // never updated: times out within ~2x the deadline
        let started = std::time::Instant::now();
        let err = queue.wait_for_task(&id, Duration::from_millis(100)).await.unwrap_err();
        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(400));

        // external completion unblocks a subsequent wait
        let waiter = {
            let queue = Arc::clone(&queue);
            let id = id.clone();
            tokio::spawn(async move { queue.wait_for_task(&id, Duration::from_secs(2)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue
            .update_task_status(&id, TaskStatus::Completed, Some(json!("R")), None)
            .await
            .unwrap();

        let task = waiter.await.unwrap().unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(json!("R")));
    }

    #[tokio::test]
    async fn test_wait_for_missing_task() {
        let queue = MemoryTaskQueue::new();
        let err = queue
            .wait_for_task("ghost", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_record_attempt_and_redeliver() {
        let queue = MemoryTaskQueue::new();
        let id = queue.enqueue(TaskType::Vectorize, "doc-1", json!(null)).await.unwrap();

        // consume the first delivery
        assert!(queue.dequeue(Duration::from_millis(100)).await.unwrap().is_some());
        assert!(queue.dequeue(Duration::from_millis(30)).await.unwrap().is_none());

        assert_eq!(queue.record_attempt(&id).await.unwrap(), 1);
        queue.redeliver(&id, Duration::ZERO).await.unwrap();

        let task = queue.dequeue(Duration::from_millis(500)).await.unwrap().unwrap();
        assert_eq!(task.id, id);
        assert_eq!(task.attempts, 1);
    }
}
