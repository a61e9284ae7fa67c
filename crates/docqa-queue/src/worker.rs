//! Worker pool draining the task queue.
//!
//! N workers pull from the priority streams, mark tasks Processing, invoke
//! the registered handler for the task type, and record the terminal state.
//! Retryable handler failures are redelivered after a delay until the
//! task's retry budget runs out.

use crate::handler::HandlerRegistry;
use crate::queue::TaskQueue;
use docqa_core::error::Result;
use docqa_core::types::{Task, TaskStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Worker pool settings.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub concurrency: usize,
    pub retry_delay: Duration,
    /// How long one dequeue poll blocks before rechecking shutdown
    pub dequeue_timeout: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            retry_delay: Duration::from_secs(5),
            dequeue_timeout: Duration::from_secs(1),
        }
    }
}

/// Pool of workers processing queued tasks.
pub struct WorkerPool {
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerConfig,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        handlers: Arc<HandlerRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            queue,
            handlers,
            config,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the workers.
    pub async fn start(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            warn!("worker pool already started");
            return;
        }

        info!("starting {} queue workers", self.config.concurrency);
        for worker_id in 0..self.config.concurrency {
            let queue = Arc::clone(&self.queue);
            let handlers = Arc::clone(&self.handlers);
            let config = self.config.clone();
            let mut shutdown = self.shutdown.subscribe();

            handles.push(tokio::spawn(async move {
                loop {
                    if *shutdown.borrow() {
                        break;
                    }
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        pulled = queue.dequeue(config.dequeue_timeout) => match pulled {
                            Ok(Some(task)) => {
                                process_task(&*queue, &handlers, &config, task).await;
                            }
                            Ok(None) => {}
                            Err(e) => {
                                error!("worker {} dequeue failed: {}", worker_id, e);
                                tokio::time::sleep(Duration::from_secs(1)).await;
                            }
                        }
                    }
                }
                debug!("worker {} stopped", worker_id);
            }));
        }
    }

    /// Signal shutdown and wait for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown.send(true);
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            let _ = handle.await;
        }
        info!("worker pool stopped");
    }
}

async fn process_task(
    queue: &dyn TaskQueue,
    handlers: &HandlerRegistry,
    config: &WorkerConfig,
    task: Task,
) {
    debug!("processing {} task {}", task.task_type, task.id);

    if let Err(e) = queue
        .update_task_status(&task.id, TaskStatus::Processing, None, None)
        .await
    {
        warn!("failed to mark task {} processing: {}", task.id, e);
        return;
    }

    let Some(handler) = handlers.resolve(task.task_type) else {
        let message = format!("no handler registered for {}", task.task_type);
        warn!("task {}: {}", task.id, message);
        finish(queue, &task.id, TaskStatus::Failed, None, Some(message)).await;
        return;
    };

    match handler.handle(&task, None).await {
        Ok(result) => {
            finish(queue, &task.id, TaskStatus::Completed, result, None).await;
        }
        Err(e) if e.is_retryable() => {
            let attempts = match queue.record_attempt(&task.id).await {
                Ok(attempts) => attempts,
                Err(record_err) => {
                    warn!("failed to record attempt for {}: {}", task.id, record_err);
                    finish(queue, &task.id, TaskStatus::Failed, None, Some(e.to_string())).await;
                    return;
                }
            };

            if attempts <= task.max_retries {
                warn!(
                    "task {} attempt {}/{} failed, redelivering in {:?}: {}",
                    task.id, attempts, task.max_retries, config.retry_delay, e
                );
                finish(queue, &task.id, TaskStatus::Pending, None, Some(e.to_string())).await;
                if let Err(redeliver_err) = queue.redeliver(&task.id, config.retry_delay).await {
                    error!("redelivery of {} failed: {}", task.id, redeliver_err);
                }
            } else {
                error!("task {} exhausted {} retries: {}", task.id, task.max_retries, e);
                finish(queue, &task.id, TaskStatus::Failed, None, Some(e.to_string())).await;
            }
        }
        Err(e) => {
            error!("task {} failed permanently: {}", task.id, e);
            finish(queue, &task.id, TaskStatus::Failed, None, Some(e.to_string())).await;
        }
    }
}

async fn finish(
    queue: &dyn TaskQueue,
    id: &str,
    status: TaskStatus,
    result: Option<serde_json::Value>,
    error: Option<String>,
) {
    if let Err(e) = queue.update_task_status(id, status, result, error).await {
        warn!("failed to record {} state for task {}: {}", status, id, e);
    }
}

/// Convenience: spawn a pool over a queue and registry with defaults.
pub async fn start_workers(
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<HandlerRegistry>,
    config: WorkerConfig,
) -> Result<Arc<WorkerPool>> {
    let pool = Arc::new(WorkerPool::new(queue, handlers, config));
    pool.start().await;
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskHandler;
    use crate::memory::MemoryTaskQueue;
    use async_trait::async_trait;
    use docqa_core::error::DocQaError;
    use docqa_core::types::TaskType;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Succeeding;

    #[async_trait]
    impl TaskHandler for Succeeding {
        async fn handle(
            &self,
            task: &Task,
            _result: Option<&serde_json::Value>,
        ) -> Result<Option<serde_json::Value>> {
            Ok(Some(serde_json::json!({ "echo": task.payload })))
        }
    }

    struct FlakyOnce {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for FlakyOnce {
        async fn handle(
            &self,
            _task: &Task,
            _result: Option<&serde_json::Value>,
        ) -> Result<Option<serde_json::Value>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DocQaError::transient("temporary hiccup"))
            } else {
                Ok(Some(serde_json::json!("recovered")))
            }
        }
    }

    struct AlwaysPermanent;

    #[async_trait]
    impl TaskHandler for AlwaysPermanent {
        async fn handle(
            &self,
            _task: &Task,
            _result: Option<&serde_json::Value>,
        ) -> Result<Option<serde_json::Value>> {
            Err(DocQaError::permanent("bad payload"))
        }
    }

    async fn pool_with(
        handler: Arc<dyn TaskHandler>,
        task_type: TaskType,
    ) -> (Arc<MemoryTaskQueue>, Arc<WorkerPool>) {
        let queue = Arc::new(MemoryTaskQueue::new());
        let handlers = Arc::new(HandlerRegistry::new());
        handlers.register(task_type, handler);

        let config = WorkerConfig {
            concurrency: 2,
            retry_delay: Duration::from_millis(20),
            dequeue_timeout: Duration::from_millis(50),
        };
        let pool = Arc::new(WorkerPool::new(
            queue.clone() as Arc<dyn TaskQueue>,
            handlers,
            config,
        ));
        pool.start().await;
        (queue, pool)
    }

    #[tokio::test]
    async fn test_worker_completes_task() {
        let (queue, pool) = pool_with(Arc::new(Succeeding), TaskType::Vectorize).await;

        let id = queue
            .enqueue(TaskType::Vectorize, "doc-1", serde_json::json!({"n": 1}))
            .await
            .unwrap();

        let task = queue.wait_for_task(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result, Some(serde_json::json!({"echo": {"n": 1}})));
        assert!(task.started_at.is_some());
        assert!(task.completed_at.is_some());

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_retries_transient_failure() {
        let handler = Arc::new(FlakyOnce {
            calls: AtomicU32::new(0),
        });
        let (queue, pool) = pool_with(handler.clone(), TaskType::TextChunk).await;

        let id = queue
            .enqueue(TaskType::TextChunk, "doc-1", serde_json::json!(null))
            .await
            .unwrap();

        let task = queue.wait_for_task(&id, Duration::from_secs(3)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.attempts, 1);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 2);

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_worker_fails_permanent_error_without_retry() {
        let (queue, pool) = pool_with(Arc::new(AlwaysPermanent), TaskType::DocumentParse).await;

        let id = queue
            .enqueue(TaskType::DocumentParse, "doc-1", serde_json::json!(null))
            .await
            .unwrap();

        let task = queue.wait_for_task(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.attempts, 0);
        assert!(task.error.as_deref().unwrap_or("").contains("bad payload"));

        pool.shutdown().await;
    }

    #[tokio::test]
    async fn test_missing_handler_fails_task() {
        let queue = Arc::new(MemoryTaskQueue::new());
        let handlers = Arc::new(HandlerRegistry::new());
        let pool = Arc::new(WorkerPool::new(
            queue.clone() as Arc<dyn TaskQueue>,
            handlers,
            WorkerConfig {
                concurrency: 1,
                retry_delay: Duration::from_millis(20),
                dequeue_timeout: Duration::from_millis(50),
            },
        ));
        pool.start().await;

        let id = queue
            .enqueue(TaskType::ProcessComplete, "doc-1", serde_json::json!(null))
            .await
            .unwrap();

        let task = queue.wait_for_task(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap_or("").contains("no handler"));

        pool.shutdown().await;
    }
}
