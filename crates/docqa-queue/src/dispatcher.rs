//! Callback dispatcher for external processor notifications.
//!
//! Receives `TaskCallback` bodies, records the reported state on the queue,
//! and invokes the handler registered for the task type. Handler errors are
//! returned to the caller but never revert the status update.

use crate::handler::{HandlerRegistry, TaskHandler};
use crate::queue::TaskQueue;
use async_trait::async_trait;
use docqa_core::error::Result;
use docqa_core::types::{Task, TaskCallback, TaskStatus, TaskType};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatches task callbacks to their registered handlers.
pub struct CallbackDispatcher {
    queue: Arc<dyn TaskQueue>,
    handlers: Arc<HandlerRegistry>,
}

impl CallbackDispatcher {
    pub fn new(queue: Arc<dyn TaskQueue>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { queue, handlers }
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Process one callback.
    ///
    /// Fails with `NotFound` when the task is unknown. A Failed callback
    /// updates state and returns without invoking any handler.
    pub async fn dispatch(&self, callback: TaskCallback) -> Result<()> {
        let received_at = callback.parsed_timestamp();
        debug!(
            "callback for task {} ({}, {}) emitted at {}",
            callback.task_id, callback.task_type, callback.status, received_at
        );

        let task = self.queue.get_task(&callback.task_id).await?;

        self.queue
            .update_task_status(
                &callback.task_id,
                callback.status,
                callback.result.clone(),
                callback.error.clone().filter(|e| !e.is_empty()),
            )
            .await?;
        self.queue.notify_task_update(&callback.task_id).await?;

        if callback.status == TaskStatus::Failed {
            warn!(
                "task {} reported failed: {}",
                callback.task_id,
                callback.error.as_deref().unwrap_or("unknown error")
            );
            return Ok(());
        }

        let Some(handler) = self.handlers.resolve(callback.task_type) else {
            warn!("no handler for callback type {}", callback.task_type);
            return Ok(());
        };

        // The status update above stands even when the handler errors.
        handler.handle(&task, callback.result.as_ref()).await?;
        Ok(())
    }
}

/// Handler that chains the next pipeline stage on success.
struct ChainHandler {
    queue: Arc<dyn TaskQueue>,
    next: TaskType,
}

#[async_trait]
impl TaskHandler for ChainHandler {
    async fn handle(
        &self,
        task: &Task,
        _result: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        let next_id = self
            .queue
            .enqueue(self.next, &task.document_id, task.payload.clone())
            .await?;
        debug!(
            "chained {} task {} after {} for document {}",
            self.next, next_id, task.task_type, task.document_id
        );
        Ok(None)
    }
}

/// Terminal handler of the default chain.
struct FinalizeHandler;

#[async_trait]
impl TaskHandler for FinalizeHandler {
    async fn handle(
        &self,
        task: &Task,
        _result: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>> {
        info!("pipeline for document {} finished", task.document_id);
        Ok(None)
    }
}

/// Wire the convenience chain: parse success enqueues chunking, chunking
/// enqueues vectorization, vectorization finalises. Callers override any
/// of these by registering their own handlers afterwards.
pub fn register_default_chain(handlers: &HandlerRegistry, queue: Arc<dyn TaskQueue>) {
    handlers.register(
        TaskType::DocumentParse,
        Arc::new(ChainHandler {
            queue: Arc::clone(&queue),
            next: TaskType::TextChunk,
        }),
    );
    handlers.register(
        TaskType::TextChunk,
        Arc::new(ChainHandler {
            queue,
            next: TaskType::Vectorize,
        }),
    );
    handlers.register(TaskType::Vectorize, Arc::new(FinalizeHandler));
}
