//! The durable task queue contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use docqa_core::error::Result;
use docqa_core::types::{Task, TaskStatus, TaskType};
use std::time::Duration;

/// Task records and document sets expire this long after their last update.
/// Storage hygiene, not retention policy; callers needing longer durability
/// copy to the document repository.
pub const TASK_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Work stream a task is delivered on. Workers drain streams in weighted
/// priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QueuePriority {
    Critical,
    #[default]
    Default,
    Low,
}

impl QueuePriority {
    pub const ALL: [QueuePriority; 3] = [Self::Critical, Self::Default, Self::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Default => "default",
            Self::Low => "low",
        }
    }

    /// Relative pull weight (critical:6, default:3, low:1).
    pub fn weight(&self) -> usize {
        match self {
            Self::Critical => 6,
            Self::Default => 3,
            Self::Low => 1,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "critical" => Some(Self::Critical),
            "default" => Some(Self::Default),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Explicit options for enqueueing; unset fields use the defaults.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    pub priority: QueuePriority,
    /// Absolute visibility time
    pub process_at: Option<DateTime<Utc>>,
    /// Relative visibility delay
    pub delay: Option<Duration>,
    /// Maximum redeliveries after retryable failures
    pub max_retries: Option<u32>,
}

/// Durable, at-least-once task queue keyed by task and document.
///
/// No cross-task ordering is guaranteed; callers chain stages by enqueueing
/// the next stage from within the current stage's callback.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Persist a pending task, index it under its document, and publish it
    /// onto the work stream. Returns the generated task id.
    async fn enqueue_with(
        &self,
        task_type: TaskType,
        document_id: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<String>;

    /// Enqueue with default options.
    async fn enqueue(
        &self,
        task_type: TaskType,
        document_id: &str,
        payload: serde_json::Value,
    ) -> Result<String> {
        self.enqueue_with(task_type, document_id, payload, EnqueueOptions::default())
            .await
    }

    /// Schedule a task to become visible at an absolute time.
    async fn enqueue_at(
        &self,
        task_type: TaskType,
        document_id: &str,
        payload: serde_json::Value,
        process_at: DateTime<Utc>,
    ) -> Result<String> {
        self.enqueue_with(
            task_type,
            document_id,
            payload,
            EnqueueOptions {
                process_at: Some(process_at),
                ..Default::default()
            },
        )
        .await
    }

    /// Schedule a task to become visible after a delay.
    async fn enqueue_in(
        &self,
        task_type: TaskType,
        document_id: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<String> {
        self.enqueue_with(
            task_type,
            document_id,
            payload,
            EnqueueOptions {
                delay: Some(delay),
                ..Default::default()
            },
        )
        .await
    }

    /// Load the persisted record.
    async fn get_task(&self, id: &str) -> Result<Task>;

    /// Load every task referenced by the document's set, silently skipping
    /// expired records.
    async fn get_tasks_by_document(&self, document_id: &str) -> Result<Vec<Task>>;

    /// Mutate a task's status, stamping `started_at` on the first
    /// Processing transition and `completed_at` on terminal transitions,
    /// then publish a notification on `task_status:<id>`.
    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()>;

    /// Publish a bare notification for a task. Idempotent.
    async fn notify_task_update(&self, id: &str) -> Result<()>;

    /// Block until the task reaches a terminal state.
    ///
    /// Subscribes to `task_status:<id>` and additionally polls every second
    /// as a safety net against lost publishes. Fails with `Timeout` when the
    /// deadline elapses and `NotFound` if the record is evicted mid-wait.
    async fn wait_for_task(&self, id: &str, timeout: Duration) -> Result<Task>;

    /// Remove the record, its document-set membership, and best-effort the
    /// job from the work stream. Fails with `NotFound` for missing records.
    async fn delete_task(&self, id: &str) -> Result<()>;

    /// Pull the next visible task, waiting up to `timeout`. Used by the
    /// worker pool.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>>;

    /// Put an existing task back on its work stream after a delay. Used by
    /// the worker pool for retryable failures.
    async fn redeliver(&self, id: &str, delay: Duration) -> Result<()>;

    /// Increment and return the task's attempt counter.
    async fn record_attempt(&self, id: &str) -> Result<u32>;
}

/// Weighted round-robin order over the priority streams.
///
/// `cursor` advances once per pull so that over ten pulls the streams are
/// visited critical:6, default:3, low:1; within one pull the remaining
/// streams are fallbacks in priority order.
pub(crate) fn weighted_order(cursor: usize) -> [QueuePriority; 3] {
    let slot = cursor % 10;
    let first = if slot < QueuePriority::Critical.weight() {
        QueuePriority::Critical
    } else if slot < QueuePriority::Critical.weight() + QueuePriority::Default.weight() {
        QueuePriority::Default
    } else {
        QueuePriority::Low
    };
    match first {
        QueuePriority::Critical => [QueuePriority::Critical, QueuePriority::Default, QueuePriority::Low],
        QueuePriority::Default => [QueuePriority::Default, QueuePriority::Critical, QueuePriority::Low],
        QueuePriority::Low => [QueuePriority::Low, QueuePriority::Critical, QueuePriority::Default],
    }
}
