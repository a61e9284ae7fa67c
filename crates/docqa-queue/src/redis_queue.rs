//! Redis-backed task queue.
//!
//! Records are keyed `task:<uuid>` with a 7-day TTL, the per-document index
//! lives in `document_tasks:<docID>` sets, work streams are priority lists,
//! scheduled jobs sit in a sorted set until due, and notifications go out on
//! `task_status:<uuid>` pub/sub channels.

use crate::queue::{weighted_order, EnqueueOptions, QueuePriority, TaskQueue, TASK_TTL};
use async_trait::async_trait;
use chrono::Utc;
use docqa_core::error::{DocQaError, Result};
use docqa_core::types::{Task, TaskStatus, TaskType};
use futures::StreamExt;
use redis::AsyncCommands;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const DEFAULT_MAX_RETRIES: u32 = 3;
const SCHEDULED_KEY: &str = "queue:scheduled";
const PRIORITY_HASH_KEY: &str = "task_priority";

fn task_key(id: &str) -> String {
    format!("task:{}", id)
}

fn doc_key(document_id: &str) -> String {
    format!("document_tasks:{}", document_id)
}

fn channel_key(id: &str) -> String {
    format!("task_status:{}", id)
}

fn queue_key(priority: QueuePriority) -> String {
    format!("queue:{}", priority.as_str())
}

/// Redis implementation of [`TaskQueue`].
pub struct RedisTaskQueue {
    client: redis::Client,
    conn: redis::aio::ConnectionManager,
    cursor: AtomicUsize,
    default_max_retries: u32,
}

impl RedisTaskQueue {
    /// Connect to Redis using the queue section of the configuration.
    pub async fn connect(addr: &str, password: &str, db: i64) -> Result<Self> {
        let url = if password.is_empty() {
            format!("redis://{}/{}", addr, db)
        } else {
            format!("redis://:{}@{}/{}", password, addr, db)
        };
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        debug!("connected redis task queue at {}", addr);
        Ok(Self {
            client,
            conn,
            cursor: AtomicUsize::new(0),
            default_max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Override the retry budget applied when enqueue options leave it
    /// unset.
    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    async fn save_task(&self, task: &Task) -> Result<()> {
        let mut conn = self.conn.clone();
        let body = serde_json::to_string(task)?;
        let _: () = conn.set_ex(task_key(&task.id), body, TASK_TTL.as_secs()).await?;
        Ok(())
    }

    async fn load_task(&self, id: &str) -> Result<Task> {
        let mut conn = self.conn.clone();
        let body: Option<String> = conn.get(task_key(id)).await?;
        match body {
            Some(body) => Ok(serde_json::from_str(&body)?),
            None => Err(DocQaError::not_found("task", id)),
        }
    }

    async fn priority_of(&self, id: &str) -> QueuePriority {
        let mut conn = self.conn.clone();
        let stored: Option<String> = conn.hget(PRIORITY_HASH_KEY, id).await.ok().flatten();
        stored
            .as_deref()
            .and_then(QueuePriority::parse)
            .unwrap_or_default()
    }

    async fn push(&self, priority: QueuePriority, id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.lpush(queue_key(priority), id).await?;
        Ok(())
    }

    /// Move due scheduled jobs onto their work streams.
    async fn drain_scheduled(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let now = Utc::now().timestamp_millis() as f64;
        let due: Vec<String> = conn
            .zrangebyscore_limit(SCHEDULED_KEY, f64::MIN, now, 0, 64)
            .await?;

        for member in due {
            let removed: i64 = conn.zrem(SCHEDULED_KEY, &member).await?;
            if removed == 0 {
                // Another worker claimed it first.
                continue;
            }
            let (priority, id) = member
                .split_once('|')
                .map(|(p, id)| (QueuePriority::parse(p).unwrap_or_default(), id))
                .unwrap_or((QueuePriority::Default, member.as_str()));
            self.push(priority, id).await?;
        }
        Ok(())
    }

    fn publish_best_effort(&self, id: &str, payload: String) {
        // Publish failures are logged and swallowed; waiters fall back to
        // their 1s poll.
        let mut conn = self.conn.clone();
        let channel = channel_key(id);
        tokio::spawn(async move {
            let result: redis::RedisResult<i64> = conn.publish(channel, payload).await;
            if let Err(e) = result {
                warn!("task status publish failed: {}", e);
            }
        });
    }
}

#[async_trait]
impl TaskQueue for RedisTaskQueue {
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

        self.save_task(&task).await?;

        let mut conn = self.conn.clone();
        let _: () = conn.sadd(doc_key(document_id), &id).await?;
        let _: () = conn
            .expire(doc_key(document_id), TASK_TTL.as_secs() as i64)
            .await?;
        let _: () = conn.hset(PRIORITY_HASH_KEY, &id, opts.priority.as_str()).await?;

        let process_at = match (opts.process_at, opts.delay) {
            (Some(at), _) => Some(at),
            (None, Some(delay)) => {
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default())
            }
            (None, None) => None,
        };

        match process_at {
            Some(at) if at > Utc::now() => {
                let member = format!("{}|{}", opts.priority.as_str(), id);
                let _: () = conn
                    .zadd(SCHEDULED_KEY, member, at.timestamp_millis() as f64)
                    .await?;
            }
            _ => self.push(opts.priority, &id).await?,
        }

        debug!("enqueued {} task {} for document {}", task_type, id, document_id);
        Ok(id)
    }

    async fn get_task(&self, id: &str) -> Result<Task> {
        self.load_task(id).await
    }

    async fn get_tasks_by_document(&self, document_id: &str) -> Result<Vec<Task>> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn.smembers(doc_key(document_id)).await?;

        let mut tasks = Vec::with_capacity(ids.len());
        for id in ids {
            match self.load_task(&id).await {
                Ok(task) => tasks.push(task),
                // Expired records are skipped silently.
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(tasks)
    }

    async fn update_task_status(
        &self,
        id: &str,
        status: TaskStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> Result<()> {
        let mut task = self.load_task(id).await?;
        let now = Utc::now();

        task.status = status;
        task.updated_at = now;
        if status == TaskStatus::Processing && task.started_at.is_none() {
            task.started_at = Some(now);
        }
        if status.is_terminal() && task.completed_at.is_none() {
            task.completed_at = Some(now);
        }
        if let Some(result) = result {
            task.result = Some(result);
        }
        if let Some(error) = error {
            task.error = Some(error);
        }

        self.save_task(&task).await?;
        self.publish_best_effort(id, serde_json::to_string(&task)?);
        Ok(())
    }

    async fn notify_task_update(&self, id: &str) -> Result<()> {
        match self.load_task(id).await {
            Ok(task) => self.publish_best_effort(id, serde_json::to_string(&task)?),
            Err(_) => debug!("notify for unknown task {}", id),
        }
        Ok(())
    }

    async fn wait_for_task(&self, id: &str, timeout: Duration) -> Result<Task> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel_key(id)).await?;

        let task = self.load_task(id).await?;
        if task.status.is_terminal() {
            return Ok(task);
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let mut stream = pubsub.on_message();
        loop {
            tokio::select! {
                message = stream.next() => {
                    if let Some(message) = message {
                        let payload: String = message.get_payload().unwrap_or_default();
                        if let Ok(task) = serde_json::from_str::<Task>(&payload) {
                            if task.status.is_terminal() {
                                return Ok(task);
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(Duration::from_secs(1)) => {
                    match self.load_task(id).await {
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
        let task = self.load_task(id).await?;

        let mut conn = self.conn.clone();
        let _: i64 = conn.del(task_key(id)).await?;
        let _: () = conn.srem(doc_key(&task.document_id), id).await?;
        let _: () = conn.hdel(PRIORITY_HASH_KEY, id).await?;

        // Best-effort stream cleanup; in-flight jobs are left alone.
        for priority in QueuePriority::ALL {
            let removed: redis::RedisResult<i64> = conn.lrem(queue_key(priority), 0, id).await;
            if let Err(e) = removed {
                warn!("stream cleanup for task {} failed: {}", id, e);
            }
            let member = format!("{}|{}", priority.as_str(), id);
            let _: redis::RedisResult<i64> = conn.zrem(SCHEDULED_KEY, member).await;
        }

        debug!("deleted task {}", id);
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<Task>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            self.drain_scheduled().await?;

            let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
            let mut conn = self.conn.clone();
            for priority in weighted_order(cursor) {
                let id: Option<String> = conn.rpop(queue_key(priority), None).await?;
                if let Some(id) = id {
                    match self.load_task(&id).await {
                        Ok(task) => return Ok(Some(task)),
                        // Record expired while queued; drop the stale job.
                        Err(e) if e.is_not_found() => continue,
                        Err(e) => return Err(e),
                    }
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    async fn redeliver(&self, id: &str, delay: Duration) -> Result<()> {
        // Verify the record still exists before rescheduling.
        let _ = self.load_task(id).await?;
        let priority = self.priority_of(id).await;

        if delay.is_zero() {
            self.push(priority, id).await
        } else {
            let mut conn = self.conn.clone();
            let member = format!("{}|{}", priority.as_str(), id);
            let due = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default();
            let _: () = conn
                .zadd(SCHEDULED_KEY, member, due.timestamp_millis() as f64)
                .await?;
            Ok(())
        }
    }

    async fn record_attempt(&self, id: &str) -> Result<u32> {
        let mut task = self.load_task(id).await?;
        task.attempts += 1;
        task.updated_at = Utc::now();
        self.save_task(&task).await?;
        Ok(task.attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(task_key("abc"), "task:abc");
        assert_eq!(doc_key("d1"), "document_tasks:d1");
        assert_eq!(channel_key("abc"), "task_status:abc");
        assert_eq!(queue_key(QueuePriority::Critical), "queue:critical");
    }

    // Round-trip coverage against a live server; run with a local Redis:
    // `cargo test -p docqa-queue -- --ignored`
    #[tokio::test]
    #[ignore]
    async fn test_live_enqueue_round_trip() {
        let queue = RedisTaskQueue::connect("127.0.0.1:6379", "", 15).await.unwrap();
        let id = queue
            .enqueue(TaskType::Vectorize, "doc-live", serde_json::json!({"k": 1}))
            .await
            .unwrap();

        let task = queue.get_task(&id).await.unwrap();
        assert_eq!(task.document_id, "doc-live");

        queue
            .update_task_status(&id, TaskStatus::Completed, None, None)
            .await
            .unwrap();
        let task = queue.wait_for_task(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);

        queue.delete_task(&id).await.unwrap();
        assert!(queue.get_task(&id).await.unwrap_err().is_not_found());
    }
}
