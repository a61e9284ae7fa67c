//! Durable task queue, worker pool, and callback dispatch.
//!
//! The queue persists task records keyed by task and document, notifies
//! waiters over per-task channels, and delivers work at-least-once to a
//! pool of weighted-priority workers. Two backends implement the contract:
//! an in-process queue for development and tests, and Redis for production.

pub mod dispatcher;
pub mod handler;
pub mod memory;
pub mod queue;
pub mod redis_queue;
pub mod worker;

pub use dispatcher::{register_default_chain, CallbackDispatcher};
pub use handler::{HandlerRegistry, TaskHandler};
pub use memory::MemoryTaskQueue;
pub use queue::{EnqueueOptions, QueuePriority, TaskQueue, TASK_TTL};
pub use redis_queue::RedisTaskQueue;
pub use worker::{start_workers, WorkerConfig, WorkerPool};
