//! Task handler registry shared by the worker pool and the callback
//! dispatcher.

use async_trait::async_trait;
use dashmap::DashMap;
use docqa_core::error::Result;
use docqa_core::types::{Task, TaskType};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Handles one task type.
///
/// Workers invoke handlers with `result = None` (the payload carries the
/// input); the callback dispatcher passes the external processor's result.
/// The returned value becomes the task result.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(
        &self,
        task: &Task,
        result: Option<&serde_json::Value>,
    ) -> Result<Option<serde_json::Value>>;
}

/// Registry of per-type handlers plus an optional default.
///
/// Registering a type twice keeps the second handler.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: DashMap<TaskType, Arc<dyn TaskHandler>>,
    default: RwLock<Option<Arc<dyn TaskHandler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, task_type: TaskType, handler: Arc<dyn TaskHandler>) {
        debug!("registering handler for {}", task_type);
        self.handlers.insert(task_type, handler);
    }

    pub fn register_default(&self, handler: Arc<dyn TaskHandler>) {
        *self.default.write() = Some(handler);
    }

    /// Look up the handler for a type, falling back to the default.
    pub fn resolve(&self, task_type: TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers
            .get(&task_type)
            .map(|entry| entry.value().clone())
            .or_else(|| self.default.read().clone())
    }

    pub fn is_registered(&self, task_type: TaskType) -> bool {
        self.handlers.contains_key(&task_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(&'static str);

    #[async_trait]
    impl TaskHandler for Tagged {
        async fn handle(
            &self,
            _task: &Task,
            _result: Option<&serde_json::Value>,
        ) -> Result<Option<serde_json::Value>> {
            Ok(Some(serde_json::json!({ "tag": self.0 })))
        }
    }

    async fn invoke(handler: Arc<dyn TaskHandler>) -> String {
        let task = Task::new(TaskType::Vectorize, "d", serde_json::Value::Null, 0);
        handler.handle(&task, None).await.unwrap().unwrap()["tag"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_reregistration_keeps_second() {
        let registry = HandlerRegistry::new();
        registry.register(TaskType::Vectorize, Arc::new(Tagged("first")));
        registry.register(TaskType::Vectorize, Arc::new(Tagged("second")));

        let handler = registry.resolve(TaskType::Vectorize).unwrap();
        assert_eq!(invoke(handler).await, "second");
    }

    #[tokio::test]
    async fn test_default_fallback() {
        let registry = HandlerRegistry::new();
        assert!(registry.resolve(TaskType::TextChunk).is_none());

        registry.register_default(Arc::new(Tagged("fallback")));
        let handler = registry.resolve(TaskType::TextChunk).unwrap();
        assert_eq!(invoke(handler).await, "fallback");
    }
}
