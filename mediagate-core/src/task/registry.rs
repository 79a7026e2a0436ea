//! Task registry
//!
//! Maps stable task keys to runnable entries. The binary registers every
//! task at bootstrap; chains and the API resolve keys through here.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::Result;

use super::queue::{ProcessorKind, TaskContext, TaskQueue};

type RunFn = Arc<dyn Fn(TaskContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
pub struct TaskEntry {
    pub key: String,
    pub display_name: String,
    pub processor: ProcessorKind,
    run: RunFn,
}

impl TaskEntry {
    pub fn run(&self, ctx: TaskContext) -> BoxFuture<'static, Result<()>> {
        (self.run)(ctx)
    }
}

#[derive(Clone, Default)]
pub struct TaskRegistry {
    entries: HashMap<String, TaskEntry>,
}

impl TaskRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(
        &mut self,
        key: &str,
        display_name: &str,
        processor: ProcessorKind,
        run: F,
    ) where
        F: Fn(TaskContext) -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        self.entries.insert(
            key.to_string(),
            TaskEntry {
                key: key.to_string(),
                display_name: display_name.to_string(),
                processor,
                run: Arc::new(run),
            },
        );
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&TaskEntry> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// Resolve a key and enqueue it; returns false for unknown keys.
    pub fn submit(&self, queue: &TaskQueue, key: &str) -> bool {
        let Some(entry) = self.get(key) else {
            tracing::error!(key, "unknown task key");
            return false;
        };
        let entry = entry.clone();
        queue.submit(
            entry.display_name.clone(),
            entry.processor,
            move |ctx| entry.run(ctx),
        );
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_lookup() {
        let mut registry = TaskRegistry::new();
        registry.register("noop", "空任务", ProcessorKind::Media, |_ctx| {
            Box::pin(async { Ok(()) })
        });
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.keys(), vec!["noop"]);
    }

    #[tokio::test]
    async fn test_submit_unknown_key_is_rejected() {
        let registry = TaskRegistry::new();
        let queue = TaskQueue::start();
        assert!(!registry.submit(&queue, "missing"));
    }
}
