use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use task_sched_core::Task;
use tracing::warn;

/// Pluggable task execution body. The scheduler is agnostic to what a task
/// actually does; only the success flag travels back to the master.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn execute(&self, task: &Task) -> bool;
}

/// Registry of task handlers by task type.
pub struct TaskHandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
}

impl TaskHandlerRegistry {
    pub fn new() -> Self {
        TaskHandlerRegistry {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Register a handler for a task type, replacing any previous one.
    pub fn register<H: TaskHandler + 'static>(&self, task_type: impl Into<String>, handler: H) {
        self.handlers
            .write()
            .insert(task_type.into(), Arc::new(handler));
    }

    pub fn has_handler(&self, task_type: &str) -> bool {
        self.handlers.read().contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        self.handlers.read().keys().cloned().collect()
    }

    /// Execute a task. A type with no registered handler fails.
    pub async fn execute(&self, task: &Task) -> bool {
        let handler = self.handlers.read().get(&task.task_type).cloned();
        match handler {
            Some(handler) => handler.execute(task).await,
            None => {
                warn!(task_type = %task.task_type, "no handler registered");
                false
            }
        }
    }
}

impl Default for TaskHandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Succeeds without doing anything.
pub struct NoopHandler;

#[async_trait]
impl TaskHandler for NoopHandler {
    async fn execute(&self, _task: &Task) -> bool {
        true
    }
}

/// Simulates work by sleeping.
pub struct SleepHandler {
    duration: Duration,
}

impl SleepHandler {
    pub fn new(duration_ms: u64) -> Self {
        SleepHandler {
            duration: Duration::from_millis(duration_ms),
        }
    }
}

#[async_trait]
impl TaskHandler for SleepHandler {
    async fn execute(&self, _task: &Task) -> bool {
        tokio::time::sleep(self.duration).await;
        true
    }
}

/// Always fails; useful for exercising the failure reporting path.
pub struct FailHandler;

#[async_trait]
impl TaskHandler for FailHandler {
    async fn execute(&self, _task: &Task) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registered_handler_is_executed() {
        let registry = TaskHandlerRegistry::new();
        registry.register("noop", NoopHandler);

        assert!(registry.has_handler("noop"));
        assert!(registry.execute(&Task::new("noop")).await);
    }

    #[tokio::test]
    async fn missing_handler_fails_the_task() {
        let registry = TaskHandlerRegistry::new();
        assert!(!registry.execute(&Task::new("unknown")).await);
    }

    #[tokio::test]
    async fn failing_handler_reports_failure() {
        let registry = TaskHandlerRegistry::new();
        registry.register("flaky", FailHandler);
        assert!(!registry.execute(&Task::new("flaky")).await);
    }

    #[tokio::test]
    async fn register_replaces_previous_handler() {
        let registry = TaskHandlerRegistry::new();
        registry.register("job", FailHandler);
        registry.register("job", NoopHandler);
        assert!(registry.execute(&Task::new("job")).await);
    }
}
