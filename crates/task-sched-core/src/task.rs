use serde::{Deserialize, Serialize};

/// Stable identity assigned to a worker connection at handshake time.
///
/// Drawn from a monotonically increasing counter on the master, never from a
/// transport handle: connection ids are recycled, worker ids are not.
pub type WorkerId = u64;

/// Task type name (e.g., "noop", "sleep")
pub type TaskType = String;

/// A unit of work handed to a worker.
///
/// Opaque beyond its type: what a task actually does is decided by the
/// handler registered for the type on the worker side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub task_type: TaskType,
}

impl Task {
    pub fn new(task_type: impl Into<TaskType>) -> Self {
        Task {
            task_type: task_type.into(),
        }
    }
}

/// Outcome of executing a task on a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_creation() {
        let task = Task::new("noop");
        assert_eq!(task.task_type, "noop");
    }
}
