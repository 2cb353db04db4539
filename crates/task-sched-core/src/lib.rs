mod queue;
mod task;

pub use queue::{BlockingQueue, LockFreeQueue, MutexQueue};
pub use task::{Task, TaskResult, TaskType, WorkerId};
