pub mod config;
pub mod handler;
pub mod worker;

pub use config::WorkerConfig;
pub use handler::{FailHandler, NoopHandler, SleepHandler, TaskHandler, TaskHandlerRegistry};
pub use worker::{Worker, WorkerError};
