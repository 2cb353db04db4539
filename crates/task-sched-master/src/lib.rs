pub mod config;
pub mod distributor;
pub mod master;
pub mod monitor;
mod registry;

pub use config::MasterConfig;
pub use distributor::{Distributor, WorkerHandle};
pub use master::{Master, MasterError, MasterHandle, MasterStats};
pub use monitor::HeartbeatMonitor;
