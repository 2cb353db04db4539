use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub master_address: String,
    /// Interval between liveness signals.
    pub heartbeat_interval_ms: u64,
    /// Consecutive heartbeat send failures tolerated before the connection
    /// is torn down. 0 disconnects on the first failure.
    pub heartbeat_failure_tolerance: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            master_address: "127.0.0.1:8999".to_string(),
            heartbeat_interval_ms: 1000,
            heartbeat_failure_tolerance: 0,
        }
    }
}

impl WorkerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
