use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MasterConfig {
    pub network: NetworkConfig,
    pub liveness: LivenessConfig,
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessConfig {
    /// A worker whose last heartbeat is older than this is considered dead.
    pub heartbeat_expiration_ms: u64,
    /// How often the heartbeat monitor scans the table.
    pub monitor_poll_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Back the distributor's pools with the lock-free queue implementation
    /// instead of the mutex-based one.
    pub lock_free_queues: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        MasterConfig {
            network: NetworkConfig {
                host: "0.0.0.0".to_string(),
                port: 8999,
            },
            liveness: LivenessConfig {
                heartbeat_expiration_ms: 5000,
                monitor_poll_ms: 1000,
            },
            scheduler: SchedulerConfig {
                lock_free_queues: false,
            },
        }
    }
}

impl MasterConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: MasterConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
