use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub server: NetworkConfig,
    pub queue: QueueConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Period of the timeout monitor
    pub monitor_interval_secs: u64,
    /// `get_task` wait used when the caller passes no timeout
    pub get_task_timeout_secs: f64,
    /// Longest wait a caller may request from `get_task`
    pub max_get_task_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            server: NetworkConfig {
                host: "0.0.0.0".to_string(),
                port: 5011,
            },
            queue: QueueConfig {
                monitor_interval_secs: 30,
                get_task_timeout_secs: 30.0,
                max_get_task_timeout_secs: 300.0,
            },
            monitoring: MonitoringConfig {
                log_level: "info".to_string(),
            },
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl QueueConfig {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs.max(1))
    }

    /// Wait for one `get_task` call, clamped to the configured ceiling
    pub fn get_task_timeout(&self, requested: Option<f64>) -> Duration {
        let secs = requested
            .unwrap_or(self.get_task_timeout_secs)
            .clamp(0.0, self.max_get_task_timeout_secs.max(0.0));
        Duration::try_from_secs_f64(secs).unwrap_or_default()
    }
}
