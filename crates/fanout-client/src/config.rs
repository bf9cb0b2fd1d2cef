use fanout_core::{DEFAULT_MAX_TIME_SECS, DEFAULT_MAX_TRIES};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Connection settings shared by runners and workers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Coordinator address, `host:port`
    pub address: String,
    /// Connection attempts per call before giving up
    pub connect_attempts: u32,
    /// Pause between attempts
    pub retry_delay_secs: f64,
    pub keepalive: KeepaliveConfig,
}

/// TCP keepalive probing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepaliveConfig {
    pub enabled: bool,
    /// Idle time before the first probe
    pub idle_secs: u32,
    /// Time between probes
    pub interval_secs: u32,
    /// Unanswered probes before the connection is dropped
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub transport: TransportConfig,
    /// Submissions per task, the first one included
    pub max_attempts: u32,
    /// Pause between `get_results` polls
    pub poll_interval_secs: f64,
    /// Policy stamped on tasks built by `make_task`
    pub task_max_tries: u32,
    pub task_max_time_secs: i64,
    pub log_level: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig {
            address: "127.0.0.1:5011".to_string(),
            connect_attempts: 12,
            retry_delay_secs: 10.0,
            keepalive: KeepaliveConfig::default(),
        }
    }
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        KeepaliveConfig {
            enabled: true,
            idle_secs: 300,
            interval_secs: 30,
            count: 5,
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            transport: TransportConfig::default(),
            max_attempts: 1,
            poll_interval_secs: 1.0,
            task_max_tries: DEFAULT_MAX_TRIES,
            task_max_time_secs: DEFAULT_MAX_TIME_SECS,
            log_level: "info".to_string(),
        }
    }
}

impl TransportConfig {
    pub fn new(address: impl Into<String>) -> Self {
        TransportConfig {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or_default()
    }
}

impl RunnerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        RunnerConfig {
            transport: TransportConfig::new(address),
            ..Default::default()
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: RunnerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.poll_interval_secs).unwrap_or_default()
    }
}
