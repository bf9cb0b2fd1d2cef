use fanout_client::TransportConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Where a task's capability runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationMode {
    /// A fresh child process per task; crashes and kills are contained
    Process,
    /// A blocking thread inside the worker; cannot be killed on timeout
    Thread,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub transport: TransportConfig,
    pub worker_id: Option<String>,
    /// How long one `get_task` call may wait on the coordinator
    pub get_task_timeout_secs: f64,
    /// Cap on coordinator-requested backoff
    pub max_backoff_secs: f64,
    /// Supervision tick while a task runs
    pub poll_interval_ms: u64,
    /// How often a running task's state is checked on the coordinator
    pub state_check_interval_secs: f64,
    /// Time between SIGTERM and SIGKILL when stopping a child
    pub kill_grace_ms: u64,
    pub isolation: IsolationMode,
    /// Child executable; defaults to the running binary
    pub child_program: Option<PathBuf>,
    /// Entries kept by the `io.file_len` cache
    pub file_cache_entries: usize,
    pub log_level: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            transport: TransportConfig::default(),
            worker_id: None,
            get_task_timeout_secs: 30.0,
            max_backoff_secs: 30.0,
            poll_interval_ms: 100,
            state_check_interval_secs: 10.0,
            kill_grace_ms: 500,
            isolation: IsolationMode::Process,
            child_program: None,
            file_cache_entries: 256,
            log_level: "info".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn new(address: impl Into<String>) -> Self {
        WorkerConfig {
            transport: TransportConfig::new(address),
            ..Default::default()
        }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: WorkerConfig = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    pub fn generate_worker_id(&self) -> String {
        if let Some(id) = &self.worker_id {
            return id.clone();
        }

        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        let suffix = uuid::Uuid::new_v4().simple().to_string();

        format!("{}-{}-{}", hostname, std::process::id(), &suffix[..8])
    }

    pub fn max_backoff(&self) -> Duration {
        secs(self.max_backoff_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn state_check_interval(&self) -> Duration {
        secs(self.state_check_interval_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.isolation, IsolationMode::Process);
        assert_eq!(config.max_backoff(), Duration::from_secs(30));
        assert_eq!(config.state_check_interval(), Duration::from_secs(10));
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_from_yaml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "transport:\n  address: coord:6000\nisolation: thread\nmax_backoff_secs: 2.5\nworker_id: w-1"
        )
        .unwrap();
        let config = WorkerConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.transport.address, "coord:6000");
        assert_eq!(config.isolation, IsolationMode::Thread);
        assert_eq!(config.max_backoff(), Duration::from_millis(2500));
        assert_eq!(config.generate_worker_id(), "w-1");
        assert_eq!(config.get_task_timeout_secs, 30.0);
    }

    #[test]
    fn test_generated_worker_id_carries_pid() {
        let id = WorkerConfig::default().generate_worker_id();
        assert!(id.contains(&std::process::id().to_string()));
    }

    #[test]
    fn test_negative_durations_clamp_to_zero() {
        let config = WorkerConfig {
            max_backoff_secs: -1.0,
            ..Default::default()
        };
        assert_eq!(config.max_backoff(), Duration::ZERO);
    }
}
