//! Values exchanged with the queue service.

use crate::Task;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Answer to a worker's `get_task` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// A task to execute now
    Task(Task),

    /// The next queued entry becomes eligible after this many seconds
    Backoff { secs: f64 },

    /// Nothing was queued before the timeout elapsed
    Idle,
}

impl Dispatch {
    pub fn backoff(delay: Duration) -> Self {
        Dispatch::Backoff {
            secs: delay.as_secs_f64(),
        }
    }

    /// Requested backoff; malformed or negative delays read as zero
    pub fn backoff_delay(&self) -> Option<Duration> {
        match self {
            Dispatch::Backoff { secs } => Some(Duration::try_from_secs_f64(*secs).unwrap_or_default()),
            _ => None,
        }
    }
}

/// Coordinator diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Open client and worker connections
    pub active_connections: usize,
    /// Entries in the todo queue, stale ones included
    pub waiting: usize,
    /// Live projects
    pub num_projects: usize,
    /// Finished tasks not yet drained by their owners
    pub waiting_for_pickup: usize,
    /// Tasks tracked as in flight
    pub num_running: usize,
}
