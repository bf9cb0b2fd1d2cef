use crate::{Result, TaskError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
pub type TaskId = Uuid;

/// Identifier of the project (one Runner batch) a task belongs to
pub type ProjectId = Uuid;

/// Keyword arguments of a remote call
pub type Kwargs = BTreeMap<String, Value>;

pub const DEFAULT_MAX_TRIES: u32 = 3;
pub const DEFAULT_MAX_TIME_SECS: i64 = 3600;

/// Upper bound on `max_time`; keeps deadline arithmetic far away from overflow.
pub const MAX_TIME_CEILING_SECS: i64 = 30 * 24 * 3600;

/// Wall-clock telemetry recorded by the coordinator.
///
/// These are informational only; scheduling decisions use the coordinator's
/// monotonic clock.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskTiming {
    /// When the coordinator accepted the submission
    pub submitted_at: Option<DateTime<Utc>>,
    /// Most recent dispatch to a worker
    pub dispatched_at: Option<DateTime<Utc>>,
    /// When the task landed in its project's done queue
    pub finished_at: Option<DateTime<Utc>>,
    /// When the owning runner drained it from the done queue
    pub collected_at: Option<DateTime<Utc>>,
}

impl TaskTiming {
    /// Time spent waiting in the todo queue before the latest dispatch
    pub fn queued_for(&self) -> Option<chrono::Duration> {
        Some(self.dispatched_at? - self.submitted_at?)
    }

    /// Time between the latest dispatch and completion
    pub fn computed_for(&self) -> Option<chrono::Duration> {
        Some(self.finished_at? - self.dispatched_at?)
    }

    /// Time the finished task waited for its owner to pick it up
    pub fn waited_for_pickup(&self) -> Option<chrono::Duration> {
        Some(self.collected_at? - self.finished_at?)
    }
}

/// One remote call together with its retry/timeout policy and eventual result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub task_id: TaskId,

    /// Project that submitted the task and receives its result
    pub project_id: ProjectId,

    /// Dotted capability name (e.g. "demo.add")
    pub method: String,

    /// Positional arguments
    pub args: Vec<Value>,

    /// Keyword arguments
    pub kwargs: Kwargs,

    /// Attempt budget on the coordinator
    pub max_tries: u32,

    /// Attempts dispatched so far
    pub tries: u32,

    /// Seconds allotted to a single attempt
    pub max_time: i64,

    /// Whether two copies of this task may run at once
    pub allow_resubmit: bool,

    /// Reserved; accepted and carried but never acted upon by the scheduler
    pub burst: u32,

    /// True once the task failed (result holds the message)
    pub error: bool,

    /// Return value on success, error message on failure
    pub result: Option<Value>,

    #[serde(default)]
    pub timing: TaskTiming,
}

impl Task {
    /// Create a task with default policy and no arguments
    pub fn new(project_id: ProjectId, method: impl Into<String>) -> Self {
        Task {
            task_id: Uuid::new_v4(),
            project_id,
            method: method.into(),
            args: Vec::new(),
            kwargs: Kwargs::new(),
            max_tries: DEFAULT_MAX_TRIES,
            tries: 0,
            max_time: DEFAULT_MAX_TIME_SECS,
            allow_resubmit: true,
            burst: 0,
            error: false,
            result: None,
            timing: TaskTiming::default(),
        }
    }

    /// Create a new task builder
    pub fn builder(project_id: ProjectId, method: impl Into<String>) -> TaskBuilder {
        TaskBuilder::new(project_id, method)
    }

    /// Check the fields the coordinator relies on
    pub fn validate(&self) -> Result<()> {
        if self.method.is_empty() {
            return Err(TaskError::EmptyMethod);
        }
        if self.max_time < 0 {
            return Err(TaskError::InvalidMaxTime(self.max_time));
        }
        if self.max_time > MAX_TIME_CEILING_SECS {
            return Err(TaskError::MaxTimeTooLarge {
                max: MAX_TIME_CEILING_SECS,
                actual: self.max_time,
            });
        }
        Ok(())
    }

    /// Per-attempt time allowance
    pub fn max_time(&self) -> Duration {
        Duration::from_secs(self.max_time.clamp(0, MAX_TIME_CEILING_SECS) as u64)
    }

    /// Attempt budget; a budget of zero still allows one attempt
    pub fn attempt_budget(&self) -> u32 {
        self.max_tries.max(1)
    }

    /// Check if another attempt may be dispatched after the current one
    pub fn has_tries_left(&self) -> bool {
        self.tries < self.attempt_budget()
    }

    /// Mark task as failed; only the latest message is kept
    pub fn fail(&mut self, message: impl Into<String>) {
        self.error = true;
        self.result = Some(Value::String(message.into()));
    }

    /// Mark task as completed successfully
    pub fn succeed(&mut self, result: Value) {
        self.error = false;
        self.result = Some(result);
    }

    /// Error message of a failed task
    pub fn error_message(&self) -> Option<String> {
        if !self.error {
            return None;
        }
        match &self.result {
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
            None => Some("unknown error".to_string()),
        }
    }

    /// Copy of this task for a fresh submission.
    ///
    /// A retired id is never put back in flight, so the copy gets a new id and
    /// a clean attempt history.
    pub fn resubmission(&self) -> Task {
        Task {
            task_id: Uuid::new_v4(),
            tries: 0,
            error: false,
            result: None,
            timing: TaskTiming::default(),
            ..self.clone()
        }
    }

    /// Encode for transport as a dynamic value
    pub fn to_value(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(TaskError::from)
    }

    /// Decode from a dynamic value
    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value).map_err(TaskError::from)
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let project = self.project_id.simple().to_string();
        let task = self.task_id.simple().to_string();
        write!(
            f,
            "Task(project={}, task={}, method={}, tries={}/{}, error={})",
            &project[..8],
            &task[..8],
            self.method,
            self.tries,
            self.max_tries,
            self.error
        )
    }
}

/// Builder for creating tasks with custom configuration
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new(project_id: ProjectId, method: impl Into<String>) -> Self {
        TaskBuilder {
            task: Task::new(project_id, method),
        }
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.task.args.push(value.into());
        self
    }

    pub fn args(mut self, args: Vec<Value>) -> Self {
        self.task.args = args;
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.task.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn kwargs(mut self, kwargs: Kwargs) -> Self {
        self.task.kwargs = kwargs;
        self
    }

    pub fn max_tries(mut self, max_tries: u32) -> Self {
        self.task.max_tries = max_tries;
        self
    }

    pub fn max_time(mut self, seconds: i64) -> Self {
        self.task.max_time = seconds;
        self
    }

    pub fn allow_resubmit(mut self, allow: bool) -> Self {
        self.task.allow_resubmit = allow;
        self
    }

    pub fn burst(mut self, burst: u32) -> Self {
        self.task.burst = burst;
        self
    }

    pub fn build(self) -> Result<Task> {
        self.task.validate()?;
        Ok(self.task)
    }
}
