use crate::capability::CapabilityRegistry;
use crate::child::{ChildOutcome, ChildRequest};
use crate::config::{IsolationMode, WorkerConfig};
use crate::sandbox::{ProcessSandbox, Sandbox, CHILD_FLAG};
use crate::supervise::{LivenessCheck, Supervision, Supervisor};
use crate::Result;
use async_trait::async_trait;
use fanout_client::QueueClient;
use fanout_core::{CallArgs, Dispatch, ProjectId, Task, TaskId};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Reported when a child exits without producing a result
pub const CRASH_MESSAGE: &str = "Worker process crashed";

/// What happened to a task this worker picked up
#[derive(Debug, Clone, PartialEq)]
pub enum Report {
    Succeeded,
    Failed(String),
    /// The coordinator stopped tracking the task; no result was sent
    Abandoned,
}

/// Result of one pass through the worker loop
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Ran { task_id: TaskId, report: Report },
    Backoff(Duration),
    Idle,
}

/// Pulls tasks from the coordinator and runs them one at a time
pub struct QueueWorker {
    config: WorkerConfig,
    worker_id: String,
    registry: Arc<CapabilityRegistry>,
    sandbox: Sandbox,
    supervisor: Supervisor,
    shutdown: Arc<Notify>,
}

impl QueueWorker {
    /// Isolation is taken from the config; process mode re-runs this binary
    /// unless `child_program` is set
    pub fn new(config: WorkerConfig, registry: CapabilityRegistry) -> Result<Self> {
        let registry = Arc::new(registry);
        let sandbox = match config.isolation {
            IsolationMode::Thread => Sandbox::Thread(Arc::clone(&registry)),
            IsolationMode::Process => {
                let sandbox = match &config.child_program {
                    Some(program) => ProcessSandbox::new(program, vec![CHILD_FLAG.to_string()]),
                    None => ProcessSandbox::current_exe()?,
                };
                Sandbox::Process(sandbox.with_kill_grace(config.kill_grace()))
            }
        };
        Ok(Self::with_sandbox(config, registry, sandbox))
    }

    pub fn with_sandbox(config: WorkerConfig, registry: Arc<CapabilityRegistry>, sandbox: Sandbox) -> Self {
        let worker_id = config.generate_worker_id();
        let supervisor = Supervisor::new(config.poll_interval(), config.state_check_interval());

        QueueWorker {
            config,
            worker_id,
            registry,
            sandbox,
            supervisor,
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    pub fn shutdown_handle(&self) -> Arc<Notify> {
        Arc::clone(&self.shutdown)
    }

    /// Stop after the current step; a running task is killed
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Work until shut down or the coordinator becomes unreachable
    pub async fn run(&self) -> Result<()> {
        let mut client = QueueClient::connect(self.config.transport.clone()).await?;
        info!(
            "Worker {} connected to {} ({} capabilities)",
            self.worker_id,
            self.config.transport.address,
            self.registry.len()
        );

        loop {
            let step = tokio::select! {
                _ = self.shutdown.notified() => break,
                step = self.run_once(&mut client) => step?,
            };

            if let Step::Backoff(delay) = step {
                debug!("Worker {} backing off for {:?}", self.worker_id, delay);
                tokio::select! {
                    _ = self.shutdown.notified() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        }

        info!("Worker {} shutting down", self.worker_id);
        Ok(())
    }

    /// Ask for one task and run it if one is handed out
    pub async fn run_once(&self, client: &mut QueueClient) -> Result<Step> {
        let dispatch = client.get_task(self.config.get_task_timeout_secs).await?;
        if let Some(delay) = dispatch.backoff_delay() {
            return Ok(Step::Backoff(delay.min(self.config.max_backoff())));
        }

        match dispatch {
            Dispatch::Task(task) => {
                let task_id = task.task_id;
                let report = self.execute(client, task).await?;
                Ok(Step::Ran { task_id, report })
            }
            _ => Ok(Step::Idle),
        }
    }

    /// Run one dispatched task and report its result
    pub async fn execute(&self, client: &mut QueueClient, task: Task) -> Result<Report> {
        info!("Worker {} running {} [try {}/{}]", self.worker_id, task, task.tries, task.attempt_budget());

        if let Err(e) = self.registry.resolve(&task.method) {
            let message = e.to_string();
            warn!("Task {} rejected: {}", task.task_id, message);
            client.put_result(task.task_id, true, json!(message)).await?;
            return Ok(Report::Failed(message));
        }

        let request = ChildRequest {
            method: task.method.clone(),
            args: CallArgs::new(task.args.clone(), task.kwargs.clone()),
        };
        let mut attempt = match self.sandbox.start(request).await {
            Ok(attempt) => attempt,
            Err(e) => {
                let message = format!("Could not start task: {}", e);
                error!("Task {}: {}", task.task_id, message);
                client.put_result(task.task_id, true, json!(message)).await?;
                return Ok(Report::Failed(message));
            }
        };

        let supervision = {
            let mut liveness = CoordinatorLiveness {
                client: &mut *client,
                project_id: task.project_id,
                task_id: task.task_id,
            };
            self.supervisor
                .watch(&mut attempt, task.max_time(), &mut liveness)
                .await
        };

        let (error, result, report) = match supervision {
            Supervision::Finished(ChildOutcome::Ok(value)) => (false, value, Report::Succeeded),
            Supervision::Finished(ChildOutcome::Err(message)) => {
                debug!("Task {} failed: {}", task.task_id, message);
                (true, json!(message), Report::Failed(message))
            }
            Supervision::Crashed(detail) => {
                warn!("Task {} crashed its child: {}", task.task_id, detail);
                (true, json!(CRASH_MESSAGE), Report::Failed(CRASH_MESSAGE.to_string()))
            }
            Supervision::TimedOut(elapsed) => {
                let message = format!("Killing task for exceeding max_time of {}s", task.max_time);
                warn!("Task {} killed after {:?}", task.task_id, elapsed);
                (true, json!(message), Report::Failed(message))
            }
            Supervision::Abandoned => {
                info!("Task {} no longer tracked; result discarded", task.task_id);
                return Ok(Report::Abandoned);
            }
        };

        client.put_result(task.task_id, error, result).await?;
        Ok(report)
    }
}

struct CoordinatorLiveness<'a> {
    client: &'a mut QueueClient,
    project_id: ProjectId,
    task_id: TaskId,
}

#[async_trait]
impl<'a> LivenessCheck for CoordinatorLiveness<'a> {
    async fn still_wanted(&mut self) -> bool {
        match self.client.get_state(self.project_id, self.task_id).await {
            Ok(wanted) => wanted,
            Err(e) => {
                // Keep running; the result is reported once the coordinator is back.
                warn!("State check for task {} failed: {}", self.task_id, e);
                true
            }
        }
    }
}
