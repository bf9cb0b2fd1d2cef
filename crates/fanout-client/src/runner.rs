use crate::config::{RunnerConfig, TransportConfig};
use crate::queue_client::QueueClient;
use crate::{ClientError, Result};
use fanout_core::{Kwargs, ProjectId, Task, TaskId, Value};
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Client-side façade scoping a batch of tasks to one project.
///
/// Results are collected by polling `get_results`. A task whose result comes
/// back as an error is resubmitted under a fresh id until `max_attempts`
/// submissions have been spent; the caller always sees its own `task_id`.
pub struct Runner {
    client: QueueClient,
    project_id: ProjectId,
    config: RunnerConfig,
    closed: bool,
}

impl Runner {
    /// Connect and register a fresh project
    pub async fn new(config: RunnerConfig) -> Result<Self> {
        let mut client = QueueClient::connect(config.transport.clone()).await?;
        let project_id = Uuid::new_v4();
        client.new_project(project_id).await?;
        info!("Runner started project {}", project_id);

        Ok(Runner {
            client,
            project_id,
            config,
            closed: false,
        })
    }

    pub fn project_id(&self) -> ProjectId {
        self.project_id
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Build a task bound to this runner's project
    pub fn make_task(&self, method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Result<Task> {
        let task = Task::builder(self.project_id, method)
            .args(args)
            .kwargs(kwargs)
            .max_tries(self.config.task_max_tries)
            .max_time(self.config.task_max_time_secs)
            .build()?;
        Ok(task)
    }

    /// Run one task to completion
    pub async fn run_single(&mut self, task: Task) -> Result<Task> {
        let task_id = task.task_id;
        let mut batch = self.run_batch(vec![task]).await?;
        match batch.next().await {
            Some(result) => result,
            None => Err(ClientError::UnexpectedResponse(format!(
                "no result collected for task {}",
                task_id
            ))),
        }
    }

    /// Submit every task at once; results are pulled from the returned batch
    /// in completion order
    pub async fn run_batch(&mut self, tasks: Vec<Task>) -> Result<BatchRun<'_>> {
        let mut pending = HashMap::with_capacity(tasks.len());
        let mut submitted = Vec::with_capacity(tasks.len());

        for mut task in tasks {
            task.project_id = self.project_id;
            pending.insert(
                task.task_id,
                Pending {
                    original_id: task.task_id,
                    attempts: 1,
                    task: task.clone(),
                },
            );
            submitted.push(task);
        }
        self.client.put_tasks(&submitted).await?;
        debug!("Submitted {} tasks to project {}", submitted.len(), self.project_id);

        Ok(BatchRun {
            runner: self,
            pending,
            ready: VecDeque::new(),
        })
    }

    /// Delete the project on the coordinator; later calls are no-ops
    pub async fn close(&mut self) -> Result<bool> {
        if self.closed {
            return Ok(false);
        }
        self.closed = true;
        let existed = self.client.del_project(self.project_id).await?;
        info!("Runner closed project {}", self.project_id);
        Ok(existed)
    }
}

impl Drop for Runner {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("Runner for project {} dropped outside a runtime; project left open", self.project_id);
            return;
        };

        // Detached best effort over a fresh single-attempt connection.
        let project_id = self.project_id;
        let config = TransportConfig {
            connect_attempts: 1,
            ..self.config.transport.clone()
        };
        handle.spawn(async move {
            let outcome = async {
                let mut client = QueueClient::connect(config).await?;
                client.del_project(project_id).await
            }
            .await;
            if let Err(e) = outcome {
                debug!("Could not delete project {} on drop: {}", project_id, e);
            }
        });
    }
}

struct Pending {
    original_id: TaskId,
    attempts: u32,
    task: Task,
}

/// Results of one `run_batch` call, pulled with `next`
pub struct BatchRun<'a> {
    runner: &'a mut Runner,
    pending: HashMap<TaskId, Pending>,
    ready: VecDeque<Task>,
}

impl BatchRun<'_> {
    /// Tasks not yet yielded
    pub fn remaining(&self) -> usize {
        self.pending.len() + self.ready.len()
    }

    /// Next finished task, `None` once every task has been yielded.
    ///
    /// An `ExhaustedRetries` error aborts the batch: nothing further is yielded.
    pub async fn next(&mut self) -> Option<Result<Task>> {
        loop {
            if let Some(task) = self.ready.pop_front() {
                return Some(Ok(task));
            }
            if self.pending.is_empty() {
                return None;
            }

            let project_id = self.runner.project_id;
            let results = match self.runner.client.get_results(project_id).await {
                Ok(results) => results,
                Err(e) => return Some(Err(e)),
            };
            if results.is_empty() {
                tokio::time::sleep(self.runner.config.poll_interval()).await;
                continue;
            }

            for task in results {
                if let Err(e) = self.absorb(task).await {
                    self.pending.clear();
                    self.ready.clear();
                    return Some(Err(e));
                }
            }
        }
    }

    /// Drain the whole batch, stopping at the first error
    pub async fn collect_all(mut self) -> Result<Vec<Task>> {
        let mut out = Vec::with_capacity(self.remaining());
        while let Some(result) = self.next().await {
            out.push(result?);
        }
        Ok(out)
    }

    async fn absorb(&mut self, mut task: Task) -> Result<()> {
        let Some(pending) = self.pending.remove(&task.task_id) else {
            debug!("Ignoring result for task {} outside this batch", task.task_id);
            return Ok(());
        };

        if !task.error {
            task.task_id = pending.original_id;
            self.ready.push_back(task);
            return Ok(());
        }

        let last_error = task.error_message().unwrap_or_default();
        let budget = self.runner.config.max_attempts.max(1);
        if pending.attempts >= budget {
            warn!("Task {} exhausted {} submissions: {}", pending.original_id, budget, last_error);
            return Err(ClientError::ExhaustedRetries {
                task_id: pending.original_id,
                last_error,
            });
        }

        let fresh = pending.task.resubmission();
        warn!(
            "Task {} failed ({}), resubmitting as {} [{}/{}]",
            pending.original_id,
            last_error,
            fresh.task_id,
            pending.attempts + 1,
            budget
        );
        self.runner.client.put_task(&fresh).await?;
        self.pending.insert(
            fresh.task_id,
            Pending {
                original_id: pending.original_id,
                attempts: pending.attempts + 1,
                task: fresh,
            },
        );
        Ok(())
    }
}
