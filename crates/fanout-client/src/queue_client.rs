use crate::config::TransportConfig;
use crate::transport::Transport;
use crate::{ClientError, Result};
use fanout_core::{Dispatch, ProjectId, QueueStats, Task, TaskId, Value};
use serde::de::DeserializeOwned;
use serde_json::json;

/// Typed calls against the coordinator's queue service
pub struct QueueClient {
    transport: Transport,
}

impl QueueClient {
    pub async fn connect(config: TransportConfig) -> Result<Self> {
        Ok(QueueClient {
            transport: Transport::connect(config).await?,
        })
    }

    pub fn from_transport(transport: Transport) -> Self {
        QueueClient { transport }
    }

    pub fn transport(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub async fn new_project(&mut self, project_id: ProjectId) -> Result<bool> {
        self.call("new_project", vec![json!(project_id)]).await
    }

    pub async fn del_project(&mut self, project_id: ProjectId) -> Result<bool> {
        self.call("del_project", vec![json!(project_id)]).await
    }

    pub async fn put_task(&mut self, task: &Task) -> Result<()> {
        self.call::<Value>("put_task", vec![task.to_value()?]).await?;
        Ok(())
    }

    pub async fn put_tasks(&mut self, tasks: &[Task]) -> Result<()> {
        let tasks = tasks.iter().map(Task::to_value).collect::<fanout_core::Result<Vec<_>>>()?;
        self.call::<Value>("put_tasks", vec![Value::Array(tasks)]).await?;
        Ok(())
    }

    /// Wait up to `timeout_secs` on the coordinator for work
    pub async fn get_task(&mut self, timeout_secs: f64) -> Result<Dispatch> {
        self.call("get_task", vec![json!(timeout_secs)]).await
    }

    pub async fn put_result(&mut self, task_id: TaskId, error: bool, result: Value) -> Result<()> {
        self.call::<Value>("put_result", vec![json!(task_id), json!(error), result])
            .await?;
        Ok(())
    }

    pub async fn get_results(&mut self, project_id: ProjectId) -> Result<Vec<Task>> {
        self.call("get_results", vec![json!(project_id)]).await
    }

    pub async fn get_state(&mut self, project_id: ProjectId, task_id: TaskId) -> Result<bool> {
        self.call("get_state", vec![json!(project_id), json!(task_id)])
            .await
    }

    pub async fn cancel_task(&mut self, task_id: TaskId) -> Result<bool> {
        self.call("cancel_task", vec![json!(task_id)]).await
    }

    pub async fn stats(&mut self) -> Result<QueueStats> {
        self.call("stats", vec![]).await
    }

    async fn call<T: DeserializeOwned>(&mut self, method: &str, args: Vec<Value>) -> Result<T> {
        let value = self.transport.call_args(method, args).await?;
        serde_json::from_value(value)
            .map_err(|e| ClientError::UnexpectedResponse(format!("`{}` returned {}", method, e)))
    }
}
