use crate::config::QueueConfig;
use crate::queue::QueueServer;
use crate::rpc::{ConnectionGauge, RpcMethod, RpcRegistry};
use crate::Result;
use async_trait::async_trait;
use fanout_core::{CallArgs, ProjectId, QueueStats, RemoteError, Task, TaskId, Value};
use serde::Serialize;
use std::sync::Arc;

/// Operations the queue service exposes over RPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueOp {
    NewProject,
    DelProject,
    PutTask,
    PutTasks,
    GetTask,
    PutResult,
    GetResults,
    GetState,
    CancelTask,
    Stats,
}

impl QueueOp {
    pub const ALL: [QueueOp; 10] = [
        QueueOp::NewProject,
        QueueOp::DelProject,
        QueueOp::PutTask,
        QueueOp::PutTasks,
        QueueOp::GetTask,
        QueueOp::PutResult,
        QueueOp::GetResults,
        QueueOp::GetState,
        QueueOp::CancelTask,
        QueueOp::Stats,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            QueueOp::NewProject => "new_project",
            QueueOp::DelProject => "del_project",
            QueueOp::PutTask => "put_task",
            QueueOp::PutTasks => "put_tasks",
            QueueOp::GetTask => "get_task",
            QueueOp::PutResult => "put_result",
            QueueOp::GetResults => "get_results",
            QueueOp::GetState => "get_state",
            QueueOp::CancelTask => "cancel_task",
            QueueOp::Stats => "stats",
        }
    }
}

/// Binds the scheduler to the RPC surface
pub struct QueueService {
    queue: Arc<QueueServer>,
    connections: ConnectionGauge,
    config: QueueConfig,
}

struct QueueMethod {
    op: QueueOp,
    service: Arc<QueueService>,
}

#[async_trait]
impl RpcMethod for QueueMethod {
    async fn call(&self, args: CallArgs) -> std::result::Result<Value, RemoteError> {
        self.service.handle(self.op, args).await
    }
}

type CallResult<T = Value> = std::result::Result<T, RemoteError>;

impl QueueService {
    pub fn new(queue: Arc<QueueServer>, connections: ConnectionGauge, config: QueueConfig) -> Self {
        QueueService {
            queue,
            connections,
            config,
        }
    }

    /// Register every queue operation under its plain name
    pub fn register(self: Arc<Self>, methods: &mut RpcRegistry) -> Result<()> {
        for op in QueueOp::ALL {
            let handler: Arc<dyn RpcMethod> = Arc::new(QueueMethod {
                op,
                service: Arc::clone(&self),
            });
            methods.register(op.name(), handler)?;
        }
        Ok(())
    }

    /// Execute one operation
    pub async fn handle(&self, op: QueueOp, args: CallArgs) -> CallResult {
        match op {
            QueueOp::NewProject => self.handle_new_project(args),
            QueueOp::DelProject => self.handle_del_project(args),
            QueueOp::PutTask => self.handle_put_task(args),
            QueueOp::PutTasks => self.handle_put_tasks(args),
            QueueOp::GetTask => self.handle_get_task(args).await,
            QueueOp::PutResult => self.handle_put_result(args),
            QueueOp::GetResults => self.handle_get_results(args),
            QueueOp::GetState => self.handle_get_state(args),
            QueueOp::CancelTask => self.handle_cancel_task(args),
            QueueOp::Stats => self.handle_stats(),
        }
    }

    fn handle_new_project(&self, args: CallArgs) -> CallResult {
        let project_id: ProjectId = args.get(0, "project_id")?;
        Ok(Value::Bool(self.queue.new_project(project_id)))
    }

    fn handle_del_project(&self, args: CallArgs) -> CallResult {
        let project_id: ProjectId = args.get(0, "project_id")?;
        Ok(Value::Bool(self.queue.del_project(project_id)))
    }

    fn handle_put_task(&self, args: CallArgs) -> CallResult {
        let task = decode_task(args.get(0, "task")?)?;
        self.queue.put_task(task)?;
        Ok(Value::Null)
    }

    fn handle_put_tasks(&self, args: CallArgs) -> CallResult {
        let raw: Vec<Value> = args.get(0, "tasks")?;
        let tasks = raw.into_iter().map(decode_task).collect::<CallResult<Vec<Task>>>()?;
        self.queue.put_tasks(tasks)?;
        Ok(Value::Null)
    }

    async fn handle_get_task(&self, args: CallArgs) -> CallResult {
        let requested: Option<f64> = args.opt(0, "timeout")?;
        let dispatch = self.queue.get_task(self.config.get_task_timeout(requested)).await;
        to_value(&dispatch)
    }

    fn handle_put_result(&self, args: CallArgs) -> CallResult {
        let task_id: TaskId = args.get(0, "task_id")?;
        let error: bool = args.get(1, "error")?;
        let result: Value = args.get_or(2, "result", Value::Null)?;
        self.queue.put_result(task_id, error, result);
        Ok(Value::Null)
    }

    fn handle_get_results(&self, args: CallArgs) -> CallResult {
        let project_id: ProjectId = args.get(0, "project_id")?;
        to_value(&self.queue.get_results(project_id))
    }

    fn handle_get_state(&self, args: CallArgs) -> CallResult {
        let project_id: ProjectId = args.get(0, "project_id")?;
        let task_id: TaskId = args.get(1, "task_id")?;
        Ok(Value::Bool(self.queue.get_state(project_id, task_id)))
    }

    fn handle_cancel_task(&self, args: CallArgs) -> CallResult {
        let task_id: TaskId = args.get(0, "task_id")?;
        Ok(Value::Bool(self.queue.cancel_task(task_id)))
    }

    fn handle_stats(&self) -> CallResult {
        let stats = QueueStats {
            active_connections: self.connections.get(),
            ..self.queue.stats()
        };
        to_value(&stats)
    }
}

/// A `max_time` that is not an integer is a validation failure, like a negative one
fn decode_task(raw: Value) -> CallResult<Task> {
    if let Some(max_time) = raw.get("max_time") {
        if max_time.as_i64().is_none() {
            return Err(RemoteError::validation(format!(
                "max_time must be an integer number of seconds, got {}",
                max_time
            )));
        }
    }
    serde_json::from_value(raw).map_err(|e| RemoteError::bad_arguments(format!("argument `task`: {}", e)))
}

fn to_value<T: Serialize>(value: &T) -> CallResult {
    serde_json::to_value(value).map_err(|e| RemoteError::internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServerConfig;
    use fanout_core::{Dispatch, Kwargs, RemoteErrorKind};
    use serde_json::json;
    use uuid::Uuid;

    fn service() -> QueueService {
        QueueService::new(
            Arc::new(QueueServer::new()),
            ConnectionGauge::default(),
            ServerConfig::default().queue,
        )
    }

    fn args(values: Vec<Value>) -> CallArgs {
        CallArgs::positional(values)
    }

    #[tokio::test]
    async fn test_full_cycle_through_handlers() {
        let service = service();
        let project = Uuid::new_v4();
        let task = Task::builder(project, "demo.add").arg(1).arg(2).build().unwrap();

        let created = service.handle(QueueOp::NewProject, args(vec![json!(project)])).await;
        assert_eq!(created, Ok(json!(true)));

        service
            .handle(QueueOp::PutTask, args(vec![task.to_value().unwrap()]))
            .await
            .unwrap();

        let mut kwargs = Kwargs::new();
        kwargs.insert("timeout".to_string(), json!(0));
        let dispatched = service
            .handle(QueueOp::GetTask, CallArgs::new(vec![], kwargs))
            .await
            .unwrap();
        let dispatched: Dispatch = serde_json::from_value(dispatched).unwrap();
        assert!(matches!(dispatched, Dispatch::Task(t) if t.task_id == task.task_id));

        service
            .handle(
                QueueOp::PutResult,
                args(vec![json!(task.task_id), json!(false), json!(3)]),
            )
            .await
            .unwrap();

        let results = service
            .handle(QueueOp::GetResults, args(vec![json!(project)]))
            .await
            .unwrap();
        let results: Vec<Task> = serde_json::from_value(results).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result, Some(json!(3)));
    }

    #[tokio::test]
    async fn test_invalid_max_time_is_a_validation_error() {
        let service = service();
        let mut task = Task::new(Uuid::new_v4(), "demo.add");
        task.max_time = -1;

        let err = service
            .handle(QueueOp::PutTask, args(vec![serde_json::to_value(&task).unwrap()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_non_integer_max_time_is_rejected() {
        let service = service();
        let mut task = serde_json::to_value(Task::new(Uuid::new_v4(), "demo.add")).unwrap();
        task["max_time"] = json!(1.5);

        let err = service
            .handle(QueueOp::PutTask, args(vec![task.clone()]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Validation);
        assert!(err.message.contains("1.5"), "{}", err.message);

        let good = Task::new(Uuid::new_v4(), "demo.add").to_value().unwrap();
        let err = service
            .handle(QueueOp::PutTasks, args(vec![json!([good, task])]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::Validation);
        assert_eq!(service.queue.stats().num_running, 0);
    }

    #[tokio::test]
    async fn test_malformed_task_is_a_bad_argument() {
        let service = service();
        let err = service
            .handle(QueueOp::PutTask, args(vec![json!({"method": "demo.add"})]))
            .await
            .unwrap_err();
        assert_eq!(err.kind, RemoteErrorKind::BadArguments);
    }

    #[tokio::test]
    async fn test_stats_reports_connections() {
        let queue = Arc::new(QueueServer::new());
        let gauge = ConnectionGauge::default();
        let service = QueueService::new(queue, gauge, ServerConfig::default().queue);
        service
            .handle(QueueOp::NewProject, args(vec![json!(Uuid::new_v4())]))
            .await
            .unwrap();

        let stats: QueueStats =
            serde_json::from_value(service.handle(QueueOp::Stats, args(vec![])).await.unwrap())
                .unwrap();
        assert_eq!(stats.num_projects, 1);
        assert_eq!(stats.active_connections, 0);
    }

    #[test]
    fn test_every_op_registers() {
        let mut methods = RpcRegistry::new();
        Arc::new(service()).register(&mut methods).unwrap();
        assert_eq!(methods.len(), QueueOp::ALL.len());
        assert!(methods.contains("get_task"));
        assert!(!methods.contains("shutdown"));
    }
}
