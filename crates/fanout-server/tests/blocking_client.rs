use fanout_client::{
    BlockingRunner, BlockingTransport, QueueClient, RunnerConfig, TransportConfig,
};
use fanout_core::{Dispatch, Kwargs, TaskId};
use fanout_server::{Coordinator, ServerConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use uuid::Uuid;

/// Coordinator plus an adder worker on a background runtime; the calling
/// thread stays free of any runtime so the blocking types can own theirs.
fn start_background_server() -> String {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let runtime = Runtime::new().unwrap();
        runtime.block_on(async move {
            let mut config = ServerConfig::default();
            config.server.host = "127.0.0.1".to_string();
            config.server.port = 0;

            let coordinator = Coordinator::bind(config).await.unwrap();
            let address = coordinator.local_addr().unwrap().to_string();
            tokio::spawn(run_adder(address.clone()));
            tx.send(address).unwrap();
            let _ = coordinator.run().await;
        });
    });
    rx.recv_timeout(Duration::from_secs(10)).unwrap()
}

fn transport_config(address: &str) -> TransportConfig {
    TransportConfig {
        address: address.to_string(),
        connect_attempts: 3,
        retry_delay_secs: 0.05,
        ..Default::default()
    }
}

async fn run_adder(address: String) {
    let mut client = QueueClient::connect(transport_config(&address)).await.unwrap();
    loop {
        let task = match client.get_task(0.2).await {
            Ok(Dispatch::Task(task)) => task,
            Ok(Dispatch::Backoff { .. }) => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                continue;
            }
            Ok(Dispatch::Idle) => continue,
            Err(_) => return,
        };
        let a = task.args[0].as_i64().unwrap_or_default();
        let b = task.args[1].as_i64().unwrap_or_default();
        if client.put_result(task.task_id, false, json!(a + b)).await.is_err() {
            return;
        }
    }
}

fn blocking_runner(address: &str) -> BlockingRunner {
    BlockingRunner::new(RunnerConfig {
        transport: transport_config(address),
        max_attempts: 3,
        poll_interval_secs: 0.02,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_blocking_transport_call() {
    let address = start_background_server();
    let mut transport = BlockingTransport::connect(transport_config(&address)).unwrap();

    let project = Uuid::new_v4();
    assert_eq!(transport.call_args("new_project", vec![json!(project)]).unwrap(), json!(true));
    assert_eq!(transport.call_args("new_project", vec![json!(project)]).unwrap(), json!(false));

    let stats = transport.call("stats", vec![], Kwargs::new()).unwrap();
    assert!(stats["num_projects"].as_u64().unwrap() >= 1);
}

#[test]
fn test_blocking_run_single() {
    let address = start_background_server();
    let mut runner = blocking_runner(&address);

    let task = runner.make_task("demo.add", vec![json!(4), json!(5)], Kwargs::new()).unwrap();
    let done = runner.run_single(task).unwrap();
    assert!(!done.error);
    assert_eq!(done.result, Some(json!(9)));
}

#[test]
fn test_blocking_batch_yields_every_task() {
    let address = start_background_server();
    let mut runner = blocking_runner(&address);

    let tasks: Vec<_> = (0..6)
        .map(|i| runner.make_task("demo.add", vec![json!(i), json!(100)], Kwargs::new()).unwrap())
        .collect();
    let mut expected: HashMap<TaskId, i64> =
        tasks.iter().map(|t| (t.task_id, t.args[0].as_i64().unwrap() + 100)).collect();

    for result in runner.run_batch(tasks).unwrap() {
        let task = result.unwrap();
        let sum = expected
            .remove(&task.task_id)
            .unwrap_or_else(|| panic!("unexpected or repeated task {}", task.task_id));
        assert_eq!(task.result, Some(json!(sum)));
    }
    assert!(expected.is_empty());
}

#[test]
fn test_dropping_runner_deletes_project() {
    let address = start_background_server();
    let runner = blocking_runner(&address);
    let project = runner.project_id();
    drop(runner);

    let runtime = Runtime::new().unwrap();
    let existed = runtime.block_on(async {
        let mut client = QueueClient::connect(transport_config(&address)).await.unwrap();
        client.del_project(project).await.unwrap()
    });
    assert!(!existed, "project {} outlived its runner", project);
}
