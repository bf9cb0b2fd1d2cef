use chrono::Utc;
use fanout_core::{Dispatch, ProjectId, QueueStats, Task, TaskError, TaskId, Value};
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Failure message recorded when a final attempt never reports back
pub const TIMEOUT_MESSAGE: &str = "Task exceeded max_time";

/// A heap entry: the task becomes due at `at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Scheduled {
    at: Instant,
    seq: u64,
    task_id: TaskId,
}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        // Earliest time first; within the same instant, insertion order (FIFO)
        other
            .at
            .cmp(&self.at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// A tracked task and the sequence number of its one live heap entry
struct InFlight {
    task: Task,
    live_entry: u64,
}

#[derive(Default)]
struct QueueState {
    todo: BinaryHeap<Scheduled>,
    timeout_tracker: BinaryHeap<Scheduled>,
    in_flight: HashMap<TaskId, InFlight>,
    done: HashMap<ProjectId, VecDeque<Task>>,
    seq: u64,
}

impl QueueState {
    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn enqueue(&mut self, task: Task, now: Instant) {
        let seq = self.next_seq();
        let task_id = task.task_id;
        self.todo.push(Scheduled { at: now, seq, task_id });
        self.in_flight.insert(task_id, InFlight { task, live_entry: seq });
    }

    fn finish(&mut self, mut task: Task) {
        task.timing.finished_at = Some(Utc::now());
        match self.done.get_mut(&task.project_id) {
            Some(queue) => queue.push_back(task),
            None => debug!("Dropping result of {}: project is gone", task),
        }
    }
}

/// The scheduler.
///
/// Every transition of `todo`, `in_flight`, `timeout_tracker` and `done`
/// happens under the one state lock, shared by request handlers and the
/// timeout monitor.
pub struct QueueServer {
    state: Mutex<QueueState>,
    available: Notify,
}

impl QueueServer {
    pub fn new() -> Self {
        QueueServer {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
        }
    }

    /// Create a project's done queue; an existing project keeps its queue
    pub fn new_project(&self, project_id: ProjectId) -> bool {
        let mut state = self.state.lock();
        if state.done.contains_key(&project_id) {
            debug!("new_project {}: already exists", project_id);
            return false;
        }
        state.done.insert(project_id, VecDeque::new());
        info!("Created project {}", project_id);
        true
    }

    /// Drop a project's done queue and forget its in-flight tasks
    pub fn del_project(&self, project_id: ProjectId) -> bool {
        let mut state = self.state.lock();
        let existed = state.done.remove(&project_id).is_some();
        let before = state.in_flight.len();
        state.in_flight.retain(|_, r| r.task.project_id != project_id);
        let dropped = before - state.in_flight.len();

        if existed {
            info!("Deleted project {} ({} in-flight tasks dropped)", project_id, dropped);
        } else {
            debug!("del_project {}: unknown project", project_id);
        }
        existed
    }

    /// Accept a task for immediate dispatch
    pub fn put_task(&self, task: Task) -> Result<(), TaskError> {
        self.put_tasks(vec![task])
    }

    /// Accept a batch; nothing is inserted unless every task is valid
    pub fn put_tasks(&self, tasks: Vec<Task>) -> Result<(), TaskError> {
        let mut state = self.state.lock();

        let mut seen = HashSet::with_capacity(tasks.len());
        for task in &tasks {
            task.validate()?;
            if state.in_flight.contains_key(&task.task_id) || !seen.insert(task.task_id) {
                return Err(TaskError::AlreadyInFlight(task.task_id.to_string()));
            }
        }

        let now = Instant::now();
        let count = tasks.len();
        for mut task in tasks {
            // Attempts and outcome belong to the coordinator, not the submitter.
            task.tries = 0;
            task.error = false;
            task.result = None;
            task.timing = Default::default();
            task.timing.submitted_at = Some(Utc::now());
            debug!("Queued {}", task);
            state.enqueue(task, now);
        }
        drop(state);

        if count > 0 {
            self.available.notify_waiters();
        }
        Ok(())
    }

    /// Wait up to `timeout` for a dispatchable task
    pub async fn get_task(&self, timeout: Duration) -> Dispatch {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register before looking so a concurrent submission is not missed.
            notified.as_mut().enable();

            if let Some(dispatch) = self.try_dispatch(Instant::now()) {
                return dispatch;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Dispatch::Idle;
            }
        }
    }

    fn try_dispatch(&self, now: Instant) -> Option<Dispatch> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        while let Some(entry) = state.todo.pop() {
            let Some(record) = state.in_flight.get_mut(&entry.task_id) else {
                continue;
            };
            if record.live_entry != entry.seq {
                continue;
            }
            if !state.done.contains_key(&record.task.project_id) {
                warn!("Not sending {}: its project was deleted", record.task);
                state.in_flight.remove(&entry.task_id);
                continue;
            }
            if entry.at > now {
                state.todo.push(entry);
                return Some(Dispatch::backoff(entry.at - now));
            }
            if !record.task.has_tries_left() {
                // The timeout tracker owns tasks on their final attempt.
                continue;
            }

            record.task.tries += 1;
            record.task.timing.dispatched_at = Some(Utc::now());
            let deadline = now + record.task.max_time();

            state.seq += 1;
            let seq = state.seq;
            record.live_entry = seq;
            let scheduled = Scheduled {
                at: deadline,
                seq,
                task_id: entry.task_id,
            };
            if record.task.has_tries_left() {
                state.todo.push(scheduled);
            } else {
                state.timeout_tracker.push(scheduled);
            }

            debug!("Dispatched {}", record.task);
            return Some(Dispatch::Task(record.task.clone()));
        }
        None
    }

    /// Record the outcome of an attempt; unknown tasks are ignored
    pub fn put_result(&self, task_id: TaskId, error: bool, result: Value) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(record) = state.in_flight.get(&task_id) else {
            debug!("put_result for unknown task {}", task_id);
            return;
        };
        if !state.done.contains_key(&record.task.project_id) {
            debug!("put_result for {}: project was deleted", record.task);
            state.in_flight.remove(&task_id);
            return;
        }

        if error && record.task.has_tries_left() {
            let seq = state.next_seq();
            let now = Instant::now();
            if let Some(record) = state.in_flight.get_mut(&task_id) {
                record.task.fail(error_text(result));
                record.live_entry = seq;
                warn!("{} failed, requeued: {:?}", record.task, record.task.error_message());
            }
            state.todo.push(Scheduled { at: now, seq, task_id });
            drop(guard);
            self.available.notify_waiters();
            return;
        }

        let Some(InFlight { mut task, .. }) = state.in_flight.remove(&task_id) else {
            return;
        };
        if error {
            task.fail(error_text(result));
            error!("{} failed permanently: {:?}", task, task.error_message());
        } else {
            task.succeed(result);
            debug!("Finished {}", task);
        }
        state.finish(task);
    }

    /// Drain a project's finished tasks
    pub fn get_results(&self, project_id: ProjectId) -> Vec<Task> {
        let mut state = self.state.lock();
        let Some(queue) = state.done.get_mut(&project_id) else {
            return Vec::new();
        };
        let collected_at = Utc::now();
        queue
            .drain(..)
            .map(|mut task| {
                task.timing.collected_at = Some(collected_at);
                task
            })
            .collect()
    }

    /// True while the project is live and the task is still tracked
    pub fn get_state(&self, project_id: ProjectId, task_id: TaskId) -> bool {
        let state = self.state.lock();
        state.done.contains_key(&project_id)
            && state
                .in_flight
                .get(&task_id)
                .map_or(false, |r| r.task.project_id == project_id)
    }

    /// Forget a tracked task
    pub fn cancel_task(&self, task_id: TaskId) -> bool {
        let removed = self.state.lock().in_flight.remove(&task_id).is_some();
        if removed {
            info!("Cancelled task {}", task_id);
        }
        removed
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.state.lock();
        QueueStats {
            active_connections: 0,
            waiting: state.todo.len(),
            num_projects: state.done.len(),
            waiting_for_pickup: state.done.values().map(VecDeque::len).sum(),
            num_running: state.in_flight.len(),
        }
    }

    /// Fail every final attempt whose deadline has passed
    pub fn expire_timeouts(&self) -> usize {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let mut expired = 0;
        while let Some(entry) = state.timeout_tracker.peek().copied() {
            if entry.at > now {
                break;
            }
            state.timeout_tracker.pop();

            let live = state
                .in_flight
                .get(&entry.task_id)
                .map_or(false, |r| r.live_entry == entry.seq && !r.task.has_tries_left());
            if !live {
                continue;
            }
            let Some(InFlight { mut task, .. }) = state.in_flight.remove(&entry.task_id) else {
                continue;
            };
            if !state.done.contains_key(&task.project_id) {
                continue;
            }
            task.fail(TIMEOUT_MESSAGE);
            error!("{} timed out on its final attempt", task);
            state.finish(task);
            expired += 1;
        }
        expired
    }

    /// Run the timeout monitor every `interval` until the handle is aborted
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let expired = queue.expire_timeouts();
                if expired > 0 {
                    info!("Timeout monitor failed {} tasks", expired);
                }
            }
        })
    }
}

impl Default for QueueServer {
    fn default() -> Self {
        Self::new()
    }
}

fn error_text(result: Value) -> String {
    match result {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn task(project: ProjectId, max_tries: u32, max_time: i64) -> Task {
        Task::builder(project, "demo.add")
            .arg(1)
            .arg(2)
            .max_tries(max_tries)
            .max_time(max_time)
            .build()
            .unwrap()
    }

    fn setup() -> (QueueServer, ProjectId) {
        let queue = QueueServer::new();
        let project = Uuid::new_v4();
        assert!(queue.new_project(project));
        (queue, project)
    }

    async fn dispatch(queue: &QueueServer) -> Task {
        match queue.get_task(Duration::ZERO).await {
            Dispatch::Task(t) => t,
            other => panic!("Expected a task, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_lands_in_done() {
        let (queue, project) = setup();
        let t = task(project, 3, 60);
        queue.put_task(t.clone()).unwrap();

        let got = dispatch(&queue).await;
        assert_eq!(got.task_id, t.task_id);
        assert_eq!(got.tries, 1);

        queue.put_result(t.task_id, false, json!(3));
        let results = queue.get_results(project);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result, Some(json!(3)));
        assert!(!results[0].error);
        assert!(results[0].timing.collected_at.is_some());
        assert!(queue.get_results(project).is_empty());
        assert_eq!(queue.stats().num_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_submitted_attempt_state_is_reset() {
        let (queue, project) = setup();
        let mut t = task(project, 3, 60);
        t.tries = 3;
        t.error = true;
        t.result = Some(json!("stale failure"));
        queue.put_task(t.clone()).unwrap();

        let got = dispatch(&queue).await;
        assert_eq!(got.tries, 1);
        assert!(!got.error);
        assert_eq!(got.result, None);

        queue.put_result(t.task_id, false, json!(3));
        let results = queue.get_results(project);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].result, Some(json!(3)));
        assert_eq!(queue.stats().num_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returned_task_can_be_resubmitted() {
        let (queue, project) = setup();
        let t = task(project, 1, 60);
        queue.put_task(t.clone()).unwrap();
        dispatch(&queue).await;
        queue.put_result(t.task_id, true, json!("first run failed"));
        let finished = queue.get_results(project).pop().unwrap();
        assert_eq!(finished.tries, 1);

        // Its final attempt is spent, yet a resubmission still runs once more.
        queue.put_task(finished).unwrap();
        let again = dispatch(&queue).await;
        assert_eq!(again.tries, 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(queue.expire_timeouts(), 1);
        let results = queue.get_results(project);
        assert_eq!(results[0].error_message().as_deref(), Some(TIMEOUT_MESSAGE));
        assert!(!queue.get_state(project, t.task_id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifo_among_ready_tasks() {
        let (queue, project) = setup();
        let tasks: Vec<Task> = (0..5).map(|_| task(project, 1, 60)).collect();
        queue.put_tasks(tasks.clone()).unwrap();

        for expected in &tasks {
            assert_eq!(dispatch(&queue).await.task_id, expected.task_id);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_task_attempted_max_tries_times() {
        let (queue, project) = setup();
        let t = task(project, 3, 60);
        queue.put_task(t.clone()).unwrap();

        for attempt in 1..=3 {
            let got = dispatch(&queue).await;
            assert_eq!(got.tries, attempt);
            queue.put_result(t.task_id, true, json!(format!("boom {}", attempt)));
        }

        let results = queue.get_results(project);
        assert_eq!(results.len(), 1);
        assert!(results[0].error);
        assert_eq!(results[0].error_message().as_deref(), Some("boom 3"));
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_safety_net_redispatch_after_max_time() {
        let (queue, project) = setup();
        let t = task(project, 2, 10);
        queue.put_task(t.clone()).unwrap();

        assert_eq!(dispatch(&queue).await.tries, 1);
        assert_eq!(
            queue.get_task(Duration::ZERO).await,
            Dispatch::backoff(Duration::from_secs(10))
        );

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(
            queue.get_task(Duration::ZERO).await.backoff_delay(),
            Some(Duration::from_secs(6))
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(dispatch(&queue).await.tries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_retry_supersedes_safety_net() {
        let (queue, project) = setup();
        let t = task(project, 3, 10);
        queue.put_task(t.clone()).unwrap();

        dispatch(&queue).await;
        queue.put_result(t.task_id, true, json!("crash"));
        assert_eq!(dispatch(&queue).await.tries, 2);

        queue.put_result(t.task_id, false, json!(3));
        tokio::time::advance(Duration::from_secs(60)).await;
        // The first attempt's safety-net entry is stale and must not dispatch.
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
        assert_eq!(queue.get_results(project).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_attempt_timeout() {
        let (queue, project) = setup();
        let t = task(project, 1, 5);
        queue.put_task(t.clone()).unwrap();
        dispatch(&queue).await;

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(queue.expire_timeouts(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(queue.expire_timeouts(), 1);

        let results = queue.get_results(project);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].error_message().as_deref(), Some(TIMEOUT_MESSAGE));

        // A late report is a no-op.
        queue.put_result(t.task_id, false, json!(3));
        assert!(queue.get_results(project).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_fails_within_interval() {
        let (queue, project) = setup();
        let queue = Arc::new(queue);
        let monitor = queue.spawn_monitor(Duration::from_secs(30));
        queue.put_task(task(project, 1, 2)).unwrap();
        dispatch(&queue).await;

        tokio::time::sleep(Duration::from_secs(32)).await;
        let results = queue.get_results(project);
        assert_eq!(results.len(), 1);
        assert!(results[0].error);
        monitor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_never_leak_across_projects() {
        let queue = QueueServer::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        queue.new_project(a);
        queue.new_project(b);
        queue.put_task(task(a, 1, 60)).unwrap();
        queue.put_task(task(b, 1, 60)).unwrap();

        for _ in 0..2 {
            let t = dispatch(&queue).await;
            queue.put_result(t.task_id, false, json!(t.project_id.to_string()));
        }

        for project in [a, b] {
            let results = queue.get_results(project);
            assert_eq!(results.len(), 1);
            assert!(results.iter().all(|t| t.project_id == project));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_project_is_inert() {
        let (queue, project) = setup();
        let running = task(project, 3, 60);
        let waiting = task(project, 3, 60);
        queue.put_task(running.clone()).unwrap();
        assert_eq!(dispatch(&queue).await.task_id, running.task_id);
        queue.put_task(waiting).unwrap();

        assert!(queue.del_project(project));
        assert!(!queue.del_project(project));
        assert!(!queue.get_state(project, running.task_id));

        queue.put_result(running.task_id, false, json!(3));
        assert!(queue.get_results(project).is_empty());
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
        assert_eq!(queue.stats().num_running, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_project_is_idempotent() {
        let (queue, project) = setup();
        let t = task(project, 1, 60);
        queue.put_task(t.clone()).unwrap();
        dispatch(&queue).await;
        queue.put_result(t.task_id, false, json!(1));

        assert!(!queue.new_project(project));
        assert_eq!(queue.get_results(project).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_validation_is_atomic() {
        let (queue, project) = setup();
        let good = task(project, 1, 60);
        let mut bad = task(project, 1, 60);
        bad.max_time = -5;

        let err = queue.put_tasks(vec![good, bad]).unwrap_err();
        assert!(matches!(err, TaskError::InvalidMaxTime(-5)));
        assert_eq!(queue.stats().num_running, 0);
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_in_flight_id_rejected() {
        let (queue, project) = setup();
        let t = task(project, 1, 60);
        queue.put_task(t.clone()).unwrap();
        assert!(matches!(
            queue.put_task(t.clone()),
            Err(TaskError::AlreadyInFlight(_))
        ));

        let fresh = task(project, 1, 60);
        assert!(matches!(
            queue.put_tasks(vec![fresh.clone(), fresh]),
            Err(TaskError::AlreadyInFlight(_))
        ));
        assert_eq!(queue.stats().num_running, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_task_wakes_on_submission() {
        let (queue, project) = setup();
        let queue = Arc::new(queue);

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.get_task(Duration::from_secs(30)).await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        let t = task(project, 1, 60);
        queue.put_task(t.clone()).unwrap();

        match waiter.await.unwrap() {
            Dispatch::Task(got) => assert_eq!(got.task_id, t.task_id),
            other => panic!("Expected a task, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_task_idle_after_timeout() {
        let queue = QueueServer::new();
        let start = Instant::now();
        assert_eq!(queue.get_task(Duration::from_secs(5)).await, Dispatch::Idle);
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_is_ignored() {
        let (queue, project) = setup();
        let mut t = task(project, 1, 60);
        t.burst = 4;
        queue.put_task(t).unwrap();

        dispatch(&queue).await;
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_tries_gets_one_attempt() {
        let (queue, project) = setup();
        let t = task(project, 0, 60);
        queue.put_task(t.clone()).unwrap();
        assert_eq!(dispatch(&queue).await.tries, 1);
        queue.put_result(t.task_id, true, json!("no"));
        assert!(queue.get_results(project)[0].error);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_state_and_cancel() {
        let (queue, project) = setup();
        let t = task(project, 1, 60);
        queue.put_task(t.clone()).unwrap();

        assert!(queue.get_state(project, t.task_id));
        assert!(!queue.get_state(Uuid::new_v4(), t.task_id));
        assert!(queue.cancel_task(t.task_id));
        assert!(!queue.cancel_task(t.task_id));
        assert!(!queue.get_state(project, t.task_id));
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_for_unknown_project_is_dropped_at_dispatch() {
        let queue = QueueServer::new();
        queue.put_task(task(Uuid::new_v4(), 1, 60)).unwrap();
        assert_eq!(queue.get_task(Duration::ZERO).await, Dispatch::Idle);
        assert_eq!(queue.stats().num_running, 0);
    }
}
