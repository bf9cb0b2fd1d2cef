//! Synchronous wrappers that drive the async client on an owned runtime.

use crate::config::{RunnerConfig, TransportConfig};
use crate::runner::{BatchRun, Runner};
use crate::transport::Transport;
use crate::{ClientError, Result};
use fanout_core::{Kwargs, ProjectId, Task, Value};
use tokio::runtime::Runtime;

fn runtime() -> Result<Runtime> {
    Runtime::new().map_err(|e| ClientError::Connection(format!("failed to start runtime: {}", e)))
}

/// Blocking façade over [`Transport`]
pub struct BlockingTransport {
    inner: Transport,
    runtime: Runtime,
}

impl BlockingTransport {
    pub fn connect(config: TransportConfig) -> Result<Self> {
        let runtime = runtime()?;
        let inner = runtime.block_on(Transport::connect(config))?;
        Ok(BlockingTransport { inner, runtime })
    }

    pub fn call(&mut self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        self.runtime.block_on(self.inner.call(method, args, kwargs))
    }

    pub fn call_args(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call(method, args, Kwargs::new())
    }
}

/// Blocking façade over [`Runner`]; the project is deleted on drop
pub struct BlockingRunner {
    runner: Runner,
    runtime: Runtime,
}

impl BlockingRunner {
    pub fn new(config: RunnerConfig) -> Result<Self> {
        let runtime = runtime()?;
        let runner = runtime.block_on(Runner::new(config))?;
        Ok(BlockingRunner { runner, runtime })
    }

    pub fn project_id(&self) -> ProjectId {
        self.runner.project_id()
    }

    pub fn make_task(&self, method: impl Into<String>, args: Vec<Value>, kwargs: Kwargs) -> Result<Task> {
        self.runner.make_task(method, args, kwargs)
    }

    pub fn run_single(&mut self, task: Task) -> Result<Task> {
        self.runtime.block_on(self.runner.run_single(task))
    }

    /// Submit the batch and return an iterator over results in completion order
    pub fn run_batch(&mut self, tasks: Vec<Task>) -> Result<BlockingBatch<'_>> {
        let runtime = &self.runtime;
        let inner = runtime.block_on(self.runner.run_batch(tasks))?;
        Ok(BlockingBatch { runtime, inner })
    }

    pub fn close(&mut self) -> Result<bool> {
        self.runtime.block_on(self.runner.close())
    }
}

impl Drop for BlockingRunner {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::debug!("Could not delete project {} on drop: {}", self.project_id(), e);
        }
    }
}

/// Iterator over a blocking batch
pub struct BlockingBatch<'a> {
    runtime: &'a Runtime,
    inner: BatchRun<'a>,
}

impl Iterator for BlockingBatch<'_> {
    type Item = Result<Task>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.inner.next())
    }
}
