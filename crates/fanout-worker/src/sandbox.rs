//! Running one capability call in isolation.
//!
//! `Process` spawns a child per task speaking the protocol in `child`;
//! crashes and kills stay out of the worker. `Thread` runs the call on a
//! blocking thread, which cannot be stopped once started.

use crate::capability::CapabilityRegistry;
use crate::child::{ChildOutcome, ChildRequest};
use crate::Result;
use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Argument that switches the worker binary into child mode
pub const CHILD_FLAG: &str = "--child";

pub enum Sandbox {
    Process(ProcessSandbox),
    Thread(Arc<CapabilityRegistry>),
}

impl Sandbox {
    pub async fn start(&self, request: ChildRequest) -> Result<Attempt> {
        match self {
            Sandbox::Process(sandbox) => sandbox.spawn(&request).await,
            Sandbox::Thread(registry) => {
                let registry = Arc::clone(registry);
                let handle = tokio::task::spawn_blocking(move || {
                    ChildOutcome::from(registry.invoke(&request.method, &request.args))
                });
                Ok(Attempt::Thread(handle))
            }
        }
    }
}

pub struct ProcessSandbox {
    program: PathBuf,
    args: Vec<String>,
    kill_grace: Duration,
}

impl ProcessSandbox {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        ProcessSandbox {
            program: program.into(),
            args,
            kill_grace: Duration::from_millis(500),
        }
    }

    /// Re-run the current executable in child mode
    pub fn current_exe() -> io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, vec![CHILD_FLAG.to_string()]))
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub async fn spawn(&self, request: &ChildRequest) -> Result<Attempt> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
        let reader = tokio::spawn(async move {
            let mut captured = Vec::new();
            stdout.read_to_end(&mut captured).await.map(|_| captured)
        });

        let payload = serde_json::to_vec(request)?;
        if let Some(mut stdin) = child.stdin.take() {
            // A child that dies before reading shows up as a crash on wait.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!("Writing request to child failed: {}", e);
            }
        }
        debug!("Spawned child {:?} for {}", child.id(), request.method);

        Ok(Attempt::Process(RunningChild {
            child,
            stdout: Some(reader),
            kill_grace: self.kill_grace,
        }))
    }
}

/// How an attempt ended on its own
#[derive(Debug, Clone, PartialEq)]
pub enum Exit {
    Outcome(ChildOutcome),
    Crashed(String),
}

pub struct RunningChild {
    child: Child,
    stdout: Option<JoinHandle<io::Result<Vec<u8>>>>,
    kill_grace: Duration,
}

/// A capability call in flight
pub enum Attempt {
    Process(RunningChild),
    Thread(JoinHandle<ChildOutcome>),
}

impl Attempt {
    /// Wait for the call to end by itself. Cancel safe.
    pub async fn finished(&mut self) -> Exit {
        match self {
            Attempt::Process(running) => running.finished().await,
            Attempt::Thread(handle) => match handle.await {
                Ok(outcome) => Exit::Outcome(outcome),
                Err(e) => Exit::Crashed(e.to_string()),
            },
        }
    }

    /// Stop the call early
    pub async fn stop(&mut self) {
        match self {
            Attempt::Process(running) => kill_graceful(&mut running.child, running.kill_grace).await,
            Attempt::Thread(handle) => {
                warn!("Thread-isolated task cannot be interrupted; abandoning it");
                handle.abort();
            }
        }
    }
}

impl RunningChild {
    async fn finished(&mut self) -> Exit {
        let status = match self.child.wait().await {
            Ok(status) => status,
            Err(e) => return Exit::Crashed(format!("waiting on child failed: {}", e)),
        };

        let mut captured = Vec::new();
        if let Some(reader) = self.stdout.as_mut() {
            if let Ok(Ok(bytes)) = reader.await {
                captured = bytes;
            }
            self.stdout = None;
        }

        match ChildOutcome::parse(&captured) {
            Some(outcome) => Exit::Outcome(outcome),
            None => Exit::Crashed(describe(status)),
        }
    }
}

fn describe(status: ExitStatus) -> String {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("child killed by signal {}", signal);
        }
    }
    match status.code() {
        Some(code) => format!("child exited with code {} and no result", code),
        None => "child exited without a result".to_string(),
    }
}

/// SIGTERM, then SIGKILL once `grace` runs out
pub async fn kill_graceful(child: &mut Child, grace: Duration) {
    if terminate(child, grace).await {
        return;
    }
    if let Err(e) = child.kill().await {
        debug!("Killing child failed: {}", e);
    }
}

#[cfg(unix)]
async fn terminate(child: &mut Child, grace: Duration) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(id) = child.id() else {
        return true;
    };
    if let Err(e) = kill(Pid::from_raw(id as i32), Signal::SIGTERM) {
        debug!("SIGTERM to child {} failed: {}", id, e);
        return false;
    }
    matches!(tokio::time::timeout(grace, child.wait()).await, Ok(Ok(_)))
}

#[cfg(not(unix))]
async fn terminate(_child: &mut Child, _grace: Duration) -> bool {
    false
}
