pub mod capability;
pub mod child;
pub mod config;
pub mod demo;
pub mod sandbox;
pub mod supervise;
pub mod worker;
mod error;

pub use capability::{Capability, CapabilityRegistry, CapabilityResult};
pub use child::{serve_child, ChildOutcome, ChildRequest};
pub use config::{IsolationMode, WorkerConfig};
pub use error::{Result, WorkerError};
pub use sandbox::{Attempt, Exit, ProcessSandbox, Sandbox, CHILD_FLAG};
pub use supervise::{LivenessCheck, Supervision, Supervisor};
pub use worker::{QueueWorker, Report, Step, CRASH_MESSAGE};
