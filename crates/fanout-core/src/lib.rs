mod task;
mod call;
mod error;
mod queue;
pub mod cache;
pub mod registry;

pub use task::{
    Kwargs, ProjectId, Task, TaskBuilder, TaskId, TaskTiming, DEFAULT_MAX_TIME_SECS,
    DEFAULT_MAX_TRIES, MAX_TIME_CEILING_SECS,
};
pub use call::CallArgs;
pub use error::{RemoteError, RemoteErrorKind, Result, TaskError};
pub use queue::{Dispatch, QueueStats};
pub use cache::{CacheLimits, CacheStats, LruCache};
pub use registry::{MethodRegistry, RegistryError, PRIVATE_PREFIX, SHUTDOWN_METHOD};

/// Dynamic value used for arguments and results
pub use serde_json::Value;
