pub mod config;
pub mod coordinator;
pub mod error;
pub mod queue;
pub mod rpc;
pub mod service;

pub use config::ServerConfig;
pub use coordinator::Coordinator;
pub use error::{Result, ServerError};
pub use queue::QueueServer;
pub use rpc::{ConnectionGauge, RpcMethod, RpcRegistry, RpcServer};
pub use service::{QueueOp, QueueService};
