mod blocking;
mod config;
mod error;
mod keepalive;
mod queue_client;
mod runner;
mod transport;

pub use blocking::{BlockingBatch, BlockingRunner, BlockingTransport};
pub use config::{KeepaliveConfig, RunnerConfig, TransportConfig};
pub use error::{ClientError, Result};
pub use keepalive::apply_keepalive;
pub use queue_client::QueueClient;
pub use runner::{BatchRun, Runner};
pub use transport::Transport;
