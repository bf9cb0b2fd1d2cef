use crate::queue::QueueServer;
use crate::rpc::{ConnectionGauge, RpcRegistry, RpcServer};
use crate::service::QueueService;
use crate::{Result, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// A bound coordinator: scheduler, timeout monitor and RPC endpoint
pub struct Coordinator {
    config: ServerConfig,
    queue: Arc<QueueServer>,
    rpc: Arc<RpcServer>,
    listener: TcpListener,
}

impl Coordinator {
    /// Build the method table and bind the listening socket
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let queue = Arc::new(QueueServer::new());
        let connections = ConnectionGauge::default();

        let mut methods = RpcRegistry::new();
        Arc::new(QueueService::new(
            Arc::clone(&queue),
            connections.clone(),
            config.queue.clone(),
        ))
        .register(&mut methods)?;

        let rpc = Arc::new(RpcServer::new(methods, connections));
        let listener = TcpListener::bind(config.bind_address()).await?;

        Ok(Coordinator {
            config,
            queue,
            rpc,
            listener,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn queue(&self) -> Arc<QueueServer> {
        Arc::clone(&self.queue)
    }

    pub fn rpc(&self) -> Arc<RpcServer> {
        Arc::clone(&self.rpc)
    }

    /// Serve until shutdown; the timeout monitor stops with the server
    pub async fn run(self) -> Result<()> {
        let monitor = self
            .queue
            .spawn_monitor(self.config.queue.monitor_interval());

        let result = self.rpc.serve(self.listener).await;
        monitor.abort();
        info!("Coordinator stopped");
        result
    }
}
