use crate::Result;
use async_trait::async_trait;
use fanout_core::{CallArgs, MethodRegistry, RemoteError, Value, SHUTDOWN_METHOD};
use fanout_protocol::{Envelope, EnvelopeCodec, Request};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// A method callable over RPC
#[async_trait]
pub trait RpcMethod: Send + Sync {
    async fn call(&self, args: CallArgs) -> std::result::Result<Value, RemoteError>;
}

pub type RpcRegistry = MethodRegistry<Arc<dyn RpcMethod>>;

/// Number of open connections, shared with diagnostics
#[derive(Debug, Clone, Default)]
pub struct ConnectionGauge(Arc<AtomicUsize>);

impl ConnectionGauge {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ConnectionGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard(Arc::clone(&self.0))
    }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// TCP endpoint serving a fixed method registry, one task per connection
pub struct RpcServer {
    methods: RpcRegistry,
    connections: ConnectionGauge,
    shutdown: Notify,
}

impl RpcServer {
    pub fn new(methods: RpcRegistry, connections: ConnectionGauge) -> Self {
        RpcServer {
            methods,
            connections,
            shutdown: Notify::new(),
        }
    }

    pub fn connections(&self) -> &ConnectionGauge {
        &self.connections
    }

    /// Stop accepting connections
    pub fn shutdown(&self) {
        // notify_one keeps a permit if the accept loop is not waiting yet
        self.shutdown.notify_one();
    }

    /// Serve until `shutdown` is called locally or over the wire
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!("RPC server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                if let Err(e) = server.handle_connection(stream, addr).await {
                                    warn!("Connection {} closed: {}", addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down RPC server");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let _guard = self.connections.enter();
        let mut framed = Framed::new(stream, EnvelopeCodec);

        while let Some(result) = framed.next().await {
            let request = match result {
                Ok(Envelope::Request(request)) => request,
                Ok(other) => {
                    warn!("Unexpected {:?} envelope from {}", other.kind(), addr);
                    framed
                        .send(Envelope::Err(RemoteError::protocol("Expected a request envelope")))
                        .await?;
                    continue;
                }
                Err(e) => {
                    error!("Protocol error from {}: {}", addr, e);
                    // Best effort; the stream may no longer be in sync.
                    let _ = framed.send(Envelope::Err(RemoteError::protocol(e.to_string()))).await;
                    break;
                }
            };

            if request.method == SHUTDOWN_METHOD {
                info!("Shutdown requested by {}", addr);
                framed.send(Envelope::Ok(Value::Null)).await?;
                self.shutdown();
                break;
            }

            let response = self.dispatch(request).await;
            framed.send(response).await?;
        }

        debug!("Connection from {} ended", addr);
        Ok(())
    }

    async fn dispatch(&self, request: Request) -> Envelope {
        let (name, args) = request.into_parts();
        let handler = match self.methods.resolve(&name) {
            Ok(handler) => Arc::clone(handler),
            Err(e) => {
                warn!("Rejected call to `{}`: {}", name, e);
                return Envelope::Err(e.into());
            }
        };

        let outcome = handler.call(args).await;
        if let Err(e) = &outcome {
            debug!("`{}` failed: {}", name, e);
        }
        Envelope::response(outcome)
    }
}
