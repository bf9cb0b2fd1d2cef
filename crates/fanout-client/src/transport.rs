use crate::config::TransportConfig;
use crate::keepalive::apply_keepalive;
use crate::{ClientError, Result};
use fanout_core::{Kwargs, Value, SHUTDOWN_METHOD};
use fanout_protocol::{Envelope, EnvelopeCodec, ProtocolError, Request};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

type Connection = Framed<TcpStream, EnvelopeCodec>;

/// Persistent RPC connection to the coordinator.
///
/// One call is outstanding at a time. Connect failures and broken sessions
/// are retried up to `connect_attempts` times, `retry_delay_secs` apart; the
/// interrupted call is re-sent on the new connection.
pub struct Transport {
    config: TransportConfig,
    conn: Option<Connection>,
}

impl Transport {
    /// Connect eagerly, retrying per the configured budget
    pub async fn connect(config: TransportConfig) -> Result<Self> {
        let mut transport = Transport { config, conn: None };
        let budget = transport.budget();
        let mut last_error = String::new();

        for attempt in 1..=budget {
            if attempt > 1 {
                tokio::time::sleep(transport.config.retry_delay()).await;
            }
            match transport.open().await {
                Ok(conn) => {
                    transport.conn = Some(conn);
                    return Ok(transport);
                }
                Err(e) => {
                    warn!(
                        "Connecting to {} failed (attempt {}/{}): {}",
                        transport.config.address, attempt, budget, e
                    );
                    last_error = e.to_string();
                }
            }
        }
        Err(transport.gave_up(&last_error))
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Invoke `method` remotely and return its value.
    ///
    /// A remote failure surfaces as `ClientError::Remote`.
    pub async fn call(&mut self, method: &str, args: Vec<Value>, kwargs: Kwargs) -> Result<Value> {
        let envelope = Envelope::Request(Request::new(method, args, kwargs));
        let budget = self.budget();
        let mut last_error = String::new();

        for attempt in 1..=budget {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_delay()).await;
            }

            let mut conn = match self.conn.take() {
                Some(conn) => conn,
                None => match self.open().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        warn!("Reconnecting to {} failed (attempt {}/{}): {}", self.config.address, attempt, budget, e);
                        last_error = e.to_string();
                        continue;
                    }
                },
            };

            match exchange(&mut conn, envelope.clone()).await {
                Ok(Some(response)) => {
                    self.conn = Some(conn);
                    return into_value(response);
                }
                Ok(None) => {
                    warn!("Connection to {} closed during `{}`", self.config.address, method);
                    last_error = "connection closed by peer".to_string();
                }
                Err(ProtocolError::IoError(e)) => {
                    warn!("Connection to {} broken during `{}`: {}", self.config.address, method, e);
                    last_error = e.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(self.gave_up(&last_error))
    }

    /// Call with positional arguments only
    pub async fn call_args(&mut self, method: &str, args: Vec<Value>) -> Result<Value> {
        self.call(method, args, Kwargs::new()).await
    }

    /// Ask the coordinator to stop serving
    pub async fn shutdown_server(&mut self) -> Result<()> {
        self.call_args(SHUTDOWN_METHOD, vec![]).await?;
        self.conn = None;
        info!("Coordinator at {} acknowledged shutdown", self.config.address);
        Ok(())
    }

    async fn open(&self) -> std::io::Result<Connection> {
        let stream = TcpStream::connect(&self.config.address).await?;
        stream.set_nodelay(true)?;
        apply_keepalive(&stream, &self.config.keepalive)?;
        debug!("Connected to {}", self.config.address);
        Ok(Framed::new(stream, EnvelopeCodec))
    }

    fn budget(&self) -> u32 {
        self.config.connect_attempts.max(1)
    }

    fn gave_up(&self, last_error: &str) -> ClientError {
        ClientError::Connection(format!(
            "{} unreachable after {} attempts: {}",
            self.config.address,
            self.budget(),
            last_error
        ))
    }
}

async fn exchange(
    conn: &mut Connection,
    request: Envelope,
) -> std::result::Result<Option<Envelope>, ProtocolError> {
    conn.send(request).await?;
    conn.next().await.transpose()
}

fn into_value(response: Envelope) -> Result<Value> {
    match response.into_outcome() {
        Some(Ok(value)) => Ok(value),
        Some(Err(remote)) => Err(ClientError::Remote(remote)),
        None => Err(ClientError::UnexpectedResponse(
            "request envelope received from coordinator".to_string(),
        )),
    }
}
