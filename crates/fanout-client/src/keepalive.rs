//! TCP keepalive tuning for coordinator connections.
//!
//! Long `get_task` waits and idle runners keep connections open for minutes;
//! keepalive probes detect a vanished peer so the transport can reconnect.

use crate::config::KeepaliveConfig;
use tokio::net::TcpStream;

/// Enable keepalive on `stream` with the configured timings.
///
/// Idle/interval/count are tuned on Linux and Android; other Unix systems only
/// get `SO_KEEPALIVE`. On non-Unix platforms this is a no-op.
pub fn apply_keepalive(stream: &TcpStream, config: &KeepaliveConfig) -> std::io::Result<()> {
    if !config.enabled {
        return Ok(());
    }

    #[cfg(unix)]
    {
        unix_impl::apply(stream, config)
    }

    #[cfg(not(unix))]
    {
        let _ = stream;
        tracing::debug!("TCP keepalive tuning is not supported on this platform");
        Ok(())
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::KeepaliveConfig;
    use nix::sys::socket::{setsockopt, sockopt};
    use std::io;
    use tokio::net::TcpStream;

    pub(super) fn apply(stream: &TcpStream, config: &KeepaliveConfig) -> io::Result<()> {
        setsockopt(stream, sockopt::KeepAlive, &true)?;

        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            setsockopt(stream, sockopt::TcpKeepIdle, &config.idle_secs.max(1))?;
            setsockopt(stream, sockopt::TcpKeepInterval, &config.interval_secs.max(1))?;
            setsockopt(stream, sockopt::TcpKeepCount, &config.count.max(1))?;
        }
        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            let _ = config;
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use nix::sys::socket::{getsockopt, sockopt};
    use tokio::net::TcpListener;

    async fn connected_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpStream::connect(addr), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_keepalive_enabled() {
        let (client, _server) = connected_pair().await;
        let config = KeepaliveConfig {
            enabled: true,
            idle_secs: 120,
            interval_secs: 15,
            count: 4,
        };
        apply_keepalive(&client, &config).unwrap();

        assert!(getsockopt(&client, sockopt::KeepAlive).unwrap());

        #[cfg(target_os = "linux")]
        {
            assert_eq!(getsockopt(&client, sockopt::TcpKeepIdle).unwrap(), 120);
            assert_eq!(getsockopt(&client, sockopt::TcpKeepInterval).unwrap(), 15);
            assert_eq!(getsockopt(&client, sockopt::TcpKeepCount).unwrap(), 4);
        }
    }

    #[tokio::test]
    async fn test_disabled_leaves_socket_alone() {
        let (client, _server) = connected_pair().await;
        let config = KeepaliveConfig {
            enabled: false,
            ..Default::default()
        };
        apply_keepalive(&client, &config).unwrap();

        assert!(!getsockopt(&client, sockopt::KeepAlive).unwrap());
    }
}
