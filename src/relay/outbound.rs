//! Outbound TCP connections.
//!
//! The relay engine only needs "open a duplex byte stream to host:port";
//! `OutboundConnector` is that seam, `TcpConnector` the production
//! implementation.

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::OutboundConfig;

/// A duplex byte stream to an outbound destination.
pub trait OutboundStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> OutboundStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

pub type BoxedStream = Box<dyn OutboundStream>;

/// Opens outbound connections.
#[async_trait]
pub trait OutboundConnector: Send + Sync {
    /// Connect to `host:port`. `host` may be a domain or an IP literal
    /// (IPv6 without brackets).
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream>;
}

/// Plain TCP connector with an optional connect deadline.
#[derive(Debug, Clone, Default)]
pub struct TcpConnector {
    connect_timeout: Option<Duration>,
}

impl TcpConnector {
    pub fn new(connect_timeout: Option<Duration>) -> Self {
        Self { connect_timeout }
    }

    pub fn from_config(config: &OutboundConfig) -> Self {
        let connect_timeout = match config.connect_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        Self::new(connect_timeout)
    }
}

#[async_trait]
impl OutboundConnector for TcpConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        let connecting = TcpStream::connect((host, port));
        let stream = match self.connect_timeout {
            Some(deadline) => timeout(deadline, connecting).await.map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {host}:{port} timed out after {deadline:?}"),
                )
            })??,
            None => connecting.await?,
        };

        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(Box::new(stream))
    }
}
