//! Relay engines behind an authenticated session.
//!
//! # Data Flow
//! ```text
//! session ──► TCP command ──► tcp::TcpRelay ──► outbound::OutboundConnector ──► destination
//!         └─► UDP/53      ──► doh::DohReframer ──► doh::DnsResolver (HTTPS POST)
//! ```
//!
//! Both engines read client chunks from an mpsc receiver and write toward the
//! client through a `TransportHandle`.

pub mod doh;
pub mod outbound;
pub mod tcp;

use std::io;

use thiserror::Error;

pub use doh::{DnsFrameDecoder, DnsResolver, DohClient, DohError, DohReframer};
pub use outbound::{BoxedStream, OutboundConnector, OutboundStream, TcpConnector};
pub use tcp::{RelayOutcome, RetryPolicy, TcpRelay};

/// Errors that end a TCP relay.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Connecting, or writing the first payload, failed with no retry left.
    #[error("outbound connect to {target} failed: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("outbound write failed: {0}")]
    OutboundWrite(#[source] io::Error),

    #[error("outbound read failed: {0}")]
    OutboundRead(#[source] io::Error),
}

impl RelayError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect { .. } => "outbound_connect_failure",
            Self::OutboundWrite(_) | Self::OutboundRead(_) => "outbound_io",
        }
    }
}
