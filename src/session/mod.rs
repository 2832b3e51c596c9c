//! Tunnel sessions.
//!
//! # Data Flow
//! ```text
//! WebSocket ──► adapter::inbound_stream ──► first chunk ──► parse_request_header
//!                                                              │
//!                  ┌───────────────── TCP ◄────────────────────┤
//!                  │                  UDP/53 ──► DohReframer ──┤
//!                  ▼                                           ▼
//!              TcpRelay  ──────► transport::TransportHandle ──► run_writer ──► WebSocket
//! ```
//!
//! A session is one future: the writer, the inbound forwarder and the relay
//! engine are joined, so dropping the session drops every socket it opened.

pub mod adapter;
pub mod early_data;
pub mod transport;

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::protocol::{parse_request_header, HeaderError, IdentitySet, ResponseFramer, ResponseHeader};
use crate::relay::{
    DnsResolver, DohClient, DohError, DohReframer, OutboundConnector, RelayError, RelayOutcome,
    TcpRelay,
};

pub use adapter::inbound_stream;
pub use early_data::decode_early_data;
pub use transport::{run_writer, transport_channel, TransportClosed, TransportHandle};

/// Queue depth between the inbound forwarder and the relay engine.
const INBOUND_QUEUE: usize = 64;
/// Queue depth between producers and the transport writer.
const TRANSPORT_QUEUE: usize = 64;

/// Why a session ended abnormally.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Header(#[from] HeaderError),

    #[error(transparent)]
    Relay(#[from] RelayError),

    #[error("malformed early data: {0}")]
    MalformedEarlyData(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl SessionError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Header(e) => e.kind(),
            Self::Relay(e) => e.kind(),
            Self::MalformedEarlyData(_) => "malformed_early_data",
            Self::Transport(_) => "transport",
        }
    }
}

/// Which engine served a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Tcp,
    Dns,
}

impl SessionMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Dns => "dns",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a session needs, built from one configuration snapshot.
pub struct Tunnel {
    identities: IdentitySet,
    tcp: TcpRelay,
    dns: DohReframer,
}

impl Tunnel {
    pub fn new(identities: IdentitySet, tcp: TcpRelay, dns: DohReframer) -> Self {
        Self { identities, tcp, dns }
    }

    pub fn from_config(
        config: &RelayConfig,
        connector: Arc<dyn OutboundConnector>,
    ) -> Result<Self, DohError> {
        let resolver: Arc<dyn DnsResolver> = Arc::new(DohClient::from_config(&config.dns)?);
        Ok(Self::new(
            IdentitySet::from_config(&config.auth),
            TcpRelay::from_config(connector, &config.relay),
            DohReframer::new(resolver),
        ))
    }

    pub fn identities(&self) -> &IdentitySet {
        &self.identities
    }

    /// Serve one session until both sides are finished.
    ///
    /// Returns `Ok(None)` when the client went away before sending anything.
    pub async fn serve<St, Si>(&self, inbound: St, sink: Si) -> Result<Option<SessionMode>, SessionError>
    where
        St: Stream<Item = Result<Bytes, SessionError>>,
        Si: Sink<Bytes>,
        Si::Error: fmt::Display,
    {
        tokio::pin!(inbound);
        tokio::pin!(sink);

        let first = match inbound.next().await {
            Some(Ok(chunk)) => chunk,
            Some(Err(e)) => {
                close_quietly(&mut sink).await;
                return Err(e);
            }
            None => {
                tracing::debug!("Transport closed before the first chunk");
                return Ok(None);
            }
        };

        let header = match parse_request_header(&first, &self.identities) {
            Ok(header) => header,
            Err(e) => {
                close_quietly(&mut sink).await;
                return Err(e.into());
            }
        };

        let mode = if header.is_dns() { SessionMode::Dns } else { SessionMode::Tcp };
        tracing::Span::current().record("destination", format!("{} {mode}", header.target()).as_str());
        tracing::info!("Session accepted");
        metrics::record_session(mode.as_str());

        let payload = first.slice(header.payload_offset..);
        let (transport, outbox) = transport_channel(TRANSPORT_QUEUE);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE);

        let writer = run_writer(sink, outbox, ResponseFramer::new(ResponseHeader::new(header.version)));

        let relay_transport = transport.clone();
        let address = header.address.to_string();
        let relay = async move {
            // `Ok(true)` means the transport should be closed as well.
            let result = match mode {
                SessionMode::Tcp => self
                    .tcp
                    .run(&address, header.port, payload, inbound_rx, relay_transport.clone())
                    .await
                    .map(|outcome| {
                        tracing::debug!(?outcome, "TCP relay finished");
                        // A closed retry connection ends the session. The first
                        // connection closing leaves the transport to the client.
                        matches!(outcome, RelayOutcome::OutboundClosed { retried: true })
                    }),
                SessionMode::Dns => {
                    let answered = self.dns.run(payload, inbound_rx, relay_transport.clone()).await;
                    tracing::debug!(answered, "DoH session finished");
                    Ok(false)
                }
            };
            if !matches!(result, Ok(false)) {
                relay_transport.close().await;
            }
            result.map(drop).map_err(SessionError::from)
        };

        let forward = forward_inbound(inbound, inbound_tx, transport);

        let (_, forwarded, relayed) = tokio::join!(writer, forward, relay);
        relayed?;
        forwarded?;
        Ok(Some(mode))
    }
}

/// Move client chunks to the relay engine until the client finishes or the
/// transport writer stops. Chunks arriving after the engine is done are dropped.
async fn forward_inbound<St>(
    mut inbound: std::pin::Pin<&mut St>,
    tx: mpsc::Sender<Bytes>,
    transport: TransportHandle,
) -> Result<(), SessionError>
where
    St: Stream<Item = Result<Bytes, SessionError>>,
{
    let mut tx = Some(tx);
    loop {
        let item = tokio::select! {
            biased;
            _ = transport.closed() => return Ok(()),
            item = inbound.next() => item,
        };

        match item {
            None => return Ok(()),
            Some(Err(e)) => {
                transport.close().await;
                return Err(e);
            }
            Some(Ok(chunk)) => {
                if let Some(sender) = &tx {
                    if sender.send(chunk).await.is_err() {
                        tx = None;
                    }
                }
            }
        }
    }
}

async fn close_quietly<Si>(sink: &mut std::pin::Pin<&mut Si>)
where
    Si: Sink<Bytes>,
    Si::Error: fmt::Display,
{
    if let Err(e) = sink.close().await {
        tracing::trace!(error = %e, "Transport close failed");
    }
}
