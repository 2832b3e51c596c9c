//! Outbound half of the client transport.
//!
//! Every producer (the TCP pump, the DoH reframer, the session loop) talks to
//! the transport through a cloneable `TransportHandle`. A single writer task
//! owns the sink, applies the response framer, and closes the sink exactly
//! once: on an explicit close, on a send failure, or when every handle is
//! gone.

use std::fmt;

use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::observability::metrics;
use crate::protocol::ResponseFramer;

#[derive(Debug)]
enum TransportCommand {
    Data(Bytes),
    Close,
}

/// Returned when the transport is no longer accepting data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transport is closed")]
pub struct TransportClosed;

/// Cloneable sender side of the transport writer.
#[derive(Debug, Clone)]
pub struct TransportHandle {
    tx: mpsc::Sender<TransportCommand>,
}

/// Receiver side, consumed by `run_writer`.
#[derive(Debug)]
pub struct TransportOutbox {
    rx: mpsc::Receiver<TransportCommand>,
}

/// Create a handle/outbox pair with the given queue depth.
pub fn transport_channel(capacity: usize) -> (TransportHandle, TransportOutbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (TransportHandle { tx }, TransportOutbox { rx })
}

impl TransportHandle {
    /// Queue a chunk for the client.
    pub async fn send(&self, chunk: Bytes) -> Result<(), TransportClosed> {
        self.tx
            .send(TransportCommand::Data(chunk))
            .await
            .map_err(|_| TransportClosed)
    }

    /// Ask the writer to close the transport. Safe to call any number of times.
    pub async fn close(&self) {
        let _ = self.tx.send(TransportCommand::Close).await;
    }

    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Resolves once the writer has stopped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Drain the outbox into `sink`, framing the first chunk with the response header.
///
/// Returns the number of payload bytes delivered.
pub async fn run_writer<S>(sink: S, mut outbox: TransportOutbox, mut framer: ResponseFramer) -> u64
where
    S: Sink<Bytes>,
    S::Error: fmt::Display,
{
    tokio::pin!(sink);
    let mut delivered = 0u64;

    while let Some(command) = outbox.rx.recv().await {
        match command {
            TransportCommand::Data(chunk) => {
                let len = chunk.len();
                if let Err(e) = sink.send(framer.frame(chunk)).await {
                    tracing::debug!(error = %e, "Transport send failed");
                    break;
                }
                delivered += len as u64;
                metrics::record_bytes("downlink", len);
            }
            TransportCommand::Close => break,
        }
    }

    // Late producers see TransportClosed from here on.
    outbox.rx.close();
    if let Err(e) = sink.close().await {
        tracing::trace!(error = %e, "Transport close failed");
    }
    delivered
}
