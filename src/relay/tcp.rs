//! TCP relay with a single silent-close retry.
//!
//! ```text
//! connect(target) ──► write first payload ──► pump
//!        │ fails                                │
//!        ▼                                      ├─ client closed ──────► done
//!  retry available? ──► connect(retry host)     ├─ outbound closed
//!        │ no                                   │   ├─ after data ─────► done
//!        ▼                                      │   └─ no data, retry ─► connect(retry host)
//!   RelayError                                  └─ io failure ─────────► RelayError
//! ```
//!
//! Exactly one retry per session. The retry host is drawn from the configured
//! fallback hosts, or is the original address when none are set and
//! `retry_without_fallback` is on. The retry resends the same first payload.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use rand::seq::SliceRandom;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

use super::outbound::{BoxedStream, OutboundConnector};
use super::RelayError;
use crate::config::OutboundConfig;
use crate::observability::metrics;
use crate::session::transport::TransportHandle;

/// Where the one retry of a session goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryPolicy {
    Disabled,
    OriginalAddress,
    FallbackHosts(Vec<String>),
}

impl RetryPolicy {
    pub fn from_config(config: &OutboundConfig) -> Self {
        let hosts: Vec<String> = config
            .fallback_hosts
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();

        if !hosts.is_empty() {
            Self::FallbackHosts(hosts)
        } else if config.retry_without_fallback {
            Self::OriginalAddress
        } else {
            Self::Disabled
        }
    }

    fn pick(&self, original: &str) -> Option<String> {
        match self {
            Self::Disabled => None,
            Self::OriginalAddress => Some(original.to_string()),
            Self::FallbackHosts(hosts) => hosts.choose(&mut rand::thread_rng()).cloned(),
        }
    }
}

/// How a relay session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The client side finished; the outbound was shut down.
    TransportClosed,
    /// The outbound finished; the client transport is left to close on its own.
    OutboundClosed { retried: bool },
}

enum PumpOutcome {
    TransportClosed,
    OutboundClosed { received_data: bool },
    Failed(RelayError),
}

/// Bidirectional TCP relay engine.
pub struct TcpRelay {
    connector: Arc<dyn OutboundConnector>,
    retry: RetryPolicy,
    buffer_size: usize,
}

impl TcpRelay {
    pub fn new(connector: Arc<dyn OutboundConnector>, retry: RetryPolicy, buffer_size: usize) -> Self {
        Self {
            connector,
            retry,
            buffer_size: buffer_size.max(1),
        }
    }

    pub fn from_config(connector: Arc<dyn OutboundConnector>, config: &OutboundConfig) -> Self {
        Self::new(connector, RetryPolicy::from_config(config), config.buffer_size)
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Relay between the client (`inbound` / `transport`) and `address:port`.
    ///
    /// `first_payload` is written to every outbound connection this session
    /// opens before any later inbound chunk.
    pub async fn run(
        &self,
        address: &str,
        port: u16,
        first_payload: Bytes,
        mut inbound: mpsc::Receiver<Bytes>,
        transport: TransportHandle,
    ) -> Result<RelayOutcome, RelayError> {
        let mut pending_retry = self.retry.pick(address);
        let mut host = address.to_string();
        let mut retried = false;

        loop {
            let stream = match self.connect_and_write(&host, port, &first_payload).await {
                Ok(stream) => stream,
                Err(e) => match pending_retry.take() {
                    Some(next) => {
                        tracing::warn!(error = %e, retry_host = %next, "Outbound connect failed, retrying");
                        metrics::record_retry();
                        host = next;
                        retried = true;
                        continue;
                    }
                    None => return Err(e),
                },
            };

            match self.pump(stream, &mut inbound, &transport).await {
                PumpOutcome::TransportClosed => return Ok(RelayOutcome::TransportClosed),
                PumpOutcome::OutboundClosed { received_data } => {
                    if !received_data {
                        if let Some(next) = pending_retry.take() {
                            tracing::info!(host = %host, port, retry_host = %next, "Outbound closed without data, retrying");
                            metrics::record_retry();
                            host = next;
                            retried = true;
                            continue;
                        }
                    }
                    tracing::debug!(host = %host, port, received_data, "Outbound closed");
                    return Ok(RelayOutcome::OutboundClosed { retried });
                }
                PumpOutcome::Failed(e) => return Err(e),
            }
        }
    }

    async fn connect_and_write(
        &self,
        host: &str,
        port: u16,
        payload: &[u8],
    ) -> Result<BoxedStream, RelayError> {
        let connect_failed = |source| RelayError::Connect {
            target: format!("{host}:{port}"),
            source,
        };

        let mut stream = self.connector.connect(host, port).await.map_err(connect_failed)?;
        tracing::debug!(host = %host, port, "Outbound connected");

        if !payload.is_empty() {
            stream.write_all(payload).await.map_err(connect_failed)?;
            metrics::record_bytes("uplink", payload.len());
        }
        Ok(stream)
    }

    /// Copy bytes both ways until one side finishes. The stream is dropped on return.
    async fn pump(
        &self,
        stream: BoxedStream,
        inbound: &mut mpsc::Receiver<Bytes>,
        transport: &TransportHandle,
    ) -> PumpOutcome {
        let (mut reader, mut writer) = tokio::io::split(stream);
        let received = AtomicBool::new(false);

        let downlink = async {
            let mut buf = BytesMut::with_capacity(self.buffer_size);
            loop {
                buf.reserve(self.buffer_size);
                match reader.read_buf(&mut buf).await {
                    Ok(0) => {
                        return PumpOutcome::OutboundClosed {
                            received_data: received.load(Ordering::Relaxed),
                        }
                    }
                    Ok(_) => {
                        received.store(true, Ordering::Relaxed);
                        if transport.send(buf.split().freeze()).await.is_err() {
                            return PumpOutcome::TransportClosed;
                        }
                    }
                    Err(e) if !received.load(Ordering::Relaxed) => {
                        tracing::debug!(error = %e, "Outbound read failed before any data");
                        return PumpOutcome::OutboundClosed { received_data: false };
                    }
                    Err(e) => return PumpOutcome::Failed(RelayError::OutboundRead(e)),
                }
            }
        };

        let uplink = async {
            while let Some(chunk) = inbound.recv().await {
                if let Err(e) = writer.write_all(&chunk).await {
                    if !received.load(Ordering::Relaxed) {
                        tracing::debug!(error = %e, "Outbound write failed before any data");
                        return PumpOutcome::OutboundClosed { received_data: false };
                    }
                    return PumpOutcome::Failed(RelayError::OutboundWrite(e));
                }
                metrics::record_bytes("uplink", chunk.len());
            }
            if let Err(e) = writer.shutdown().await {
                tracing::trace!(error = %e, "Outbound shutdown failed");
            }
            PumpOutcome::TransportClosed
        };

        tokio::select! {
            outcome = downlink => outcome,
            outcome = uplink => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{ResponseFramer, ResponseHeader};
    use crate::session::transport::{run_writer, transport_channel};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    type Script = Box<dyn Fn(DuplexStream) + Send + Sync>;

    /// Connector handing out in-memory streams whose far end runs `script`.
    struct ScriptedConnector {
        calls: Mutex<Vec<(String, u16)>>,
        scripts: Mutex<Vec<Option<Script>>>,
    }

    impl ScriptedConnector {
        fn new(scripts: Vec<Option<Script>>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                scripts: Mutex::new(scripts.into_iter().rev().collect()),
            })
        }

        fn calls(&self) -> Vec<(String, u16)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl OutboundConnector for ScriptedConnector {
        async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
            self.calls.lock().unwrap().push((host.to_string(), port));
            match self.scripts.lock().unwrap().pop().flatten() {
                Some(script) => {
                    let (near, far) = tokio::io::duplex(4096);
                    script(far);
                    Ok(Box::new(near))
                }
                None => Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
            }
        }
    }

    /// Reads the first payload into `seen`, then closes without replying.
    fn silent(seen: Arc<Mutex<Vec<u8>>>) -> Script {
        Box::new(move |mut far| {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64];
                let n = far.read(&mut buf).await.unwrap_or(0);
                seen.lock().unwrap().extend_from_slice(&buf[..n]);
            });
        })
    }

    /// Replies `response` to the first read, then closes.
    fn answering(response: &'static [u8], seen: Arc<Mutex<Vec<u8>>>) -> Script {
        Box::new(move |mut far| {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 64];
                let n = far.read(&mut buf).await.unwrap_or(0);
                seen.lock().unwrap().extend_from_slice(&buf[..n]);
                far.write_all(response).await.unwrap();
            });
        })
    }

    fn relay(connector: Arc<ScriptedConnector>, retry: RetryPolicy) -> TcpRelay {
        TcpRelay::new(connector, retry, 1024)
    }

    /// Runs the relay against a recording writer and returns (outcome, frames).
    async fn drive(
        relay: &TcpRelay,
        payload: &'static [u8],
        keep_inbound_open: bool,
    ) -> (Result<RelayOutcome, RelayError>, Vec<Bytes>) {
        let frames = Arc::new(Mutex::new(Vec::new()));
        let sink = futures_util::sink::unfold(frames.clone(), |frames, item: Bytes| async move {
            frames.lock().unwrap().push(item);
            Ok::<_, std::convert::Infallible>(frames)
        });
        let (handle, outbox) = transport_channel(16);
        let writer = tokio::spawn(run_writer(sink, outbox, ResponseFramer::new(ResponseHeader::new(0))));

        let (inbound_tx, inbound_rx) = mpsc::channel(4);
        let held = keep_inbound_open.then_some(inbound_tx);

        let outcome = relay
            .run("origin.example", 443, Bytes::from_static(payload), inbound_rx, handle)
            .await;
        drop(held);
        writer.await.unwrap();
        let frames = frames.lock().unwrap().clone();
        (outcome, frames)
    }

    #[tokio::test]
    async fn silent_destination_retries_once_via_fallback() {
        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector::new(vec![
            Some(silent(first.clone())),
            Some(answering(b"pong", second.clone())),
        ]);
        let relay = relay(connector.clone(), RetryPolicy::FallbackHosts(vec!["fallback.example".into()]));

        let (outcome, frames) = drive(&relay, b"ping", true).await;

        assert_eq!(outcome.unwrap(), RelayOutcome::OutboundClosed { retried: true });
        assert_eq!(
            connector.calls(),
            vec![("origin.example".to_string(), 443), ("fallback.example".to_string(), 443)]
        );
        assert_eq!(&first.lock().unwrap()[..], b"ping");
        assert_eq!(&second.lock().unwrap()[..], b"ping");
        assert_eq!(frames.len(), 1);
        assert_eq!(&frames[0][..], b"\x00\x00pong");
    }

    #[tokio::test]
    async fn no_retry_after_data_flowed() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector::new(vec![Some(answering(b"hello", seen))]);
        let relay = relay(connector.clone(), RetryPolicy::OriginalAddress);

        let (outcome, frames) = drive(&relay, b"req", true).await;

        assert_eq!(outcome.unwrap(), RelayOutcome::OutboundClosed { retried: false });
        assert_eq!(connector.calls().len(), 1);
        assert_eq!(&frames[0][..], b"\x00\x00hello");
    }

    #[tokio::test]
    async fn second_silent_close_ends_session() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector::new(vec![Some(silent(seen.clone())), Some(silent(seen))]);
        let relay = relay(connector.clone(), RetryPolicy::OriginalAddress);

        let (outcome, frames) = drive(&relay, b"req", true).await;

        assert_eq!(outcome.unwrap(), RelayOutcome::OutboundClosed { retried: true });
        assert_eq!(
            connector.calls(),
            vec![("origin.example".to_string(), 443), ("origin.example".to_string(), 443)]
        );
        assert!(frames.is_empty());
    }

    #[tokio::test]
    async fn refused_connect_uses_the_retry() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let connector = ScriptedConnector::new(vec![None, Some(answering(b"ok", seen))]);
        let relay = relay(connector.clone(), RetryPolicy::FallbackHosts(vec!["fb.example".into()]));

        let (outcome, _) = drive(&relay, b"req", true).await;

        assert!(outcome.is_ok());
        assert_eq!(connector.calls()[1].0, "fb.example");
    }

    #[tokio::test]
    async fn connect_failure_without_retry_is_an_error() {
        let connector = ScriptedConnector::new(vec![None]);
        let relay = relay(connector.clone(), RetryPolicy::Disabled);

        let (outcome, _) = drive(&relay, b"req", true).await;

        let err = outcome.unwrap_err();
        assert_eq!(err.kind(), "outbound_connect_failure");
        assert_eq!(connector.calls().len(), 1);
    }

    #[tokio::test]
    async fn client_close_finishes_relay() {
        let connector = ScriptedConnector::new(vec![Some(Box::new(|far: DuplexStream| {
            tokio::spawn(async move {
                // Hold the connection open until the relay shuts it down.
                let mut far = far;
                let mut buf = Vec::new();
                let _ = far.read_to_end(&mut buf).await;
            });
        }) as Script)]);
        let relay = relay(connector, RetryPolicy::OriginalAddress);

        let (outcome, _) = drive(&relay, b"req", false).await;

        assert_eq!(outcome.unwrap(), RelayOutcome::TransportClosed);
    }

    #[test]
    fn policy_prefers_fallback_hosts() {
        let mut config = OutboundConfig::default();
        assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::OriginalAddress);

        config.retry_without_fallback = false;
        assert_eq!(RetryPolicy::from_config(&config), RetryPolicy::Disabled);

        config.fallback_hosts = vec![" relay.example ".into(), "".into()];
        assert_eq!(
            RetryPolicy::from_config(&config),
            RetryPolicy::FallbackHosts(vec!["relay.example".into()])
        );
    }
}
