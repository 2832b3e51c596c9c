//! DNS-over-HTTPS reframing for UDP port 53 sessions.
//!
//! Inbound bytes carry DNS messages as `[u16 BE length][message]` records.
//! Each complete record is POSTed to the DoH endpoint; each answer goes back
//! to the client in the same length-prefixed framing. Records may straddle
//! chunk boundaries, so `DnsFrameDecoder` buffers the remainder.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use thiserror::Error;
use tokio::sync::mpsc;
use url::Url;

use crate::config::DnsConfig;
use crate::observability::metrics;
use crate::session::transport::TransportHandle;

/// Media type for wire-format DNS messages.
pub const DNS_MESSAGE: &str = "application/dns-message";

#[derive(Debug, Error)]
pub enum DohError {
    #[error("invalid DoH endpoint: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("DoH request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("DoH endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("DoH answer is {0} bytes, larger than a frame can carry")]
    AnswerTooLarge(usize),
}

/// Resolves one wire-format DNS query.
#[async_trait]
pub trait DnsResolver: Send + Sync {
    async fn resolve(&self, query: Bytes) -> Result<Bytes, DohError>;
}

/// `DnsResolver` backed by an RFC 8484 POST endpoint.
#[derive(Debug, Clone)]
pub struct DohClient {
    client: reqwest::Client,
    endpoint: Url,
}

impl DohClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, DohError> {
        let endpoint = Url::parse(endpoint)?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn from_config(config: &DnsConfig) -> Result<Self, DohError> {
        Self::new(&config.doh_url, Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl DnsResolver for DohClient {
    async fn resolve(&self, query: Bytes) -> Result<Bytes, DohError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, DNS_MESSAGE)
            .header(ACCEPT, DNS_MESSAGE)
            .body(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(DohError::Status(status));
        }
        Ok(response.bytes().await?)
    }
}

/// Reassembles length-prefixed DNS records across chunk boundaries.
#[derive(Debug, Default)]
pub struct DnsFrameDecoder {
    buf: BytesMut,
}

impl DnsFrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete, non-empty record, if buffered.
    pub fn next_query(&mut self) -> Option<Bytes> {
        loop {
            if self.buf.len() < 2 {
                return None;
            }
            let len = u16::from_be_bytes([self.buf[0], self.buf[1]]) as usize;
            if self.buf.len() < 2 + len {
                return None;
            }
            self.buf.advance(2);
            let query = self.buf.split_to(len).freeze();
            if !query.is_empty() {
                return Some(query);
            }
        }
    }

    /// Bytes waiting for the rest of their record.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Prefix an answer with its big-endian length.
pub fn frame_answer(answer: &[u8]) -> Result<Bytes, DohError> {
    let len = u16::try_from(answer.len()).map_err(|_| DohError::AnswerTooLarge(answer.len()))?;
    let mut out = BytesMut::with_capacity(2 + answer.len());
    out.put_u16(len);
    out.extend_from_slice(answer);
    Ok(out.freeze())
}

/// Drives DoH resolution for one session.
#[derive(Clone)]
pub struct DohReframer {
    resolver: Arc<dyn DnsResolver>,
}

impl DohReframer {
    pub fn new(resolver: Arc<dyn DnsResolver>) -> Self {
        Self { resolver }
    }

    /// Resolve every record in `first_payload` and `inbound`, in order.
    ///
    /// A failed query is logged and skipped; the session keeps going.
    /// Returns the number of answers delivered.
    pub async fn run(
        &self,
        first_payload: Bytes,
        mut inbound: mpsc::Receiver<Bytes>,
        transport: TransportHandle,
    ) -> usize {
        let mut decoder = DnsFrameDecoder::new();
        let mut answered = 0;

        decoder.push(&first_payload);
        answered += self.drain(&mut decoder, &transport).await;

        while let Some(chunk) = inbound.recv().await {
            decoder.push(&chunk);
            answered += self.drain(&mut decoder, &transport).await;
        }

        if decoder.pending() > 0 {
            tracing::debug!(pending = decoder.pending(), "Discarding incomplete DNS record");
        }
        answered
    }

    async fn drain(&self, decoder: &mut DnsFrameDecoder, transport: &TransportHandle) -> usize {
        let mut answered = 0;
        while let Some(query) = decoder.next_query() {
            let answer = match self.resolver.resolve(query).await.and_then(|a| frame_answer(&a)) {
                Ok(answer) => answer,
                Err(e) => {
                    tracing::warn!(error = %e, "DoH query failed");
                    metrics::record_doh_query("failure");
                    continue;
                }
            };
            metrics::record_doh_query("success");

            if !transport.is_open() {
                tracing::debug!("Transport closed, dropping DNS answer");
                continue;
            }
            if transport.send(answer).await.is_ok() {
                answered += 1;
            }
        }
        answered
    }
}
