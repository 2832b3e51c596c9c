//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{body::Bytes, http::HeaderMap, routing::post, Router};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use tunnel_relay::config::RelayConfig;
use tunnel_relay::protocol::{encode_request_header, Command, TargetAddress};
use tunnel_relay::relay::{BoxedStream, OutboundConnector, TcpConnector};
use tunnel_relay::{HttpServer, Shutdown};

pub const IDENTITY: &str = "78829655-59f6-466b-897d-ea351d4ec82b";

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub fn identity() -> Uuid {
    Uuid::parse_str(IDENTITY).unwrap()
}

/// Default config accepting `IDENTITY`, bound on an ephemeral port.
pub fn relay_config() -> RelayConfig {
    let mut config = RelayConfig::default();
    config.auth.identities = vec![IDENTITY.to_string()];
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config
}

/// Start a relay with the plain TCP connector.
pub async fn start_relay(config: RelayConfig) -> (SocketAddr, Shutdown) {
    let connector = Arc::new(TcpConnector::from_config(&config.relay));
    start_relay_with_connector(config, connector).await
}

pub async fn start_relay_with_connector(
    config: RelayConfig,
    connector: Arc<dyn OutboundConnector>,
) -> (SocketAddr, Shutdown) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::with_connector(config, connector).unwrap();
    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.clone();

    tokio::spawn(async move {
        let _ = server.run(listener, None, server_shutdown).await;
    });
    (addr, shutdown)
}

/// Destination that answers every read with `echo:<data>`, until the peer closes.
pub async fn start_echo_destination() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            let mut reply = b"echo:".to_vec();
                            reply.extend_from_slice(&buf[..n]);
                            if socket.write_all(&reply).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Destination that reads the first chunk, then closes without replying.
///
/// Returns the address and a counter of accepted connections.
pub async fn start_silent_destination() -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicU32::new(0));
    let counter = accepted.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let _ = socket.read(&mut buf).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    (addr, accepted)
}

/// Destination that stores the first `expected` bytes it reads, then answers
/// with `reply` and keeps the connection open until the peer closes.
pub async fn start_recording_destination(
    expected: usize,
    reply: &'static [u8],
) -> (SocketAddr, Arc<Mutex<Vec<u8>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let received = Arc::new(Mutex::new(Vec::new()));
    let seen = received.clone();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut first = vec![0u8; expected];
                if socket.read_exact(&mut first).await.is_err() {
                    return;
                }
                seen.lock().unwrap().extend_from_slice(&first);
                if socket.write_all(reply).await.is_err() {
                    return;
                }
                let mut rest = [0u8; 1024];
                while matches!(socket.read(&mut rest).await, Ok(n) if n > 0) {}
            });
        }
    });
    (addr, received)
}

/// Mock DoH endpoint at `/dns-query`. Answers each query with `answer:<query>`
/// and records the content type it was sent with.
pub async fn start_mock_doh() -> (String, Arc<Mutex<Vec<String>>>) {
    let content_types = Arc::new(Mutex::new(Vec::new()));
    let seen = content_types.clone();

    let app = Router::new().route(
        "/dns-query",
        post(move |headers: HeaderMap, body: Bytes| {
            let seen = seen.clone();
            async move {
                let content_type = headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                seen.lock().unwrap().push(content_type);
                let mut answer = b"answer:".to_vec();
                answer.extend_from_slice(&body);
                answer
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/dns-query"), content_types)
}

/// Plain HTTP site returning `body` for every path, echoing the path in `x-path`.
pub async fn start_mock_site(body: &'static str) -> SocketAddr {
    let app = Router::new().fallback(move |uri: axum::http::Uri| async move {
        ([("x-path", uri.to_string())], body)
    });
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

/// Connector resolving test host names to local addresses, recording each call.
pub struct MappedConnector {
    hosts: HashMap<String, SocketAddr>,
    calls: Mutex<Vec<(String, u16)>>,
}

impl MappedConnector {
    pub fn new(hosts: &[(&str, SocketAddr)]) -> Arc<Self> {
        Arc::new(Self {
            hosts: hosts.iter().map(|(h, a)| (h.to_string(), *a)).collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Hosts connected to, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(host, _)| host.clone()).collect()
    }

    /// Requested `host:port` targets, in order.
    pub fn targets(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(host, port)| format!("{host}:{port}"))
            .collect()
    }
}

#[async_trait]
impl OutboundConnector for MappedConnector {
    async fn connect(&self, host: &str, port: u16) -> io::Result<BoxedStream> {
        self.calls.lock().unwrap().push((host.to_string(), port));
        let addr = self
            .hosts
            .get(host)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, host.to_string()))?;
        Ok(Box::new(TcpStream::connect(addr).await?))
    }
}

/// First chunk of a session: request header plus payload.
pub fn request(command: Command, host: &str, port: u16, payload: &[u8]) -> Vec<u8> {
    let mut buf = encode_request_header(&identity(), command, port, &TargetAddress::from(host));
    buf.extend_from_slice(payload);
    buf
}

pub async fn connect(relay: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{relay}/"))
        .await
        .unwrap();
    client
}

/// Connect carrying `early_data` (base64url) in `Sec-WebSocket-Protocol`.
///
/// Returns the client and the subprotocol the relay selected.
pub async fn connect_with_early_data(relay: SocketAddr, early_data: &str) -> (Client, Option<String>) {
    let mut request = format!("ws://{relay}/tunnel").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("sec-websocket-protocol", HeaderValue::from_str(early_data).unwrap());
    let (client, response) = tokio_tungstenite::connect_async(request).await.unwrap();
    let selected = response
        .headers()
        .get("sec-websocket-protocol")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    (client, selected)
}

pub async fn send(client: &mut Client, data: &[u8]) {
    client.send(Message::binary(data.to_vec())).await.unwrap();
}

/// Next binary message, or `None` when the relay closed the session.
pub async fn recv(client: &mut Client) -> Option<Vec<u8>> {
    let next = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(message) = client.next().await {
            match message {
                Ok(Message::Binary(data)) => return Some(data.to_vec()),
                Ok(Message::Close(_)) | Err(_) => return None,
                Ok(_) => continue,
            }
        }
        None
    });
    next.await.expect("timed out waiting for the relay")
}
