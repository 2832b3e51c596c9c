//! Handlers for plain HTTP requests (no WebSocket upgrade).
//!
//! - `GET /info` (alias `/cf`): what the relay sees of the request, as JSON
//! - `GET /connect`: outbound connectivity probe
//! - anything else: reverse proxy to a random fallback site, 404 if none

use std::io;
use std::net::SocketAddr;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, Request, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use rand::seq::SliceRandom;
use serde_json::{json, Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::http::server::AppState;
use crate::relay::OutboundConnector;

/// Request headers echoed by `/info`.
const INFO_HEADERS: &[&str] = &[
    "host",
    "user-agent",
    "accept",
    "accept-language",
    "forwarded",
    "x-forwarded-for",
    "x-real-ip",
    "x-request-id",
];

/// Headers that describe one hop and are not forwarded.
fn is_hop_by_hop(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
        || name == header::TE
        || name == header::TRAILER
        || name == header::PROXY_AUTHORIZATION
        || name.as_str() == "keep-alive"
        || name.as_str() == "proxy-connection"
}

pub async fn info(request: Request<Body>) -> Json<Value> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string());

    let mut headers = Map::new();
    for name in INFO_HEADERS {
        if let Some(value) = request.headers().get(*name).and_then(|v| v.to_str().ok()) {
            headers.insert(name.to_string(), Value::String(value.to_string()));
        }
    }

    Json(json!({
        "peer": peer,
        "method": request.method().as_str(),
        "uri": request.uri().to_string(),
        "version": format!("{:?}", request.version()),
        "headers": headers,
    }))
}

pub async fn connect_probe(State(state): State<AppState>) -> Response {
    let config = state.config.load();
    let host = config.passthrough.probe_host.clone();
    let port = config.passthrough.probe_port;

    match probe(state.connector.as_ref(), &host, port).await {
        Ok(text) => (StatusCode::OK, text).into_response(),
        Err(e) => {
            tracing::warn!(host = %host, port, error = %e, "Connectivity probe failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Send a bare `GET /` to `host:port` and return the first chunk of the reply.
pub async fn probe(connector: &dyn OutboundConnector, host: &str, port: u16) -> io::Result<String> {
    let mut stream = connector.connect(host, port).await?;
    let request = format!("GET / HTTP/1.1\r\nHost: {host}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf[..n]).into_owned())
}

pub async fn fallback_proxy(State(state): State<AppState>, request: Request<Body>) -> Response {
    let config = state.config.load_full();
    let Some(site) = config.passthrough.fallback_sites.choose(&mut rand::thread_rng()).cloned() else {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    };

    let (parts, body) = request.into_parts();
    let path = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
    let url = upstream_url(&site, path);

    let body = match axum::body::to_bytes(body, config.passthrough.max_body_size).await {
        Ok(body) => body,
        Err(_) => return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response(),
    };

    let mut upstream = state.client.request(parts.method.clone(), &url).body(body);
    for (name, value) in forwarded_headers(&parts.headers) {
        upstream = upstream.header(name, value);
    }

    tracing::debug!(method = %parts.method, url = %url, "Proxying to fallback site");
    let response = match upstream.send().await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Fallback site request failed");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    let status = response.status();
    let headers = response.headers().clone();
    let body = match response.bytes().await {
        Ok(body) => body,
        Err(e) => {
            tracing::warn!(url = %url, error = %e, "Fallback site body failed");
            return (StatusCode::BAD_GATEWAY, "Upstream request failed").into_response();
        }
    };

    let mut out = Response::new(Body::from(body));
    *out.status_mut() = status;
    for (name, value) in headers.iter() {
        if !is_hop_by_hop(name) && name != header::CONTENT_LENGTH {
            out.headers_mut().append(name.clone(), value.clone());
        }
    }
    out
}

/// `site` is a host (HTTPS implied) or a full base URL.
fn upstream_url(site: &str, path_and_query: &str) -> String {
    let base = site.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{base}{path_and_query}")
    } else {
        format!("https://{base}{path_and_query}")
    }
}

fn forwarded_headers(headers: &HeaderMap) -> impl Iterator<Item = (&HeaderName, &header::HeaderValue)> {
    headers
        .iter()
        .filter(|(name, _)| *name != header::HOST && *name != header::CONTENT_LENGTH && !is_hop_by_hop(name))
}
