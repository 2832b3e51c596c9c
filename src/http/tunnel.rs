//! WebSocket upgrade into a tunnel session.
//!
//! Runs as middleware ahead of routing, so an upgrade request on any path
//! becomes a session. Everything else falls through to the passthrough routes.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ws::Message, ws::WebSocket, ConnectInfo, FromRequestParts, State, WebSocketUpgrade},
    http::{header, HeaderMap, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{future, SinkExt, StreamExt};
use tracing::Instrument;

use crate::http::server::AppState;
use crate::net::connection::SessionGuard;
use crate::observability::metrics;
use crate::session::{inbound_stream, SessionError, Tunnel};

/// True for `Upgrade: websocket` (case-insensitive).
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim().eq_ignore_ascii_case("websocket"))
}

pub async fn tunnel_upgrade(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !is_websocket_upgrade(request.headers()) {
        return next.run(request).await;
    }

    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let early_data = request
        .headers()
        .get(header::SEC_WEBSOCKET_PROTOCOL)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let (mut parts, _body) = request.into_parts();
    let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(upgrade) => upgrade,
        Err(rejection) => return rejection.into_response(),
    };

    let Some(guard) = state.sessions.try_admit() else {
        tracing::warn!(max_sessions = state.sessions.max_sessions(), "Session limit reached");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many sessions").into_response();
    };
    let tunnel = state.tunnel.load_full();

    // Echo the early-data value as the selected subprotocol.
    let upgrade = match &early_data {
        Some(protocol) => upgrade.protocols([protocol.clone()]),
        None => upgrade,
    };

    upgrade.on_upgrade(move |socket| run_session(socket, tunnel, guard, peer, early_data))
}

async fn run_session(
    socket: WebSocket,
    tunnel: Arc<Tunnel>,
    guard: SessionGuard,
    peer: Option<SocketAddr>,
    early_data: Option<String>,
) {
    let span = tracing::info_span!(
        "session",
        id = %guard.id(),
        peer = ?peer,
        destination = tracing::field::Empty,
    );

    async move {
        let (sink, stream) = socket.split();
        let inbound = inbound_stream(early_data.as_deref(), stream);
        let sink = sink.with(|chunk: Bytes| future::ok::<_, axum::Error>(Message::Binary(chunk)));

        match tunnel.serve(inbound, sink).await {
            Ok(Some(mode)) => tracing::debug!(%mode, "Session finished"),
            Ok(None) => {}
            Err(e) => report_failure(&e),
        }
        drop(guard);
    }
    .instrument(span)
    .await
}

fn report_failure(error: &SessionError) {
    metrics::record_session_error(error.kind());
    match error {
        SessionError::Header(_) | SessionError::MalformedEarlyData(_) => {
            tracing::warn!(kind = error.kind(), error = %error, "Session rejected")
        }
        SessionError::Relay(_) => tracing::warn!(kind = error.kind(), error = %error, "Relay failed"),
        SessionError::Transport(_) => tracing::debug!(error = %error, "Transport error"),
    }
}
