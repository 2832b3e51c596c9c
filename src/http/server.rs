//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the tunnel middleware and passthrough routes
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Serve plain or TLS, with graceful shutdown
//! - Apply configuration reloads to new sessions

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::{middleware, routing::get, Router};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::{RelayConfig, TlsConfig};
use crate::http::{passthrough, tunnel};
use crate::lifecycle::Shutdown;
use crate::net::connection::SessionTracker;
use crate::net::tls::load_tls_config;
use crate::relay::{DohError, OutboundConnector, TcpConnector};
use crate::session::Tunnel;

/// How long shutdown waits for open sessions.
const DRAIN_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to build DoH client: {0}")]
    Doh(#[from] DohError),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    /// Current configuration; passthrough handlers read it per request.
    pub config: Arc<ArcSwap<RelayConfig>>,
    /// Session dependencies built from `config`; each session takes a snapshot.
    pub tunnel: Arc<ArcSwap<Tunnel>>,
    pub connector: Arc<dyn OutboundConnector>,
    pub sessions: SessionTracker,
    /// Client for the fallback-site reverse proxy.
    pub client: reqwest::Client,
}

impl AppState {
    /// Swap in a reloaded configuration. Running sessions keep their snapshot.
    pub fn apply_config(&self, config: RelayConfig) -> Result<(), DohError> {
        let tunnel = Tunnel::from_config(&config, Arc::clone(&self.connector))?;
        self.tunnel.store(Arc::new(tunnel));
        self.config.store(Arc::new(config));
        Ok(())
    }
}

/// HTTP server for the relay.
pub struct HttpServer {
    router: Router,
    state: AppState,
    tls: Option<TlsConfig>,
}

impl HttpServer {
    /// Create a server that connects outbound over plain TCP.
    pub fn new(config: RelayConfig) -> Result<Self, ServerError> {
        let connector = Arc::new(TcpConnector::from_config(&config.relay));
        Self::with_connector(config, connector)
    }

    /// Create a server with a custom outbound connector.
    pub fn with_connector(
        config: RelayConfig,
        connector: Arc<dyn OutboundConnector>,
    ) -> Result<Self, ServerError> {
        let tunnel = Tunnel::from_config(&config, Arc::clone(&connector))?;
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let state = AppState {
            config: Arc::new(ArcSwap::from_pointee(config.clone())),
            tunnel: Arc::new(ArcSwap::from_pointee(tunnel)),
            connector,
            sessions: SessionTracker::new(config.listener.max_sessions),
            client,
        };

        let router = Self::build_router(&config, state.clone());
        Ok(Self {
            router,
            state,
            tls: config.listener.tls.clone(),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &RelayConfig, state: AppState) -> Router {
        Router::new()
            .route("/info", get(passthrough::info))
            .route("/cf", get(passthrough::info))
            .route("/connect", get(passthrough::connect_probe))
            .fallback(passthrough::fallback_proxy)
            .layer(middleware::from_fn_with_state(state.clone(), tunnel::tunnel_upgrade))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.passthrough.max_body_size))
            .layer(TimeoutLayer::new(Duration::from_secs(config.passthrough.request_timeout_secs)))
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Serve on `listener` until `shutdown` fires, then drain open sessions.
    ///
    /// Reloaded configurations arriving on `config_updates` apply to new sessions.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: Option<mpsc::UnboundedReceiver<RelayConfig>>,
        shutdown: Shutdown,
    ) -> Result<(), ServerError> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = self.tls.is_some(), "HTTP server starting");

        if let Some(updates) = config_updates {
            tokio::spawn(apply_config_updates(self.state.clone(), updates));
        }

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        match &self.tls {
            Some(tls) => {
                let rustls = load_tls_config(tls).await?;
                let handle = axum_server::Handle::new();
                let stopper = handle.clone();
                let signalled = shutdown.signalled();
                tokio::spawn(async move {
                    signalled.await;
                    stopper.graceful_shutdown(Some(DRAIN_DEADLINE));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, rustls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(shutdown.signalled())
                    .await?;
            }
        }

        let remaining = self.state.sessions.drain(DRAIN_DEADLINE).await;
        tracing::info!(remaining_sessions = remaining, "HTTP server stopped");
        Ok(())
    }
}

async fn apply_config_updates(state: AppState, mut updates: mpsc::UnboundedReceiver<RelayConfig>) {
    while let Some(config) = updates.recv().await {
        let restart_needed = {
            let current = state.config.load();
            current.listener.bind_address != config.listener.bind_address
                || current.listener.max_sessions != config.listener.max_sessions
                || current.listener.tls != config.listener.tls
        };

        match state.apply_config(config) {
            Ok(()) => tracing::info!(
                identities = state.tunnel.load().identities().len(),
                "Configuration reloaded"
            ),
            Err(e) => tracing::error!(error = %e, "Rejected reloaded configuration"),
        }
        if restart_needed {
            tracing::warn!("Listener settings changed; they take effect after a restart");
        }
    }
}
