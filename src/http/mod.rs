//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, tracing, limits)
//!     → tunnel.rs (Upgrade: websocket → tunnel session)
//!     → passthrough.rs (/info, /connect, reverse proxy to fallback sites)
//! ```

pub mod passthrough;
pub mod server;
pub mod tunnel;

pub use server::{AppState, HttpServer, ServerError};
