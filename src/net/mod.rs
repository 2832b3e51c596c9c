//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → tls.rs (optional TLS handshake, via axum-server)
//!     → HTTP layer (upgrade or passthrough)
//!     → connection.rs (session admission, IDs, drain on shutdown)
//! ```
//!
//! # Design Decisions
//! - Admission is non-blocking: a full relay answers 503
//! - Each session tracked for graceful shutdown

pub mod connection;
pub mod tls;
