//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Identities are canonical dashed UUIDs
//! - Validate addresses and URLs before the relay accepts traffic
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::RelayConfig;
use crate::protocol::identity::split_entries;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("auth.identities is empty")]
    NoIdentities,

    #[error("identity '{0}' is not a lower-case dashed UUID")]
    InvalidIdentity(String),

    #[error("{field}: invalid socket address '{value}'")]
    InvalidAddress { field: &'static str, value: String },

    #[error("dns.doh_url: {0}")]
    InvalidDohUrl(String),

    #[error("{field}: entry must not be empty")]
    EmptyEntry { field: &'static str },

    #[error("{field}: value out of range")]
    OutOfRange { field: &'static str },
}

/// Validate a configuration, collecting every failure.
pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let identities: Vec<&str> = split_entries(&config.auth.identities).collect();
    if identities.is_empty() {
        errors.push(ValidationError::NoIdentities);
    }
    for id in identities {
        if !is_canonical_uuid(id) {
            errors.push(ValidationError::InvalidIdentity(id.to_string()));
        }
    }

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_sessions == 0 {
        errors.push(ValidationError::OutOfRange { field: "listener.max_sessions" });
    }

    if config.relay.buffer_size < 1024 {
        errors.push(ValidationError::OutOfRange { field: "relay.buffer_size" });
    }
    if config.relay.fallback_hosts.iter().any(|h| h.trim().is_empty()) {
        errors.push(ValidationError::EmptyEntry { field: "relay.fallback_hosts" });
    }

    match url::Url::parse(&config.dns.doh_url) {
        Ok(url) if url.scheme() == "https" || url.scheme() == "http" => {}
        Ok(url) => errors.push(ValidationError::InvalidDohUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        ))),
        Err(e) => errors.push(ValidationError::InvalidDohUrl(e.to_string())),
    }
    if config.dns.timeout_secs == 0 {
        errors.push(ValidationError::OutOfRange { field: "dns.timeout_secs" });
    }

    if config.passthrough.fallback_sites.iter().any(|s| s.trim().is_empty()) {
        errors.push(ValidationError::EmptyEntry { field: "passthrough.fallback_sites" });
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// True when `s` is exactly the lower-case hyphenated rendering of a UUID.
fn is_canonical_uuid(s: &str) -> bool {
    match uuid::Uuid::try_parse(s) {
        Ok(parsed) => parsed.hyphenated().to_string() == s,
        Err(_) => false,
    }
}
