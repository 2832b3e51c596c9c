//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the tunnel relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, TLS, session limit).
    pub listener: ListenerConfig,

    /// Allowed identities.
    pub auth: AuthConfig,

    /// Outbound TCP relay settings (fallback hosts, connect deadline).
    pub relay: OutboundConfig,

    /// DNS-over-HTTPS settings for the UDP/53 path.
    pub dns: DnsConfig,

    /// Handling of plain (non-upgrade) HTTP requests.
    pub passthrough: PassthroughConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent tunnel sessions.
    pub max_sessions: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_sessions: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Identity configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    /// Allowed identities in canonical dashed form. An entry may itself be a
    /// comma-separated list.
    pub identities: Vec<String>,
}

/// Outbound relay configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutboundConfig {
    /// Relay hosts used when the requested destination yields no data.
    pub fallback_hosts: Vec<String>,

    /// Retry to the original address when no fallback host is configured.
    pub retry_without_fallback: bool,

    /// Outbound connect deadline in seconds (0 disables the deadline).
    pub connect_timeout_secs: u64,

    /// Read buffer size for the outbound socket.
    pub buffer_size: usize,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            fallback_hosts: Vec::new(),
            retry_without_fallback: true,
            connect_timeout_secs: 0,
            buffer_size: 16 * 1024,
        }
    }
}

/// DNS-over-HTTPS configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DnsConfig {
    /// DoH endpoint receiving `application/dns-message` POSTs.
    pub doh_url: String,

    /// Per-query timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            doh_url: "https://1.1.1.1/dns-query".to_string(),
            timeout_secs: 10,
        }
    }
}

/// Passthrough configuration for non-tunnel requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PassthroughConfig {
    /// Sites that unmatched requests are reverse-proxied to (one is picked at random).
    pub fallback_sites: Vec<String>,

    /// Host contacted by the `/connect` probe.
    pub probe_host: String,

    /// Port contacted by the `/connect` probe.
    pub probe_port: u16,

    /// Request timeout (total time for request/response) in seconds.
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for PassthroughConfig {
    fn default() -> Self {
        Self {
            fallback_sites: Vec::new(),
            probe_host: "cloudflare.com".to_string(),
            probe_port: 80,
            request_timeout_secs: 30,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
