//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment (UUID, PROXYIP, DNS_RESOLVER_URL)
//!     → loader.rs (parse, deserialize, apply overrides)
//!     → validation.rs (semantic checks)
//!     → RelayConfig (validated, immutable)
//!     → shared via Arc; each session snapshots it when accepted
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → atomic swap of Arc<RelayConfig>
//!     → new sessions observe new config, running sessions keep theirs
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_from_env, ConfigError};
pub use schema::RelayConfig;
pub use schema::{
    AuthConfig, DnsConfig, ListenerConfig, LogFormat, ObservabilityConfig, OutboundConfig,
    PassthroughConfig, TlsConfig,
};
pub use watcher::ConfigWatcher;
