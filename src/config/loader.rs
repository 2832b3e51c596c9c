//! Configuration loading from disk and environment.

use std::path::Path;
use std::fs;
use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Environment variable carrying comma-separated identities.
pub const ENV_IDENTITIES: &str = "UUID";
/// Environment variable carrying comma-separated fallback relay hosts.
pub const ENV_FALLBACK_HOSTS: &str = "PROXYIP";
/// Environment variable carrying the DoH endpoint.
pub const ENV_DOH_URL: &str = "DNS_RESOLVER_URL";

/// Load and validate configuration from a TOML file, applying environment overrides.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let mut config: RelayConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Build a configuration from defaults plus environment overrides only.
pub fn load_from_env() -> Result<RelayConfig, ConfigError> {
    let mut config = RelayConfig::default();
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Overlay environment values on top of a parsed configuration.
///
/// Empty values are ignored so an exported-but-blank variable does not wipe
/// the file's settings.
pub fn apply_env_overrides<F>(config: &mut RelayConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    if let Some(ids) = non_empty(ENV_IDENTITIES) {
        config.auth.identities = vec![ids];
    }
    if let Some(hosts) = non_empty(ENV_FALLBACK_HOSTS) {
        config.relay.fallback_hosts = hosts
            .split(',')
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect();
    }
    if let Some(url) = non_empty(ENV_DOH_URL) {
        config.dns.doh_url = url.trim().to_string();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    const ID: &str = "78829655-59f6-466b-897d-ea351d4ec82b";

    #[test]
    fn loads_file_and_validates() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[auth]\nidentities = [\"{ID}\"]\n\n[relay]\nfallback_hosts = [\"relay.example\"]"
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.relay.fallback_hosts, vec!["relay.example".to_string()]);
    }

    #[test]
    fn parse_error_is_reported() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[auth\nidentities = 3").unwrap();
        assert!(matches!(load_config(file.path()), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn env_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_IDENTITIES, ID),
            (ENV_FALLBACK_HOSTS, "a.example, b.example,"),
            (ENV_DOH_URL, "https://dns.google/dns-query"),
        ]
        .into_iter()
        .collect();

        let mut config = RelayConfig::default();
        config.relay.fallback_hosts = vec!["old.example".to_string()];
        apply_env_overrides(&mut config, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.auth.identities, vec![ID.to_string()]);
        assert_eq!(
            config.relay.fallback_hosts,
            vec!["a.example".to_string(), "b.example".to_string()]
        );
        assert_eq!(config.dns.doh_url, "https://dns.google/dns-query");
    }

    #[test]
    fn blank_env_values_are_ignored() {
        let mut config = RelayConfig::default();
        config.dns.doh_url = "https://keep.example/dns-query".to_string();
        apply_env_overrides(&mut config, |_| Some("  ".to_string()));
        assert_eq!(config.dns.doh_url, "https://keep.example/dns-query");
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = ConfigError::Validation(vec![
            ValidationError::NoIdentities,
            ValidationError::OutOfRange { field: "relay.buffer_size" },
        ]);
        assert_eq!(
            err.to_string(),
            "Validation failed: auth.identities is empty, relay.buffer_size: value out of range"
        );
    }
}
