//! Client configuration: defaults, JSON file loading, environment loading.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::translate::cache::DEFAULT_CACHE_SIZE;

pub const DEFAULT_ENDPOINT: &str = "https://api.livei18n.com";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_key: String,
    pub account_id: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub default_language: Option<String>,
    /// Coalesce cache misses into batch calls. Fixed for the client's lifetime.
    #[serde(default = "default_true")]
    pub batch_requests: bool,
    #[serde(default = "default_cache_size")]
    pub cache_max_entries: usize,
    #[serde(default = "default_ttl_hours")]
    pub cache_ttl_hours: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Emit queue and cache-path diagnostics at debug level.
    #[serde(default)]
    pub debug: bool,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size() -> usize {
    DEFAULT_CACHE_SIZE
}

fn default_ttl_hours() -> u64 {
    1
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("api_key", &"<redacted>")
            .field("account_id", &self.account_id)
            .field("endpoint", &self.endpoint)
            .field("default_language", &self.default_language)
            .field("batch_requests", &self.batch_requests)
            .field("cache_max_entries", &self.cache_max_entries)
            .field("cache_ttl_hours", &self.cache_ttl_hours)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("debug", &self.debug)
            .finish()
    }
}

impl ClientConfig {
    pub fn new(api_key: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            account_id: account_id.into(),
            endpoint: default_endpoint(),
            default_language: None,
            batch_requests: true,
            cache_max_entries: DEFAULT_CACHE_SIZE,
            cache_ttl_hours: default_ttl_hours(),
            request_timeout_ms: default_request_timeout_ms(),
            debug: false,
        }
    }

    /// Load from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `RELAYTEXT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |var: &'static str| {
            lookup(var)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing(var))
        };
        let mut config = Self::new(required("RELAYTEXT_API_KEY")?, required("RELAYTEXT_ACCOUNT_ID")?);

        if let Some(endpoint) = lookup("RELAYTEXT_ENDPOINT") {
            config.endpoint = endpoint;
        }
        config.default_language = lookup("RELAYTEXT_DEFAULT_LANGUAGE").filter(|v| !v.is_empty());
        if let Some(raw) = lookup("RELAYTEXT_BATCH") {
            config.batch_requests = parse_flag("RELAYTEXT_BATCH", &raw)?;
        }
        if let Some(raw) = lookup("RELAYTEXT_CACHE_SIZE") {
            config.cache_max_entries = parse_number("RELAYTEXT_CACHE_SIZE", &raw)?;
        }
        if let Some(raw) = lookup("RELAYTEXT_CACHE_TTL_HOURS") {
            config.cache_ttl_hours = parse_number("RELAYTEXT_CACHE_TTL_HOURS", &raw)?;
        }
        if let Some(raw) = lookup("RELAYTEXT_DEBUG") {
            config.debug = parse_flag("RELAYTEXT_DEBUG", &raw)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::Missing("api_key"));
        }
        if self.account_id.trim().is_empty() {
            return Err(ConfigError::Missing("account_id"));
        }
        if self.cache_max_entries == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_max_entries",
                reason: "must be greater than 0".into(),
            });
        }
        if self.cache_ttl_hours == 0 {
            return Err(ConfigError::Invalid {
                field: "cache_ttl_hours",
                reason: "must be greater than 0".into(),
            });
        }
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                field: "endpoint",
                reason: format!("expected an http(s) URL, got {:?}", self.endpoint),
            });
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 3600)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn parse_flag(field: &'static str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::Invalid {
            field,
            reason: format!("expected a boolean, got {other:?}"),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(field: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn json_defaults_fill_optional_fields() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_key":"k","account_id":"acct"}"#).unwrap();
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
        assert!(config.batch_requests);
        assert_eq!(config.cache_max_entries, 500);
        assert_eq!(config.cache_ttl(), Duration::from_secs(3600));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn env_overrides() {
        let config = ClientConfig::from_lookup(env(&[
            ("RELAYTEXT_API_KEY", "secret"),
            ("RELAYTEXT_ACCOUNT_ID", "acct-9"),
            ("RELAYTEXT_ENDPOINT", "http://localhost:8080"),
            ("RELAYTEXT_DEFAULT_LANGUAGE", "es-MX"),
            ("RELAYTEXT_BATCH", "off"),
            ("RELAYTEXT_CACHE_SIZE", "42"),
            ("RELAYTEXT_CACHE_TTL_HOURS", "6"),
            ("RELAYTEXT_DEBUG", "1"),
        ]))
        .unwrap();
        assert_eq!(config.account_id, "acct-9");
        assert_eq!(config.endpoint, "http://localhost:8080");
        assert_eq!(config.default_language.as_deref(), Some("es-MX"));
        assert!(!config.batch_requests);
        assert_eq!(config.cache_max_entries, 42);
        assert_eq!(config.cache_ttl_hours, 6);
        assert!(config.debug);
    }

    #[test]
    fn env_missing_key_is_reported() {
        let err = ClientConfig::from_lookup(env(&[("RELAYTEXT_ACCOUNT_ID", "acct")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("RELAYTEXT_API_KEY")));
    }

    #[test]
    fn env_bad_number_is_reported() {
        let err = ClientConfig::from_lookup(env(&[
            ("RELAYTEXT_API_KEY", "k"),
            ("RELAYTEXT_ACCOUNT_ID", "a"),
            ("RELAYTEXT_CACHE_SIZE", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "RELAYTEXT_CACHE_SIZE", .. }));
    }

    #[test]
    fn validate_rejects_zero_capacity_and_bad_endpoint() {
        let mut config = ClientConfig::new("k", "a");
        config.cache_max_entries = 0;
        assert!(config.validate().is_err());

        let mut config = ClientConfig::new("k", "a");
        config.endpoint = "ftp://example.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let rendered = format!("{:?}", ClientConfig::new("super-secret", "acct"));
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("acct"));
    }
}
