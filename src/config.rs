//! Configuration loading for the portal server.
//!
//! Every field has a default, so an absent file yields a memory-backed
//! server on `127.0.0.1:3000`.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_ENV: &str = "PORTAL_CONFIG";

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct PortalConfig {
    pub bind_addr: String,
    pub request_timeout_ms: u64,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(deny_unknown_fields, default)]
pub struct BackendConfig {
    pub kind: BackendKind,
    /// Memory backend: file the tables are written through to.
    pub snapshot_path: Option<PathBuf>,
    /// Rest backend: project URL of the hosted service.
    pub url: Option<String>,
    pub api_key: Option<String>,
    /// Object storage bucket for file-link column uploads.
    pub bucket: String,
    /// Memory backend: prefix for returned file URLs.
    pub public_url_base: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Memory,
    Rest,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            bind_addr: "127.0.0.1:3000".to_string(),
            request_timeout_ms: 10_000,
            backend: BackendConfig::default(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: BackendKind::Memory,
            snapshot_path: None,
            url: None,
            api_key: None,
            bucket: "attachments".to_string(),
            public_url_base: None,
        }
    }
}

impl PortalConfig {
    /// Loads from the first CLI argument, else `PORTAL_CONFIG`, else defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::args()
            .nth(1)
            .map(PathBuf::from)
            .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
        let config = match path {
            Some(path) => Self::from_path(&path)?,
            None => PortalConfig::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_addr.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "bind_addr",
                reason: "must not be empty".to_string(),
            });
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request_timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.backend.bucket.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "backend.bucket",
                reason: "must not be empty".to_string(),
            });
        }
        if self.backend.kind == BackendKind::Rest {
            if self.backend.url.as_deref().map_or(true, |u| u.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "backend.url",
                    reason: "required for the rest backend".to_string(),
                });
            }
            if self.backend.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: "backend.api_key",
                    reason: "required for the rest backend".to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = PortalConfig::from_toml("").unwrap();
        assert_eq!(config, PortalConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn rest_backend_needs_credentials() {
        let config = PortalConfig::from_toml(
            r#"
            [backend]
            kind = "rest"
            url = "https://example.supabase.co"
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "backend.api_key", .. })
        ));
    }

    #[test]
    fn zero_timeout_is_invalid() {
        let config = PortalConfig::from_toml("request_timeout_ms = 0").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(matches!(
            PortalConfig::from_toml("port = 80"),
            Err(ConfigError::Parse(_))
        ));
    }
}
