//! Store configuration.
//!
//! A [`StoreConfig`] carries the defaults a store applies when a key does
//! not say otherwise: service name, accessibility, sync, access group and
//! the authentication scheme of network items. It is a plain value; build
//! one at startup (from TOML, the environment, or code) and hand it to
//! [`StoreIdentity::from_config`](crate::StoreIdentity::from_config).
//!
//! ```toml
//! service = "com.example.app"
//! accessibility = "when_unlocked"
//! synchronizable = false
//! access_group = "TEAMID.shared"
//! auth_scheme = "http_basic"
//! data_dir = "/var/lib/example"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::attributes::{Accessibility, AuthScheme};

const ENV_SERVICE: &str = "SECUREKV_SERVICE";
const ENV_ACCESS_GROUP: &str = "SECUREKV_ACCESS_GROUP";
const ENV_SYNCHRONIZABLE: &str = "SECUREKV_SYNCHRONIZABLE";
const ENV_DATA_DIR: &str = "SECUREKV_DATA_DIR";

/// Errors raised while loading a [`StoreConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Defaults consulted by a store when a key omits an explicit value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Service name of generic items.
    pub service: String,
    pub accessibility: Accessibility,
    pub synchronizable: bool,
    /// Sharing scope; `None` uses the application's default group.
    pub access_group: Option<String>,
    /// Authentication scheme of network items.
    pub auth_scheme: AuthScheme,
    /// Where the file-backed vault lives on platforms without a keychain.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            service: "securekv".to_string(),
            accessibility: Accessibility::AfterFirstUnlock,
            synchronizable: false,
            access_group: None,
            auth_scheme: AuthScheme::Default,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StoreConfig {
    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and parse a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %path.display(), service = %config.service, "loaded store config");
        Ok(config)
    }

    /// Apply `SECUREKV_*` environment variables on top of this config.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides looked up by variable name through `lookup`.
    pub fn apply_overrides_from(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(service) = lookup(ENV_SERVICE) {
            tracing::debug!(service = %service, "service overridden from environment");
            self.service = service;
        }
        if let Some(group) = lookup(ENV_ACCESS_GROUP) {
            self.access_group = (!group.is_empty()).then_some(group);
        }
        if let Some(sync) = lookup(ENV_SYNCHRONIZABLE) {
            self.synchronizable = parse_bool(&sync).ok_or_else(|| ConfigError::Invalid {
                field: "synchronizable",
                reason: format!("expected a boolean, got {sync:?}"),
            })?;
        }
        if let Some(dir) = lookup(ENV_DATA_DIR) {
            self.data_dir = PathBuf::from(dir);
        }
        self.validate()
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.service.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "service",
                reason: "must not be empty".to_string(),
            });
        }
        if self.access_group.as_deref().is_some_and(str::is_empty) {
            return Err(ConfigError::Invalid {
                field: "access_group",
                reason: "must not be empty when set".to_string(),
            });
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
