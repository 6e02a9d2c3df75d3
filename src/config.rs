//! Store configuration.
//!
//! Backend selection is decided once, when a `Store` is built from a
//! `StoreConfig`: the mere presence of a REST or PostgreSQL credential picks
//! the primary backend. Adapters never look at the environment themselves.

use crate::db::BackendKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_DATABASE_URL: &str = "DATABASE_URL";
pub const ENV_REST_URL: &str = "REST_API_URL";
pub const ENV_REST_KEY: &str = "REST_API_KEY";
pub const ENV_SQLITE_PATH: &str = "STORE_SQLITE_PATH";
pub const ENV_ADMIN_PASSWORD_HASH: &str = "ADMIN_PASSWORD_HASH";
pub const ENV_LOCAL_FALLBACK: &str = "STORE_LOCAL_FALLBACK";

const REST_TIMEOUT_MIN_SECS: u64 = 1;
const REST_TIMEOUT_MAX_SECS: u64 = 9;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Embedded database file, always available as the last resort.
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
    /// Remote PostgreSQL. When present it is authoritative.
    #[serde(default)]
    pub network: Option<NetworkConfig>,
    /// PostgREST-style data API. When present it is the preferred backend.
    #[serde(default)]
    pub rest: Option<RestConfig>,
    #[serde(default)]
    pub admin: AdminSeed,
    /// Let an unreachable PostgreSQL fall back to the local file.
    /// Off by default: the local file may be ephemeral and writes would be lost.
    #[serde(default)]
    pub local_fallback_when_remote_down: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// libpq key/value string or `postgres://` URL.
    #[serde(skip_serializing, default)]
    pub url: String,
    #[serde(default)]
    pub ssl_mode: SslMode,
    /// Accept invalid/self-signed certificates.
    /// Managed poolers commonly present certificates that fail hostname checks.
    #[serde(default = "default_true")]
    pub accept_invalid_certs: bool,
    /// Optional path to a custom CA certificate file (PEM format).
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// SSL/TLS connection modes for PostgreSQL.
///
/// - `Disable`: No SSL (unencrypted)
/// - `Prefer`: Try SSL first, fall back to non-SSL
/// - `Require`: Require SSL; verification follows `accept_invalid_certs` (default)
/// - `VerifyFull`: Require SSL and always verify the certificate and hostname
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SslMode {
    Disable,
    Prefer,
    #[default]
    Require,
    VerifyFull,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestConfig {
    /// Resource root, e.g. `https://project.example.co/rest/v1`.
    pub base_url: String,
    #[serde(skip_serializing, default)]
    pub api_key: String,
    #[serde(default = "default_rest_timeout_secs")]
    pub timeout_secs: u64,
}

/// Administrative account created on an empty accounts table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminSeed {
    #[serde(default = "default_admin_nome")]
    pub nome: String,
    #[serde(default = "default_admin_username")]
    pub username: String,
    /// Hash produced by the authentication layer. `!` never verifies,
    /// leaving the seeded account locked until a real hash is configured.
    #[serde(skip_serializing, default = "default_admin_password_hash")]
    pub password_hash: String,
}

/// Which adapters a store consults, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub primary: BackendKind,
    pub fallback: Option<BackendKind>,
}

fn default_true() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_rest_timeout_secs() -> u64 {
    5
}

fn default_admin_nome() -> String {
    String::from("Administrador")
}

fn default_admin_username() -> String {
    String::from("admin")
}

fn default_admin_password_hash() -> String {
    String::from("!")
}

pub fn default_sqlite_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("propstore")
        .join("clients.db")
}

impl Default for AdminSeed {
    fn default() -> Self {
        Self {
            nome: default_admin_nome(),
            username: default_admin_username(),
            password_hash: default_admin_password_hash(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_sqlite_path(),
            network: None,
            rest: None,
            admin: AdminSeed::default(),
            local_fallback_when_remote_down: false,
        }
    }
}

impl NetworkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ssl_mode: SslMode::default(),
            accept_invalid_certs: true,
            ca_cert_path: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

impl RestConfig {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs: default_rest_timeout_secs(),
        }
    }

    /// Request timeout, clamped to single-digit seconds.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(
            self.timeout_secs
                .clamp(REST_TIMEOUT_MIN_SECS, REST_TIMEOUT_MAX_SECS),
        )
    }
}

impl StoreConfig {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: StoreConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Build from process environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as absent.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut config = StoreConfig::default();
        if let Some(path) = get(ENV_SQLITE_PATH) {
            config.sqlite_path = PathBuf::from(path);
        }
        config.network = get(ENV_DATABASE_URL).map(NetworkConfig::new);
        config.rest = match (get(ENV_REST_URL), get(ENV_REST_KEY)) {
            (Some(url), Some(key)) => Some(RestConfig::new(url, key)),
            _ => None,
        };
        if let Some(hash) = get(ENV_ADMIN_PASSWORD_HASH) {
            config.admin.password_hash = hash;
        }
        config.local_fallback_when_remote_down = get(ENV_LOCAL_FALLBACK)
            .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        config
    }

    /// Overlay the network/REST credentials from the environment on a file config.
    pub fn with_env_credentials(self) -> Self {
        self.with_credentials_from(|key| std::env::var(key).ok())
    }

    /// Fill in the network/REST credentials a file config left out, reading
    /// the same keys as [`StoreConfig::from_lookup`].
    pub fn with_credentials_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let found = Self::from_lookup(lookup);
        if self.network.is_none() {
            self.network = found.network;
        }
        if self.rest.is_none() {
            self.rest = found.rest;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(rest) = &self.rest {
            if rest.base_url.trim().is_empty() {
                return Err(ConfigError::Invalid("rest.base_url is empty".into()));
            }
            if !rest.base_url.starts_with("http://") && !rest.base_url.starts_with("https://") {
                return Err(ConfigError::Invalid(format!(
                    "rest.base_url must be an http(s) URL, got {:?}",
                    rest.base_url
                )));
            }
        }
        if let Some(network) = &self.network {
            if network.url.trim().is_empty() {
                return Err(ConfigError::Invalid("network.url is empty".into()));
            }
        }
        Ok(())
    }

    /// Primary and fallback backends implied by the configured credentials.
    pub fn selection(&self) -> Selection {
        match (&self.rest, &self.network) {
            (Some(_), Some(_)) => Selection {
                primary: BackendKind::Rest,
                fallback: Some(BackendKind::Network),
            },
            (Some(_), None) => Selection {
                primary: BackendKind::Rest,
                fallback: Some(BackendKind::File),
            },
            (None, Some(_)) => Selection {
                primary: BackendKind::Network,
                fallback: self
                    .local_fallback_when_remote_down
                    .then_some(BackendKind::File),
            },
            (None, None) => Selection {
                primary: BackendKind::File,
                fallback: None,
            },
        }
    }
}
