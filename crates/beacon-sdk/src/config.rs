//! SDK configuration loaded from defaults, a TOML file and the environment.

use std::{path::{Path, PathBuf}, time::Duration};

use beacon_delivery::ClientConfig;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SdkError};

const CONFIG_FILE: &str = "beacon.toml";

const ENV_PREFIX: &str = "BEACON_";

/// Complete SDK configuration.
///
/// Loaded in priority order:
/// 1. `BEACON_`-prefixed environment variables (highest priority)
/// 2. Configuration file (`beacon.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// `server_url` and `app_key` have no usable default and must be supplied by
/// one of the other layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Base URL of the ingestion endpoint.
    ///
    /// Environment variable: `BEACON_SERVER_URL`
    #[serde(default)]
    pub server_url: String,
    /// Application key sent with every request.
    ///
    /// Environment variable: `BEACON_APP_KEY`
    #[serde(default)]
    pub app_key: String,
    /// SQLite database file holding queued requests and events.
    ///
    /// Environment variable: `BEACON_DATABASE_PATH`
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
    /// Pending events that trigger an immediate flush.
    ///
    /// Environment variable: `BEACON_EVENT_QUEUE_THRESHOLD`
    #[serde(default = "default_event_queue_threshold")]
    pub event_queue_threshold: usize,
    /// Seconds between heartbeat ticks.
    ///
    /// Environment variable: `BEACON_HEARTBEAT_INTERVAL_SECS`
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
    /// HTTP connect timeout in seconds.
    ///
    /// Environment variable: `BEACON_CONNECT_TIMEOUT_SECS`
    #[serde(default = "default_timeout")]
    pub connect_timeout_secs: u64,
    /// HTTP read timeout in seconds.
    ///
    /// Environment variable: `BEACON_READ_TIMEOUT_SECS`
    #[serde(default = "default_timeout")]
    pub read_timeout_secs: u64,
    /// PEM certificates to pin. Empty trusts the built-in roots.
    #[serde(default)]
    pub pinned_certificates: Vec<String>,
    /// Skip periodic session duration updates.
    ///
    /// Environment variable: `BEACON_DISABLE_UPDATE_SESSION_REQUESTS`
    #[serde(default)]
    pub disable_update_session_requests: bool,
    /// Log filter for the binary.
    ///
    /// Environment variable: `BEACON_RUST_LOG`
    #[serde(default = "default_log_level")]
    pub rust_log: String,
}

impl SdkConfig {
    /// Loads configuration from `beacon.toml` and the environment.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Configuration` if a layer cannot be parsed or the
    /// result fails validation.
    pub fn load() -> Result<Self> {
        Self::load_from(CONFIG_FILE)
    }

    /// Loads configuration using `path` as the TOML layer.
    ///
    /// A missing file is skipped.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Configuration` if a layer cannot be parsed or the
    /// result fails validation.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns `SdkError::Configuration` describing the first invalid value.
    pub fn validate(&self) -> Result<()> {
        if self.app_key.is_empty() {
            return Err(SdkError::configuration("app_key must be set"));
        }

        let url = Url::parse(&self.server_url)
            .map_err(|e| SdkError::configuration(format!("server_url is invalid: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(SdkError::configuration("server_url must use http or https"));
        }

        if self.event_queue_threshold == 0 {
            return Err(SdkError::configuration("event_queue_threshold must be greater than 0"));
        }

        if self.heartbeat_interval_secs == 0 {
            return Err(SdkError::configuration("heartbeat_interval_secs must be greater than 0"));
        }

        if self.connect_timeout_secs == 0 || self.read_timeout_secs == 0 {
            return Err(SdkError::configuration("timeouts must be greater than 0"));
        }

        Ok(())
    }

    /// Heartbeat period.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            read_timeout: Duration::from_secs(self.read_timeout_secs),
            pinned_certificates: self.pinned_certificates.clone(),
            ..ClientConfig::default()
        }
    }
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            app_key: String::new(),
            database_path: default_database_path(),
            event_queue_threshold: default_event_queue_threshold(),
            heartbeat_interval_secs: default_heartbeat_interval(),
            connect_timeout_secs: default_timeout(),
            read_timeout_secs: default_timeout(),
            pinned_certificates: Vec::new(),
            disable_update_session_requests: false,
            rust_log: default_log_level(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("beacon.db")
}

fn default_event_queue_threshold() -> usize {
    10
}

fn default_heartbeat_interval() -> u64 {
    60
}

fn default_timeout() -> u64 {
    30
}

fn default_log_level() -> String {
    "info,beacon=debug".to_string()
}
