use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::detection::DEFAULT_BASELINE_COUNT;
use crate::geolocation::ip_api::DEFAULT_IP_API_URL;

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for loginwatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub geolocation: GeolocationConfig,
    pub detection: DetectionConfig,
    pub alerting: AlertConfig,
    pub input: InputConfig,
}

/// Login activity database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    pub path: PathBuf,
}

/// Which geolocation backend resolves login IPs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeoProvider {
    /// ip-api.com HTTP lookups
    IpApi,
    /// Local MaxMind GeoLite2-City database
    Maxmind,
    /// Geolocation disabled; every location is unknown
    None,
}

/// Geolocation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub provider: GeoProvider,
    /// Path to GeoLite2-City.mmdb (maxmind provider)
    pub maxmind_db_path: Option<PathBuf>,
    /// Base URL of the ip-api endpoint (ip-api provider)
    pub ip_api_url: String,
    /// Upper bound on a single lookup
    pub timeout_seconds: u64,
    /// How long successful lookups are cached; 0 disables the cache
    pub cache_ttl_seconds: u64,
}

/// Unusual-login detection configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Number of earliest logins that establish the usual country
    pub baseline_count: usize,
}

/// Alert delivery configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Deliver alerts at all
    pub enabled: bool,
    /// Pending alerts held before new ones are dropped
    pub queue_capacity: usize,
    /// Delivery attempts per alert, including the first
    pub max_attempts: u32,
    /// Delay before the first retry, doubled on each further retry
    pub retry_backoff_ms: u64,
    /// Product name used in the email subject
    pub product_name: String,
    pub email_relay: Option<EmailRelayConfig>,
    pub slack: Option<SlackConfig>,
    pub webhooks: Vec<WebhookConfig>,
}

/// HTTP mail relay that sends the alert email to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailRelayConfig {
    pub url: String,
    /// Sender address
    pub from: String,
    pub headers: Option<HashMap<String, String>>,
}

/// Slack incoming webhook for the security team
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlackConfig {
    pub webhook_url: String,
    pub channel: Option<String>,
    pub username: Option<String>,
}

/// Generic JSON webhook
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    /// "POST" (default) or "PUT"
    pub method: Option<String>,
    pub headers: Option<HashMap<String, String>>,
}

/// Authentication event feed consumed by the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// JSON-lines file of successful logins
    pub events_path: PathBuf,
    /// How often the file is polled for new lines
    pub poll_interval_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("loginwatch.db"),
        }
    }
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        GeolocationConfig {
            provider: GeoProvider::IpApi,
            maxmind_db_path: None,
            ip_api_url: DEFAULT_IP_API_URL.to_string(),
            timeout_seconds: 3,
            cache_ttl_seconds: 3600,
        }
    }
}

impl GeolocationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }
}

impl Default for DetectionConfig {
    fn default() -> Self {
        DetectionConfig {
            baseline_count: DEFAULT_BASELINE_COUNT,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        AlertConfig {
            enabled: true,
            queue_capacity: 100,
            max_attempts: 3,
            retry_backoff_ms: 500,
            product_name: "Loginwatch".to_string(),
            email_relay: None,
            slack: None,
            webhooks: Vec::new(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            events_path: PathBuf::from("logins.jsonl"),
            poll_interval_ms: 250,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the rest of the crate cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.detection.baseline_count == 0 {
            return Err(ConfigError::Invalid(
                "detection.baseline_count must be at least 1".to_string(),
            ));
        }
        if self.geolocation.timeout_seconds == 0 {
            return Err(ConfigError::Invalid(
                "geolocation.timeout_seconds must be at least 1".to_string(),
            ));
        }
        if self.geolocation.provider == GeoProvider::Maxmind
            && self.geolocation.maxmind_db_path.is_none()
        {
            return Err(ConfigError::Invalid(
                "geolocation.maxmind_db_path is required for the maxmind provider".to_string(),
            ));
        }
        if self.alerting.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "alerting.queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.alerting.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "alerting.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
