//! Configuration data types.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings
    #[serde(default)]
    pub global: GlobalConfig,

    /// Scrape endpoint settings
    #[serde(default)]
    pub server: ServerConfig,
}

/// Global configuration settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GlobalConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Scrape endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind; `+` or `*` binds every interface
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Port to bind
    #[serde(default = "default_port")]
    pub port: u16,

    /// Base path scrapes are served under
    #[serde(default = "default_path")]
    pub path: String,

    /// Serve over https (requires `tls`)
    #[serde(default)]
    pub use_https: bool,

    /// Certificate and key locations
    #[serde(default)]
    pub tls: Option<TlsConfig>,

    /// How long in-flight scrapes may run after stop
    #[serde(default = "default_drain_timeout", with = "humantime_serde")]
    pub drain_timeout: Duration,

    /// Collectors to register into the default registry; omitted means the
    /// process-stats collector, an empty list means none
    #[serde(default)]
    pub collectors: Option<Vec<CollectorKind>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            path: default_path(),
            use_https: false,
            tls: None,
            drain_timeout: default_drain_timeout(),
            collectors: None,
        }
    }
}

/// PEM certificate chain and private key files.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
}

/// Built-in collector kinds that can be named in configuration.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CollectorKind {
    ProcessStats,
}

// Default value functions

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Json
}

/// Wildcard bind token.
pub const WILDCARD_HOST: &str = "+";

/// Default base path.
pub const DEFAULT_PATH: &str = "metrics/";

/// Default drain timeout on stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

fn default_hostname() -> String {
    WILDCARD_HOST.to_string()
}

fn default_port() -> u16 {
    9102
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

fn default_drain_timeout() -> Duration {
    DEFAULT_DRAIN_TIMEOUT
}

/// Custom serde module for humantime durations.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
