//! Configuration for the station server
//!
//! Layered as: built-in defaults, optional config file, then `STATION__*`
//! environment variables (e.g. `STATION__RECONCILER__THRESHOLD=10`).
//! The server binary applies CLI flags on top.

use crate::reconciler::{OverlapPolicy, ReconcilerConfig, DEFAULT_THRESHOLD};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub reconciler: ReconcilerSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory served under /static
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            static_dir: default_static_dir(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl ServerConfig {
    /// `host:port`; the host may be a name, it is resolved at bind time
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_threshold")]
    pub threshold: usize,

    #[serde(default = "default_true")]
    pub align_to_wall_clock: bool,

    /// Let a new tick start while the previous one is still running
    #[serde(default)]
    pub allow_overlap: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval(),
            threshold: default_threshold(),
            align_to_wall_clock: true,
            allow_overlap: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_static_dir() -> String {
    "web/public".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_database_path() -> String {
    "stations.db".to_string()
}

fn default_interval() -> u64 {
    60
}

fn default_threshold() -> usize {
    DEFAULT_THRESHOLD
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from defaults, an optional file and the environment
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&AppConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(true));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("STATION")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        let settings = &self.reconciler;
        ReconcilerConfig {
            interval: Duration::from_secs(settings.interval_secs.max(1)),
            threshold: settings.threshold,
            align_to_wall_clock: settings.align_to_wall_clock,
            overlap: if settings.allow_overlap {
                OverlapPolicy::Allow
            } else {
                OverlapPolicy::Skip
            },
        }
    }
}
