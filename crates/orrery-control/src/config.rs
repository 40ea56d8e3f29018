//! Configuration for orrery-control.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::{ControlError, ControlResult};

/// Top-level configuration for the control service.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ControlConfig {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Scheduler client configuration.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Job submission configuration.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// License authority configuration.
    #[serde(default)]
    pub license: LicenseConfig,

    /// Token signing configuration.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Blob storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

impl ControlConfig {
    /// Load configuration from the default sources.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Default values
    /// 2. `control.toml` in the current directory (if present)
    /// 3. Environment variables with `ORRERY_CONTROL_` prefix
    pub fn load() -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file("control.toml"))
            .merge(Env::prefixed("ORRERY_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }

    /// Load configuration from a specific TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> ControlResult<Self> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("ORRERY_CONTROL_").split("__"))
            .extract()
            .map_err(|e| ControlError::Config(e.to_string()))
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Request timeout in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8085)
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_database_url() -> String {
    "postgres://localhost/orrery".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_min_connections() -> u32 {
    1
}

const fn default_connect_timeout_secs() -> u64 {
    5
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Scheduler client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerConfig {
    /// Base URL for the scheduler HTTP API.
    #[serde(default = "default_scheduler_url")]
    pub url: String,

    /// Request timeout in seconds.
    #[serde(default = "default_scheduler_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_scheduler_url() -> String {
    "http://localhost:4646".to_owned()
}

const fn default_scheduler_timeout_secs() -> u64 {
    10
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            url: default_scheduler_url(),
            timeout_secs: default_scheduler_timeout_secs(),
        }
    }
}

/// Job submission configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct JobsConfig {
    /// Task driver the scheduler runs deployment jobs under.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Base URL jobs use to call back into this service.
    #[serde(default = "default_callback_url")]
    pub callback_url: String,
}

fn default_driver() -> String {
    "docker".to_owned()
}

fn default_callback_url() -> String {
    "http://localhost:8085".to_owned()
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            callback_url: default_callback_url(),
        }
    }
}

/// License authority configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LicenseConfig {
    /// Base URL of the license authority, if reached over HTTP.
    pub authority_url: Option<String>,

    /// License key for installs verified out of band.
    #[serde(default = "default_license_key")]
    pub key: String,

    /// CPU allocation ceiling for out-of-band installs.
    #[serde(default = "default_cpu_limit")]
    pub cpu_limit: u64,
}

fn default_license_key() -> String {
    "unlicensed".to_owned()
}

const fn default_cpu_limit() -> u64 {
    24_000
}

impl Default for LicenseConfig {
    fn default() -> Self {
        Self {
            authority_url: None,
            key: default_license_key(),
            cpu_limit: default_cpu_limit(),
        }
    }
}

/// Token signing configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Secret for user tokens issued by the identity service.
    #[serde(default = "default_secret")]
    pub user_secret: String,

    /// Secret for job tokens issued by this service.
    #[serde(default = "default_secret")]
    pub job_secret: String,
}

fn default_secret() -> String {
    "insecure-development-secret".to_owned()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            user_secret: default_secret(),
            job_secret: default_secret(),
        }
    }
}

/// Blob storage configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Shared directory for job configuration documents.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("/var/lib/orrery")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: default_storage_root(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ControlConfig::default();
        assert_eq!(config.server.listen_addr.port(), 8085);
        assert_eq!(config.database.max_connections, 10);
        assert_eq!(config.scheduler.url, "http://localhost:4646");
        assert_eq!(config.jobs.driver, "docker");
        assert!(config.license.authority_url.is_none());
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            [server]
            listen_addr = "127.0.0.1:9000"

            [database]
            url = "postgres://user:pass@db:5432/orrery"
            max_connections = 20

            [license]
            authority_url = "http://license:7070"
            cpu_limit = 48000

            [auth]
            job_secret = "job-secret"
        "#;

        let config: ControlConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.listen_addr.port(), 9000);
        assert_eq!(config.database.url, "postgres://user:pass@db:5432/orrery");
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(
            config.license.authority_url.as_deref(),
            Some("http://license:7070")
        );
        assert_eq!(config.license.cpu_limit, 48_000);
        assert_eq!(config.auth.job_secret, "job-secret");
        // Unset sections fall back to defaults.
        assert_eq!(config.jobs.driver, "docker");
    }
}
