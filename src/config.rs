#![allow(dead_code)]
use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use validator::Validate;

use crate::domain::station::StationProfile;

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AppConfig {
    #[validate(nested)]
    pub server: ServerConfig,

    #[validate(nested)]
    pub csms: CsmsServerConfig,

    #[validate(nested)]
    pub auth: AuthConfig,

    #[validate(nested)]
    pub fleet: FleetConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

/// Control API HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct ServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    #[serde(default)]
    pub enable_cors: bool,

    #[serde(default)]
    pub enable_compression: bool,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse control API socket address")
    }
}

/// CSMS WebSocket server configuration (C4).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct CsmsServerConfig {
    #[validate(length(min = 1))]
    pub host: String,

    #[validate(range(min = 1, max = 65535))]
    pub port: u16,

    #[serde(default = "default_heartbeat_interval_secs")]
    #[validate(range(min = 1, max = 86400))]
    pub heartbeat_interval_secs: i64,

    /// Accept a reconnecting station even if a session is already
    /// registered for its id, replacing the old one instead of rejecting.
    #[serde(default)]
    pub replace_existing_sessions: bool,

    /// idTags that `Authorize`/`StartTransaction` must always reject.
    #[serde(default)]
    pub id_tag_blocklist: Vec<String>,
}

impl CsmsServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .context("failed to parse CSMS socket address")
    }
}

/// Control API bearer-token authentication.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct AuthConfig {
    #[validate(length(min = 32))]
    pub token: String,
}

/// Fleet defaults and the named station-profile library (spec §6.2).
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[validate(schema(function = "validate_fleet_config"))]
pub struct FleetConfig {
    #[validate(range(min = 0, max = 10_000))]
    pub default_count: usize,

    #[validate(length(min = 1))]
    pub default_profile: String,

    #[validate(range(min = 0.0, max = 100_000.0))]
    pub initial_price: f64,

    #[serde(default = "default_station_profiles")]
    pub profiles: HashMap<String, StationProfile>,
}

fn validate_fleet_config(config: &FleetConfig) -> Result<(), validator::ValidationError> {
    if !config.profiles.contains_key(&config.default_profile) {
        return Err(validator::ValidationError::new(
            "default_profile must name an entry in profiles",
        ));
    }
    Ok(())
}

fn default_station_profiles() -> HashMap<String, StationProfile> {
    let mut profiles = HashMap::new();
    profiles.insert("default".to_string(), StationProfile::default_named("default"));
    profiles
}

/// Logging and observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default)]
    pub log_file: Option<PathBuf>,
}

// Default value functions
fn default_max_connections() -> usize {
    1000
}
fn default_request_timeout_secs() -> u64 {
    30
}
fn default_heartbeat_interval_secs() -> i64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from TOML files and environment variables.
    ///
    /// Configuration is loaded in this order (later overrides earlier):
    /// 1. config/default.toml (base configuration)
    /// 2. config/development.toml or config/production.toml (environment-specific)
    /// 3. Environment variables with OEC__ prefix
    pub fn load() -> Result<Self> {
        Self::load_with_env(None)
    }

    /// Load configuration with a specific environment override.
    pub fn load_with_env(environment: Option<&str>) -> Result<Self> {
        let mut figment = Figment::new().merge(Toml::file("config/default.toml"));

        if let Some(env) = environment {
            let env_file = format!("config/{}.toml", env);
            figment = figment.merge(Toml::file(env_file));
        } else {
            figment = figment.merge(Toml::file("config/development.toml").nested());
        }

        // Override with environment variables (OEC__CSMS__PORT -> csms.port)
        figment = figment.merge(Env::prefixed("OEC__").split("__"));

        let config: AppConfig = figment.extract().context("failed to parse configuration")?;

        config.validate().context("configuration validation failed")?;

        Ok(config)
    }

    /// Validate configuration without loading from files.
    pub fn validate_config(self) -> Result<Self> {
        self.validate().context("configuration validation failed")?;
        Ok(self)
    }
}

pub type Config = AppConfig;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_socket_addr() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 1000,
            request_timeout_secs: 30,
            enable_cors: false,
            enable_compression: true,
        };

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn test_csms_config_socket_addr() {
        let config = CsmsServerConfig {
            host: "0.0.0.0".to_string(),
            port: 9000,
            heartbeat_interval_secs: 300,
            replace_existing_sessions: false,
            id_tag_blocklist: vec![],
        };

        let addr = config.socket_addr().unwrap();
        assert_eq!(addr.port(), 9000);
    }

    #[test]
    fn test_fleet_config_requires_default_profile_to_exist() {
        let config = FleetConfig {
            default_count: 1,
            default_profile: "default".to_string(),
            initial_price: 20.0,
            profiles: default_station_profiles(),
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fleet_config_rejects_missing_default_profile() {
        let config = FleetConfig {
            default_count: 1,
            default_profile: "does-not-exist".to_string(),
            initial_price: 20.0,
            profiles: default_station_profiles(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_auth_config_rejects_short_token() {
        let config = AuthConfig { token: "short".to_string() };
        assert!(config.validate().is_err());
    }
}
