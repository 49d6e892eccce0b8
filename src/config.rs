//! Layered service configuration.
//!
//! Sources, highest priority first:
//! 1. `TIMETABLED_*` environment variables (`__` separates sections, so
//!    `TIMETABLED_AUTH__JWT_SECRET` maps to `auth.jwt_secret`)
//! 2. the TOML file named by `TIMETABLED_CONFIG`, else `./timetabled.toml`
//! 3. built-in defaults
//!
//! The loaded [`ServiceConfig`] is built once in `main` and handed down by
//! reference; nothing else reads the environment.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Figment(#[from] Box<figment::Error>),

    #[error("configuration value '{field}' is not set")]
    NotConfigured { field: &'static str },

    #[error("invalid configuration value for '{field}': {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

const fn default_workers() -> usize {
    4
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_token_ttl_hours() -> i64 {
    12
}

const fn default_max_periods() -> u8 {
    8
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_db_path() -> PathBuf {
    PathBuf::from("timetable.sqlite3")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Worker threads, each with its own database connection.
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workers: default_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
    /// How long a writer waits for the SQLite write lock before the request
    /// fails with `storage_unavailable`.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Shared HMAC secret used by the credential issuer.
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_hours: default_token_ttl_hours(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_max_periods")]
    pub max_periods: u8,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            max_periods: default_max_periods(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

impl ServiceConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let config: Self = Self::figment().extract().map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    pub fn figment() -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        let file = std::env::var_os("TIMETABLED_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("timetabled.toml"));
        if file.exists() {
            figment = figment.merge(Toml::file(file));
        }

        figment.merge(
            Env::prefixed("TIMETABLED_")
                .ignore(&["CONFIG", "LOG"])
                .split("__"),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(ConfigError::NotConfigured {
                field: "auth.jwt_secret",
            });
        }
        if self.auth.token_ttl_hours <= 0 {
            return Err(ConfigError::InvalidValue {
                field: "auth.token_ttl_hours",
                reason: "must be positive".into(),
            });
        }
        if self.schedule.max_periods == 0 {
            return Err(ConfigError::InvalidValue {
                field: "schedule.max_periods",
                reason: "must be at least 1".into(),
            });
        }
        if self.server.workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.workers",
                reason: "must be at least 1".into(),
            });
        }
        Ok(())
    }
}
