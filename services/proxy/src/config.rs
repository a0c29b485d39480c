//! services/proxy/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use reading_session_core::{TrackerConfig, MAX_DECIMAL_PLACES};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;
use tracing::Level;

/// One week. Longer inactivity windows are rejected.
const MAX_SESSION_TIMEOUT_MINUTES: u64 = 7 * 24 * 60;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub booklore_kosync_url: String,
    pub upstream_timeout: Duration,
    pub database_url: String,
    pub log_level: Level,
    pub session: TrackerConfig,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Upstream Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", "0.0.0.0:5000".parse::<SocketAddr>())?;

        let booklore_kosync_url = lookup("BOOKLORE_KOSYNC_URL")
            .unwrap_or_else(|| "http://booklore:6060/api/kosync".to_string())
            .trim_end_matches('/')
            .to_string();

        let upstream_timeout =
            Duration::from_secs(parse_or(&lookup, "UPSTREAM_TIMEOUT_SECONDS", Ok(10u64))?);

        // --- Session Tracking ---
        let timeout_minutes: u64 = parse_or(&lookup, "SESSION_TIMEOUT_MINUTES", Ok(10))?;
        if !(1..=MAX_SESSION_TIMEOUT_MINUTES).contains(&timeout_minutes) {
            return Err(ConfigError::InvalidValue(
                "SESSION_TIMEOUT_MINUTES".to_string(),
                format!("must be between 1 and {MAX_SESSION_TIMEOUT_MINUTES}"),
            ));
        }
        let timeout_secs = timeout_minutes.checked_mul(60).ok_or_else(|| {
            ConfigError::InvalidValue(
                "SESSION_TIMEOUT_MINUTES".to_string(),
                "too large".to_string(),
            )
        })?;

        let progress_decimal_places: u32 = parse_or(&lookup, "PROGRESS_DECIMAL_PLACES", Ok(1))?;
        if progress_decimal_places > MAX_DECIMAL_PLACES {
            return Err(ConfigError::InvalidValue(
                "PROGRESS_DECIMAL_PLACES".to_string(),
                format!("must be at most {MAX_DECIMAL_PLACES}"),
            ));
        }

        let session = TrackerConfig {
            inactivity_timeout: Duration::from_secs(timeout_secs),
            min_duration_seconds: parse_or(&lookup, "SESSION_MIN_DURATION_SECONDS", Ok(10))?,
            progress_decimal_places,
        };

        // --- Database ---
        let database_url = match lookup("DATABASE_URL") {
            Some(url) => url,
            None => {
                let host = lookup("DB_HOST").unwrap_or_else(|| "mariadb".to_string());
                let port: u16 = parse_or(&lookup, "DB_PORT", Ok(3306))?;
                let user = lookup("DB_USER").unwrap_or_else(|| "booklore".to_string());
                let password = lookup("DB_PASSWORD").unwrap_or_else(|| "password".to_string());
                let name = lookup("DB_NAME").unwrap_or_else(|| "booklore".to_string());
                format!("mysql://{user}:{password}@{host}:{port}/{name}")
            }
        };

        // --- Logging ---
        let log_level_str = lookup("RUST_LOG")
            .or_else(|| lookup("LOG_LEVEL"))
            .unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            bind_address,
            booklore_kosync_url,
            upstream_timeout,
            database_url,
            log_level,
            session,
        })
    }
}

/// Parses `name` when set, otherwise falls back to `default`.
fn parse_or<F, T>(lookup: &F, name: &str, default: Result<T, T::Err>) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        None => default.map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
    }
}
