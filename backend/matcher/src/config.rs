//! Application configuration loaded from environment variables.

use crate::errors::{EngineError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite database location (e.g. `sqlite:./matcher.db`)
    pub database_url: String,
    /// Upper bound on pooled SQLite connections
    pub db_max_connections: u32,
    /// Port for the REST API server
    pub api_port: u16,
    /// How often (in seconds) the emergency sweep rescans available donations
    pub sweep_interval_secs: u64,
    /// How often (in seconds) the expiry reaper reclaims past-deadline donations
    pub reap_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./matcher.db".to_string()),
            db_max_connections: parse_or("DB_MAX_CONNECTIONS", 5)?,
            api_port: parse_or("API_PORT", 3000)?,
            sweep_interval_secs: parse_or("SWEEP_INTERVAL_SECS", 60)?,
            reap_interval_secs: parse_or("REAP_INTERVAL_SECS", 300)?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| EngineError::Config(format!("Missing env var: {key}")))
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match env_var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EngineError::Config(format!("Invalid {key}: {raw:?}"))),
        Err(_) => Ok(default),
    }
}
