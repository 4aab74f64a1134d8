//! Application configuration loaded from environment variables.

use crate::errors::{CoreError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the SQLite database file
    pub database_url: String,
    /// Base URL of the character-identity API (TibiaData-compatible)
    pub identity_api_url: String,
    /// Timeout for identity lookups, in seconds
    pub identity_timeout_secs: u64,
    /// How often (in seconds) the embedding service should run the scheduler tick
    pub scheduler_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        // Load optional .env file (ignored if missing).
        let _ = dotenvy::dotenv();

        Ok(Config {
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./respawn.db".to_string()),
            identity_api_url: env_var("IDENTITY_API_URL")
                .unwrap_or_else(|_| "https://api.tibiadata.com/v4".to_string()),
            identity_timeout_secs: env_var("IDENTITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| CoreError::Config("Invalid IDENTITY_TIMEOUT_SECS".to_string()))?,
            scheduler_interval_secs: env_var("SCHEDULER_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| CoreError::Config("Invalid SCHEDULER_INTERVAL_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| CoreError::Config(format!("Missing env var: {key}")))
}
