//! Configuration module for the Command Center backend.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication (required in production)
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Upper bound on a single document store round trip
    pub store_timeout: Duration,
    /// How many read-modify-write rounds a heartbeat may take before giving up
    pub presence_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("CC_API_PSK").ok().filter(|k| !k.is_empty());

        let db_path = env::var("CC_DB_PATH")
            .unwrap_or_else(|_| "./data/command-center.sqlite".to_string())
            .into();

        let bind_addr = parse_var("CC_BIND_ADDR", "127.0.0.1:8080")?;
        let log_level = env::var("CC_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        let store_timeout_ms: u64 = parse_var("CC_STORE_TIMEOUT_MS", "5000")?;
        let presence_max_attempts: u32 = parse_var("CC_PRESENCE_MAX_ATTEMPTS", "16")?;

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            store_timeout: Duration::from_millis(store_timeout_ms),
            presence_max_attempts: presence_max_attempts.max(1),
        })
    }
}

fn parse_var<T>(key: &str, default: &str) -> Result<T, Box<dyn std::error::Error>>
where
    T: FromStr,
    T::Err: Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse()
        .map_err(|e| format!("Invalid {} value {:?}: {}", key, raw, e).into())
}
