//! Configuration module for the CrewComms backend.
//!
//! All configuration is loaded from environment variables with sensible
//! defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Path to the SQLite record-store file
    pub db_path: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Delay collapsing rapid edits to one field into a single save
    pub debounce: Duration,
    /// Interval between remote refresh polls
    pub poll_interval: Duration,
    /// How long a failed save keeps the error status before auto-recovery
    pub error_cooldown: Duration,
    /// Whether a platform sign-in is required before edits are accepted
    pub require_signin: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let bind_addr = env::var("CREWCOMMS_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid CREWCOMMS_BIND_ADDR format");

        let db_path = env::var("CREWCOMMS_DB_PATH")
            .unwrap_or_else(|_| "./data/records.sqlite".to_string())
            .into();

        let log_level = env::var("CREWCOMMS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let debounce = Duration::from_millis(millis_var("CREWCOMMS_DEBOUNCE_MS", 500));
        let poll_interval = Duration::from_millis(millis_var("CREWCOMMS_POLL_INTERVAL_MS", 5000));
        let error_cooldown = Duration::from_millis(millis_var("CREWCOMMS_ERROR_COOLDOWN_MS", 3000));

        let require_signin = env::var("CREWCOMMS_REQUIRE_SIGNIN")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Self {
            bind_addr,
            db_path,
            log_level,
            debounce,
            poll_interval,
            error_cooldown,
            require_signin,
        }
    }
}

fn millis_var(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
