//! Configuration module for the DailyFlow service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use chrono::FixedOffset;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key for API authentication
    pub api_psk: Option<String>,
    /// Path to the local SQLite database (diary collection, outbox, preferences)
    pub db_path: PathBuf,
    /// Path to the Tantivy index used for text filtering
    pub index_path: PathBuf,
    /// Root directory of the object storage
    pub storage_root: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Identity of the signed-in user
    pub owner_id: String,
    /// Offset used to group entries by calendar day
    pub utc_offset: FixedOffset,
    /// Replay the image outbox when the process starts
    pub reconcile_on_start: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let api_psk = env::var("DAILYFLOW_API_PSK").ok();

        let db_path = env::var("DAILYFLOW_DB_PATH")
            .unwrap_or_else(|_| "./data/dailyflow.sqlite".to_string())
            .into();

        let index_path = env::var("DAILYFLOW_INDEX_PATH")
            .unwrap_or_else(|_| "./data/index".to_string())
            .into();

        let storage_root = env::var("DAILYFLOW_STORAGE_ROOT")
            .unwrap_or_else(|_| "./data/storage".to_string())
            .into();

        let bind_addr = env::var("DAILYFLOW_BIND_ADDR")
            .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
            .parse()
            .expect("Invalid DAILYFLOW_BIND_ADDR format");

        let log_level = env::var("DAILYFLOW_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let owner_id = env::var("DAILYFLOW_OWNER_ID").unwrap_or_else(|_| "local".to_string());

        let offset_minutes: i32 = env::var("DAILYFLOW_UTC_OFFSET_MINUTES")
            .ok()
            .map(|v| v.parse().expect("Invalid DAILYFLOW_UTC_OFFSET_MINUTES"))
            .unwrap_or(0);
        let utc_offset = FixedOffset::east_opt(offset_minutes * 60)
            .expect("DAILYFLOW_UTC_OFFSET_MINUTES out of range");

        let reconcile_on_start = env::var("DAILYFLOW_RECONCILE_ON_START")
            .map(|v| !matches!(v.to_ascii_lowercase().as_str(), "0" | "false" | "no"))
            .unwrap_or(true);

        Self {
            api_psk,
            db_path,
            index_path,
            storage_root,
            bind_addr,
            log_level,
            owner_id,
            utc_offset,
            reconcile_on_start,
        }
    }
}
