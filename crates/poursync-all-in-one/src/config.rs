use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Path of the local queue snapshot file
    #[serde(default = "default_queue_path")]
    pub queue_path: String,

    /// How often backlogged outlets are re-checked while online, in seconds
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,

    /// Failed attempts after which an entry is parked for operator review
    #[serde(default = "default_max_sync_attempts")]
    pub max_sync_attempts: u32,

    /// First per-entry retry delay in seconds; doubles each failure
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,

    /// Upper bound on the per-entry retry delay in seconds
    #[serde(default = "default_backoff_cap_secs")]
    pub backoff_cap_secs: u64,

    /// Whether the service starts in the online state
    #[serde(default = "default_start_online")]
    pub start_online: bool,

    // PostgreSQL configuration (directory + ledger backend)
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_queue_path() -> String {
    "pour_queue.json".to_string()
}

fn default_sync_interval_secs() -> u64 {
    60
}

fn default_max_sync_attempts() -> u32 {
    10
}

fn default_backoff_base_secs() -> u64 {
    30
}

fn default_backoff_cap_secs() -> u64 {
    3600
}

fn default_start_online() -> bool {
    true
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "poursync".to_string()
}

fn default_postgres_username() -> String {
    "poursync".to_string()
}

fn default_postgres_password() -> String {
    "poursync".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    10
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("POURSYNC"))
            .build()?
            .try_deserialize()
    }
}
