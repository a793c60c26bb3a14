//! Configuration management for the daemon.

use std::env;

use syncer_core::{ConfigError, SyncerConfig};

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name used in logs for the syncer
    pub name: String,
    /// Print the ledger as JSON on exit
    pub dump_ledger: bool,
    /// Worker pool, retry and resync settings
    pub syncer: SyncerConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let name = env::var("SYNCER_NAME").unwrap_or_else(|_| "syncer-daemon".to_string());

        let dump_ledger = match env::var("SYNCER_DUMP_LEDGER") {
            Ok(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidValue("SYNCER_DUMP_LEDGER"))?,
            Err(_) => true,
        };

        let syncer = SyncerConfig::from_env()?;

        Ok(Self {
            name,
            dump_ledger,
            syncer,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
