use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_TICK_INTERVAL_MS: u64 = 2000;
const DEFAULT_RECENT_WINDOW_LIMIT: u64 = 900;

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub database_url: String,
    pub db_max_connections: u32,
    /// Relay push period. Fixed per server, never per subscription.
    pub tick_interval_ms: u64,
    pub recent_window_limit: i64,
    /// 0 disables the catalog read-through cache entirely.
    pub catalog_cache_seconds: u64,
    pub static_root: Option<PathBuf>,
}

impl RelayConfig {
    pub fn from_env(cli_static_root: Option<PathBuf>) -> Result<Self> {
        let database_url = std::env::var("RELAY_DATABASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .context("RELAY_DATABASE_URL must be set to the telemetry store connection string")?;
        let db_max_connections = env_u64("RELAY_DB_MAX_CONNECTIONS", 10).clamp(1, 64) as u32;
        let tick_interval_ms =
            env_u64("RELAY_TICK_INTERVAL_MS", DEFAULT_TICK_INTERVAL_MS).clamp(250, 60_000);
        let recent_window_limit =
            env_u64("RELAY_RECENT_WINDOW_LIMIT", DEFAULT_RECENT_WINDOW_LIMIT).clamp(1, 10_000)
                as i64;
        let catalog_cache_seconds = env_u64("RELAY_CATALOG_CACHE_SECONDS", 30).min(3600);
        let static_root = cli_static_root.or_else(|| env_optional_path("RELAY_STATIC_ROOT"));

        Ok(Self {
            database_url,
            db_max_connections,
            tick_interval_ms,
            recent_window_limit,
            catalog_cache_seconds,
            static_root,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn catalog_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.catalog_cache_seconds)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_optional_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_optional_path(key: &str) -> Option<PathBuf> {
    env_optional_string(key).map(PathBuf::from)
}
