use crate::config::RelayConfig;
use crate::db;
use crate::services::catalog::CatalogService;
use crate::state::AppState;
use std::sync::Arc;

pub fn test_config() -> RelayConfig {
    RelayConfig {
        database_url: "postgresql://postgres@localhost/postgres".to_string(),
        db_max_connections: 2,
        tick_interval_ms: 2000,
        recent_window_limit: 900,
        catalog_cache_seconds: 0,
        static_root: None,
    }
}

pub fn test_state() -> AppState {
    let config = test_config();
    let pool = db::connect_lazy(&config.database_url, config.db_max_connections)
        .expect("connect_lazy");
    let catalog = Arc::new(CatalogService::new(pool.clone(), config.catalog_cache_ttl()));
    AppState {
        config,
        db: pool,
        catalog,
    }
}
