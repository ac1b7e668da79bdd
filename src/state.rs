use crate::config::RelayConfig;
use crate::services::catalog::CatalogService;
use axum::extract::FromRef;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: RelayConfig,
    pub db: PgPool,
    pub catalog: Arc<CatalogService>,
}

impl FromRef<AppState> for PgPool {
    fn from_ref(state: &AppState) -> PgPool {
        state.db.clone()
    }
}

impl FromRef<AppState> for Arc<CatalogService> {
    fn from_ref(state: &AppState) -> Arc<CatalogService> {
        state.catalog.clone()
    }
}
