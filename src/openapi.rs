use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::routes;
use crate::services::telemetry::ReadingPayload;
use crate::state::AppState;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Telemetry Relay API",
        description = "Live and historical measurand telemetry for the energy dashboard"
    ),
    paths(
        routes::health::healthz_handler,
        routes::live::latest_value,
        routes::history::recent_window,
        routes::history::date_range,
        routes::profile::measurand_value,
    ),
    components(schemas(
        routes::health::HealthResponse,
        routes::live::ValueResponse,
        routes::history::HistoryResponse,
        ReadingPayload,
    ))
)]
struct ApiDoc;

pub fn openapi_json() -> serde_json::Value {
    match serde_json::to_value(ApiDoc::openapi()) {
        Ok(document) => document,
        Err(err) => {
            tracing::error!(error = %err, "failed to serialize OpenAPI document");
            serde_json::json!({})
        }
    }
}

async fn openapi_handler() -> Json<serde_json::Value> {
    Json(openapi_json())
}

pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_handler))
}
