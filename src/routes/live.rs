use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppError;
use crate::routes::{parse_measurand_id, parse_terminal_id};
use crate::services::telemetry::{self, ReadingPayload};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct ValueResponse {
    pub status: String,
    pub data: ReadingPayload,
}

impl ValueResponse {
    pub(crate) fn success(data: ReadingPayload) -> Self {
        Self {
            status: "success".to_string(),
            data,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/live-value/{terminal_id}/measurands/{measurand_id}",
    tag = "live",
    params(
        ("terminal_id" = String, Path, description = "Numeric terminal identifier"),
        ("measurand_id" = String, Path, description = "Measurand identifier (number or name)")
    ),
    responses(
        (status = 200, description = "Latest value", body = ValueResponse),
        (status = 400, description = "Malformed identifiers"),
        (status = 404, description = "No snapshot or measurand absent")
    )
)]
pub(crate) async fn latest_value(
    State(state): State<AppState>,
    Path((terminal_id, measurand_id)): Path<(String, String)>,
) -> Result<Json<ValueResponse>, AppError> {
    let terminal_id = parse_terminal_id(&terminal_id)?;
    let key = parse_measurand_id(&measurand_id)?;

    let reading = telemetry::latest_value(&state.db, &state.catalog, terminal_id, &key).await?;
    Ok(Json(ValueResponse::success(reading.into())))
}

pub fn router() -> Router<AppState> {
    Router::new().route(
        "/live-value/{terminal_id}/measurands/{measurand_id}",
        get(latest_value),
    )
}
