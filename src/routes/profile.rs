use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::error::AppError;
use crate::routes::live::ValueResponse;
use crate::routes::{parse_measurand_id, parse_terminal_id};
use crate::services::telemetry;
use crate::state::AppState;

#[derive(Debug, Clone, serde::Deserialize, utoipa::IntoParams)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MeasurandValueQuery {
    terminal_id: Option<String>,
    measurand_id: Option<String>,
    profile: Option<String>,
}

fn present(raw: &Option<String>) -> bool {
    raw.as_deref().map(str::trim).is_some_and(|v| !v.is_empty())
}

#[utoipa::path(
    get,
    path = "/api/hdnuts/measurand-value",
    tag = "hdnuts",
    params(MeasurandValueQuery),
    responses(
        (status = 200, description = "Latest value from the selected tier", body = ValueResponse),
        (status = 400, description = "Missing parameters or invalid profile"),
        (status = 404, description = "Terminal or measurand absent from the tier")
    )
)]
pub(crate) async fn measurand_value(
    State(state): State<AppState>,
    Query(query): Query<MeasurandValueQuery>,
) -> Result<Json<ValueResponse>, AppError> {
    let mut missing = Vec::new();
    if !present(&query.terminal_id) {
        missing.push("terminalId");
    }
    if !present(&query.measurand_id) {
        missing.push("measurandId");
    }
    if !present(&query.profile) {
        missing.push("profile");
    }
    if !missing.is_empty() {
        return Err(AppError::bad_request(format!(
            "Missing required parameters: {}",
            missing.join(", ")
        )));
    }

    let terminal_id = parse_terminal_id(query.terminal_id.as_deref().unwrap_or_default())?;
    let key = parse_measurand_id(query.measurand_id.as_deref().unwrap_or_default())?;
    let profile = query.profile.as_deref().unwrap_or_default();

    let reading =
        telemetry::value_by_profile(&state.db, &state.catalog, terminal_id, &key, profile).await?;
    Ok(Json(ValueResponse::success(reading.into())))
}

pub fn router() -> Router<AppState> {
    Router::new().route("/hdnuts/measurand-value", get(measurand_value))
}
