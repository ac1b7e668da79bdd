use axum::extract::{Path, Query, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};

use crate::error::AppError;
use crate::routes::{parse_measurand_id, parse_terminal_id};
use crate::services::telemetry::{self, ReadingPayload};
use crate::state::AppState;

#[derive(Debug, Clone, serde::Serialize, utoipa::ToSchema)]
pub struct HistoryResponse {
    pub status: String,
    pub count: usize,
    pub data: Vec<ReadingPayload>,
}

impl HistoryResponse {
    fn success(data: Vec<ReadingPayload>) -> Self {
        Self {
            status: "success".to_string(),
            count: data.len(),
            data,
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/history/{terminal_id}/measurands/{measurand_id}/last-900",
    tag = "history",
    params(
        ("terminal_id" = String, Path, description = "Numeric terminal identifier"),
        ("measurand_id" = String, Path, description = "Measurand identifier (number or name)")
    ),
    responses(
        (status = 200, description = "Recent window, newest first", body = HistoryResponse),
        (status = 400, description = "Malformed identifiers")
    )
)]
pub(crate) async fn recent_window(
    State(state): State<AppState>,
    Path((terminal_id, measurand_id)): Path<(String, String)>,
) -> Result<Json<HistoryResponse>, AppError> {
    let terminal_id = parse_terminal_id(&terminal_id)?;
    let key = parse_measurand_id(&measurand_id)?;

    let readings = telemetry::recent_window(
        &state.db,
        &state.catalog,
        terminal_id,
        &key,
        state.config.recent_window_limit,
    )
    .await?;
    Ok(Json(HistoryResponse::success(
        readings.into_iter().map(Into::into).collect(),
    )))
}

#[derive(Debug, Clone, serde::Deserialize, utoipa::IntoParams)]
pub(crate) struct DateRangeQuery {
    from: Option<String>,
    to: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/history/{terminal_id}/measurands/{measurand_id}/date-range",
    tag = "history",
    params(
        ("terminal_id" = String, Path, description = "Numeric terminal identifier"),
        ("measurand_id" = String, Path, description = "Measurand identifier (number or name)"),
        DateRangeQuery
    ),
    responses(
        (status = 200, description = "Samples within [from, to], oldest first", body = HistoryResponse),
        (status = 400, description = "Malformed identifiers or missing/unparseable bounds")
    )
)]
pub(crate) async fn date_range(
    State(state): State<AppState>,
    Path((terminal_id, measurand_id)): Path<(String, String)>,
    Query(query): Query<DateRangeQuery>,
) -> Result<Json<HistoryResponse>, AppError> {
    let terminal_id = parse_terminal_id(&terminal_id)?;
    let key = parse_measurand_id(&measurand_id)?;
    let from = parse_bound(query.from.as_deref(), "from")?;
    let to = parse_bound(query.to.as_deref(), "to")?;

    // A from past to yields an empty window; bounds are never swapped.
    let readings = telemetry::range(&state.db, &state.catalog, terminal_id, &key, from, to).await?;
    Ok(Json(HistoryResponse::success(
        readings.into_iter().map(Into::into).collect(),
    )))
}

fn parse_bound(raw: Option<&str>, field: &'static str) -> Result<DateTime<Utc>, AppError> {
    let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
        return Err(AppError::bad_request(format!(
            "Missing required parameter '{field}'"
        )));
    };
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|_| {
            AppError::bad_request(format!("Invalid '{field}' timestamp (expected RFC3339)"))
        })
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/history/{terminal_id}/measurands/{measurand_id}/last-900",
            get(recent_window),
        )
        .route(
            "/history/{terminal_id}/measurands/{measurand_id}/date-range",
            get(date_range),
        )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn bounds_require_presence_and_rfc3339() {
        let err = parse_bound(None, "from").unwrap_err();
        assert_eq!(err.status, axum::http::StatusCode::BAD_REQUEST);
        assert!(err.message.contains("from"));

        let err = parse_bound(Some("  "), "to").unwrap_err();
        assert!(err.message.contains("Missing"));

        let err = parse_bound(Some("yesterday"), "from").unwrap_err();
        assert!(err.message.contains("RFC3339"));

        let parsed = parse_bound(Some("2026-08-06T02:00:00+02:00"), "from").unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2026, 8, 6, 0, 0, 0).unwrap());
    }
}
