pub mod health;
pub mod history;
pub mod live;
pub mod profile;
pub mod stream;

use axum::Router;
use tower_http::cors::CorsLayer;

use crate::error::AppError;
use crate::ids::MeasurandKey;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::router())
        .merge(stream::router())
        .nest(
            "/api",
            Router::new()
                .merge(live::router())
                .merge(history::router())
                .merge(profile::router())
                .merge(crate::openapi::router()),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub(crate) fn parse_terminal_id(raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| AppError::bad_request(format!("Invalid terminal id '{}'", raw.trim())))
}

pub(crate) fn parse_measurand_id(raw: &str) -> Result<MeasurandKey, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::bad_request("Missing measurand id"));
    }
    Ok(MeasurandKey::parse(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn app() -> Router {
        router(crate::test_support::test_state())
    }

    async fn get_status(uri: &str) -> StatusCode {
        let resp = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        resp.status()
    }

    // Validation rejections happen before any store access, so these run
    // against the lazy pool without a database.

    #[test]
    fn terminal_ids_must_be_numeric() {
        assert!(parse_terminal_id(" 6 ").is_ok());
        assert!(parse_terminal_id("north").is_err());
        assert!(parse_terminal_id("").is_err());
    }

    #[test]
    fn measurand_ids_must_be_non_empty() {
        assert_eq!(parse_measurand_id("2").unwrap(), MeasurandKey::Num(2));
        assert!(parse_measurand_id("  ").is_err());
    }

    #[tokio::test]
    async fn live_value_rejects_malformed_terminal_id() {
        let status = get_status("/api/live-value/north/measurands/2").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn recent_window_rejects_malformed_terminal_id() {
        let status = get_status("/api/history/north/measurands/2/last-900").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn date_range_requires_both_bounds() {
        let status =
            get_status("/api/history/6/measurands/2/date-range?to=2026-08-06T00:00:00Z").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let status = get_status("/api/history/6/measurands/2/date-range").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn date_range_rejects_unparseable_bounds() {
        let status = get_status(
            "/api/history/6/measurands/2/date-range?from=yesterday&to=2026-08-06T00:00:00Z",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn measurand_value_lists_missing_parameters() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/api/hdnuts/measurand-value?terminalId=6")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(resp.into_body(), 4096).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "error");
        let message = body["message"].as_str().unwrap();
        assert!(message.contains("measurandId"));
        assert!(message.contains("profile"));
        assert!(!message.contains("terminalId"));
    }

    #[tokio::test]
    async fn measurand_value_rejects_unknown_profiles() {
        let status =
            get_status("/api/hdnuts/measurand-value?terminalId=6&measurandId=2&profile=invalid")
                .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let resp = app()
            .oneshot(
                Request::builder()
                    .uri("/api/openapi.json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
