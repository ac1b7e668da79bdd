use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use std::fmt;

use crate::error::{map_db_error, AppError};
use crate::ids::MeasurandKey;
use crate::services::catalog::CatalogService;

#[derive(Debug)]
pub enum QueryError {
    InvalidInput(String),
    NotFound(String),
    Store(sqlx::Error),
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput(message) | Self::NotFound(message) => f.write_str(message),
            // Store details go to the log, not to clients.
            Self::Store(_) => f.write_str("telemetry store query failed"),
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        Self::Store(err)
    }
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::InvalidInput(message) => AppError::bad_request(message),
            QueryError::NotFound(message) => AppError::not_found(message),
            QueryError::Store(inner) => map_db_error(inner),
        }
    }
}

/// Raw measurand values are stored as numbers or free-form text and pass
/// through unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MeasurandValue {
    Number(f64),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierProfile {
    /// Bounded-recency tier (newest ~900 samples per terminal).
    Block,
    /// Unbounded archive tier.
    Trend,
}

impl TierProfile {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "block" => Some(Self::Block),
            "trend" => Some(Self::Trend),
            _ => None,
        }
    }

    fn table(&self) -> &'static str {
        match self {
            Self::Block => "terminal_history_recent",
            Self::Trend => "terminal_history_archive",
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Block => "recent",
            Self::Trend => "archive",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurandReading {
    pub measurand_id: MeasurandKey,
    pub measurand_name: String,
    pub value: MeasurandValue,
    pub captured_at: DateTime<Utc>,
}

/// Wire shape shared by the REST responses and the relay frames.
#[derive(Debug, Clone, Serialize, utoipa::ToSchema)]
pub struct ReadingPayload {
    #[schema(value_type = String)]
    pub measurand_id: MeasurandKey,
    pub measurand_name: String,
    #[schema(value_type = Object)]
    pub value: MeasurandValue,
    pub captured_at: String,
}

impl From<MeasurandReading> for ReadingPayload {
    fn from(reading: MeasurandReading) -> Self {
        Self {
            measurand_id: reading.measurand_id,
            measurand_name: reading.measurand_name,
            value: reading.value,
            captured_at: reading.captured_at.to_rfc3339(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct SnapshotRow {
    captured_at: DateTime<Utc>,
    measurands: SqlJson<JsonValue>,
}

#[derive(sqlx::FromRow)]
struct SeriesRow {
    captured_at: DateTime<Utc>,
    measurands: SqlJson<JsonValue>,
}

fn measurand_value(raw: Option<&JsonValue>) -> Option<MeasurandValue> {
    match raw? {
        JsonValue::Number(num) => num.as_f64().map(MeasurandValue::Number),
        JsonValue::String(text) => Some(MeasurandValue::Text(text.clone())),
        _ => None,
    }
}

fn entry_fields(entry: &JsonValue) -> Option<(String, MeasurandValue)> {
    let name = entry
        .get("name")
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string();
    let value = measurand_value(entry.get("value"))?;
    Some((name, value))
}

// Snapshot shape: { "<key>": { "name": ..., "value": ... }, ... }
fn snapshot_entry(measurands: &JsonValue, key: &MeasurandKey) -> Option<(String, MeasurandValue)> {
    let map = measurands.as_object()?;
    map.iter()
        .find(|(raw_key, _)| &MeasurandKey::parse(raw_key) == key)
        .and_then(|(_, entry)| entry_fields(entry))
}

// History shape: [ { "id": ..., "name": ..., "value": ... }, ... ]
fn series_entry(measurands: &JsonValue, key: &MeasurandKey) -> Option<(String, MeasurandValue)> {
    let items = measurands.as_array()?;
    items
        .iter()
        .find(|entry| entry.get("id").and_then(MeasurandKey::from_json).as_ref() == Some(key))
        .and_then(entry_fields)
}

async fn resolve_display_name(
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
    raw_name: &str,
) -> Result<String, QueryError> {
    let plant = catalog.resolve_by_terminal_id(terminal_id).await?;
    Ok(plant
        .as_ref()
        .and_then(|plant| plant.measurand_display_name(key))
        .unwrap_or(raw_name)
        .to_string())
}

/// Newest snapshot value for one measurand on one terminal.
pub async fn latest_value(
    db: &PgPool,
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
) -> Result<MeasurandReading, QueryError> {
    let row: Option<SnapshotRow> = sqlx::query_as(
        r#"
        SELECT captured_at, measurands
        FROM terminal_snapshots
        WHERE terminal_id = $1
        ORDER BY captured_at DESC
        LIMIT 1
        "#,
    )
    .bind(terminal_id)
    .fetch_optional(db)
    .await?;

    let Some(row) = row else {
        return Err(QueryError::NotFound(format!(
            "no snapshot recorded for terminal {terminal_id}"
        )));
    };
    let Some((raw_name, value)) = snapshot_entry(&row.measurands.0, key) else {
        return Err(QueryError::NotFound(format!(
            "measurand {key} not present in the latest snapshot for terminal {terminal_id}"
        )));
    };

    let measurand_name = resolve_display_name(catalog, terminal_id, key, &raw_name).await?;
    Ok(MeasurandReading {
        measurand_id: key.clone(),
        measurand_name,
        value,
        captured_at: row.captured_at,
    })
}

/// Up to `limit` newest recent-tier samples, descending by capture time.
/// Callers reverse for chronological display. Empty is not an error.
pub async fn recent_window(
    db: &PgPool,
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
    limit: i64,
) -> Result<Vec<MeasurandReading>, QueryError> {
    let rows: Vec<SeriesRow> = sqlx::query_as(
        r#"
        SELECT captured_at, measurands
        FROM terminal_history_recent
        WHERE terminal_id = $1
        ORDER BY captured_at DESC
        LIMIT $2
        "#,
    )
    .bind(terminal_id)
    .bind(limit)
    .fetch_all(db)
    .await?;

    reduce_series(catalog, terminal_id, key, rows).await
}

/// Archive samples with capture time in [from, to] inclusive, ascending.
/// A `from` past `to` yields an empty window; bounds are never swapped.
pub async fn range(
    db: &PgPool,
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> Result<Vec<MeasurandReading>, QueryError> {
    let rows: Vec<SeriesRow> = sqlx::query_as(
        r#"
        SELECT captured_at, measurands
        FROM terminal_history_archive
        WHERE terminal_id = $1
          AND captured_at >= $2
          AND captured_at <= $3
        ORDER BY captured_at ASC
        "#,
    )
    .bind(terminal_id)
    .bind(from)
    .bind(to)
    .fetch_all(db)
    .await?;

    reduce_series(catalog, terminal_id, key, rows).await
}

/// Latest value for a measurand out of the tier the profile selects.
pub async fn value_by_profile(
    db: &PgPool,
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
    profile: &str,
) -> Result<MeasurandReading, QueryError> {
    let Some(tier) = TierProfile::parse(profile) else {
        return Err(QueryError::InvalidInput(format!(
            "unknown profile '{}': expected 'block' or 'trend'",
            profile.trim()
        )));
    };

    let query = format!(
        "SELECT captured_at, measurands FROM {} WHERE terminal_id = $1 ORDER BY captured_at DESC LIMIT 1",
        tier.table()
    );
    let row: Option<SeriesRow> = sqlx::query_as(&query)
        .bind(terminal_id)
        .fetch_optional(db)
        .await?;

    let Some(row) = row else {
        return Err(QueryError::NotFound(format!(
            "terminal {terminal_id} has no samples in the {} tier",
            tier.label()
        )));
    };
    let Some((raw_name, value)) = series_entry(&row.measurands.0, key) else {
        return Err(QueryError::NotFound(format!(
            "measurand {key} not present in the latest {} sample for terminal {terminal_id}",
            tier.label()
        )));
    };

    let measurand_name = resolve_display_name(catalog, terminal_id, key, &raw_name).await?;
    Ok(MeasurandReading {
        measurand_id: key.clone(),
        measurand_name,
        value,
        captured_at: row.captured_at,
    })
}

async fn reduce_series(
    catalog: &CatalogService,
    terminal_id: i64,
    key: &MeasurandKey,
    rows: Vec<SeriesRow>,
) -> Result<Vec<MeasurandReading>, QueryError> {
    let mut reduced: Vec<(String, MeasurandValue, DateTime<Utc>)> = Vec::new();
    for row in rows {
        // Samples that never captured this measurand are dropped from the
        // series rather than failing the whole request.
        if let Some((raw_name, value)) = series_entry(&row.measurands.0, key) {
            reduced.push((raw_name, value, row.captured_at));
        }
    }
    if reduced.is_empty() {
        return Ok(Vec::new());
    }

    let plant = catalog.resolve_by_terminal_id(terminal_id).await?;
    let override_name = plant
        .as_ref()
        .and_then(|plant| plant.measurand_display_name(key))
        .map(str::to_string);

    Ok(reduced
        .into_iter()
        .map(|(raw_name, value, captured_at)| MeasurandReading {
            measurand_id: key.clone(),
            measurand_name: override_name.clone().unwrap_or(raw_name),
            value,
            captured_at,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn snapshot_entry_matches_normalized_map_keys() {
        let measurands = json!({
            "2": {"name": "Power", "value": 120.5},
            "flow": {"name": "Flow Rate", "value": "12.3 l/s"}
        });

        let (name, value) = snapshot_entry(&measurands, &MeasurandKey::Num(2)).unwrap();
        assert_eq!(name, "Power");
        assert_eq!(value, MeasurandValue::Number(120.5));

        let (name, value) =
            snapshot_entry(&measurands, &MeasurandKey::Text("flow".to_string())).unwrap();
        assert_eq!(name, "Flow Rate");
        assert_eq!(value, MeasurandValue::Text("12.3 l/s".to_string()));
    }

    #[test]
    fn snapshot_entry_is_none_for_absent_measurands() {
        let measurands = json!({"2": {"name": "Power", "value": 120.5}});
        assert!(snapshot_entry(&measurands, &MeasurandKey::Num(3)).is_none());
        assert!(snapshot_entry(&json!(null), &MeasurandKey::Num(2)).is_none());
    }

    #[test]
    fn series_entry_accepts_numeric_and_string_ids() {
        let as_number = json!([{"id": 2, "name": "Power", "value": 118.0}]);
        let as_string = json!([{"id": "2", "name": "Power", "value": 118.0}]);

        for measurands in [as_number, as_string] {
            let (name, value) = series_entry(&measurands, &MeasurandKey::Num(2)).unwrap();
            assert_eq!(name, "Power");
            assert_eq!(value, MeasurandValue::Number(118.0));
        }
    }

    #[test]
    fn series_entry_skips_entries_without_usable_values() {
        let measurands = json!([
            {"id": 2, "name": "Power", "value": null},
            {"id": 2, "name": "Power"}
        ]);
        assert!(series_entry(&measurands, &MeasurandKey::Num(2)).is_none());
    }

    #[test]
    fn profile_parsing_accepts_only_block_and_trend() {
        assert_eq!(TierProfile::parse("block"), Some(TierProfile::Block));
        assert_eq!(TierProfile::parse(" trend "), Some(TierProfile::Trend));
        assert_eq!(TierProfile::parse("invalid"), None);
        assert_eq!(TierProfile::parse("BLOCK"), None);
        assert_eq!(TierProfile::parse(""), None);
    }

    #[test]
    fn store_errors_render_without_internal_detail() {
        let err = QueryError::Store(sqlx::Error::PoolTimedOut);
        assert_eq!(err.to_string(), "telemetry store query failed");
    }

    #[test]
    fn reading_payload_renders_rfc3339() {
        let reading = MeasurandReading {
            measurand_id: MeasurandKey::Num(2),
            measurand_name: "Power".to_string(),
            value: MeasurandValue::Number(120.5),
            captured_at: Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap(),
        };
        let payload = ReadingPayload::from(reading);
        assert_eq!(payload.captured_at, "2026-08-06T12:00:00+00:00");

        let encoded = serde_json::to_value(&payload).unwrap();
        assert_eq!(encoded["measurand_id"], json!(2));
        assert_eq!(encoded["value"], json!(120.5));
    }
}
