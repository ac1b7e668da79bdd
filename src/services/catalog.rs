use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::types::Json as SqlJson;
use sqlx::PgPool;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::ids::MeasurandKey;

#[derive(Debug, Clone, Deserialize)]
pub struct TerminalDescriptor {
    pub id: i64,
    #[serde(default)]
    pub internal_name: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeasurandDescriptor {
    pub id: MeasurandKey,
    #[serde(default)]
    pub internal_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub unit: String,
}

#[derive(Debug, Clone)]
pub struct PlantRecord {
    pub plant_id: i64,
    pub name: String,
    pub category: String,
    pub terminals: Vec<TerminalDescriptor>,
    pub measurands: Vec<MeasurandDescriptor>,
}

impl PlantRecord {
    pub fn has_terminal(&self, terminal_id: i64) -> bool {
        self.terminals.iter().any(|term| term.id == terminal_id)
    }

    /// Display name override for a measurand. Blank catalog names count as
    /// absent so callers fall back to the raw stored name.
    pub fn measurand_display_name(&self, key: &MeasurandKey) -> Option<&str> {
        self.measurands
            .iter()
            .find(|entry| &entry.id == key)
            .map(|entry| entry.display_name.trim())
            .filter(|name| !name.is_empty())
    }
}

#[derive(sqlx::FromRow)]
struct PlantRow {
    plant_id: i64,
    name: String,
    category: String,
    terminals: SqlJson<JsonValue>,
    measurands: SqlJson<JsonValue>,
}

fn decode_entries<T: DeserializeOwned>(raw: JsonValue, plant_id: i64, field: &str) -> Vec<T> {
    let JsonValue::Array(items) = raw else {
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(entry) => Some(entry),
            Err(err) => {
                tracing::warn!(plant_id, field, error = %err, "skipping malformed catalog entry");
                None
            }
        })
        .collect()
}

fn decode_plant(row: PlantRow) -> PlantRecord {
    let terminals = decode_entries(row.terminals.0, row.plant_id, "terminals");
    let measurands = decode_entries(row.measurands.0, row.plant_id, "measurands");
    PlantRecord {
        plant_id: row.plant_id,
        name: row.name,
        category: row.category,
        terminals,
        measurands,
    }
}

struct CachedPlant {
    fetched_at: Instant,
    record: PlantRecord,
}

/// Read-only plant/terminal/measurand catalog with a read-through cache
/// keyed by plant id. TTL 0 turns every lookup into a direct query. Catalog
/// writes happen in external admin tooling, which is expected to call
/// `invalidate` (or let the TTL lapse).
pub struct CatalogService {
    db: PgPool,
    ttl: Duration,
    plants: RwLock<HashMap<i64, CachedPlant>>,
}

impl CatalogService {
    pub fn new(db: PgPool, ttl: Duration) -> Self {
        Self {
            db,
            ttl,
            plants: RwLock::new(HashMap::new()),
        }
    }

    pub async fn resolve_plant_by_id(
        &self,
        plant_id: i64,
    ) -> Result<Option<PlantRecord>, sqlx::Error> {
        if let Some(hit) = self.cached(plant_id).await {
            return Ok(Some(hit));
        }

        let row: Option<PlantRow> = sqlx::query_as(
            r#"
            SELECT plant_id, name, category, terminals, measurands
            FROM plants
            WHERE plant_id = $1
            "#,
        )
        .bind(plant_id)
        .fetch_optional(&self.db)
        .await?;

        let record = row.map(decode_plant);
        if let Some(record) = &record {
            self.store(record.clone()).await;
        }
        Ok(record)
    }

    /// Reverse lookup: the plant whose terminal list contains the terminal.
    /// Terminal ids are only unique within a plant; the first match wins,
    /// matching how the upstream catalog is administered.
    pub async fn resolve_by_terminal_id(
        &self,
        terminal_id: i64,
    ) -> Result<Option<PlantRecord>, sqlx::Error> {
        if self.ttl > Duration::ZERO {
            let plants = self.plants.read().await;
            if let Some(hit) = plants.values().find(|cached| {
                cached.fetched_at.elapsed() < self.ttl && cached.record.has_terminal(terminal_id)
            }) {
                return Ok(Some(hit.record.clone()));
            }
        }

        let row: Option<PlantRow> = sqlx::query_as(
            r#"
            SELECT plant_id, name, category, terminals, measurands
            FROM plants
            WHERE terminals @> jsonb_build_array(jsonb_build_object('id', $1::bigint))
            ORDER BY plant_id ASC
            LIMIT 1
            "#,
        )
        .bind(terminal_id)
        .fetch_optional(&self.db)
        .await?;

        let record = row.map(decode_plant);
        if let Some(record) = &record {
            self.store(record.clone()).await;
        }
        Ok(record)
    }

    pub async fn invalidate(&self, plant_id: i64) {
        self.plants.write().await.remove(&plant_id);
    }

    pub async fn invalidate_all(&self) {
        self.plants.write().await.clear();
    }

    async fn cached(&self, plant_id: i64) -> Option<PlantRecord> {
        if self.ttl == Duration::ZERO {
            return None;
        }
        let plants = self.plants.read().await;
        plants
            .get(&plant_id)
            .filter(|cached| cached.fetched_at.elapsed() < self.ttl)
            .map(|cached| cached.record.clone())
    }

    async fn store(&self, record: PlantRecord) {
        if self.ttl == Duration::ZERO {
            return;
        }
        self.plants.write().await.insert(
            record.plant_id,
            CachedPlant {
                fetched_at: Instant::now(),
                record,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_plant() -> PlantRecord {
        PlantRecord {
            plant_id: 1,
            name: "North Substation".to_string(),
            category: "Terminal".to_string(),
            terminals: vec![TerminalDescriptor {
                id: 6,
                internal_name: "term_6".to_string(),
                display_name: "Feeder 6".to_string(),
            }],
            measurands: vec![MeasurandDescriptor {
                id: MeasurandKey::Num(2),
                internal_name: "pwr".to_string(),
                display_name: "Active Power".to_string(),
                unit: "kW".to_string(),
            }],
        }
    }

    #[test]
    fn display_name_override_matches_normalized_key() {
        let plant = sample_plant();
        // "2" and 2 are the same key after normalization.
        assert_eq!(
            plant.measurand_display_name(&MeasurandKey::parse("2")),
            Some("Active Power")
        );
        assert_eq!(plant.measurand_display_name(&MeasurandKey::Num(3)), None);
    }

    #[test]
    fn blank_display_names_count_as_absent() {
        let mut plant = sample_plant();
        plant.measurands[0].display_name = "   ".to_string();
        assert_eq!(plant.measurand_display_name(&MeasurandKey::Num(2)), None);
    }

    #[test]
    fn malformed_catalog_entries_are_skipped_not_fatal() {
        let raw = json!([
            {"id": 6, "internal_name": "term_6", "display_name": "Feeder 6"},
            {"display_name": "missing id"},
            "not even an object"
        ]);
        let terminals: Vec<TerminalDescriptor> = decode_entries(raw, 1, "terminals");
        assert_eq!(terminals.len(), 1);
        assert_eq!(terminals[0].id, 6);
    }

    #[test]
    fn descriptor_fields_default_when_missing() {
        let raw = json!([{"id": "7"}]);
        let measurands: Vec<MeasurandDescriptor> = decode_entries(raw, 1, "measurands");
        assert_eq!(measurands.len(), 1);
        assert_eq!(measurands[0].id, MeasurandKey::Num(7));
        assert!(measurands[0].display_name.is_empty());
        assert!(measurands[0].unit.is_empty());
    }

    #[tokio::test]
    async fn cache_serves_stored_plants_until_invalidated() {
        let state = crate::test_support::test_state();
        let catalog = CatalogService::new(state.db.clone(), Duration::from_secs(60));

        catalog.store(sample_plant()).await;
        assert!(catalog.cached(1).await.is_some());

        catalog.invalidate(1).await;
        assert!(catalog.cached(1).await.is_none());
    }

    // Fresh cache entries answer both lookups without touching the store;
    // the pool here points at nothing reachable, so a query would error.

    #[tokio::test]
    async fn resolve_plant_by_id_is_served_from_cache() {
        let state = crate::test_support::test_state();
        let catalog = CatalogService::new(state.db.clone(), Duration::from_secs(60));
        catalog.store(sample_plant()).await;

        let plant = catalog.resolve_plant_by_id(1).await.unwrap().unwrap();
        assert_eq!(plant.name, "North Substation");
    }

    #[tokio::test]
    async fn resolve_by_terminal_id_is_served_from_cache() {
        let state = crate::test_support::test_state();
        let catalog = CatalogService::new(state.db.clone(), Duration::from_secs(60));
        catalog.store(sample_plant()).await;

        let plant = catalog.resolve_by_terminal_id(6).await.unwrap().unwrap();
        assert_eq!(plant.plant_id, 1);
        assert!(plant.has_terminal(6));
    }

    #[tokio::test]
    async fn zero_ttl_disables_the_cache() {
        let state = crate::test_support::test_state();
        let catalog = CatalogService::new(state.db.clone(), Duration::ZERO);

        catalog.store(sample_plant()).await;
        assert!(catalog.cached(1).await.is_none());
    }
}
