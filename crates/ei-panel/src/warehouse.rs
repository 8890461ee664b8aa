//! In-memory warehouse backed by a JSON snapshot.
//!
//! Serves the same `Warehouse` contract as a networked analytical store and
//! is used for offline runs, fixtures and tests.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use ei_core::{
    EntityFilter, EntityId, EntityInfo, Error, PanelQuery, Result, SourceTables, Warehouse,
    WarehouseRow, Year,
};
use serde::{Deserialize, Serialize};

/// Two-digit state (UF) prefix of an IBGE municipality code.
pub fn state_code_of(entity_id: &str) -> &str {
    entity_id.get(..2).unwrap_or(entity_id)
}

/// Serializable warehouse contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WarehouseSnapshot {
    /// Entity registry.
    #[serde(default)]
    pub entities: Vec<EntityInfo>,
    /// Precomputed mart rows.
    #[serde(default)]
    pub mart: Vec<WarehouseRow>,
    /// Raw source rows.
    #[serde(default)]
    pub raw: Vec<WarehouseRow>,
}

impl WarehouseSnapshot {
    /// Register an entity; its state defaults to the IBGE prefix.
    pub fn add_entity(&mut self, entity_id: &str, state: Option<&str>) -> &mut Self {
        let state = state.unwrap_or_else(|| state_code_of(entity_id)).to_string();
        self.entities.push(EntityInfo { entity_id: entity_id.to_string(), state });
        self
    }

    /// Append one entity-year row to `source`.
    pub fn push_row(
        &mut self,
        source: SourceTables,
        entity_id: &str,
        year: Year,
        values: &[(&str, f64)],
    ) -> &mut Self {
        let row = WarehouseRow {
            entity_id: entity_id.to_string(),
            year,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        match source {
            SourceTables::Mart => self.mart.push(row),
            SourceTables::Raw => self.raw.push(row),
        }
        self
    }
}

type Table = BTreeMap<(EntityId, Year), BTreeMap<String, f64>>;

/// Read-only warehouse over an in-memory snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotWarehouse {
    name: String,
    entities: BTreeMap<EntityId, EntityInfo>,
    mart: Table,
    raw: Table,
}

impl SnapshotWarehouse {
    /// Index a snapshot. Later rows for the same key merge into earlier ones.
    pub fn new(name: impl Into<String>, snapshot: WarehouseSnapshot) -> Self {
        let mut entities: BTreeMap<EntityId, EntityInfo> =
            snapshot.entities.into_iter().map(|e| (e.entity_id.clone(), e)).collect();
        let mut index = |rows: Vec<WarehouseRow>| -> Table {
            let mut table = Table::new();
            for row in rows {
                entities.entry(row.entity_id.clone()).or_insert_with(|| EntityInfo {
                    entity_id: row.entity_id.clone(),
                    state: state_code_of(&row.entity_id).to_string(),
                });
                table.entry((row.entity_id, row.year)).or_default().extend(row.values);
            }
            table
        };
        let mart = index(snapshot.mart);
        let raw = index(snapshot.raw);
        Self { name: name.into(), entities, mart, raw }
    }

    /// Load a JSON snapshot file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let snapshot: WarehouseSnapshot = serde_json::from_slice(&bytes)?;
        let name = path.file_stem().and_then(|s| s.to_str()).unwrap_or("snapshot").to_string();
        tracing::info!(
            path = %path.display(),
            n_entities = snapshot.entities.len(),
            n_mart_rows = snapshot.mart.len(),
            n_raw_rows = snapshot.raw.len(),
            "warehouse snapshot loaded"
        );
        Ok(Self::new(name, snapshot))
    }

    /// Number of known entities.
    pub fn n_entities(&self) -> usize {
        self.entities.len()
    }

    fn table(&self, source: SourceTables) -> &Table {
        match source {
            SourceTables::Mart => &self.mart,
            SourceTables::Raw => &self.raw,
        }
    }
}

#[async_trait]
impl Warehouse for SnapshotWarehouse {
    async fn fetch_panel_rows(&self, query: &PanelQuery) -> Result<Vec<WarehouseRow>> {
        if query.year_start > query.year_end {
            return Err(Error::WarehouseUnavailable(format!(
                "invalid year range {}..={}",
                query.year_start, query.year_end
            )));
        }
        let table = self.table(query.source);
        let mut rows = Vec::new();
        for entity in &query.entity_ids {
            let lo = (entity.clone(), query.year_start);
            let hi = (entity.clone(), query.year_end);
            for ((entity_id, year), values) in table.range(lo..=hi) {
                let values: BTreeMap<String, f64> = query
                    .variables
                    .iter()
                    .filter_map(|v| values.get(v).map(|x| (v.clone(), *x)))
                    .collect();
                rows.push(WarehouseRow { entity_id: entity_id.clone(), year: *year, values });
            }
        }
        Ok(rows)
    }

    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<EntityInfo>> {
        Ok(self
            .entities
            .values()
            .filter(|e| match filter {
                EntityFilter::All => true,
                EntityFilter::States(states) => states.iter().any(|s| *s == e.state),
            })
            .cloned()
            .collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn warehouse() -> SnapshotWarehouse {
        let mut snap = WarehouseSnapshot::default();
        snap.add_entity("3550308", None).add_entity("3304557", None).add_entity("9999999", Some("35"));
        for year in 2010..=2012 {
            snap.push_row(SourceTables::Mart, "3550308", year, &[("pib", 100.0), ("pop", 1.0)]);
            snap.push_row(SourceTables::Mart, "3304557", year, &[("pib", 50.0)]);
        }
        snap.push_row(SourceTables::Raw, "3550308", 2010, &[("pib", 99.0)]);
        SnapshotWarehouse::new("test", snap)
    }

    #[tokio::test]
    async fn fetch_filters_entities_years_and_variables() {
        let w = warehouse();
        let q = PanelQuery {
            entity_ids: vec!["3550308".into()],
            year_start: 2011,
            year_end: 2012,
            variables: vec!["pib".into()],
            source: SourceTables::Mart,
        };
        let rows = w.fetch_panel_rows(&q).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.values.len() == 1 && r.values["pib"] == 100.0));

        let raw = w
            .fetch_panel_rows(&PanelQuery { source: SourceTables::Raw, year_start: 2010, ..q })
            .await
            .unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].values["pib"], 99.0);
    }

    #[tokio::test]
    async fn list_by_state_uses_declared_state() {
        let w = warehouse();
        let sp = w.list_entities(&EntityFilter::States(vec!["35".into()])).await.unwrap();
        let ids: Vec<_> = sp.iter().map(|e| e.entity_id.as_str()).collect();
        assert_eq!(ids, vec!["3550308", "9999999"]);
        assert_eq!(w.list_entities(&EntityFilter::All).await.unwrap().len(), 3);
    }

    #[test]
    fn state_prefix() {
        assert_eq!(state_code_of("3550308"), "35");
        assert_eq!(state_code_of("3"), "3");
    }
}
