//! Capability traits for external collaborators.
//!
//! The engine never reaches for a global warehouse client: the Panel Builder
//! receives an `Arc<dyn Warehouse>` and calls it read-only. Implementations
//! decide the query language and storage engine; the engine only relies on
//! rows keyed by entity and year.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::types::{EntityId, Year};

/// Which warehouse tables to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTables {
    /// Precomputed analytical marts.
    Mart,
    /// Raw source tables.
    Raw,
}

impl SourceTables {
    /// Map the request's `use_mart` flag.
    pub fn from_use_mart(use_mart: bool) -> Self {
        if use_mart { SourceTables::Mart } else { SourceTables::Raw }
    }
}

/// Query for `fetch_panel_rows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelQuery {
    /// Entities to fetch.
    pub entity_ids: Vec<EntityId>,
    /// First year (inclusive).
    pub year_start: Year,
    /// Last year (inclusive).
    pub year_end: Year,
    /// Raw variable names (after transform resolution).
    pub variables: Vec<String>,
    /// Source tables.
    pub source: SourceTables,
}

/// One entity-year row. Variables absent from `values` are missing cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WarehouseRow {
    /// Entity identifier.
    pub entity_id: EntityId,
    /// Year.
    pub year: Year,
    /// Variable values for this entity-year.
    pub values: BTreeMap<String, f64>,
}

/// Entity listing filter used for scope-based control resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityFilter {
    /// Entities whose state code is one of these.
    States(Vec<String>),
    /// Every entity.
    All,
}

/// Entity metadata known to the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    /// Entity identifier.
    pub entity_id: EntityId,
    /// State (UF) code.
    pub state: String,
}

/// Read-only analytical warehouse capability.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Fetch entity-year rows for the requested variables.
    async fn fetch_panel_rows(&self, query: &PanelQuery) -> Result<Vec<WarehouseRow>>;

    /// List entities matching a filter.
    async fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<EntityInfo>>;

    /// Warehouse name for logging.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EmptyWarehouse;

    #[async_trait]
    impl Warehouse for EmptyWarehouse {
        async fn fetch_panel_rows(&self, _query: &PanelQuery) -> Result<Vec<WarehouseRow>> {
            Ok(vec![])
        }

        async fn list_entities(&self, _filter: &EntityFilter) -> Result<Vec<EntityInfo>> {
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "empty"
        }
    }

    #[tokio::test]
    async fn warehouse_is_object_safe() {
        let w: std::sync::Arc<dyn Warehouse> = std::sync::Arc::new(EmptyWarehouse);
        assert_eq!(w.name(), "empty");
        assert!(w.list_entities(&EntityFilter::All).await.unwrap().is_empty());
    }

    #[test]
    fn source_tables_from_flag() {
        assert_eq!(SourceTables::from_use_mart(true), SourceTables::Mart);
        assert_eq!(SourceTables::from_use_mart(false), SourceTables::Raw);
    }
}
