//! Panel Builder: resolve an `AnalysisRequest` into a `PanelDataset`.
//!
//! Steps:
//! 1. Validate the request (no warehouse access on failure).
//! 2. Resolve controls from `control_ids`, or from `scope` via the warehouse.
//! 3. Fetch raw series for every requested variable, bounded by a timeout.
//! 4. Apply name-declared transforms and lay out the full entity × year grid,
//!    keeping missing cells as NaN and recording coverage warnings.
//!
//! The builder holds no mutable state; two builds of the same request against
//! the same warehouse snapshot are row-identical.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ei_core::{
    AnalysisRequest, EntityFilter, EntityId, Error, PanelQuery, Result, Scope, SourceTables,
    Warehouse, WarehouseRow, Year,
};

use crate::dataset::{CoverageIssue, CoverageWarning, PanelDataset, PanelLayout, PanelRecord};
use crate::transforms::{self, Transformed, VariableSpec};
use crate::warehouse::state_code_of;

/// Default deadline for a single warehouse call.
pub const DEFAULT_WAREHOUSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds panels from an injected warehouse.
#[derive(Clone)]
pub struct PanelBuilder {
    warehouse: Arc<dyn Warehouse>,
    timeout: Duration,
}

impl PanelBuilder {
    /// Create a builder with the default warehouse timeout.
    pub fn new(warehouse: Arc<dyn Warehouse>) -> Self {
        Self { warehouse, timeout: DEFAULT_WAREHOUSE_TIMEOUT }
    }

    /// Set the per-call warehouse timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the panel for `request`.
    pub async fn build(&self, request: &AnalysisRequest) -> Result<PanelDataset> {
        request.validate()?;

        let treated: BTreeSet<EntityId> = request.treated_ids.iter().cloned().collect();
        let controls = self.resolve_controls(request, &treated).await?;

        let layout = PanelLayout {
            treatment_year: request.treatment_year,
            treated: treated.clone(),
            outcomes: request.outcomes.clone(),
            covariates: request.covariates.clone(),
            instrument: request.instrument_name().map(str::to_string),
            treatment_variable: request.treatment_variable.clone(),
        };
        let specs: Vec<VariableSpec> =
            layout.value_columns().iter().map(|c| transforms::resolve(c)).collect();
        let raw_variables: Vec<String> =
            specs.iter().map(|s| s.source.clone()).collect::<BTreeSet<_>>().into_iter().collect();

        let entity_ids: Vec<EntityId> = treated.iter().chain(&controls).cloned().collect();
        let query = PanelQuery {
            entity_ids: entity_ids.clone(),
            year_start: request.ano_inicio,
            year_end: request.ano_fim,
            variables: raw_variables,
            source: SourceTables::from_use_mart(request.use_mart),
        };
        let rows = self.call("fetch_panel_rows", self.warehouse.fetch_panel_rows(&query)).await?;

        let by_key = index_rows(rows, request.ano_inicio, request.ano_fim);
        check_coverage(request, &treated, &specs, &by_key)?;

        let years: Vec<Year> = (request.ano_inicio..=request.ano_fim).collect();
        let (records, warnings) = layout_grid(&entity_ids, &years, &specs, &by_key);
        let panel = PanelDataset::new(layout, records, warnings)?;

        tracing::info!(
            warehouse = self.warehouse.name(),
            n_treated = panel.treated_entities().len(),
            n_controls = panel.control_entities().len(),
            n_years = panel.years().len(),
            n_rows = panel.n_rows(),
            n_warnings = panel.warnings().len(),
            "panel built"
        );
        Ok(panel)
    }

    async fn resolve_controls(
        &self,
        request: &AnalysisRequest,
        treated: &BTreeSet<EntityId>,
    ) -> Result<Vec<EntityId>> {
        if !request.control_ids.is_empty() {
            return Ok(request.control_ids.iter().filter(|c| !treated.contains(*c)).cloned().collect());
        }
        let filter = match request.scope {
            Scope::State => EntityFilter::States(
                treated
                    .iter()
                    .map(|t| state_code_of(t).to_string())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
            ),
            Scope::National => EntityFilter::All,
        };
        let entities = self.call("list_entities", self.warehouse.list_entities(&filter)).await?;
        let controls: BTreeSet<EntityId> = entities
            .into_iter()
            .map(|e| e.entity_id)
            .filter(|id| !treated.contains(id))
            .collect();
        tracing::debug!(scope = ?request.scope, n_controls = controls.len(), "controls resolved from scope");
        Ok(controls.into_iter().collect())
    }

    async fn call<T>(&self, operation: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "warehouse call timed out");
                Err(Error::WarehouseTimeout {
                    operation: operation.to_string(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

type RowIndex = BTreeMap<(EntityId, Year), BTreeMap<String, f64>>;

fn index_rows(rows: Vec<WarehouseRow>, start: Year, end: Year) -> RowIndex {
    let mut index = RowIndex::new();
    for row in rows.into_iter().filter(|r| (start..=end).contains(&r.year)) {
        index.entry((row.entity_id, row.year)).or_default().extend(row.values);
    }
    index
}

fn check_coverage(
    request: &AnalysisRequest,
    treated: &BTreeSet<EntityId>,
    specs: &[VariableSpec],
    by_key: &RowIndex,
) -> Result<()> {
    let distinct_years: BTreeSet<Year> = by_key.keys().map(|(_, y)| *y).collect();
    if distinct_years.len() < 2 {
        return Err(Error::DataInsufficient(format!(
            "warehouse returned {} distinct year(s) in {}..={}; at least 2 required",
            distinct_years.len(),
            request.ano_inicio,
            request.ano_fim
        )));
    }

    let outcome_sources: BTreeSet<&str> = specs
        .iter()
        .filter(|s| request.outcomes.contains(&s.name))
        .map(|s| s.source.as_str())
        .collect();
    let observed = |entity: &str, pre: bool| {
        by_key.iter().any(|((e, y), values)| {
            e == entity
                && (*y < request.treatment_year) == pre
                && outcome_sources.iter().any(|s| values.get(*s).is_some_and(|v| v.is_finite()))
        })
    };

    let resolved: Vec<&EntityId> =
        treated.iter().filter(|t| by_key.keys().any(|(e, _)| e == *t)).collect();
    if resolved.is_empty() {
        return Err(Error::DataInsufficient(
            "none of the treated entities were found in the warehouse".into(),
        ));
    }
    for t in treated {
        if !observed(t.as_str(), true) || !observed(t.as_str(), false) {
            return Err(Error::DataInsufficient(format!(
                "treated entity {t} must have outcome data both before and from {}",
                request.treatment_year
            )));
        }
    }
    Ok(())
}

fn layout_grid(
    entity_ids: &[EntityId],
    years: &[Year],
    specs: &[VariableSpec],
    by_key: &RowIndex,
) -> (Vec<PanelRecord>, Vec<CoverageWarning>) {
    let mut records = Vec::with_capacity(entity_ids.len() * years.len());
    let mut gaps: BTreeMap<(EntityId, String, CoverageIssue), Vec<Year>> = BTreeMap::new();
    let empty = BTreeMap::new();

    for entity in entity_ids {
        for &year in years {
            let raw = by_key.get(&(entity.clone(), year)).unwrap_or(&empty);
            let mut values = BTreeMap::new();
            for spec in specs {
                match spec.transform.apply(raw.get(&spec.source).copied()) {
                    Transformed::Value(v) => {
                        values.insert(spec.name.clone(), v);
                    }
                    Transformed::OutOfDomain => gaps
                        .entry((entity.clone(), spec.name.clone(), CoverageIssue::OutOfDomain))
                        .or_default()
                        .push(year),
                    Transformed::Missing => gaps
                        .entry((entity.clone(), spec.name.clone(), CoverageIssue::Missing))
                        .or_default()
                        .push(year),
                }
            }
            records.push(PanelRecord { entity_id: entity.clone(), year, values });
        }
    }

    let warnings = gaps
        .into_iter()
        .map(|((entity_id, variable, issue), years)| CoverageWarning { entity_id, variable, issue, years })
        .collect();
    (records, warnings)
}
