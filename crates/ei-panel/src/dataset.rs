//! Long-format entity-year panel consumed by every estimator.
//!
//! Rows are sorted by `(entity_id, year)`. Missing cells are stored as NaN;
//! the dataset never drops rows, so each estimator decides its own exclusion
//! policy.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use ei_core::{EntityId, Error, Result, Year};
use serde::{Deserialize, Serialize};

/// Why a coverage warning was raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageIssue {
    /// The warehouse returned no value for these entity-years.
    Missing,
    /// The raw value was outside the transform's domain (e.g. log of zero).
    OutOfDomain,
}

/// Non-fatal coverage warning attached to a dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CoverageWarning {
    /// Entity with the gap.
    pub entity_id: EntityId,
    /// Panel column.
    pub variable: String,
    /// Kind of gap.
    pub issue: CoverageIssue,
    /// Affected years, ascending.
    pub years: Vec<Year>,
}

impl fmt::Display for CoverageWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let what = match self.issue {
            CoverageIssue::Missing => "missing",
            CoverageIssue::OutOfDomain => "outside transform domain",
        };
        write!(f, "{} {} {} in {} year(s): {:?}", self.entity_id, self.variable, what, self.years.len(), self.years)
    }
}

/// One input record for [`PanelDataset::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRecord {
    /// Entity identifier.
    pub entity_id: EntityId,
    /// Year.
    pub year: Year,
    /// Column values; absent columns become NaN.
    pub values: BTreeMap<String, f64>,
}

impl PanelRecord {
    /// Convenience constructor.
    pub fn new(entity_id: impl Into<EntityId>, year: Year, values: &[(&str, f64)]) -> Self {
        Self {
            entity_id: entity_id.into(),
            year,
            values: values.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

/// Column layout of a panel.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PanelLayout {
    /// First treated year.
    pub treatment_year: Year,
    /// Treated entities.
    pub treated: BTreeSet<EntityId>,
    /// Outcome columns, in request order.
    pub outcomes: Vec<String>,
    /// Covariate columns.
    pub covariates: Vec<String>,
    /// Excluded instrument column, if any.
    pub instrument: Option<String>,
    /// Treatment-intensity column, if any.
    pub treatment_variable: Option<String>,
}

impl PanelLayout {
    /// All value columns, deduplicated, in a stable order.
    pub fn value_columns(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.outcomes
            .iter()
            .chain(&self.covariates)
            .chain(self.instrument.iter())
            .chain(self.treatment_variable.iter())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

/// Tidy entity-year dataset.
#[derive(Debug, Clone)]
pub struct PanelDataset {
    layout: PanelLayout,
    entities: Vec<EntityId>,
    years: Vec<Year>,
    entity_of: Vec<usize>,
    year_of: Vec<usize>,
    treated: Vec<u8>,
    post: Vec<u8>,
    rel_time: Vec<i32>,
    columns: BTreeMap<String, Vec<f64>>,
    warnings: Vec<CoverageWarning>,
}

impl PanelDataset {
    /// Assemble a dataset from records.
    ///
    /// Records are sorted by `(entity_id, year)`; duplicate keys are rejected.
    /// `treated`, `post` and `rel_time` are derived from the layout.
    pub fn new(
        layout: PanelLayout,
        mut records: Vec<PanelRecord>,
        mut warnings: Vec<CoverageWarning>,
    ) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::Validation("panel must contain at least one row".into()));
        }
        records.sort_by(|a, b| (&a.entity_id, a.year).cmp(&(&b.entity_id, b.year)));
        for pair in records.windows(2) {
            if pair[0].entity_id == pair[1].entity_id && pair[0].year == pair[1].year {
                return Err(Error::Validation(format!(
                    "duplicate panel row ({}, {})",
                    pair[0].entity_id, pair[0].year
                )));
            }
        }

        let entities: Vec<EntityId> = records
            .iter()
            .map(|r| r.entity_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let years: Vec<Year> =
            records.iter().map(|r| r.year).collect::<BTreeSet<_>>().into_iter().collect();
        let entity_pos: BTreeMap<&str, usize> =
            entities.iter().enumerate().map(|(i, e)| (e.as_str(), i)).collect();
        let year_pos: BTreeMap<Year, usize> =
            years.iter().enumerate().map(|(i, &y)| (y, i)).collect();

        let n = records.len();
        let names = layout.value_columns();
        let mut columns: BTreeMap<String, Vec<f64>> =
            names.iter().map(|c| (c.clone(), Vec::with_capacity(n))).collect();
        let mut entity_of = Vec::with_capacity(n);
        let mut year_of = Vec::with_capacity(n);
        let mut treated = Vec::with_capacity(n);
        let mut post = Vec::with_capacity(n);
        let mut rel_time = Vec::with_capacity(n);

        for rec in &records {
            entity_of.push(entity_pos[rec.entity_id.as_str()]);
            year_of.push(year_pos[&rec.year]);
            treated.push(u8::from(layout.treated.contains(&rec.entity_id)));
            post.push(u8::from(rec.year >= layout.treatment_year));
            rel_time.push(rec.year - layout.treatment_year);
            for (name, col) in columns.iter_mut() {
                col.push(rec.values.get(name).copied().unwrap_or(f64::NAN));
            }
        }

        warnings.sort();
        Ok(Self {
            layout,
            entities,
            years,
            entity_of,
            year_of,
            treated,
            post,
            rel_time,
            columns,
            warnings,
        })
    }

    /// Column layout.
    pub fn layout(&self) -> &PanelLayout {
        &self.layout
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.entity_of.len()
    }

    /// Distinct entities, sorted.
    pub fn entities(&self) -> &[EntityId] {
        &self.entities
    }

    /// Distinct years, ascending.
    pub fn years(&self) -> &[Year] {
        &self.years
    }

    /// First treated year.
    pub fn treatment_year(&self) -> Year {
        self.layout.treatment_year
    }

    /// Whether `entity` is treated.
    pub fn is_treated(&self, entity: &str) -> bool {
        self.layout.treated.contains(entity)
    }

    /// Treated entities present in the panel.
    pub fn treated_entities(&self) -> Vec<&EntityId> {
        self.entities.iter().filter(|e| self.is_treated(e)).collect()
    }

    /// Control entities present in the panel.
    pub fn control_entities(&self) -> Vec<&EntityId> {
        self.entities.iter().filter(|e| !self.is_treated(e)).collect()
    }

    /// Dense entity index (into [`Self::entities`]) per row.
    pub fn entity_index(&self) -> &[usize] {
        &self.entity_of
    }

    /// Dense year index (into [`Self::years`]) per row.
    pub fn year_index(&self) -> &[usize] {
        &self.year_of
    }

    /// Entity id of row `i`.
    pub fn entity_id(&self, i: usize) -> &EntityId {
        &self.entities[self.entity_of[i]]
    }

    /// Year of row `i`.
    pub fn year(&self, i: usize) -> Year {
        self.years[self.year_of[i]]
    }

    /// Treatment indicator per row.
    pub fn treated(&self) -> &[u8] {
        &self.treated
    }

    /// Post-period indicator per row.
    pub fn post(&self) -> &[u8] {
        &self.post
    }

    /// `year − treatment_year` per row.
    pub fn rel_time(&self) -> &[i32] {
        &self.rel_time
    }

    /// Value column by name.
    pub fn column(&self, name: &str) -> Result<&[f64]> {
        self.columns
            .get(name)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::Validation(format!("panel has no column {name}")))
    }

    /// Names of all value columns, sorted.
    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Coverage warnings, sorted.
    pub fn warnings(&self) -> &[CoverageWarning] {
        &self.warnings
    }

    /// Row-identity check: same keys and bit-identical cells (NaN equals NaN).
    pub fn same_rows(&self, other: &PanelDataset) -> bool {
        if self.entities != other.entities
            || self.years != other.years
            || self.entity_of != other.entity_of
            || self.year_of != other.year_of
            || self.treated != other.treated
            || self.post != other.post
            || self.rel_time != other.rel_time
            || self.columns.len() != other.columns.len()
        {
            return false;
        }
        self.columns.iter().zip(&other.columns).all(|((na, a), (nb, b))| {
            na == nb && a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.to_bits() == y.to_bits())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PanelLayout {
        PanelLayout {
            treatment_year: 2015,
            treated: ["A".to_string()].into_iter().collect(),
            outcomes: vec!["y".into()],
            covariates: vec!["x".into()],
            instrument: None,
            treatment_variable: None,
        }
    }

    #[test]
    fn derives_indicators_and_sorts() {
        let recs = vec![
            PanelRecord::new("B", 2016, &[("y", 4.0)]),
            PanelRecord::new("A", 2016, &[("y", 2.0), ("x", 1.0)]),
            PanelRecord::new("A", 2014, &[("y", 1.0)]),
            PanelRecord::new("B", 2014, &[("y", 3.0)]),
        ];
        let p = PanelDataset::new(layout(), recs, vec![]).unwrap();
        assert_eq!(p.n_rows(), 4);
        assert_eq!(p.entities(), &["A".to_string(), "B".to_string()]);
        assert_eq!(p.years(), &[2014, 2016]);
        assert_eq!(p.treated(), &[1, 1, 0, 0]);
        assert_eq!(p.post(), &[0, 1, 0, 1]);
        assert_eq!(p.rel_time(), &[-1, 1, -1, 1]);
        assert_eq!(p.column("y").unwrap(), &[1.0, 2.0, 3.0, 4.0]);

        let x = p.column("x").unwrap();
        assert!(x[0].is_nan());
        assert_eq!(x[1], 1.0);
        assert!(p.column("z").is_err());
        assert_eq!(p.entity_id(2), "B");
        assert_eq!(p.year(3), 2016);
    }

    #[test]
    fn duplicate_keys_rejected() {
        let recs = vec![PanelRecord::new("A", 2014, &[]), PanelRecord::new("A", 2014, &[])];
        assert!(PanelDataset::new(layout(), recs, vec![]).is_err());
        assert!(PanelDataset::new(layout(), vec![], vec![]).is_err());
    }

    #[test]
    fn same_rows_treats_nan_as_equal() {
        let recs = vec![PanelRecord::new("A", 2014, &[("y", 1.0)]), PanelRecord::new("B", 2014, &[])];
        let a = PanelDataset::new(layout(), recs.clone(), vec![]).unwrap();
        let b = PanelDataset::new(layout(), recs, vec![]).unwrap();
        assert!(a.same_rows(&b));
    }
}
