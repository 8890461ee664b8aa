//! Common data types for the economic-impact engine.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Municipality (or other entity) identifier, e.g. an IBGE code `"3550308"`.
pub type EntityId = String;

/// Calendar year.
pub type Year = i32;

/// Significance level behind every reported confidence interval (95%).
pub const ALPHA: f64 = 0.05;

/// Analysis method requested by the caller.
///
/// `Compare` is the only member that does not map to a single estimator; it
/// fans out into a list of [`EstimatorKind`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    /// Difference-in-Differences.
    Did,
    /// Instrumental variables (pooled 2SLS).
    Iv,
    /// Instrumental variables with entity and year fixed effects.
    PanelIv,
    /// Dynamic leads/lags regression.
    EventStudy,
    /// Run several estimators and compare them.
    Compare,
    /// Synthetic control.
    Scm,
    /// Augmented (ridge bias-corrected) synthetic control.
    AugmentedScm,
}

impl Method {
    /// The single estimator behind this method, `None` for `Compare`.
    pub fn estimator(self) -> Option<EstimatorKind> {
        match self {
            Method::Did => Some(EstimatorKind::Did),
            Method::Iv => Some(EstimatorKind::Iv),
            Method::PanelIv => Some(EstimatorKind::PanelIv),
            Method::EventStudy => Some(EstimatorKind::EventStudy),
            Method::Scm => Some(EstimatorKind::Scm),
            Method::AugmentedScm => Some(EstimatorKind::AugmentedScm),
            Method::Compare => None,
        }
    }

    /// Wire name (`"did"`, `"panel_iv"`, ...).
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Did => "did",
            Method::Iv => "iv",
            Method::PanelIv => "panel_iv",
            Method::EventStudy => "event_study",
            Method::Compare => "compare",
            Method::Scm => "scm",
            Method::AugmentedScm => "augmented_scm",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete causal estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Two-way fixed-effects Difference-in-Differences.
    Did,
    /// Pooled 2SLS.
    Iv,
    /// 2SLS with absorbed entity and year effects.
    PanelIv,
    /// Leads/lags regression.
    EventStudy,
    /// Synthetic control.
    Scm,
    /// Augmented synthetic control.
    AugmentedScm,
}

impl EstimatorKind {
    /// Canonical ordering used when `compare` runs "all applicable methods".
    pub const ALL: [EstimatorKind; 6] = [
        EstimatorKind::Did,
        EstimatorKind::Iv,
        EstimatorKind::PanelIv,
        EstimatorKind::EventStudy,
        EstimatorKind::Scm,
        EstimatorKind::AugmentedScm,
    ];

    /// Whether the estimator needs an excluded instrument.
    pub fn requires_instrument(self) -> bool {
        matches!(self, EstimatorKind::Iv | EstimatorKind::PanelIv)
    }

    /// Whether the estimator belongs to the synthetic-control family.
    pub fn is_synthetic_control(self) -> bool {
        matches!(self, EstimatorKind::Scm | EstimatorKind::AugmentedScm)
    }

    /// Request-level method with the same name.
    pub fn method(self) -> Method {
        match self {
            EstimatorKind::Did => Method::Did,
            EstimatorKind::Iv => Method::Iv,
            EstimatorKind::PanelIv => Method::PanelIv,
            EstimatorKind::EventStudy => Method::EventStudy,
            EstimatorKind::Scm => Method::Scm,
            EstimatorKind::AugmentedScm => Method::AugmentedScm,
        }
    }

    /// Wire name.
    pub fn as_str(self) -> &'static str {
        self.method().as_str()
    }
}

impl fmt::Display for EstimatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geographic pool used to pick controls when `control_ids` is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Peers in the same state as the treated entities.
    #[default]
    State,
    /// Every entity in the warehouse.
    National,
}

/// A validated-on-demand analysis request.
///
/// Field names follow the inbound wire format (`ano_inicio`/`ano_fim` are the
/// inclusive year bounds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    /// Requested method.
    pub method: Method,
    /// Treated entities (non-empty).
    pub treated_ids: Vec<EntityId>,
    /// Explicit controls; empty means "resolve from `scope`".
    #[serde(default)]
    pub control_ids: Vec<EntityId>,
    /// Outcome variables, in caller order.
    pub outcomes: Vec<String>,
    /// First treated year.
    pub treatment_year: Year,
    /// Control pool when `control_ids` is empty.
    #[serde(default)]
    pub scope: Scope,
    /// Excluded instrument (required for IV variants).
    #[serde(default)]
    pub instrument: Option<String>,
    /// First year (inclusive).
    pub ano_inicio: Year,
    /// Last year (inclusive).
    pub ano_fim: Year,
    /// Read precomputed mart tables instead of raw sources.
    #[serde(default = "default_true")]
    pub use_mart: bool,
    /// Additional time-varying regressors.
    #[serde(default)]
    pub covariates: Vec<String>,
    /// Continuous treatment intensity for IV; defaults to `treated × post`.
    #[serde(default)]
    pub treatment_variable: Option<String>,
    /// Explicit estimator list for `compare`.
    #[serde(default)]
    pub compare_methods: Option<Vec<EstimatorKind>>,
}

fn default_true() -> bool {
    true
}

impl AnalysisRequest {
    /// Minimal request: explicit treated/control sets, one method.
    pub fn new(
        method: Method,
        treated_ids: Vec<EntityId>,
        control_ids: Vec<EntityId>,
        outcomes: Vec<String>,
        treatment_year: Year,
        ano_inicio: Year,
        ano_fim: Year,
    ) -> Self {
        Self {
            method,
            treated_ids,
            control_ids,
            outcomes,
            treatment_year,
            scope: Scope::State,
            instrument: None,
            ano_inicio,
            ano_fim,
            use_mart: true,
            covariates: Vec::new(),
            treatment_variable: None,
            compare_methods: None,
        }
    }

    /// Set the excluded instrument.
    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    /// Set the control scope.
    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    /// Non-empty, trimmed instrument name.
    pub fn instrument_name(&self) -> Option<&str> {
        self.instrument.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Number of years in `[ano_inicio, ano_fim]`.
    pub fn n_years(&self) -> usize {
        (self.ano_fim - self.ano_inicio + 1).max(0) as usize
    }

    /// Check request invariants. Never touches the warehouse.
    pub fn validate(&self) -> Result<()> {
        if self.treated_ids.is_empty() {
            return Err(Error::Configuration("treated_ids must be non-empty".into()));
        }
        let treated = unique_ids("treated_ids", &self.treated_ids)?;
        let controls = unique_ids("control_ids", &self.control_ids)?;
        if let Some(both) = treated.intersection(&controls).next() {
            return Err(Error::Configuration(format!(
                "entity {both} is listed as both treated and control"
            )));
        }

        if self.outcomes.is_empty() {
            return Err(Error::Configuration("outcomes must be non-empty".into()));
        }
        unique_ids("outcomes", &self.outcomes)?;
        unique_ids("covariates", &self.covariates)?;

        if self.ano_inicio > self.ano_fim {
            return Err(Error::Configuration(format!(
                "ano_inicio ({}) must be <= ano_fim ({})",
                self.ano_inicio, self.ano_fim
            )));
        }
        if self.treatment_year < self.ano_inicio || self.treatment_year > self.ano_fim {
            return Err(Error::Configuration(format!(
                "treatment_year ({}) must lie within [{}, {}]",
                self.treatment_year, self.ano_inicio, self.ano_fim
            )));
        }

        match (self.method, &self.compare_methods) {
            (Method::Compare, Some(list)) if list.is_empty() => {
                return Err(Error::Configuration("compare_methods must be non-empty".into()));
            }
            (Method::Compare, _) | (_, None) => {}
            (other, Some(_)) => {
                return Err(Error::Configuration(format!(
                    "compare_methods is only valid with method=compare (got {other})"
                )));
            }
        }

        let needs_instrument = match self.method {
            Method::Compare => self
                .compare_methods
                .as_ref()
                .is_some_and(|list| list.iter().any(|k| k.requires_instrument())),
            m => m.estimator().is_some_and(EstimatorKind::requires_instrument),
        };
        match self.instrument_name() {
            None if needs_instrument => {
                return Err(Error::Configuration(format!(
                    "method {} requires a non-empty instrument",
                    self.method
                )));
            }
            Some(z) if self.outcomes.iter().any(|o| o == z) => {
                return Err(Error::Configuration(format!(
                    "instrument {z} cannot also be an outcome"
                )));
            }
            _ => {}
        }
        Ok(())
    }
}

fn unique_ids<'a>(field: &str, ids: &'a [String]) -> Result<BTreeSet<&'a str>> {
    let mut seen = BTreeSet::new();
    for id in ids {
        let id = id.as_str();
        if id.trim().is_empty() {
            return Err(Error::Configuration(format!("{field} contains an empty value")));
        }
        if !seen.insert(id) {
            return Err(Error::Configuration(format!("{field} contains duplicate value {id}")));
        }
    }
    Ok(seen)
}

/// How a reported standard error was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardErrorKind {
    /// Liang–Zeger sandwich clustered by entity.
    ClusteredByEntity,
    /// White sandwich with the `N/(N−K)` correction.
    Hc1,
    /// `σ̂²(X'X)⁻¹`, used when per-period treated indicators leave too few
    /// treated rows for any sandwich.
    Homoskedastic,
    /// Spread of in-space placebo estimates.
    Placebo,
}

/// Outcome of the joint pre-trend test of an event study.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreTrendStatus {
    /// Leads are jointly insignificant.
    Clear,
    /// Leads are jointly significant: the parallel-trends design is suspect.
    Flagged,
    /// No lead was estimable, or the lead covariance has rank zero.
    NotTestable,
}

/// Method-specific diagnostics. One shape for every estimator; fields that do
/// not apply stay `None`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// First-stage F statistic of the excluded instrument.
    pub first_stage_f: Option<f64>,
    /// Partial R² of the excluded instrument.
    pub first_stage_partial_r2: Option<f64>,
    /// First stage below the Stock–Yogo 10% maximal-size critical value.
    pub weak_instrument: Option<bool>,
    /// p-value of the joint test that all leads are zero.
    pub pre_trend_pvalue: Option<f64>,
    /// Leads are jointly significant at 5%: the parallel-trends design is suspect.
    pub pre_trend_flag: Option<bool>,
    /// Pre-trend verdict; always set for event studies.
    pub pre_trend_status: Option<PreTrendStatus>,
    /// Independent lead restrictions in the joint test.
    pub pre_trend_rank: Option<usize>,
    /// Omitted relative-time bucket.
    pub reference_period: Option<i32>,
    /// Entities contributing observations.
    pub n_entities: Option<usize>,
    /// Clusters used for the sandwich estimator; `None` unless clustered.
    pub n_clusters: Option<usize>,
    /// Treated entities contributing observations.
    pub n_treated: Option<usize>,
    /// Donors in the synthetic-control pool.
    pub n_donors: Option<usize>,
    /// Pre-treatment root mean squared prediction error.
    pub pre_rmspe: Option<f64>,
    /// Synthetic-control donor weights (only non-negligible weights kept).
    pub donor_weights: Option<BTreeMap<EntityId, f64>>,
    /// Mean ridge bias correction subtracted by augmented SCM.
    pub bias_correction: Option<f64>,
    /// How `se` was computed.
    pub se_kind: Option<StandardErrorKind>,
    /// Rows dropped because a required cell was non-finite.
    pub excluded_obs: Option<usize>,
}

/// One lead/lag coefficient of an event study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventStudyPoint {
    /// Year minus treatment year.
    pub rel_time: i32,
    /// Point estimate.
    pub coef: f64,
    /// Standard error, of the kind in `Diagnostics::se_kind`.
    pub se: f64,
    /// Two-sided p-value.
    pub pvalue: f64,
    /// 95% CI lower bound.
    pub ci_lower: f64,
    /// 95% CI upper bound.
    pub ci_upper: f64,
    /// Treated observations in this bucket.
    pub n_obs: usize,
}

/// Output of one estimator on one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Estimator that produced the result.
    pub method: EstimatorKind,
    /// Outcome variable.
    pub outcome: String,
    /// Treatment-effect estimate.
    pub coef: f64,
    /// Standard error.
    pub se: f64,
    /// Two-sided p-value.
    pub pvalue: f64,
    /// 95% CI lower bound.
    pub ci_lower: f64,
    /// 95% CI upper bound.
    pub ci_upper: f64,
    /// Observations used.
    pub n_obs: usize,
    /// R² (within R² for fixed-effects models, pre-fit R² for SCM).
    pub r2: Option<f64>,
    /// Method-specific diagnostics.
    pub diagnostics: Diagnostics,
    /// Event-study sequence indexed by `rel_time` (empty for other methods).
    pub dynamic: Vec<EventStudyPoint>,
}

impl EstimationResult {
    /// `p < ALPHA` with a finite p-value.
    pub fn is_significant(&self) -> bool {
        self.pvalue.is_finite() && self.pvalue < ALPHA
    }

    /// Whether `[ci_lower, ci_upper]` intersects `other`'s interval.
    pub fn ci_overlaps(&self, other: &EstimationResult) -> bool {
        self.ci_lower <= other.ci_upper && other.ci_lower <= self.ci_upper
    }
}

/// Fixed three-tier classification of evidence strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceStrength {
    /// `p < 0.05` with an adequate sample.
    Strong,
    /// `0.05 ≤ p < 0.10`, or `p < 0.05` with a small sample.
    Moderate,
    /// Everything else.
    Weak,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn did_request() -> AnalysisRequest {
        AnalysisRequest::new(
            Method::Did,
            vec!["3550308".into()],
            vec!["3509502".into(), "3304557".into()],
            vec!["pib_log".into()],
            2015,
            2010,
            2020,
        )
    }

    #[test]
    fn valid_request_passes() {
        did_request().validate().unwrap();
        assert_eq!(did_request().n_years(), 11);
    }

    #[test]
    fn iv_without_instrument_is_configuration_error() {
        for method in [Method::Iv, Method::PanelIv] {
            let mut req = did_request();
            req.method = method;
            assert!(matches!(req.validate(), Err(Error::Configuration(_))));
            req.instrument = Some("   ".into());
            assert!(matches!(req.validate(), Err(Error::Configuration(_))));
            req.instrument = Some("royalties".into());
            req.validate().unwrap();
        }
    }

    #[test]
    fn compare_with_explicit_iv_requires_instrument() {
        let mut req = did_request();
        req.method = Method::Compare;
        req.validate().unwrap();
        req.compare_methods = Some(vec![EstimatorKind::Did, EstimatorKind::Iv]);
        assert!(matches!(req.validate(), Err(Error::Configuration(_))));
        req.compare_methods = Some(vec![]);
        assert!(matches!(req.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn year_bounds_enforced() {
        let mut req = did_request();
        req.treatment_year = 2021;
        assert!(req.validate().is_err());
        req.treatment_year = 2015;
        req.ano_inicio = 2022;
        assert!(req.validate().is_err());
    }

    #[test]
    fn overlapping_sets_rejected() {
        let mut req = did_request();
        req.control_ids.push("3550308".into());
        assert!(matches!(req.validate(), Err(Error::Configuration(_))));
        let mut req = did_request();
        req.outcomes.push("pib_log".into());
        assert!(req.validate().is_err());
    }

    #[test]
    fn wire_format_defaults() {
        let req: AnalysisRequest = serde_json::from_value(serde_json::json!({
            "method": "panel_iv",
            "treated_ids": ["3550308"],
            "outcomes": ["pib_log"],
            "treatment_year": 2015,
            "instrument": "royalties",
            "ano_inicio": 2010,
            "ano_fim": 2020
        }))
        .unwrap();
        assert_eq!(req.method, Method::PanelIv);
        assert_eq!(req.scope, Scope::State);
        assert!(req.use_mart);
        assert!(req.control_ids.is_empty());
        req.validate().unwrap();
    }

    #[test]
    fn method_estimator_mapping_is_exhaustive() {
        for kind in EstimatorKind::ALL {
            assert_eq!(kind.method().estimator(), Some(kind));
        }
        assert_eq!(Method::Compare.estimator(), None);
        assert_eq!(Method::AugmentedScm.to_string(), "augmented_scm");
    }
}
