//! Estimator strategies: one implementation of [`Estimator`] per
//! [`EstimatorKind`], each turning a panel and an outcome into an
//! [`EstimationResult`].
//!
//! Every strategy applies the same sample policy: rows where any column it
//! needs is non-finite are dropped and counted in `excluded_obs`
//! (synthetic control drops whole entities, since it needs complete paths).

use std::collections::{BTreeMap, BTreeSet};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Instant;

use ei_core::{
    ALPHA, AnalysisRequest, Diagnostics, Error, EstimationResult, EstimatorKind, EventStudyPoint,
    PreTrendStatus, Result, StandardErrorKind,
};
use ei_panel::PanelDataset;
use rayon::prelude::*;

use crate::econometrics::robust::{AbsorbedDf, is_absorbed, normal_bounds};
use crate::econometrics::{
    FeRows, FixedEffects, IvColumns, SyntheticInput, event_study, placebo_inference,
    synthetic_control, twfe_did, two_stage_least_squares,
};

/// Donor weights at or below this are omitted from diagnostics.
const MIN_REPORTED_WEIGHT: f64 = 1e-4;

/// Request-derived settings shared by every strategy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FitOptions {
    /// Excluded instrument column.
    pub instrument: Option<String>,
    /// Continuous treatment column; `treated × post` when absent.
    pub treatment_variable: Option<String>,
    /// Extra regressors.
    pub covariates: Vec<String>,
    /// Synthetic-control family enabled in this deployment.
    pub synthetic_control: bool,
}

impl FitOptions {
    /// Options for `request` under the deployment's synthetic-control flag.
    pub fn from_request(request: &AnalysisRequest, synthetic_control: bool) -> Self {
        Self {
            instrument: request.instrument_name().map(str::to_string),
            treatment_variable: request.treatment_variable.clone(),
            covariates: request.covariates.clone(),
            synthetic_control,
        }
    }
}

/// A causal estimator.
pub trait Estimator: Send + Sync {
    /// Which estimator this is.
    fn kind(&self) -> EstimatorKind;

    /// Checks that need no data. Runs before the panel is built.
    fn check_preconditions(&self, _options: &FitOptions) -> Result<()> {
        Ok(())
    }

    /// Estimate the treatment effect on `outcome`.
    fn fit(&self, panel: &PanelDataset, outcome: &str, options: &FitOptions) -> Result<EstimationResult>;
}

/// The strategy for `kind`.
pub fn estimator_for(kind: EstimatorKind) -> &'static dyn Estimator {
    match kind {
        EstimatorKind::Did => &DidEstimator,
        EstimatorKind::Iv => &IvEstimator { absorb_fixed_effects: false },
        EstimatorKind::PanelIv => &IvEstimator { absorb_fixed_effects: true },
        EstimatorKind::EventStudy => &EventStudyEstimator,
        EstimatorKind::Scm => &SyntheticControlEstimator { augmented: false },
        EstimatorKind::AugmentedScm => &SyntheticControlEstimator { augmented: true },
    }
}

// ----------------------------------------------------------------------------
// Sample selection
// ----------------------------------------------------------------------------

/// Complete-case rows of a panel.
struct Sample<'p> {
    panel: &'p PanelDataset,
    rows: Vec<usize>,
    excluded: usize,
}

impl<'p> Sample<'p> {
    fn complete(panel: &'p PanelDataset, required: &[&[f64]]) -> Result<Self> {
        let rows: Vec<usize> =
            (0..panel.n_rows()).filter(|&i| required.iter().all(|c| c[i].is_finite())).collect();
        let excluded = panel.n_rows() - rows.len();
        if rows.is_empty() {
            return Err(Error::DataInsufficient("no complete observations".into()));
        }
        Ok(Self { panel, rows, excluded })
    }

    fn take<T: Copy>(&self, col: &[T]) -> Vec<T> {
        self.rows.iter().map(|&i| col[i]).collect()
    }

    fn entity(&self) -> Vec<usize> {
        self.take(self.panel.entity_index())
    }

    fn year(&self) -> Vec<usize> {
        self.take(self.panel.year_index())
    }

    fn treated_post(&self) -> Vec<f64> {
        let (treated, post) = (self.panel.treated(), self.panel.post());
        self.rows.iter().map(|&i| f64::from(treated[i] * post[i])).collect()
    }

    fn n_entities(&self) -> usize {
        self.rows.iter().map(|&i| self.panel.entity_index()[i]).collect::<BTreeSet<_>>().len()
    }

    fn n_treated(&self) -> usize {
        let treated = self.panel.treated();
        self.rows
            .iter()
            .filter(|&&i| treated[i] == 1)
            .map(|&i| self.panel.entity_index()[i])
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn base_diagnostics(&self) -> Diagnostics {
        Diagnostics {
            n_entities: Some(self.n_entities()),
            n_treated: Some(self.n_treated()),
            excluded_obs: Some(self.excluded),
            ..Diagnostics::default()
        }
    }
}

fn columns<'p>(panel: &'p PanelDataset, names: &[String]) -> Result<Vec<&'p [f64]>> {
    names.iter().map(|c| panel.column(c)).collect()
}

// ----------------------------------------------------------------------------
// DiD
// ----------------------------------------------------------------------------

/// Two-way fixed-effects Difference-in-Differences.
#[derive(Debug, Clone, Copy)]
pub struct DidEstimator;

impl Estimator for DidEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Did
    }

    fn fit(&self, panel: &PanelDataset, outcome: &str, options: &FitOptions) -> Result<EstimationResult> {
        let y = panel.column(outcome)?;
        let covs = columns(panel, &options.covariates)?;
        let mut required = vec![y];
        required.extend(&covs);
        let sample = Sample::complete(panel, &required)?;

        let (ys, entity, year) = (sample.take(y), sample.entity(), sample.year());
        let cov_cols: Vec<Vec<f64>> = covs.iter().map(|c| sample.take(c)).collect();
        let cov_refs: Vec<&[f64]> = cov_cols.iter().map(Vec::as_slice).collect();
        let fit = twfe_did(
            FeRows { y: &ys, entity: &entity, year: &year },
            &sample.treated_post(),
            &cov_refs,
        )?;

        Ok(EstimationResult {
            method: self.kind(),
            outcome: outcome.to_string(),
            coef: fit.att,
            se: fit.se,
            pvalue: fit.interval.pvalue,
            ci_lower: fit.interval.lower,
            ci_upper: fit.interval.upper,
            n_obs: fit.n_obs,
            r2: Some(fit.r2_within),
            diagnostics: Diagnostics {
                se_kind: Some(fit.se_kind),
                n_clusters: fit.n_clusters,
                ..sample.base_diagnostics()
            },
            dynamic: Vec::new(),
        })
    }
}

// ----------------------------------------------------------------------------
// IV / Panel IV
// ----------------------------------------------------------------------------

/// 2SLS, pooled or with entity and year effects absorbed.
#[derive(Debug, Clone, Copy)]
pub struct IvEstimator {
    /// Absorb entity and year fixed effects before both stages.
    pub absorb_fixed_effects: bool,
}

impl Estimator for IvEstimator {
    fn kind(&self) -> EstimatorKind {
        if self.absorb_fixed_effects { EstimatorKind::PanelIv } else { EstimatorKind::Iv }
    }

    fn check_preconditions(&self, options: &FitOptions) -> Result<()> {
        match options.instrument.as_deref().map(str::trim) {
            Some(z) if !z.is_empty() => Ok(()),
            _ => Err(Error::Configuration(format!("method {} requires a non-empty instrument", self.kind()))),
        }
    }

    fn fit(&self, panel: &PanelDataset, outcome: &str, options: &FitOptions) -> Result<EstimationResult> {
        self.check_preconditions(options)?;
        let kind = self.kind();
        let instrument = options.instrument.as_deref().unwrap_or_default();
        let y = panel.column(outcome)?;
        let z = panel.column(instrument)?;
        let intensity = options.treatment_variable.as_deref().map(|t| panel.column(t)).transpose()?;
        let covs = columns(panel, &options.covariates)?;

        let mut required = vec![y, z];
        required.extend(intensity);
        required.extend(&covs);
        let sample = Sample::complete(panel, &required)?;

        let entity = sample.entity();
        let year = sample.year();
        let mut ys = sample.take(y);
        let mut zs = sample.take(z);
        let mut ds = intensity.map_or_else(|| sample.treated_post(), |d| sample.take(d));
        let mut cov_cols: Vec<Vec<f64>> = covs.iter().map(|c| sample.take(c)).collect();

        let absorbed = if self.absorb_fixed_effects {
            let fe = FixedEffects::two_way(&entity, &year)?;
            let (d_raw, z_raw) = (ds.clone(), zs.clone());
            ys = fe.demean(&ys)?;
            ds = fe.demean(&ds)?;
            zs = fe.demean(&zs)?;
            if is_absorbed(&d_raw, &ds) {
                return Err(Error::numerical(kind, "treatment is collinear with the fixed effects"));
            }
            if is_absorbed(&z_raw, &zs) {
                return Err(Error::numerical(kind, "instrument is collinear with the fixed effects"));
            }
            for c in cov_cols.iter_mut() {
                *c = fe.demean(c)?;
            }
            AbsorbedDf::two_way(&fe)
        } else {
            cov_cols.insert(0, vec![1.0; sample.rows.len()]);
            AbsorbedDf::default()
        };
        let exog: Vec<&[f64]> = cov_cols.iter().map(Vec::as_slice).collect();

        let fit = two_stage_least_squares(
            kind,
            IvColumns { y: &ys, endogenous: &ds, instrument: &zs, exogenous: &exog, clusters: &entity },
            absorbed,
        )?;

        Ok(EstimationResult {
            method: kind,
            outcome: outcome.to_string(),
            coef: fit.coef,
            se: fit.se,
            pvalue: fit.interval.pvalue,
            ci_lower: fit.interval.lower,
            ci_upper: fit.interval.upper,
            n_obs: fit.n_obs,
            r2: Some(fit.r2),
            diagnostics: Diagnostics {
                first_stage_f: Some(fit.first_stage.f_stat),
                first_stage_partial_r2: Some(fit.first_stage.partial_r2),
                weak_instrument: Some(fit.first_stage.weak),
                se_kind: Some(fit.se_kind),
                n_clusters: fit.n_clusters,
                ..sample.base_diagnostics()
            },
            dynamic: Vec::new(),
        })
    }
}

// ----------------------------------------------------------------------------
// Event study
// ----------------------------------------------------------------------------

/// Leads/lags regression with a joint pre-trend test.
#[derive(Debug, Clone, Copy)]
pub struct EventStudyEstimator;

impl Estimator for EventStudyEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::EventStudy
    }

    fn fit(&self, panel: &PanelDataset, outcome: &str, options: &FitOptions) -> Result<EstimationResult> {
        let y = panel.column(outcome)?;
        let covs = columns(panel, &options.covariates)?;
        let mut required = vec![y];
        required.extend(&covs);
        let sample = Sample::complete(panel, &required)?;

        let (ys, entity, year) = (sample.take(y), sample.entity(), sample.year());
        let treated: Vec<bool> = sample.take(panel.treated()).into_iter().map(|t| t == 1).collect();
        let rel = sample.take(panel.rel_time());
        let cov_cols: Vec<Vec<f64>> = covs.iter().map(|c| sample.take(c)).collect();
        let cov_refs: Vec<&[f64]> = cov_cols.iter().map(Vec::as_slice).collect();
        let fit = event_study(FeRows { y: &ys, entity: &entity, year: &year }, &treated, &rel, &cov_refs)?;

        let head = fit.headline();
        let dynamic = fit
            .buckets
            .iter()
            .map(|b| EventStudyPoint {
                rel_time: b.rel_time,
                coef: b.coef,
                se: b.se,
                pvalue: b.interval.pvalue,
                ci_lower: b.interval.lower,
                ci_upper: b.interval.upper,
                n_obs: b.n_treated_obs,
            })
            .collect();

        Ok(EstimationResult {
            method: self.kind(),
            outcome: outcome.to_string(),
            coef: head.coef,
            se: head.se,
            pvalue: head.interval.pvalue,
            ci_lower: head.interval.lower,
            ci_upper: head.interval.upper,
            n_obs: fit.n_obs,
            r2: Some(fit.r2_within),
            diagnostics: Diagnostics {
                pre_trend_pvalue: fit.pre_trend.map(|t| t.pvalue),
                pre_trend_flag: fit.pre_trend.map(|t| t.pvalue < ALPHA),
                pre_trend_status: Some(match fit.pre_trend {
                    Some(t) if t.pvalue < ALPHA => PreTrendStatus::Flagged,
                    Some(_) => PreTrendStatus::Clear,
                    None => PreTrendStatus::NotTestable,
                }),
                pre_trend_rank: fit.pre_trend.map(|t| t.rank),
                reference_period: Some(fit.reference_period),
                se_kind: Some(fit.se_kind),
                n_clusters: fit.n_clusters,
                ..sample.base_diagnostics()
            },
            dynamic,
        })
    }
}

// ----------------------------------------------------------------------------
// Synthetic control
// ----------------------------------------------------------------------------

/// Synthetic control, optionally ridge-augmented. Covariates are not used.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticControlEstimator {
    /// Apply the ridge bias correction.
    pub augmented: bool,
}

impl Estimator for SyntheticControlEstimator {
    fn kind(&self) -> EstimatorKind {
        if self.augmented { EstimatorKind::AugmentedScm } else { EstimatorKind::Scm }
    }

    fn check_preconditions(&self, options: &FitOptions) -> Result<()> {
        if options.synthetic_control {
            Ok(())
        } else {
            Err(Error::UnsupportedMethod(self.kind().method()))
        }
    }

    fn fit(&self, panel: &PanelDataset, outcome: &str, options: &FitOptions) -> Result<EstimationResult> {
        self.check_preconditions(options)?;
        let y = panel.column(outcome)?;
        let n_years = panel.years().len();
        let n_pre = panel.years().iter().filter(|&&yr| yr < panel.treatment_year()).count();

        let mut paths = vec![vec![f64::NAN; n_years]; panel.entities().len()];
        for (i, &v) in y.iter().enumerate() {
            paths[panel.entity_index()[i]][panel.year_index()[i]] = v;
        }
        let mut treated_paths = Vec::new();
        let mut donors = Vec::new();
        let mut donor_ids = Vec::new();
        let mut excluded = panel.n_rows();
        for (e, path) in paths.into_iter().enumerate() {
            if !path.iter().all(|v| v.is_finite()) {
                continue;
            }
            excluded -= n_years;
            let id = &panel.entities()[e];
            if panel.is_treated(id) {
                treated_paths.push(path);
            } else {
                donor_ids.push(id.clone());
                donors.push(path);
            }
        }
        if treated_paths.is_empty() {
            return Err(Error::DataInsufficient(format!(
                "{}: no treated entity has a complete {outcome} path",
                self.kind()
            )));
        }
        let treated: Vec<f64> = (0..n_years)
            .map(|t| treated_paths.iter().map(|p| p[t]).sum::<f64>() / treated_paths.len() as f64)
            .collect();

        let input = SyntheticInput { treated: &treated, donors: &donors, n_pre };
        let fit = synthetic_control(input, self.augmented)?;
        let inference = placebo_inference(input, &fit, self.augmented);
        let (ci_lower, ci_upper) = normal_bounds(fit.effect, inference.se);

        let donor_weights: BTreeMap<String, f64> = donor_ids
            .into_iter()
            .zip(&fit.weights)
            .filter(|(_, w)| **w > MIN_REPORTED_WEIGHT)
            .map(|(id, w)| (id, *w))
            .collect();

        Ok(EstimationResult {
            method: self.kind(),
            outcome: outcome.to_string(),
            coef: fit.effect,
            se: inference.se,
            pvalue: inference.pvalue,
            ci_lower,
            ci_upper,
            n_obs: (treated_paths.len() + donors.len()) * n_years,
            r2: fit.r2_pre,
            diagnostics: Diagnostics {
                n_entities: Some(treated_paths.len() + donors.len()),
                n_treated: Some(treated_paths.len()),
                n_donors: Some(donors.len()),
                pre_rmspe: Some(fit.pre_rmspe),
                donor_weights: Some(donor_weights),
                bias_correction: fit.bias_correction,
                se_kind: Some(StandardErrorKind::Placebo),
                excluded_obs: Some(excluded),
                ..Diagnostics::default()
            },
            dynamic: Vec::new(),
        })
    }
}

// ----------------------------------------------------------------------------
// Fan-out
// ----------------------------------------------------------------------------

/// Outcome of one `(method, outcome)` pair.
#[derive(Debug)]
pub struct PairEstimate {
    /// Estimator.
    pub method: EstimatorKind,
    /// Outcome variable.
    pub outcome: String,
    /// Estimate or the error that stopped it.
    pub result: Result<EstimationResult>,
}

/// Run every `(method, outcome)` pair in parallel against one panel.
///
/// Pairs are independent: an error or panic in one is recorded on that pair
/// only. Output order is methods-major, then outcomes, as given.
pub fn estimate_pairs(
    panel: &PanelDataset,
    methods: &[EstimatorKind],
    outcomes: &[String],
    options: &FitOptions,
) -> Vec<PairEstimate> {
    let pairs: Vec<(EstimatorKind, &String)> =
        methods.iter().flat_map(|&m| outcomes.iter().map(move |o| (m, o))).collect();
    pairs
        .into_par_iter()
        .map(|(method, outcome)| {
            let started = Instant::now();
            let estimator = estimator_for(method);
            let result = catch_unwind(AssertUnwindSafe(|| {
                estimator.check_preconditions(options)?;
                estimator.fit(panel, outcome, options)
            }))
            .unwrap_or_else(|_| Err(Error::Internal(format!("{method} panicked on {outcome}"))));
            match &result {
                Ok(r) => tracing::debug!(
                    %method,
                    outcome = outcome.as_str(),
                    coef = r.coef,
                    pvalue = r.pvalue,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "estimate ok"
                ),
                Err(e) => tracing::warn!(
                    %method,
                    outcome = outcome.as_str(),
                    kind = e.kind(),
                    error = %e,
                    "estimate failed"
                ),
            }
            PairEstimate { method, outcome: outcome.clone(), result }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ei_panel::{PanelLayout, PanelRecord};

    /// 8 entities × 8 years, entities A0..A3 treated from 2014 with effect 1.
    fn panel(with_instrument: bool) -> PanelDataset {
        let mut records = Vec::new();
        for e in 0..8 {
            let id = if e < 4 { format!("A{e}") } else { format!("C{e}") };
            for (t, year) in (2010..2018).enumerate() {
                let treated = e < 4 && year >= 2014;
                let noise = (((e * 31 + t * 17) % 13) as f64 - 6.0) * 0.01;
                let z = ((e * 7 + t * 3) % 5) as f64;
                let d = if treated { 1.0 } else { 0.0 } + 0.3 * z;
                let dose = if with_instrument { d } else { f64::from(u8::from(treated)) };
                let y = 2.0 + 0.5 * e as f64 + 0.1 * t as f64 + dose + noise;
                let mut vals = vec![("y", y), ("x", ((e + t) % 3) as f64)];
                if with_instrument {
                    vals.push(("z", z));
                    vals.push(("dose", d));
                }
                records.push(PanelRecord::new(id.clone(), year, &vals));
            }
        }
        let layout = PanelLayout {
            treatment_year: 2014,
            treated: (0..4).map(|e| format!("A{e}")).collect(),
            outcomes: vec!["y".into()],
            covariates: vec!["x".into()],
            instrument: with_instrument.then(|| "z".to_string()),
            treatment_variable: with_instrument.then(|| "dose".to_string()),
        };
        PanelDataset::new(layout, records, vec![]).unwrap()
    }

    #[test]
    fn did_result_shape() {
        let p = panel(false);
        let r = DidEstimator.fit(&p, "y", &FitOptions::default()).unwrap();
        assert_eq!(r.method, EstimatorKind::Did);
        assert_eq!(r.n_obs, 64);
        assert!((r.coef - 1.0).abs() < 0.1, "coef = {}", r.coef);
        assert_eq!(r.diagnostics.se_kind, Some(StandardErrorKind::Hc1));
        assert_eq!(r.diagnostics.n_clusters, None);
        assert_eq!(r.diagnostics.n_treated, Some(4));
        assert_eq!(r.diagnostics.excluded_obs, Some(0));
        assert!(r.dynamic.is_empty());
    }

    #[test]
    fn iv_needs_instrument_before_data() {
        let p = panel(false);
        for kind in [EstimatorKind::Iv, EstimatorKind::PanelIv] {
            let err = estimator_for(kind).check_preconditions(&FitOptions::default()).unwrap_err();
            assert_eq!(err.kind(), "configuration_error");
            assert!(estimator_for(kind).fit(&p, "y", &FitOptions::default()).is_err());
        }
    }

    #[test]
    fn iv_variants_report_first_stage() {
        let p = panel(true);
        let opts = FitOptions {
            instrument: Some("z".into()),
            treatment_variable: Some("dose".into()),
            ..FitOptions::default()
        };
        for kind in [EstimatorKind::Iv, EstimatorKind::PanelIv] {
            let r = estimator_for(kind).fit(&p, "y", &opts).unwrap();
            assert_eq!(r.method, kind);
            assert!(r.diagnostics.first_stage_f.is_some());
            assert!(r.diagnostics.weak_instrument.is_some());
            assert!(r.coef.is_finite());
        }
    }

    #[test]
    fn event_study_carries_dynamic_sequence() {
        let p = panel(false);
        let r = EventStudyEstimator.fit(&p, "y", &FitOptions::default()).unwrap();
        assert_eq!(r.diagnostics.reference_period, Some(-1));
        let ks: Vec<i32> = r.dynamic.iter().map(|d| d.rel_time).collect();
        assert_eq!(ks, vec![-4, -3, -2, 0, 1, 2, 3]);
        assert_eq!(r.coef, r.dynamic[3].coef);
        assert!(r.diagnostics.pre_trend_pvalue.is_some());
        assert_eq!(r.diagnostics.pre_trend_rank, Some(3));
        assert!(matches!(
            r.diagnostics.pre_trend_status,
            Some(PreTrendStatus::Clear | PreTrendStatus::Flagged)
        ));
        assert_eq!(r.diagnostics.se_kind, Some(StandardErrorKind::Homoskedastic));
    }

    #[test]
    fn synthetic_control_gated_by_flag() {
        let p = panel(false);
        let err = estimator_for(EstimatorKind::Scm).fit(&p, "y", &FitOptions::default()).unwrap_err();
        assert_eq!(err.kind(), "unsupported_method");

        let opts = FitOptions { synthetic_control: true, ..FitOptions::default() };
        for kind in [EstimatorKind::Scm, EstimatorKind::AugmentedScm] {
            let r = estimator_for(kind).fit(&p, "y", &opts).unwrap();
            assert_eq!(r.n_obs, 64);
            assert_eq!(r.diagnostics.n_donors, Some(4));
            assert_eq!(r.diagnostics.se_kind, Some(StandardErrorKind::Placebo));
            let total: f64 = r.diagnostics.donor_weights.as_ref().unwrap().values().sum();
            assert!((total - 1.0).abs() < 1e-3);
        }
    }

    #[test]
    fn missing_cells_are_excluded_and_counted() {
        let base = panel(false);
        let mut records = Vec::new();
        for i in 0..base.n_rows() {
            let mut y = base.column("y").unwrap()[i];
            if base.entity_id(i) == "C5" && base.year(i) == 2011 {
                y = f64::NAN;
            }
            records.push(PanelRecord::new(base.entity_id(i).clone(), base.year(i), &[("y", y), ("x", 0.0)]));
        }
        let p = PanelDataset::new(base.layout().clone(), records, vec![]).unwrap();
        let r = DidEstimator.fit(&p, "y", &FitOptions::default()).unwrap();
        assert_eq!(r.n_obs, 63);
        assert_eq!(r.diagnostics.excluded_obs, Some(1));

        let opts = FitOptions { synthetic_control: true, ..FitOptions::default() };
        let r = estimator_for(EstimatorKind::Scm).fit(&p, "y", &opts).unwrap();
        assert_eq!(r.diagnostics.excluded_obs, Some(8));
        assert_eq!(r.diagnostics.n_donors, Some(3));
    }

    #[test]
    fn pairs_are_isolated_and_ordered() {
        let p = panel(false);
        let outcomes = vec!["y".to_string(), "missing".to_string()];
        let methods = [EstimatorKind::Did, EstimatorKind::Iv];
        let out = estimate_pairs(&p, &methods, &outcomes, &FitOptions::default());
        let labels: Vec<(EstimatorKind, &str, bool)> =
            out.iter().map(|o| (o.method, o.outcome.as_str(), o.result.is_ok())).collect();
        assert_eq!(
            labels,
            vec![
                (EstimatorKind::Did, "y", true),
                (EstimatorKind::Did, "missing", false),
                (EstimatorKind::Iv, "y", false),
                (EstimatorKind::Iv, "missing", false),
            ]
        );
    }
}
