//! Event-study regression with leads and lags around a common treatment year.
//!
//! `y_it = α_i + λ_t + Σ_{k≠ref} δ_k · 1{treated_i, t − T = k} + x_it'γ + ε_it`.
//! Control units carry no indicator. The reference bucket is −1 when treated
//! rows exist there, otherwise the closest pre-period bucket present.
//!
//! Standard errors are entity-clustered with `t(G − 1)` when the panel has
//! enough treated and untreated entities (see [`VcovChoice::select`]).
//! Otherwise each bucket holds only a handful of treated rows, whose
//! residuals are forced towards zero (exactly zero for a single treated
//! entity), so the classical `σ̂²(X'X)⁻¹` with `t(N − K)` is used instead.
//!
//! Leads (`k < 0`) are tested jointly with a Wald statistic on the same
//! covariance, restricted to the rank of the lead block.

use ei_core::{EstimatorKind, Error, Result, StandardErrorKind};
use nalgebra::DVector;

use super::did::FeRows;
use super::hdfe::FixedEffects;
use super::robust::{
    AbsorbedDf, Interval, VcovChoice, covariance, design, is_absorbed, least_squares, t_interval,
    wald_f,
};

const KIND: EstimatorKind = EstimatorKind::EventStudy;

/// One estimated bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Bucket {
    /// Relative year.
    pub rel_time: i32,
    /// Coefficient.
    pub coef: f64,
    /// Standard error.
    pub se: f64,
    /// p-value and interval.
    pub interval: Interval,
    /// Treated rows in the bucket.
    pub n_treated_obs: usize,
}

/// Joint pre-trend test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreTrendTest {
    /// Wald F statistic.
    pub f_stat: f64,
    /// p-value.
    pub pvalue: f64,
    /// Leads estimated.
    pub n_leads: usize,
    /// Independent restrictions tested (`≤ n_leads`).
    pub rank: usize,
}

/// Event-study fit.
#[derive(Debug, Clone)]
pub struct EventStudyFit {
    /// Estimated buckets, ascending in `rel_time` (reference omitted).
    pub buckets: Vec<Bucket>,
    /// Omitted bucket.
    pub reference_period: i32,
    /// Index into `buckets` of the representative effect.
    pub headline: usize,
    /// Joint test of the leads; `None` without leads or when the lead
    /// covariance has rank zero.
    pub pre_trend: Option<PreTrendTest>,
    /// Within R².
    pub r2_within: f64,
    /// Rows used.
    pub n_obs: usize,
    /// Estimator behind every bucket's standard error.
    pub se_kind: StandardErrorKind,
    /// Entity clusters, when clustered.
    pub n_clusters: Option<usize>,
}

impl EventStudyFit {
    /// The representative (headline) bucket.
    pub fn headline(&self) -> &Bucket {
        &self.buckets[self.headline]
    }
}

/// Pick the omitted bucket from the relative years observed for treated rows.
pub fn reference_period(treated_rel_times: &[i32]) -> Option<i32> {
    if treated_rel_times.contains(&-1) {
        return Some(-1);
    }
    treated_rel_times.iter().copied().filter(|&k| k < 0).max()
}

/// Fit the event study. `treated` flags treated rows; `rel_time` is
/// `year − treatment_year` per row.
pub fn event_study(
    rows: FeRows<'_>,
    treated: &[bool],
    rel_time: &[i32],
    covariates: &[&[f64]],
) -> Result<EventStudyFit> {
    rows.check(KIND)?;
    let n = rows.y.len();
    if treated.len() != n || rel_time.len() != n || covariates.iter().any(|c| c.len() != n) {
        return Err(Error::Validation("event_study: column length mismatch".into()));
    }

    let mut observed: Vec<i32> =
        (0..n).filter(|&i| treated[i]).map(|i| rel_time[i]).collect();
    observed.sort_unstable();
    observed.dedup();
    let reference = reference_period(&observed)
        .ok_or_else(|| Error::DataInsufficient("no pre-treatment period for treated units".into()))?;
    let rel_times: Vec<i32> = observed.into_iter().filter(|&k| k != reference).collect();
    let headline = rel_times
        .iter()
        .position(|&k| k == 0)
        .or_else(|| rel_times.iter().position(|&k| k > 0))
        .ok_or_else(|| Error::DataInsufficient("no post-treatment period for treated units".into()))?;

    let mut indicators: Vec<Vec<f64>> = vec![vec![0.0; n]; rel_times.len()];
    let mut counts = vec![0usize; rel_times.len()];
    for i in (0..n).filter(|&i| treated[i]) {
        if let Ok(pos) = rel_times.binary_search(&rel_time[i]) {
            indicators[pos][i] = 1.0;
            counts[pos] += 1;
        }
    }

    let fe = FixedEffects::two_way(rows.entity, rows.year)?;
    let y = DVector::from_vec(fe.demean(rows.y)?);
    let mut cols: Vec<&[f64]> = indicators.iter().map(Vec::as_slice).collect();
    cols.extend_from_slice(covariates);
    let x_dm = fe.demean_all(&cols)?;
    if let Some(j) = (0..cols.len()).find(|&j| is_absorbed(cols[j], &x_dm[j])) {
        return Err(Error::numerical(KIND, format!("regressor {j} is collinear with the fixed effects")));
    }
    let x_refs: Vec<&[f64]> = x_dm.iter().map(Vec::as_slice).collect();
    let x = design(&x_refs);
    let fit = least_squares(&x, &y).ok_or_else(|| {
        Error::numerical(KIND, "leads/lags are collinear with the year effects (are there controls?)")
    })?;

    let choice = VcovChoice::select(rows.entity, Some(treated), VcovChoice::Homoskedastic);
    let cov = covariance(choice, &x, &fit.resid, &fit.xtx_inv, rows.entity, AbsorbedDf::two_way(&fe));
    let df = cov.df;
    if df < 1.0 {
        return Err(Error::DataInsufficient(format!("{KIND}: no residual degrees of freedom")));
    }

    let buckets: Vec<Bucket> = rel_times
        .iter()
        .enumerate()
        .map(|(j, &k)| {
            let (coef, se) = (fit.beta[j], cov.se(j));
            Bucket { rel_time: k, coef, se, interval: t_interval(coef, se, df), n_treated_obs: counts[j] }
        })
        .collect();

    let leads: Vec<usize> = (0..rel_times.len()).filter(|&j| rel_times[j] < 0).collect();
    let pre_trend = wald_f(&fit.beta, &cov.vcov, &leads, df).map(|w| PreTrendTest {
        f_stat: w.f_stat,
        pvalue: w.pvalue,
        n_leads: leads.len(),
        rank: w.rank,
    });
    if pre_trend.is_none() {
        tracing::warn!(n_leads = leads.len(), "pre-trend test not computable");
    }

    let tss = y.norm_squared();
    let r2_within = if tss > 0.0 { 1.0 - fit.rss / tss } else { 0.0 };
    tracing::debug!(
        reference,
        n_buckets = buckets.len(),
        n_leads = leads.len(),
        pre_trend_p = pre_trend.map(|t| t.pvalue),
        se_kind = ?cov.kind,
        "event study fitted"
    );

    Ok(EventStudyFit {
        buckets,
        reference_period: reference,
        headline,
        pre_trend,
        r2_within,
        n_obs: n,
        se_kind: cov.kind,
        n_clusters: cov.n_clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    struct Grid {
        y: Vec<f64>,
        entity: Vec<usize>,
        year: Vec<usize>,
        treated: Vec<bool>,
        rel: Vec<i32>,
    }

    /// 6 entities × 6 years, entities 3..6 treated at year index 3.
    fn grid(effect: impl Fn(i32) -> f64, skip_year: Option<usize>) -> Grid {
        let mut g = Grid { y: vec![], entity: vec![], year: vec![], treated: vec![], rel: vec![] };
        for i in 0..6 {
            for t in 0..6 {
                let tr = i >= 3;
                if tr && Some(t) == skip_year {
                    continue;
                }
                let k = t as i32 - 3;
                g.entity.push(i);
                g.year.push(t);
                g.treated.push(tr);
                g.rel.push(k);
                let wiggle = ((i * 5 + t * 3) % 4) as f64 * 0.01;
                g.y.push(10.0 * i as f64 + 2.0 * t as f64 + if tr { effect(k) } else { 0.0 } + wiggle);
            }
        }
        g
    }

    fn fit(g: &Grid) -> EventStudyFit {
        event_study(FeRows { y: &g.y, entity: &g.entity, year: &g.year }, &g.treated, &g.rel, &[]).unwrap()
    }

    #[test]
    fn recovers_dynamic_effects() {
        let g = grid(|k| if k >= 0 { 5.0 + k as f64 } else { 0.0 }, None);
        let res = fit(&g);
        assert_eq!(res.reference_period, -1);
        let ks: Vec<i32> = res.buckets.iter().map(|b| b.rel_time).collect();
        assert_eq!(ks, vec![-3, -2, 0, 1, 2]);
        assert_eq!(res.headline().rel_time, 0);
        for b in &res.buckets {
            let want = if b.rel_time >= 0 { 5.0 + b.rel_time as f64 } else { 0.0 };
            assert_abs_diff_eq!(b.coef, want, epsilon = 0.1);
            assert_eq!(b.n_treated_obs, 3);
        }
        let pt = res.pre_trend.unwrap();
        assert_eq!(pt.n_leads, 2);
        assert_eq!(pt.rank, 2);
        assert!((0.0..=1.0).contains(&pt.pvalue));
        assert_eq!(res.se_kind, StandardErrorKind::Homoskedastic);
    }

    #[test]
    fn single_treated_entity_keeps_lead_test() {
        // One treated entity and two controls: every treated row is its own
        // bucket, so only the classical covariance sees its noise.
        let (mut y, mut entity, mut year, mut treated, mut rel) = (vec![], vec![], vec![], vec![], vec![]);
        for i in 0..3 {
            for t in 0..11 {
                let wiggle = ((i * 7 + t * 5) % 6) as f64 * 0.02 - 0.05;
                entity.push(i);
                year.push(t);
                treated.push(i == 0);
                rel.push(t as i32 - 5);
                y.push(i as f64 + 0.1 * t as f64 + wiggle);
            }
        }
        let res = event_study(FeRows { y: &y, entity: &entity, year: &year }, &treated, &rel, &[]).unwrap();
        assert_eq!(res.se_kind, StandardErrorKind::Homoskedastic);
        assert_eq!(res.n_clusters, None);
        assert!(res.buckets.iter().all(|b| b.se.is_finite() && b.se > 0.0));
        let pt = res.pre_trend.expect("lead test");
        assert_eq!((pt.n_leads, pt.rank), (4, 4));
    }

    #[test]
    fn falls_back_to_closest_pre_period() {
        // Treated units miss year index 2 (rel −1), so −2 becomes the reference.
        let g = grid(|k| if k >= 0 { 3.0 } else { 0.0 }, Some(2));
        let res = fit(&g);
        assert_eq!(res.reference_period, -2);
        assert_eq!(res.buckets.first().map(|b| b.rel_time), Some(-3));
    }

    #[test]
    fn headline_falls_back_to_first_positive_bucket() {
        let g = grid(|k| if k >= 0 { 3.0 } else { 0.0 }, Some(3));
        let res = fit(&g);
        assert_eq!(res.headline().rel_time, 1);
    }

    #[test]
    fn reference_rules() {
        assert_eq!(reference_period(&[-3, -2, -1, 0]), Some(-1));
        assert_eq!(reference_period(&[-4, -2, 0, 1]), Some(-2));
        assert_eq!(reference_period(&[0, 1]), None);
    }
}
