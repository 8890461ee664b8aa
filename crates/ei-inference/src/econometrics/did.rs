//! Two-way fixed-effects Difference-in-Differences.
//!
//! `y_it = α_i + λ_t + δ·D_it + x_it'γ + ε_it` with `D = treated × post`.
//! Entity and year effects are absorbed by [`FixedEffects`]. δ carries an
//! entity-clustered standard error with `t(G − 1)` when at least
//! [`MIN_CLUSTERS`](super::robust::MIN_CLUSTERS) entities and two treated and
//! two untreated entities are present, and an HC1 standard error with
//! `t(N − K)` otherwise.
//!
//! # References
//!
//! - Angrist & Pischke, *Mostly Harmless Econometrics*, Ch. 5.
//! - Bertrand, Duflo & Mullainathan (2004), "How much should we trust
//!   differences-in-differences estimates?" *QJE*.

use ei_core::{EstimatorKind, Error, Result, StandardErrorKind};
use nalgebra::DVector;

use super::hdfe::FixedEffects;
use super::robust::{
    AbsorbedDf, Interval, VcovChoice, covariance, design, is_absorbed, least_squares, t_interval,
};

/// Rows of a fixed-effects regression, already restricted to complete cases.
#[derive(Debug, Clone, Copy)]
pub struct FeRows<'a> {
    /// Outcome.
    pub y: &'a [f64],
    /// Entity level per row; also the cluster.
    pub entity: &'a [usize],
    /// Year level per row.
    pub year: &'a [usize],
}

impl FeRows<'_> {
    pub(crate) fn check(&self, kind: EstimatorKind) -> Result<()> {
        let n = self.y.len();
        if self.entity.len() != n || self.year.len() != n {
            return Err(Error::Validation(format!("{kind}: row index length mismatch")));
        }
        Ok(())
    }
}

/// TWFE estimate of δ.
#[derive(Debug, Clone)]
pub struct DidFit {
    /// ATT estimate.
    pub att: f64,
    /// Standard error of `att`.
    pub se: f64,
    /// Estimator behind `se`.
    pub se_kind: StandardErrorKind,
    /// p-value and interval.
    pub interval: Interval,
    /// Within R².
    pub r2_within: f64,
    /// Rows used.
    pub n_obs: usize,
    /// Entity clusters, when clustered.
    pub n_clusters: Option<usize>,
}

/// Fit the TWFE DiD. `treatment` is the `treated × post` column; covariates
/// follow it in the design.
pub fn twfe_did(rows: FeRows<'_>, treatment: &[f64], covariates: &[&[f64]]) -> Result<DidFit> {
    const KIND: EstimatorKind = EstimatorKind::Did;
    rows.check(KIND)?;
    let n = rows.y.len();
    if treatment.len() != n || covariates.iter().any(|c| c.len() != n) {
        return Err(Error::Validation("did: regressor length mismatch".into()));
    }
    if !treatment.iter().any(|&d| d != 0.0) {
        return Err(Error::DataInsufficient("no treated post-period observations".into()));
    }

    let fe = FixedEffects::two_way(rows.entity, rows.year)?;
    let y_dm = fe.demean(rows.y)?;
    let mut cols: Vec<&[f64]> = Vec::with_capacity(1 + covariates.len());
    cols.push(treatment);
    cols.extend_from_slice(covariates);
    let x_dm = fe.demean_all(&cols)?;
    if let Some(j) = (0..cols.len()).find(|&j| is_absorbed(cols[j], &x_dm[j])) {
        let what = if j == 0 { "treatment indicator".to_string() } else { format!("covariate {j}") };
        return Err(Error::numerical(KIND, format!("{what} is collinear with the fixed effects")));
    }
    let x_refs: Vec<&[f64]> = x_dm.iter().map(Vec::as_slice).collect();
    let x = design(&x_refs);
    let y = DVector::from_vec(y_dm);

    let fit = least_squares(&x, &y)
        .ok_or_else(|| Error::numerical(KIND, "singular design after absorbing fixed effects"))?;

    let treated: Vec<bool> = treatment.iter().map(|&d| d != 0.0).collect();
    let choice = VcovChoice::select(rows.entity, Some(&treated), VcovChoice::Hc1);
    let cov = covariance(choice, &x, &fit.resid, &fit.xtx_inv, rows.entity, AbsorbedDf::two_way(&fe));
    if cov.df < 1.0 {
        return Err(Error::DataInsufficient(format!("{KIND}: no residual degrees of freedom")));
    }

    let att = fit.beta[0];
    let se = cov.se(0);
    let tss = y.norm_squared();
    let r2_within = if tss > 0.0 { 1.0 - fit.rss / tss } else { 0.0 };
    tracing::debug!(att, se, se_kind = ?cov.kind, df = cov.df, n_obs = n, "twfe did fitted");

    Ok(DidFit {
        att,
        se,
        se_kind: cov.kind,
        interval: t_interval(att, se, cov.df),
        r2_within,
        n_obs: n,
        n_clusters: cov.n_clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// 4 entities × 6 years, entities 2,3 treated from year index 3.
    fn grid(effect: f64, noise: impl Fn(usize, usize) -> f64) -> (Vec<f64>, Vec<usize>, Vec<usize>, Vec<f64>) {
        let (mut y, mut e, mut t, mut d) = (vec![], vec![], vec![], vec![]);
        for i in 0..4 {
            for yr in 0..6 {
                let treated = i >= 2 && yr >= 3;
                e.push(i);
                t.push(yr);
                d.push(if treated { 1.0 } else { 0.0 });
                y.push(3.0 * i as f64 + 0.5 * yr as f64 + if treated { effect } else { 0.0 } + noise(i, yr));
            }
        }
        (y, e, t, d)
    }

    #[test]
    fn recovers_exact_effect() {
        let (y, e, t, d) = grid(2.5, |_, _| 0.0);
        let fit = twfe_did(FeRows { y: &y, entity: &e, year: &t }, &d, &[]).unwrap();
        assert_relative_eq!(fit.att, 2.5, epsilon = 1e-8);
        assert_eq!(fit.n_obs, 24);
        // Four entities are too few to cluster.
        assert_eq!(fit.se_kind, StandardErrorKind::Hc1);
        assert_eq!(fit.n_clusters, None);
    }

    #[test]
    fn noisy_fit_has_finite_inference() {
        let (y, e, t, d) = grid(1.0, |i, yr| ((i * 7 + yr * 3) % 5) as f64 * 0.1 - 0.2);
        let fit = twfe_did(FeRows { y: &y, entity: &e, year: &t }, &d, &[]).unwrap();
        assert!(fit.se.is_finite() && fit.se > 0.0);
        assert!(fit.interval.lower < fit.att && fit.att < fit.interval.upper);
        assert!((0.0..=1.0).contains(&fit.r2_within));
    }

    #[test]
    fn covariate_is_partialled() {
        let x: Vec<f64> = (0..24).map(|k| ((k * 13) % 7) as f64).collect();
        let (mut y, e, t, d) = grid(1.5, |_, _| 0.0);
        for (yi, xi) in y.iter_mut().zip(&x) {
            *yi += 0.8 * xi;
        }
        let fit = twfe_did(FeRows { y: &y, entity: &e, year: &t }, &d, &[&x]).unwrap();
        assert_relative_eq!(fit.att, 1.5, epsilon = 1e-8);
    }

    #[test]
    fn everyone_treated_is_collinear() {
        let e = vec![0, 0, 1, 1];
        let t = vec![0, 1, 0, 1];
        let d = vec![0.0, 1.0, 0.0, 1.0];
        let y = vec![1.0, 2.0, 3.0, 5.0];
        let err = twfe_did(FeRows { y: &y, entity: &e, year: &t }, &d, &[]).unwrap_err();
        assert_eq!(err.kind(), "estimation_numerical_error");
    }
}
