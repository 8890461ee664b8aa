//! Two-Stage Least Squares with one endogenous regressor and one excluded
//! instrument, plus first-stage strength diagnostics.
//!
//! The pooled estimator passes an intercept (and covariates) as exogenous
//! columns; the panel estimator passes fixed-effect-demeaned columns and no
//! intercept, with the absorbed effects counted in [`AbsorbedDf`].
//!
//! Standard errors are entity-clustered with `t(G − 1)` from
//! [`MIN_CLUSTERS`](super::robust::MIN_CLUSTERS) entities on, HC1 with
//! `t(N − K)` below that.
//!
//! # References
//!
//! - Wooldridge, *Econometric Analysis of Cross Section and Panel Data*, Ch. 5.
//! - Stock & Yogo (2005), "Testing for weak instruments in linear IV regression."

use ei_core::{EstimatorKind, Error, Result, StandardErrorKind};
use nalgebra::{DMatrix, DVector};

use super::robust::{AbsorbedDf, Interval, VcovChoice, covariance, design, gram_inverse, t_interval};

/// Stock–Yogo 10% maximal IV size critical value, one endogenous regressor
/// and one excluded instrument.
pub const STOCK_YOGO_10: f64 = 16.38;

/// Inputs of a just-identified 2SLS fit.
#[derive(Debug, Clone, Copy)]
pub struct IvColumns<'a> {
    /// Outcome.
    pub y: &'a [f64],
    /// Endogenous treatment intensity.
    pub endogenous: &'a [f64],
    /// Excluded instrument.
    pub instrument: &'a [f64],
    /// Included exogenous columns (intercept first when present).
    pub exogenous: &'a [&'a [f64]],
    /// Cluster per row.
    pub clusters: &'a [usize],
}

/// First-stage diagnostics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FirstStage {
    /// F statistic of the excluded instrument.
    pub f_stat: f64,
    /// Partial R² of the excluded instrument.
    pub partial_r2: f64,
    /// `f_stat` below [`STOCK_YOGO_10`].
    pub weak: bool,
}

/// 2SLS estimate of the endogenous coefficient.
#[derive(Debug, Clone)]
pub struct IvFit {
    /// Coefficient on the endogenous regressor.
    pub coef: f64,
    /// Standard error of `coef`.
    pub se: f64,
    /// Estimator behind `se`.
    pub se_kind: StandardErrorKind,
    /// p-value and interval.
    pub interval: Interval,
    /// Second-stage R² using structural residuals.
    pub r2: f64,
    /// First-stage diagnostics.
    pub first_stage: FirstStage,
    /// Rows used.
    pub n_obs: usize,
    /// Entity clusters, when clustered.
    pub n_clusters: Option<usize>,
}

/// Fit 2SLS. `kind` labels numerical failures (`Iv` or `PanelIv`).
pub fn two_stage_least_squares(
    kind: EstimatorKind,
    cols: IvColumns<'_>,
    absorbed: AbsorbedDf,
) -> Result<IvFit> {
    let n = cols.y.len();
    if cols.endogenous.len() != n
        || cols.instrument.len() != n
        || cols.clusters.len() != n
        || cols.exogenous.iter().any(|c| c.len() != n)
    {
        return Err(Error::Validation(format!("{kind}: column length mismatch")));
    }
    let k_exog = cols.exogenous.len();
    let k_absorbed = absorbed.total;
    if n <= k_exog + 1 + k_absorbed {
        return Err(Error::DataInsufficient(format!(
            "{kind}: {n} observations cannot identify {} parameters",
            k_exog + 1 + k_absorbed
        )));
    }

    let y = DVector::from_column_slice(cols.y);
    let d = DVector::from_column_slice(cols.endogenous);

    // Instrument set [exog | z].
    let mut z_cols: Vec<&[f64]> = cols.exogenous.to_vec();
    z_cols.push(cols.instrument);
    let z = design(&z_cols);
    let ztz_inv = gram_inverse(&z)
        .ok_or_else(|| Error::numerical(kind, "instrument set is collinear with exogenous regressors"))?;

    // First stage.
    let gamma = &ztz_inv * (z.transpose() * &d);
    let d_hat = &z * gamma;
    let rss_u = (&d - &d_hat).norm_squared();
    let rss_r = if k_exog > 0 {
        let x_exog = design(cols.exogenous);
        match gram_inverse(&x_exog) {
            Some(inv) => (&d - &x_exog * (&inv * (x_exog.transpose() * &d))).norm_squared(),
            None => return Err(Error::numerical(kind, "exogenous regressors are collinear")),
        }
    } else {
        d.norm_squared()
    };
    let df_resid = (n - k_exog - 1 - k_absorbed) as f64;
    let f_stat = if rss_u > 0.0 { (rss_r - rss_u) / (rss_u / df_resid) } else { f64::INFINITY };
    let partial_r2 = if rss_r > 0.0 { ((rss_r - rss_u) / rss_r).clamp(0.0, 1.0) } else { 0.0 };
    let first_stage = FirstStage { f_stat, partial_r2, weak: f_stat.is_nan() || f_stat < STOCK_YOGO_10 };

    // Second stage on [exog | d̂]; structural residuals use the observed d.
    let x_hat = append_column(cols.exogenous, d_hat.as_slice());
    let x_obs = append_column(cols.exogenous, cols.endogenous);
    let xtx_inv = gram_inverse(&x_hat)
        .ok_or_else(|| Error::numerical(kind, "instrument has no first-stage variation"))?;
    let beta = &xtx_inv * (x_hat.transpose() * &y);
    let resid = &y - &x_obs * &beta;

    let choice = VcovChoice::select(cols.clusters, None, VcovChoice::Hc1);
    let cov = covariance(choice, &x_hat, &resid, &xtx_inv, cols.clusters, absorbed);
    let j = k_exog;
    let coef = beta[j];
    let se = cov.se(j);

    let mean = cols.y.iter().sum::<f64>() / n as f64;
    let tss: f64 = cols.y.iter().map(|v| (v - mean).powi(2)).sum();
    let r2 = if tss > 0.0 { 1.0 - resid.norm_squared() / tss } else { 0.0 };

    tracing::debug!(%kind, coef, se, se_kind = ?cov.kind, f_stat, n_obs = n, "2sls fitted");
    Ok(IvFit {
        coef,
        se,
        se_kind: cov.kind,
        interval: t_interval(coef, se, cov.df),
        r2,
        first_stage,
        n_obs: n,
        n_clusters: cov.n_clusters,
    })
}

fn append_column(cols: &[&[f64]], last: &[f64]) -> DMatrix<f64> {
    let mut all: Vec<&[f64]> = cols.to_vec();
    all.push(last);
    design(&all)
}
