//! Synthetic control and its ridge-augmented variant.
//!
//! Donor weights live on the probability simplex and minimise the
//! pre-period squared prediction error; they are found by accelerated
//! projected gradient (FISTA) with the Euclidean simplex projection of
//! Duchi et al. (2008). The augmented estimator subtracts, per post year, the
//! ridge-predicted outcome of the remaining pre-period imbalance.
//!
//! Inference permutes the treated label over donors (in-space placebos):
//! the p-value is the rank of the treated post/pre RMSPE ratio, the standard
//! error the spread of placebo effects.
//!
//! # References
//!
//! - Abadie, Diamond & Hainmueller (2010), "Synthetic Control Methods for
//!   Comparative Case Studies." *JASA*.
//! - Ben-Michael, Feller & Rothstein (2021), "The Augmented Synthetic Control
//!   Method." *JASA*.

use ei_core::{EstimatorKind, Error, Result};
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

const MAX_ITER: usize = 5_000;
const WEIGHT_TOL: f64 = 1e-10;
/// Ridge penalty as a share of the mean per-year donor variance.
const RIDGE_SCALE: f64 = 0.1;

/// Outcome paths on a common year grid.
#[derive(Debug, Clone, Copy)]
pub struct SyntheticInput<'a> {
    /// Treated path (mean of treated units), one value per year.
    pub treated: &'a [f64],
    /// Donor paths, each one value per year.
    pub donors: &'a [Vec<f64>],
    /// Leading years that are pre-treatment.
    pub n_pre: usize,
}

/// Synthetic-control point estimate.
#[derive(Debug, Clone)]
pub struct SyntheticFit {
    /// Donor weights (non-negative, sum to one).
    pub weights: Vec<f64>,
    /// Treated minus synthetic, per year (bias-corrected in post years when
    /// augmented).
    pub gaps: Vec<f64>,
    /// Mean post-period gap.
    pub effect: f64,
    /// Pre-period RMSPE.
    pub pre_rmspe: f64,
    /// Post-period RMSPE.
    pub post_rmspe: f64,
    /// Pre-period fit R²; `None` when the treated pre path is flat.
    pub r2_pre: Option<f64>,
    /// Mean ridge correction (augmented only).
    pub bias_correction: Option<f64>,
}

impl SyntheticFit {
    fn rmspe_ratio(&self) -> f64 {
        self.post_rmspe / self.pre_rmspe.max(f64::MIN_POSITIVE)
    }
}

/// Placebo-permutation inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaceboInference {
    /// `(1 + #{placebo ratio ≥ treated ratio}) / (1 + J)`.
    pub pvalue: f64,
    /// Standard deviation of placebo effects.
    pub se: f64,
    /// Placebos actually fitted.
    pub n_placebos: usize,
}

/// Euclidean projection onto `{w ≥ 0, Σw = 1}`.
pub fn project_simplex(v: &DVector<f64>) -> DVector<f64> {
    let mut u: Vec<f64> = v.iter().copied().collect();
    u.sort_unstable_by(|a, b| b.total_cmp(a));
    let mut cumsum = 0.0;
    let mut theta = 0.0;
    for (j, &uj) in u.iter().enumerate() {
        cumsum += uj;
        let t = (cumsum - 1.0) / (j + 1) as f64;
        if uj - t > 0.0 {
            theta = t;
        }
    }
    v.map(|x| (x - theta).max(0.0))
}

/// Largest eigenvalue of `AᵀA` by power iteration.
fn spectral_norm_sq(a: &DMatrix<f64>) -> f64 {
    let mut v = DVector::from_element(a.ncols(), 1.0 / (a.ncols() as f64).sqrt());
    let mut lambda = 0.0;
    for _ in 0..100 {
        let w = a.tr_mul(&(a * &v));
        let norm = w.norm();
        if norm == 0.0 {
            return 0.0;
        }
        lambda = norm;
        v = w / norm;
    }
    lambda
}

/// Simplex weights minimising `½‖x1 − X0 w‖²`; `x0` is years × donors.
pub fn simplex_weights(x0: &DMatrix<f64>, x1: &DVector<f64>) -> DVector<f64> {
    let j = x0.ncols();
    let mut w = DVector::from_element(j, 1.0 / j as f64);
    if j == 1 {
        return w;
    }
    let lipschitz = spectral_norm_sq(x0) * 1.01;
    if !(lipschitz > 0.0) {
        return w;
    }
    let step = 1.0 / lipschitz;
    let mut z = w.clone();
    let mut t = 1.0_f64;
    for _ in 0..MAX_ITER {
        let grad = x0.tr_mul(&(x0 * &z - x1));
        let w_next = project_simplex(&(&z - grad * step));
        let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
        let delta = (&w_next - &w).amax();
        z = &w_next + (&w_next - &w) * ((t - 1.0) / t_next);
        w = w_next;
        t = t_next;
        if delta < WEIGHT_TOL {
            break;
        }
    }
    w
}

fn validate(kind: EstimatorKind, input: &SyntheticInput<'_>) -> Result<()> {
    let n_years = input.treated.len();
    if input.donors.is_empty() {
        return Err(Error::DataInsufficient(format!("{kind}: donor pool is empty")));
    }
    if input.n_pre == 0 || input.n_pre >= n_years {
        return Err(Error::DataInsufficient(format!(
            "{kind}: need pre and post years, got {} pre of {n_years}",
            input.n_pre
        )));
    }
    if input.donors.iter().any(|d| d.len() != n_years) {
        return Err(Error::Validation(format!("{kind}: donor path length mismatch")));
    }
    Ok(())
}

/// Fit plain or augmented SCM.
pub fn synthetic_control(input: SyntheticInput<'_>, augmented: bool) -> Result<SyntheticFit> {
    let kind = if augmented { EstimatorKind::AugmentedScm } else { EstimatorKind::Scm };
    validate(kind, &input)?;
    let (t0, n_years, n_donors) = (input.n_pre, input.treated.len(), input.donors.len());

    // years × donors
    let y0 = DMatrix::from_fn(n_years, n_donors, |t, j| input.donors[j][t]);
    let y1 = DVector::from_column_slice(input.treated);
    let x0 = y0.rows(0, t0).into_owned();
    let x1 = y1.rows(0, t0).into_owned();

    let w = simplex_weights(&x0, &x1);
    let synthetic = &y0 * &w;
    let mut gaps: Vec<f64> = (&y1 - &synthetic).iter().copied().collect();

    let bias_correction = if augmented {
        let corrections = ridge_corrections(&y0, &x1, &(&x0 * &w), t0)
            .ok_or_else(|| Error::numerical(kind, "ridge system is not positive definite"))?;
        for (gap, c) in gaps[t0..].iter_mut().zip(&corrections) {
            *gap -= c;
        }
        Some(corrections.iter().sum::<f64>() / corrections.len() as f64)
    } else {
        None
    };

    let (pre, post) = gaps.split_at(t0);
    let pre_sse: f64 = pre.iter().map(|g| g * g).sum();
    let pre_rmspe = (pre_sse / t0 as f64).sqrt();
    let post_rmspe = (post.iter().map(|g| g * g).sum::<f64>() / post.len() as f64).sqrt();
    let effect = post.iter().sum::<f64>() / post.len() as f64;
    let mean_pre = x1.mean();
    let tss: f64 = x1.iter().map(|v| (v - mean_pre).powi(2)).sum();
    let r2_pre = (tss > 0.0).then(|| 1.0 - pre_sse / tss);

    if !effect.is_finite() {
        return Err(Error::numerical(kind, "non-finite synthetic path"));
    }
    Ok(SyntheticFit {
        weights: w.iter().copied().collect(),
        gaps,
        effect,
        pre_rmspe,
        post_rmspe,
        r2_pre,
        bias_correction,
    })
}

/// Per-post-year ridge correction `(x1 − X0ᵀw)ᵀ η_t`, with
/// `η_t = (X̃ᵀX̃ + λI)⁻¹ X̃ᵀ ỹ_t` on donor-centred pre outcomes `X̃` and post
/// outcomes `ỹ_t`.
fn ridge_corrections(
    y0: &DMatrix<f64>,
    x1: &DVector<f64>,
    synthetic_pre: &DVector<f64>,
    t0: usize,
) -> Option<Vec<f64>> {
    let n_years = y0.nrows();
    // donors × pre years, centred across donors
    let mut xc = y0.rows(0, t0).transpose();
    for mut col in xc.column_iter_mut() {
        let m = col.mean();
        col.add_scalar_mut(-m);
    }
    let gram = xc.tr_mul(&xc);
    let lambda = (RIDGE_SCALE * gram.trace() / t0 as f64).max(1e-8);
    let chol = (gram + DMatrix::identity(t0, t0) * lambda).cholesky()?;
    let imbalance = x1 - synthetic_pre;

    let corrections = (t0..n_years)
        .map(|t| {
            let mut yt = y0.row(t).transpose();
            let m = yt.mean();
            yt.add_scalar_mut(-m);
            let eta = chol.solve(&xc.tr_mul(&yt));
            imbalance.dot(&eta)
        })
        .collect();
    Some(corrections)
}

/// In-space placebo inference for `fit` (fitted on `input`).
pub fn placebo_inference(
    input: SyntheticInput<'_>,
    fit: &SyntheticFit,
    augmented: bool,
) -> PlaceboInference {
    let placebos: Vec<SyntheticFit> = (0..input.donors.len())
        .into_par_iter()
        .filter_map(|j| {
            let rest: Vec<Vec<f64>> = input
                .donors
                .iter()
                .enumerate()
                .filter(|(k, _)| *k != j)
                .map(|(_, d)| d.clone())
                .collect();
            let placebo =
                SyntheticInput { treated: &input.donors[j], donors: &rest, n_pre: input.n_pre };
            synthetic_control(placebo, augmented).ok()
        })
        .collect();

    let n = placebos.len();
    if n == 0 {
        return PlaceboInference { pvalue: f64::NAN, se: f64::NAN, n_placebos: 0 };
    }
    let ratio = fit.rmspe_ratio();
    let at_least = placebos.iter().filter(|p| p.rmspe_ratio() >= ratio).count();
    let pvalue = (1 + at_least) as f64 / (1 + n) as f64;
    let se = if n >= 2 {
        let mean = placebos.iter().map(|p| p.effect).sum::<f64>() / n as f64;
        (placebos.iter().map(|p| (p.effect - mean).powi(2)).sum::<f64>() / (n - 1) as f64).sqrt()
    } else {
        f64::NAN
    };
    PlaceboInference { pvalue, se, n_placebos: n }
}
