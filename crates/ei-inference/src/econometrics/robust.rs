//! Least squares with clustered, HC1 or classical covariance, and the t / F /
//! normal reference distributions behind every reported p-value and interval.
//!
//! # References
//!
//! - Liang & Zeger (1986); Cameron & Miller (2015), "A Practitioner's Guide to
//!   Cluster-Robust Inference." *Journal of Human Resources*.
//! - MacKinnon & Webb (2017), "Wild Bootstrap Inference for Wildly Different
//!   Cluster Sizes." *Journal of Applied Econometrics* (few treated clusters).

use std::collections::{HashMap, HashSet};

use ei_core::{ALPHA, StandardErrorKind};
use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, FisherSnedecor, Normal, StudentsT};

use super::hdfe::FixedEffects;

/// Reciprocal condition number below which `X'X` is treated as singular.
const RCOND_MIN: f64 = 1e-12;

/// Relative eigenvalue below which a Wald restriction is dropped.
const WALD_RANK_TOL: f64 = 1e-10;

/// Row-major design matrix from column slices.
pub fn design(cols: &[&[f64]]) -> DMatrix<f64> {
    let n = cols.first().map_or(0, |c| c.len());
    DMatrix::from_fn(n, cols.len(), |i, j| cols[j][i])
}

/// `(X'X)⁻¹`, or `None` when `X'X` is numerically singular.
pub fn gram_inverse(x: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    let xtx = x.transpose() * x;
    let sv = xtx.singular_values();
    let max = sv.max();
    if !(max > 0.0) || sv.min() / max < RCOND_MIN {
        return None;
    }
    let inv = xtx.try_inverse()?;
    inv.iter().all(|v| v.is_finite()).then_some(inv)
}

/// Whether demeaning removed (numerically) all variation of a column.
pub fn is_absorbed(original: &[f64], residual: &[f64]) -> bool {
    let before: f64 = original.iter().map(|v| v * v).sum();
    let after: f64 = residual.iter().map(|v| v * v).sum();
    after <= RCOND_MIN * before.max(f64::MIN_POSITIVE)
}

/// Ordinary least squares fit.
#[derive(Debug, Clone)]
pub struct LeastSquares {
    /// Coefficients.
    pub beta: DVector<f64>,
    /// Residuals `y − Xβ`.
    pub resid: DVector<f64>,
    /// `(X'X)⁻¹`.
    pub xtx_inv: DMatrix<f64>,
    /// Residual sum of squares.
    pub rss: f64,
}

/// OLS of `y` on `x`; `None` when the design is rank deficient.
pub fn least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<LeastSquares> {
    let xtx_inv = gram_inverse(x)?;
    let beta = &xtx_inv * (x.transpose() * y);
    let resid = y - x * &beta;
    let rss = resid.norm_squared();
    Some(LeastSquares { beta, resid, xtx_inv, rss })
}

// ----------------------------------------------------------------------------
// Covariance
// ----------------------------------------------------------------------------

/// Fewest entity clusters for which the clustered sandwich is reported.
pub const MIN_CLUSTERS: usize = 10;

/// Fewest treated (and untreated) clusters for the clustered sandwich.
pub const MIN_CLUSTERS_PER_ARM: usize = 2;

/// Degrees of freedom consumed by absorbed fixed effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsorbedDf {
    /// Every absorbed parameter.
    pub total: usize,
    /// The subset not nested within entity clusters (year effects).
    pub across_clusters: usize,
}

impl AbsorbedDf {
    /// Entity and year effects of a two-way absorption.
    pub fn two_way(fe: &FixedEffects) -> Self {
        let years = fe.levels_used().get(1).copied().unwrap_or(0);
        Self { total: fe.absorbed_df(), across_clusters: years.saturating_sub(1) }
    }
}

/// Covariance estimator behind a fit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcovChoice {
    /// Entity-clustered sandwich, `t(G − 1)`.
    Clustered,
    /// HC1 sandwich, `t(N − K)`.
    Hc1,
    /// Classical OLS covariance, `t(N − K)`.
    Homoskedastic,
}

impl VcovChoice {
    /// Entity clustering when the design spans at least [`MIN_CLUSTERS`]
    /// clusters and, when `treated` is given, [`MIN_CLUSTERS_PER_ARM`] treated
    /// and untreated clusters. `fallback` otherwise.
    ///
    /// With one or two treated entities the treated clusters' scores are
    /// nearly orthogonal to the residuals and the clustered sandwich
    /// collapses.
    pub fn select(clusters: &[usize], treated: Option<&[bool]>, fallback: VcovChoice) -> Self {
        let all: HashSet<usize> = clusters.iter().copied().collect();
        if all.len() < MIN_CLUSTERS {
            return fallback;
        }
        if let Some(treated) = treated {
            let on: HashSet<usize> =
                clusters.iter().zip(treated).filter(|(_, t)| **t).map(|(c, _)| *c).collect();
            if on.len() < MIN_CLUSTERS_PER_ARM || all.len() - on.len() < MIN_CLUSTERS_PER_ARM {
                return fallback;
            }
        }
        VcovChoice::Clustered
    }

    /// Reported label.
    pub fn kind(self) -> StandardErrorKind {
        match self {
            VcovChoice::Clustered => StandardErrorKind::ClusteredByEntity,
            VcovChoice::Hc1 => StandardErrorKind::Hc1,
            VcovChoice::Homoskedastic => StandardErrorKind::Homoskedastic,
        }
    }
}

/// Coefficient covariance with the degrees of freedom of its reference
/// distribution.
#[derive(Debug, Clone)]
pub struct Covariance {
    /// Covariance of the coefficients.
    pub vcov: DMatrix<f64>,
    /// Estimator used.
    pub kind: StandardErrorKind,
    /// Degrees of freedom for t and F references.
    pub df: f64,
    /// Distinct clusters, when clustered.
    pub n_clusters: Option<usize>,
}

impl Covariance {
    /// Standard error of coefficient `j`.
    pub fn se(&self, j: usize) -> f64 {
        self.vcov[(j, j)].max(0.0).sqrt()
    }
}

/// Covariance of an OLS or 2SLS fit under `choice`.
///
/// `x` is the regressor matrix the coefficients were solved on and
/// `xtx_inv` its inverse Gram matrix.
pub fn covariance(
    choice: VcovChoice,
    x: &DMatrix<f64>,
    resid: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    clusters: &[usize],
    absorbed: AbsorbedDf,
) -> Covariance {
    match choice {
        VcovChoice::Clustered => cluster_robust_vcov(x, resid, xtx_inv, clusters, absorbed.across_clusters),
        VcovChoice::Hc1 => hc1_vcov(x, resid, xtx_inv, absorbed.total),
        VcovChoice::Homoskedastic => homoskedastic_vcov(x, resid, xtx_inv, absorbed.total),
    }
}

fn residual_df(x: &DMatrix<f64>, k_absorbed: usize) -> (f64, f64) {
    let (n, p) = x.shape();
    (n as f64, n as f64 - (p + k_absorbed) as f64)
}

/// Liang–Zeger sandwich `(X'X)⁻¹ (Σ_g X_g'e_g e_g'X_g) (X'X)⁻¹` with the
/// `G/(G−1) · (N−1)/(N−K)` small-sample factor.
///
/// `k_absorbed` counts absorbed fixed-effect parameters that are not nested
/// within clusters; they enter `K` alongside the columns of `x`.
pub fn cluster_robust_vcov(
    x: &DMatrix<f64>,
    resid: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    clusters: &[usize],
    k_absorbed: usize,
) -> Covariance {
    let p = x.ncols();
    let mut scores: HashMap<usize, DVector<f64>> = HashMap::new();
    for (i, &c) in clusters.iter().enumerate() {
        let s = scores.entry(c).or_insert_with(|| DVector::zeros(p));
        for j in 0..p {
            s[j] += x[(i, j)] * resid[i];
        }
    }
    let mut meat = DMatrix::<f64>::zeros(p, p);
    for s in scores.values() {
        meat += s * s.transpose();
    }

    let g = scores.len() as f64;
    let (n_f, dof) = residual_df(x, k_absorbed);
    let correction = if g > 1.0 && dof > 0.0 { (g / (g - 1.0)) * ((n_f - 1.0) / dof) } else { 1.0 };
    Covariance {
        vcov: xtx_inv * meat * xtx_inv * correction,
        kind: StandardErrorKind::ClusteredByEntity,
        df: (g - 1.0).max(0.0),
        n_clusters: Some(scores.len()),
    }
}

/// White sandwich `(X'X)⁻¹ (Σ_i e_i² x_i x_i') (X'X)⁻¹ · N/(N−K)`.
///
/// `k_absorbed` counts every absorbed fixed-effect parameter.
pub fn hc1_vcov(x: &DMatrix<f64>, resid: &DVector<f64>, xtx_inv: &DMatrix<f64>, k_absorbed: usize) -> Covariance {
    let p = x.ncols();
    let mut meat = DMatrix::<f64>::zeros(p, p);
    for (i, e) in resid.iter().enumerate() {
        let row = x.row(i).transpose();
        meat += &row * row.transpose() * (e * e);
    }
    let (n_f, dof) = residual_df(x, k_absorbed);
    let correction = if dof > 0.0 { n_f / dof } else { 1.0 };
    Covariance {
        vcov: xtx_inv * meat * xtx_inv * correction,
        kind: StandardErrorKind::Hc1,
        df: dof.max(0.0),
        n_clusters: None,
    }
}

/// Classical `σ̂² (X'X)⁻¹` with `σ̂² = e'e / (N − K)`.
pub fn homoskedastic_vcov(
    x: &DMatrix<f64>,
    resid: &DVector<f64>,
    xtx_inv: &DMatrix<f64>,
    k_absorbed: usize,
) -> Covariance {
    let (_, dof) = residual_df(x, k_absorbed);
    let sigma2 = if dof > 0.0 { resid.norm_squared() / dof } else { f64::NAN };
    Covariance {
        vcov: xtx_inv * sigma2,
        kind: StandardErrorKind::Homoskedastic,
        df: dof.max(0.0),
        n_clusters: None,
    }
}

// ----------------------------------------------------------------------------
// Reference distributions
// ----------------------------------------------------------------------------

/// Two-sided p-value and 95% interval for one coefficient.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    /// Two-sided p-value.
    pub pvalue: f64,
    /// Lower bound.
    pub lower: f64,
    /// Upper bound.
    pub upper: f64,
}

impl Interval {
    fn undefined() -> Self {
        Self { pvalue: f64::NAN, lower: f64::NAN, upper: f64::NAN }
    }
}

/// Student-t inference with `df` degrees of freedom.
pub fn t_interval(coef: f64, se: f64, df: f64) -> Interval {
    if !(se.is_finite() && se > 0.0 && coef.is_finite() && df >= 1.0) {
        return Interval::undefined();
    }
    let Ok(dist) = StudentsT::new(0.0, 1.0, df) else {
        return Interval::undefined();
    };
    let t = coef / se;
    let crit = dist.inverse_cdf(1.0 - ALPHA / 2.0);
    Interval {
        pvalue: (2.0 * (1.0 - dist.cdf(t.abs()))).clamp(0.0, 1.0),
        lower: coef - crit * se,
        upper: coef + crit * se,
    }
}

/// Normal-approximation 95% interval around `coef`.
pub fn normal_bounds(coef: f64, se: f64) -> (f64, f64) {
    if !(se.is_finite() && se >= 0.0 && coef.is_finite()) {
        return (f64::NAN, f64::NAN);
    }
    let z = Normal::new(0.0, 1.0).map_or(1.959_963_984_540_054, |n| n.inverse_cdf(1.0 - ALPHA / 2.0));
    (coef - z * se, coef + z * se)
}

/// Joint Wald test of a block of coefficients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WaldTest {
    /// `F = b'V⁺b / rank`.
    pub f_stat: f64,
    /// Upper tail of `F(rank, df)`.
    pub pvalue: f64,
    /// Independent restrictions actually tested.
    pub rank: usize,
}

/// Joint Wald test that the coefficients at `idx` are all zero, scaled to an
/// F statistic with `(rank, df)` degrees of freedom.
///
/// The restricted covariance block is inverted through its eigenvalues;
/// directions with eigenvalues below `1e-10 × λ_max` are dropped and the test
/// runs on the remaining rank. `None` when nothing is testable or `df < 1`.
pub fn wald_f(beta: &DVector<f64>, vcov: &DMatrix<f64>, idx: &[usize], df: f64) -> Option<WaldTest> {
    let q = idx.len();
    if q == 0 || df < 1.0 {
        return None;
    }
    let b = DVector::from_iterator(q, idx.iter().map(|&i| beta[i]));
    let v = DMatrix::from_fn(q, q, |r, c| 0.5 * (vcov[(idx[r], idx[c])] + vcov[(idx[c], idx[r])]));
    if v.iter().any(|x| !x.is_finite()) {
        return None;
    }
    let eig = v.symmetric_eigen();
    let max = eig.eigenvalues.iter().fold(0.0_f64, |m, &l| m.max(l));
    if !(max > 0.0) {
        return None;
    }
    let mut quad = 0.0;
    let mut rank = 0;
    for (k, &lambda) in eig.eigenvalues.iter().enumerate() {
        if lambda > WALD_RANK_TOL * max {
            let proj = eig.eigenvectors.column(k).dot(&b);
            quad += proj * proj / lambda;
            rank += 1;
        }
    }
    let f_stat = quad / rank as f64;
    if !f_stat.is_finite() {
        return None;
    }
    let dist = FisherSnedecor::new(rank as f64, df).ok()?;
    Some(WaldTest { f_stat, pvalue: (1.0 - dist.cdf(f_stat)).clamp(0.0, 1.0), rank })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn ols_recovers_exact_line() {
        let ones = vec![1.0; 5];
        let x1 = vec![0.0, 1.0, 2.0, 3.0, 4.0];
        let y: Vec<f64> = x1.iter().map(|v| 2.0 + 3.0 * v).collect();
        let fit = least_squares(&design(&[&ones, &x1]), &DVector::from_vec(y)).unwrap();
        assert_relative_eq!(fit.beta[0], 2.0, epsilon = 1e-10);
        assert_relative_eq!(fit.beta[1], 3.0, epsilon = 1e-10);
        assert!(fit.rss < 1e-18);
    }

    #[test]
    fn collinear_design_is_singular() {
        let a = vec![1.0, 2.0, 3.0];
        let b = vec![2.0, 4.0, 6.0];
        assert!(gram_inverse(&design(&[&a, &b])).is_none());
        assert!(gram_inverse(&design(&[&[0.0, 0.0, 0.0]])).is_none());
    }

    #[test]
    fn absorbed_columns_detected() {
        assert!(is_absorbed(&[1.0, 2.0], &[1e-17, -1e-17]));
        assert!(!is_absorbed(&[1.0, 2.0], &[-0.5, 0.5]));
        assert!(is_absorbed(&[0.0, 0.0], &[0.0, 0.0]));
    }

    #[test]
    fn single_cluster_per_row_matches_hc0_with_correction() {
        let x = design(&[&[1.0, 1.0, 1.0, 1.0]]);
        let resid = DVector::from_vec(vec![1.0, -1.0, 2.0, -2.0]);
        let inv = gram_inverse(&x).unwrap();
        let cov = cluster_robust_vcov(&x, &resid, &inv, &[0, 1, 2, 3], 0);
        // HC0 = Σe²/n² = 10/16, factor = 4/3 · 3/3
        assert_eq!(cov.n_clusters, Some(4));
        assert_relative_eq!(cov.vcov[(0, 0)], 10.0 / 16.0 * 4.0 / 3.0, epsilon = 1e-12);
        assert_eq!(cov.df, 3.0);

        // One row per cluster is HC1.
        let hc1 = hc1_vcov(&x, &resid, &inv, 0);
        assert_relative_eq!(hc1.vcov[(0, 0)], cov.vcov[(0, 0)], epsilon = 1e-12);
        assert_eq!(hc1.kind, StandardErrorKind::Hc1);
        assert_eq!(hc1.n_clusters, None);
    }

    #[test]
    fn homoskedastic_matches_textbook() {
        let x = design(&[&[1.0, 1.0, 1.0, 1.0]]);
        let resid = DVector::from_vec(vec![1.0, -1.0, 2.0, -2.0]);
        let inv = gram_inverse(&x).unwrap();
        // σ̂² = 10/3, (X'X)⁻¹ = 1/4; one absorbed effect leaves df 2.
        let cov = homoskedastic_vcov(&x, &resid, &inv, 0);
        assert_relative_eq!(cov.vcov[(0, 0)], 10.0 / 3.0 / 4.0, epsilon = 1e-12);
        assert_eq!(cov.df, 3.0);
        assert_eq!(homoskedastic_vcov(&x, &resid, &inv, 1).df, 2.0);
    }

    #[test]
    fn few_treated_clusters_fall_back() {
        let clusters: Vec<usize> = (0..12).flat_map(|g| [g, g]).collect();
        let treated_n = |n: usize| -> Vec<bool> { clusters.iter().map(|&g| g < n).collect() };
        let pick = |t: &[bool]| VcovChoice::select(&clusters, Some(t), VcovChoice::Hc1);
        assert_eq!(pick(&treated_n(1)), VcovChoice::Hc1);
        assert_eq!(pick(&treated_n(2)), VcovChoice::Clustered);
        assert_eq!(pick(&treated_n(11)), VcovChoice::Hc1);
        assert_eq!(VcovChoice::select(&clusters, None, VcovChoice::Homoskedastic), VcovChoice::Clustered);
        assert_eq!(VcovChoice::select(&clusters[..18], None, VcovChoice::Homoskedastic), VcovChoice::Homoskedastic);
    }

    #[test]
    fn t_interval_matches_tables() {
        // t_{0.975, 10} = 2.228139
        let ci = t_interval(1.0, 0.5, 10.0);
        assert_relative_eq!(ci.upper - 1.0, 0.5 * 2.228_138_85, epsilon = 1e-6);
        assert!(ci.pvalue > 0.05 && ci.pvalue < 0.1);
        assert!(t_interval(1.0, 0.0, 10.0).pvalue.is_nan());
        assert!(t_interval(1.0, 0.5, 0.0).lower.is_nan());
    }

    #[test]
    fn wald_single_restriction_is_t_squared() {
        let beta = DVector::from_vec(vec![0.3, 2.0]);
        let vcov = DMatrix::from_row_slice(2, 2, &[0.04, 0.0, 0.0, 1.0]);
        let w = wald_f(&beta, &vcov, &[0], 20.0).unwrap();
        assert_relative_eq!(w.f_stat, 2.25, epsilon = 1e-12);
        assert_eq!(w.rank, 1);
        let t = t_interval(0.3, 0.2, 20.0);
        assert_relative_eq!(w.pvalue, t.pvalue, epsilon = 1e-9);
        assert!(wald_f(&beta, &vcov, &[], 20.0).is_none());
    }

    #[test]
    fn wald_on_singular_block_tests_its_rank() {
        // Perfectly correlated pair: one testable direction, (1,1)/√2.
        let beta = DVector::from_vec(vec![1.0, 1.0, 5.0]);
        let vcov = DMatrix::from_row_slice(3, 3, &[1.0, 1.0, 0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 1.0]);
        let w = wald_f(&beta, &vcov, &[0, 1], 30.0).unwrap();
        assert_eq!(w.rank, 1);
        // (b·u)² / λ = 2 / 2
        assert_relative_eq!(w.f_stat, 1.0, epsilon = 1e-9);
        assert!((0.0..=1.0).contains(&w.pvalue));

        let zero = DMatrix::zeros(3, 3);
        assert!(wald_f(&beta, &zero, &[0, 1], 30.0).is_none());
    }
}
