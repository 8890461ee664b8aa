//! Econometric kernels behind the estimator strategies.
//!
//! This module provides:
//! - **Fixed-effect absorption** by alternating projections (`hdfe`).
//! - **Least squares** with clustered, HC1 or classical covariance and the
//!   t / F / normal reference distributions (`robust`).
//! - **Two-way fixed-effects DiD** (`did`) and the **event study** with a
//!   joint pre-trend test (`event_study`).
//! - **2SLS** with first-stage diagnostics (`iv`).
//! - **Synthetic control**, ridge-augmented SCM and placebo inference (`scm`).
//!
//! Kernels take plain slices of complete rows; sample selection happens in
//! the strategies.

pub mod did;
pub mod event_study;
pub mod hdfe;
pub mod iv;
pub mod robust;
pub mod scm;

pub use did::{DidFit, FeRows, twfe_did};
pub use event_study::{Bucket, EventStudyFit, PreTrendTest, event_study, reference_period};
pub use hdfe::FixedEffects;
pub use iv::{FirstStage, IvColumns, IvFit, STOCK_YOGO_10, two_stage_least_squares};
pub use robust::{
    AbsorbedDf, Covariance, Interval, VcovChoice, WaldTest, covariance, cluster_robust_vcov, t_interval,
    wald_f,
};
pub use scm::{
    PlaceboInference, SyntheticFit, SyntheticInput, placebo_inference, simplex_weights,
    synthetic_control,
};
