//! # ei-inference
//!
//! Causal inference for the economic-impact engine.
//!
//! This crate provides:
//! - Econometric kernels: fixed-effect absorption, cluster-robust least
//!   squares, 2SLS, event study, synthetic control
//! - One [`Estimator`] strategy per [`ei_core::EstimatorKind`]
//! - The comparison engine (consistency and recommendation policy)
//! - The versioned result serializer
//!
//! ## Architecture
//!
//! Strategies read an immutable [`ei_panel::PanelDataset`] and never touch
//! the warehouse. `(method, outcome)` pairs are independent and run on the
//! rayon pool.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Result payloads and null-reason bookkeeping.
pub mod artifacts;
/// Method applicability, consistency and recommendation.
pub mod comparison;
/// Econometric kernels.
pub mod econometrics;
/// Estimator strategies and parallel fan-out.
pub mod estimators;
/// Evidence-strength tiers.
pub mod evidence;

pub use artifacts::{
    ComparisonRecord, ComparisonRow, EstimateRecord, NullReason, OutcomePayload, ResultPayload,
    SCHEMA_VERSION,
};
pub use comparison::{
    Consistency, OutcomeComparison, RECOMMENDATION_ORDER, applicable_methods, assess_consistency,
    compare, methods_for, recommend,
};
pub use estimators::{Estimator, FitOptions, PairEstimate, estimate_pairs, estimator_for};
pub use evidence::{classify, evidence_strength};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
