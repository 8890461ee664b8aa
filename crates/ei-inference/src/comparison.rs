//! Cross-method comparison: which estimators to run, whether they agree, and
//! which estimate to headline.

use ei_core::{AnalysisRequest, EstimationResult, EstimatorKind, Method};
use serde::{Deserialize, Serialize};

use crate::estimators::PairEstimate;

/// Preference order for the recommended estimate.
pub const RECOMMENDATION_ORDER: [EstimatorKind; 6] = [
    EstimatorKind::PanelIv,
    EstimatorKind::Iv,
    EstimatorKind::Did,
    EstimatorKind::Scm,
    EstimatorKind::AugmentedScm,
    EstimatorKind::EventStudy,
];

/// Caveat attached when no estimate qualifies for recommendation.
pub const NO_RECOMMENDATION: &str =
    "no method produced a significant estimate; all estimates are reported for inspection";

/// Caveat attached when significant estimates disagree.
pub const MIXED_EVIDENCE: &str =
    "significant estimates disagree across methods; interpret the recommended estimate with caution";

/// Agreement between methods on one outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// Significant estimates share a sign and their intervals overlap.
    Consistent,
    /// Significant estimates disagree in sign or interval.
    Mixed,
    /// No method is significant.
    Inconclusive,
}

/// Estimators to run for `request`.
///
/// Single-method requests map to their estimator. `compare` uses the explicit
/// list when given (first occurrence wins), otherwise every applicable method
/// in canonical order.
pub fn methods_for(request: &AnalysisRequest, synthetic_control: bool) -> Vec<EstimatorKind> {
    if let Some(kind) = request.method.estimator() {
        return vec![kind];
    }
    debug_assert_eq!(request.method, Method::Compare);
    match &request.compare_methods {
        Some(list) => {
            let mut out = Vec::with_capacity(list.len());
            for &k in list {
                if !out.contains(&k) {
                    out.push(k);
                }
            }
            out
        }
        None => applicable_methods(request.instrument_name().is_some(), synthetic_control),
    }
}

/// Every estimator runnable with the given inputs, in canonical order.
pub fn applicable_methods(has_instrument: bool, synthetic_control: bool) -> Vec<EstimatorKind> {
    EstimatorKind::ALL
        .into_iter()
        .filter(|k| has_instrument || !k.requires_instrument())
        .filter(|k| synthetic_control || !k.is_synthetic_control())
        .collect()
}

/// Classify agreement among successful estimates.
pub fn assess_consistency(results: &[&EstimationResult]) -> Consistency {
    let significant: Vec<&EstimationResult> = results.iter().copied().filter(|r| r.is_significant()).collect();
    match significant.as_slice() {
        [] => Consistency::Inconclusive,
        [only] => {
            let others: Vec<&&EstimationResult> =
                results.iter().filter(|r| r.method != only.method).collect();
            if others.is_empty() || others.iter().any(|r| only.ci_overlaps(r)) {
                Consistency::Consistent
            } else {
                Consistency::Mixed
            }
        }
        many => {
            let positive = many[0].coef > 0.0;
            if many.iter().any(|r| (r.coef > 0.0) != positive) {
                return Consistency::Mixed;
            }
            let all_overlap = many.iter().enumerate().all(|(i, a)| {
                many.iter().enumerate().any(|(j, b)| i != j && a.ci_overlaps(b))
            });
            if all_overlap { Consistency::Consistent } else { Consistency::Mixed }
        }
    }
}

/// First significant estimate in [`RECOMMENDATION_ORDER`].
pub fn recommend(results: &[&EstimationResult]) -> Option<EstimatorKind> {
    RECOMMENDATION_ORDER
        .into_iter()
        .find(|k| results.iter().any(|r| r.method == *k && r.is_significant()))
}

/// Comparison of every method on one outcome.
#[derive(Debug)]
pub struct OutcomeComparison {
    /// Outcome variable.
    pub outcome: String,
    /// One entry per method, in run order; failures included.
    pub rows: Vec<PairEstimate>,
    /// Agreement among successful estimates.
    pub consistency: Consistency,
    /// Headline method.
    pub recommended: Option<EstimatorKind>,
    /// Reader-facing caveat.
    pub caveat: Option<String>,
}

impl OutcomeComparison {
    /// Assess `rows`, all of which must concern `outcome`.
    pub fn new(outcome: impl Into<String>, rows: Vec<PairEstimate>) -> Self {
        let ok: Vec<&EstimationResult> = rows.iter().filter_map(|p| p.result.as_ref().ok()).collect();
        let consistency = assess_consistency(&ok);
        let recommended = recommend(&ok);
        let caveat = match (recommended, consistency) {
            (None, _) => Some(NO_RECOMMENDATION.to_string()),
            (Some(_), Consistency::Mixed) => Some(MIXED_EVIDENCE.to_string()),
            _ => None,
        };
        Self { outcome: outcome.into(), rows, consistency, recommended, caveat }
    }

    /// Whether every method failed.
    pub fn all_failed(&self) -> bool {
        self.rows.iter().all(|p| p.result.is_err())
    }
}

/// Group pair estimates by outcome (in `outcomes` order) and assess each.
pub fn compare(pairs: Vec<PairEstimate>, outcomes: &[String]) -> Vec<OutcomeComparison> {
    let mut groups: Vec<Vec<PairEstimate>> = outcomes.iter().map(|_| Vec::new()).collect();
    for pair in pairs {
        if let Some(i) = outcomes.iter().position(|o| *o == pair.outcome) {
            groups[i].push(pair);
        }
    }
    outcomes
        .iter()
        .zip(groups)
        .map(|(outcome, rows)| {
            let cmp = OutcomeComparison::new(outcome.clone(), rows);
            tracing::info!(
                outcome = outcome.as_str(),
                consistency = ?cmp.consistency,
                recommended = ?cmp.recommended,
                n_methods = cmp.rows.len(),
                "outcome compared"
            );
            cmp
        })
        .collect()
}
