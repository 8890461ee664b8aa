//! Three-tier evidence-strength classification.

use ei_core::{EstimationResult, EvidenceStrength};

/// Smallest sample for which a significant estimate counts as strong.
pub const STRONG_MIN_OBS: usize = 30;

/// Upper p-value bound of the moderate tier.
pub const MODERATE_MAX_PVALUE: f64 = 0.10;

/// Classify a p-value and sample size. Non-finite p-values are weak.
pub fn evidence_strength(pvalue: f64, n_obs: usize) -> EvidenceStrength {
    if !pvalue.is_finite() {
        return EvidenceStrength::Weak;
    }
    if pvalue < ei_core::ALPHA {
        if n_obs >= STRONG_MIN_OBS { EvidenceStrength::Strong } else { EvidenceStrength::Moderate }
    } else if pvalue < MODERATE_MAX_PVALUE {
        EvidenceStrength::Moderate
    } else {
        EvidenceStrength::Weak
    }
}

/// Evidence strength of an estimate.
pub fn classify(result: &EstimationResult) -> EvidenceStrength {
    evidence_strength(result.pvalue, result.n_obs)
}
