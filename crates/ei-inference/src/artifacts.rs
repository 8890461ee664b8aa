//! Versioned, reproducible JSON result payloads.
//!
//! Layout rules:
//! - outcomes sit in a sorted map and struct fields keep declaration order,
//!   so two serializations of equal payloads are byte-identical;
//! - every estimate has the same record shape regardless of method;
//! - non-finite numbers become `null` and the reason is recorded in
//!   `null_reasons`, keyed by field path.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ei_core::{Diagnostics, Error, EstimationResult, EstimatorKind, EvidenceStrength, Method, Result};
use serde::{Deserialize, Serialize};

use crate::comparison::{Consistency, OutcomeComparison};
use crate::estimators::PairEstimate;
use crate::evidence::classify;

/// Payload schema version.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Why a numeric field is `null`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullReason {
    /// NaN.
    NotANumber,
    /// +∞.
    PositiveInfinity,
    /// −∞.
    NegativeInfinity,
}

impl NullReason {
    /// Reason for `v`, `None` when finite.
    pub fn of(v: f64) -> Option<Self> {
        if v.is_nan() {
            Some(Self::NotANumber)
        } else if v == f64::INFINITY {
            Some(Self::PositiveInfinity)
        } else if v == f64::NEG_INFINITY {
            Some(Self::NegativeInfinity)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct Scrubber {
    reasons: BTreeMap<String, NullReason>,
}

impl Scrubber {
    fn value(&mut self, key: impl Into<String>, v: f64) -> Option<f64> {
        match NullReason::of(v) {
            None => Some(v),
            Some(reason) => {
                self.reasons.insert(key.into(), reason);
                None
            }
        }
    }

    fn opt(&mut self, key: &str, v: Option<f64>) -> Option<f64> {
        v.and_then(|v| self.value(key, v))
    }

    fn diagnostics(&mut self, d: &Diagnostics) -> Diagnostics {
        let donor_weights = d.donor_weights.as_ref().map(|w| {
            w.iter()
                .filter_map(|(id, &v)| self.value(format!("diagnostics.donor_weights.{id}"), v).map(|v| (id.clone(), v)))
                .collect()
        });
        Diagnostics {
            first_stage_f: self.opt("diagnostics.first_stage_f", d.first_stage_f),
            first_stage_partial_r2: self.opt("diagnostics.first_stage_partial_r2", d.first_stage_partial_r2),
            pre_trend_pvalue: self.opt("diagnostics.pre_trend_pvalue", d.pre_trend_pvalue),
            pre_rmspe: self.opt("diagnostics.pre_rmspe", d.pre_rmspe),
            bias_correction: self.opt("diagnostics.bias_correction", d.bias_correction),
            donor_weights,
            ..d.clone()
        }
    }
}

/// One lead/lag of an event study.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynamicRecord {
    /// Year minus treatment year.
    pub rel_time: i32,
    /// Point estimate.
    pub coef: Option<f64>,
    /// Standard error.
    pub se: Option<f64>,
    /// p-value.
    pub pvalue: Option<f64>,
    /// 95% CI lower bound.
    pub ci_lower: Option<f64>,
    /// 95% CI upper bound.
    pub ci_upper: Option<f64>,
    /// Treated observations in the bucket.
    pub n_obs: usize,
}

/// Serialized estimate. Same shape for every method; failed pairs carry
/// `error` and nulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimateRecord {
    /// Estimator.
    pub method: EstimatorKind,
    /// Outcome variable.
    pub outcome: String,
    /// Effect estimate.
    pub coef: Option<f64>,
    /// Standard error.
    pub se: Option<f64>,
    /// p-value.
    pub pvalue: Option<f64>,
    /// 95% CI lower bound.
    pub ci_lower: Option<f64>,
    /// 95% CI upper bound.
    pub ci_upper: Option<f64>,
    /// Observations used.
    pub n_obs: Option<usize>,
    /// R².
    pub r2: Option<f64>,
    /// `p < 0.05`; `null` for a failed pair.
    pub significant: Option<bool>,
    /// Evidence tier.
    pub evidence: Option<EvidenceStrength>,
    /// Method diagnostics.
    pub diagnostics: Diagnostics,
    /// Event-study sequence.
    pub dynamic: Vec<DynamicRecord>,
    /// Field path → reason for every non-finite value nulled above.
    pub null_reasons: BTreeMap<String, NullReason>,
    /// Concise failure message.
    pub error: Option<String>,
}

impl EstimateRecord {
    /// Record a successful estimate.
    pub fn from_result(r: &EstimationResult) -> Self {
        let mut s = Scrubber::default();
        let dynamic = r
            .dynamic
            .iter()
            .map(|p| {
                let k = p.rel_time;
                DynamicRecord {
                    rel_time: k,
                    coef: s.value(format!("dynamic.{k}.coef"), p.coef),
                    se: s.value(format!("dynamic.{k}.se"), p.se),
                    pvalue: s.value(format!("dynamic.{k}.pvalue"), p.pvalue),
                    ci_lower: s.value(format!("dynamic.{k}.ci_lower"), p.ci_lower),
                    ci_upper: s.value(format!("dynamic.{k}.ci_upper"), p.ci_upper),
                    n_obs: p.n_obs,
                }
            })
            .collect();
        Self {
            method: r.method,
            outcome: r.outcome.clone(),
            coef: s.value("coef", r.coef),
            se: s.value("se", r.se),
            pvalue: s.value("pvalue", r.pvalue),
            ci_lower: s.value("ci_lower", r.ci_lower),
            ci_upper: s.value("ci_upper", r.ci_upper),
            n_obs: Some(r.n_obs),
            r2: s.opt("r2", r.r2),
            significant: Some(r.is_significant()),
            evidence: Some(classify(r)),
            diagnostics: s.diagnostics(&r.diagnostics),
            dynamic,
            null_reasons: s.reasons,
            error: None,
        }
    }

    /// Record a failed pair.
    pub fn failed(method: EstimatorKind, outcome: &str, error: &Error) -> Self {
        Self {
            method,
            outcome: outcome.to_string(),
            coef: None,
            se: None,
            pvalue: None,
            ci_lower: None,
            ci_upper: None,
            n_obs: None,
            r2: None,
            significant: None,
            evidence: None,
            diagnostics: Diagnostics::default(),
            dynamic: Vec::new(),
            null_reasons: BTreeMap::new(),
            error: Some(error.user_message()),
        }
    }

    /// Record whichever side of `pair` is present.
    pub fn from_pair(pair: &PairEstimate) -> Self {
        match &pair.result {
            Ok(r) => Self::from_result(r),
            Err(e) => Self::failed(pair.method, &pair.outcome, e),
        }
    }
}

/// Flat comparison-table row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRow {
    /// Estimator.
    #[serde(rename = "Method")]
    pub method: EstimatorKind,
    /// Effect estimate.
    #[serde(rename = "Estimate")]
    pub estimate: Option<f64>,
    /// Standard error.
    #[serde(rename = "SE")]
    pub se: Option<f64>,
    /// 95% CI lower bound.
    #[serde(rename = "CI_Lower")]
    pub ci_lower: Option<f64>,
    /// 95% CI upper bound.
    #[serde(rename = "CI_Upper")]
    pub ci_upper: Option<f64>,
    /// p-value.
    #[serde(rename = "P_Value")]
    pub p_value: Option<f64>,
    /// `p < 0.05`; `null` for a failed pair.
    #[serde(rename = "Significant")]
    pub significant: Option<bool>,
}

impl From<&EstimateRecord> for ComparisonRow {
    fn from(r: &EstimateRecord) -> Self {
        Self {
            method: r.method,
            estimate: r.coef,
            se: r.se,
            ci_lower: r.ci_lower,
            ci_upper: r.ci_upper,
            p_value: r.pvalue,
            significant: r.significant,
        }
    }
}

/// Serialized comparison of one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonRecord {
    /// One row per method, in run order.
    pub rows: Vec<ComparisonRow>,
    /// Full records behind `rows`, same order.
    pub estimates: Vec<EstimateRecord>,
    /// Agreement among methods.
    pub consistency_assessment: Consistency,
    /// Headline method.
    pub recommended_estimate: Option<EstimatorKind>,
    /// Reader-facing caveat.
    pub caveat: Option<String>,
}

impl From<&OutcomeComparison> for ComparisonRecord {
    fn from(c: &OutcomeComparison) -> Self {
        let estimates: Vec<EstimateRecord> = c.rows.iter().map(EstimateRecord::from_pair).collect();
        Self {
            rows: estimates.iter().map(ComparisonRow::from).collect(),
            estimates,
            consistency_assessment: c.consistency,
            recommended_estimate: c.recommended,
            caveat: c.caveat.clone(),
        }
    }
}

/// Result for one outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomePayload {
    /// Single-method estimate.
    Estimate(EstimateRecord),
    /// Multi-method comparison.
    Comparison(ComparisonRecord),
}

/// Top-level result document stored on a successful analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultPayload {
    /// [`SCHEMA_VERSION`] at write time.
    pub schema_version: String,
    /// Requested method.
    pub method: Method,
    /// Generation timestamp (RFC 3339).
    pub generated_at: DateTime<Utc>,
    /// Per-outcome results, sorted by outcome name.
    pub outcomes: BTreeMap<String, OutcomePayload>,
    /// Panel coverage warnings.
    pub warnings: Vec<String>,
}

impl ResultPayload {
    /// Payload for a single-method run.
    pub fn single(
        method: Method,
        generated_at: DateTime<Utc>,
        pairs: &[PairEstimate],
        warnings: Vec<String>,
    ) -> Self {
        let outcomes = pairs
            .iter()
            .map(|p| (p.outcome.clone(), OutcomePayload::Estimate(EstimateRecord::from_pair(p))))
            .collect();
        Self { schema_version: SCHEMA_VERSION.to_string(), method, generated_at, outcomes, warnings }
    }

    /// Payload for a `compare` run.
    pub fn comparison(
        generated_at: DateTime<Utc>,
        comparisons: &[OutcomeComparison],
        warnings: Vec<String>,
    ) -> Self {
        let outcomes = comparisons
            .iter()
            .map(|c| (c.outcome.clone(), OutcomePayload::Comparison(ComparisonRecord::from(c))))
            .collect();
        Self {
            schema_version: SCHEMA_VERSION.to_string(),
            method: Method::Compare,
            generated_at,
            outcomes,
            warnings,
        }
    }

    /// Serialize to a JSON value.
    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parse a stored payload, rejecting unknown major versions.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let payload: Self = serde_json::from_value(value)?;
        let major = |v: &str| v.split('.').next().map(str::to_string);
        if major(&payload.schema_version) != major(SCHEMA_VERSION) {
            return Err(Error::Validation(format!(
                "unsupported result schema {} (expected {SCHEMA_VERSION})",
                payload.schema_version
            )));
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ei_core::{EventStudyPoint, StandardErrorKind};
    use proptest::prelude::*;

    fn result(coef: f64, se: f64, pvalue: f64) -> EstimationResult {
        EstimationResult {
            method: EstimatorKind::EventStudy,
            outcome: "pib_log".into(),
            coef,
            se,
            pvalue,
            ci_lower: coef - 1.96 * se,
            ci_upper: coef + 1.96 * se,
            n_obs: 33,
            r2: Some(0.4),
            diagnostics: Diagnostics {
                reference_period: Some(-1),
                se_kind: Some(StandardErrorKind::ClusteredByEntity),
                ..Diagnostics::default()
            },
            dynamic: vec![EventStudyPoint {
                rel_time: 0,
                coef,
                se,
                pvalue,
                ci_lower: coef - 1.96 * se,
                ci_upper: coef + 1.96 * se,
                n_obs: 3,
            }],
        }
    }

    fn ts() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn non_finite_values_become_null_with_reason() {
        let mut r = result(0.1, f64::NAN, f64::NAN);
        r.diagnostics.first_stage_f = Some(f64::INFINITY);
        r.ci_lower = f64::NEG_INFINITY;
        let rec = EstimateRecord::from_result(&r);
        assert_eq!(rec.coef, Some(0.1));
        assert_eq!(rec.se, None);
        assert_eq!(rec.null_reasons["se"], NullReason::NotANumber);
        assert_eq!(rec.null_reasons["ci_lower"], NullReason::NegativeInfinity);
        assert_eq!(rec.null_reasons["diagnostics.first_stage_f"], NullReason::PositiveInfinity);
        assert_eq!(rec.null_reasons["dynamic.0.pvalue"], NullReason::NotANumber);
        assert_eq!(rec.evidence, Some(EvidenceStrength::Weak));
        assert_eq!(rec.significant, Some(false));

        let json = serde_json::to_value(&rec).unwrap();
        assert!(json["se"].is_null());
        assert_eq!(json["null_reasons"]["se"], "not_a_number");
    }

    #[test]
    fn failed_pair_keeps_record_shape() {
        let ok = serde_json::to_value(EstimateRecord::from_result(&result(0.1, 0.02, 0.001))).unwrap();
        let err = serde_json::to_value(EstimateRecord::failed(
            EstimatorKind::Scm,
            "pib_log",
            &Error::UnsupportedMethod(Method::Scm),
        ))
        .unwrap();
        let keys = |v: &serde_json::Value| v.as_object().unwrap().keys().cloned().collect::<Vec<_>>();
        assert_eq!(keys(&ok), keys(&err));
        assert_eq!(err["error"], "method not yet available: scm");
        assert!(err["significant"].is_null());
    }

    #[test]
    fn failed_comparison_row_is_null_not_insignificant() {
        let ok = EstimateRecord::from_result(&result(0.1, 0.02, 0.001));
        let failed = EstimateRecord::failed(EstimatorKind::Did, "pib_log", &Error::DataInsufficient("x".into()));
        assert_eq!(ComparisonRow::from(&ok).significant, Some(true));

        let row = serde_json::to_value(ComparisonRow::from(&failed)).unwrap();
        for col in ["Estimate", "SE", "CI_Lower", "CI_Upper", "P_Value", "Significant"] {
            assert!(row[col].is_null(), "{col}");
        }
        assert_eq!(row["Method"], "did");
    }

    #[test]
    fn comparison_rows_use_table_columns() {
        let rec = EstimateRecord::from_result(&result(0.1, 0.02, 0.001));
        let row = serde_json::to_value(ComparisonRow::from(&rec)).unwrap();
        let cols: Vec<&str> = row.as_object().unwrap().keys().map(String::as_str).collect();
        let mut want = vec!["Method", "Estimate", "SE", "CI_Lower", "CI_Upper", "P_Value", "Significant"];
        want.sort_unstable();
        assert_eq!(cols, want);
    }

    #[test]
    fn payload_is_deterministic_and_versioned() {
        let pairs = vec![
            PairEstimate { method: EstimatorKind::Did, outcome: "z".into(), result: Ok(result(0.1, 0.02, 0.001)) },
            PairEstimate { method: EstimatorKind::Did, outcome: "a".into(), result: Ok(result(0.2, 0.02, 0.001)) },
        ];
        let p = ResultPayload::single(Method::Did, ts(), &pairs, vec![]);
        let a = serde_json::to_string(&p).unwrap();
        let b = serde_json::to_string(&p.clone()).unwrap();
        assert_eq!(a, b);
        assert!(a.find("\"a\"").unwrap() < a.find("\"z\"").unwrap());
        assert!(a.contains("\"schema_version\":\"1.0.0\""));
        assert!(a.contains("\"kind\":\"estimate\""));

        let mut v = p.to_value().unwrap();
        v["schema_version"] = serde_json::json!("2.0.0");
        assert!(ResultPayload::from_value(v).is_err());
    }

    proptest! {
        #[test]
        fn finite_values_round_trip_exactly(
            coef in -1e6f64..1e6,
            se in 1e-9f64..1e3,
            pvalue in 0.0f64..=1.0,
            r2 in proptest::option::of(-1.0f64..1.0),
        ) {
            let mut r = result(coef, se, pvalue);
            r.r2 = r2;
            let pairs = vec![PairEstimate { method: EstimatorKind::EventStudy, outcome: "pib_log".into(), result: Ok(r) }];
            let payload = ResultPayload::single(Method::EventStudy, ts(), &pairs, vec!["w".into()]);
            let text = serde_json::to_string(&payload).unwrap();
            let back = ResultPayload::from_value(serde_json::from_str(&text).unwrap()).unwrap();
            prop_assert_eq!(&back, &payload);
            let OutcomePayload::Estimate(rec) = &back.outcomes["pib_log"] else {
                panic!("expected an estimate");
            };
            prop_assert_eq!(rec.coef.map(f64::to_bits), Some(coef.to_bits()));
            prop_assert!(rec.null_reasons.is_empty());
        }
    }
}
