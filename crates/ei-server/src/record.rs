//! Persisted analysis records and their finite-state machine.
//!
//! `queued → running → {success, failed}`. Terminal records never change;
//! a re-run is a new record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use ei_core::{AnalysisRequest, Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Poll hint while queued.
pub const RETRY_AFTER_QUEUED_MS: u64 = 2_000;
/// Poll hint while running.
pub const RETRY_AFTER_RUNNING_MS: u64 = 5_000;

/// Analysis status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Queued,
    Running,
    Success,
    Failed,
}

impl AnalysisStatus {
    /// Wire and column name.
    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisStatus::Queued => "queued",
            AnalysisStatus::Running => "running",
            AnalysisStatus::Success => "success",
            AnalysisStatus::Failed => "failed",
        }
    }

    /// `success` or `failed`.
    pub fn is_terminal(self) -> bool {
        matches!(self, AnalysisStatus::Success | AnalysisStatus::Failed)
    }

    /// Whether the FSM allows `self → next`.
    pub fn can_transition(self, next: AnalysisStatus) -> bool {
        matches!(
            (self, next),
            (AnalysisStatus::Queued, AnalysisStatus::Running)
                | (AnalysisStatus::Running, AnalysisStatus::Success)
                | (AnalysisStatus::Running, AnalysisStatus::Failed)
        )
    }

    /// Suggested delay before the next poll.
    pub fn retry_after_ms(self) -> Option<u64> {
        match self {
            AnalysisStatus::Queued => Some(RETRY_AFTER_QUEUED_MS),
            AnalysisStatus::Running => Some(RETRY_AFTER_RUNNING_MS),
            _ => None,
        }
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "queued" => Ok(AnalysisStatus::Queued),
            "running" => Ok(AnalysisStatus::Running),
            "success" => Ok(AnalysisStatus::Success),
            "failed" => Ok(AnalysisStatus::Failed),
            other => Err(Error::Store(format!("unknown analysis status {other:?}"))),
        }
    }
}

/// How a running analysis ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    /// Full result payload.
    Success(serde_json::Value),
    /// Concise error message.
    Failed(String),
}

impl Completion {
    /// Target status.
    pub fn status(&self) -> AnalysisStatus {
        match self {
            Completion::Success(_) => AnalysisStatus::Success,
            Completion::Failed(_) => AnalysisStatus::Failed,
        }
    }
}

/// One analysis, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: String,
    pub tenant_id: String,
    pub request: AnalysisRequest,
    /// SHA-256 of the canonical request JSON. Informational only.
    pub request_fingerprint: String,
    pub status: AnalysisStatus,
    /// Set on success only.
    pub result_full: Option<serde_json::Value>,
    /// Set on failure only.
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AnalysisRecord {
    /// New queued record with a fresh id.
    pub fn queued(tenant_id: &str, request: AnalysisRequest) -> Result<Self> {
        let request_fingerprint = fingerprint(&request)?;
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            request,
            request_fingerprint,
            status: AnalysisStatus::Queued,
            result_full: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    fn transition_error(&self, to: AnalysisStatus) -> Error {
        Error::InvalidTransition { id: self.id.clone(), from: self.status.to_string(), to: to.to_string() }
    }

    /// `queued → running`.
    pub fn start(&mut self, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_transition(AnalysisStatus::Running) {
            return Err(self.transition_error(AnalysisStatus::Running));
        }
        self.status = AnalysisStatus::Running;
        self.started_at = Some(at);
        Ok(())
    }

    /// `running → success | failed`, writing the result or error together
    /// with the status.
    pub fn finish(&mut self, completion: Completion, at: DateTime<Utc>) -> Result<()> {
        let to = completion.status();
        if !self.status.can_transition(to) {
            return Err(self.transition_error(to));
        }
        self.status = to;
        self.completed_at = Some(at);
        match completion {
            Completion::Success(v) => self.result_full = Some(v),
            Completion::Failed(msg) => self.error_message = Some(msg),
        }
        Ok(())
    }

    /// Client-facing view.
    pub fn view(&self) -> AnalysisView {
        AnalysisView {
            id: self.id.clone(),
            status: self.status,
            method: self.request.method.as_str(),
            result_full: self.result_full.clone(),
            error_message: self.error_message.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            retry_after_ms: self.status.retry_after_ms(),
        }
    }
}

/// Response to `get`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisView {
    pub id: String,
    pub status: AnalysisStatus,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_full: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Suggested delay before polling again; absent once terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

/// SHA-256 (hex) of the request's canonical JSON.
pub fn fingerprint(request: &AnalysisRequest) -> Result<String> {
    let canonical = serde_json::to_vec(request)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ei_core::Method;

    fn request() -> AnalysisRequest {
        AnalysisRequest::new(
            Method::Did,
            vec!["3550308".into()],
            vec!["3509502".into()],
            vec!["pib_log".into()],
            2015,
            2010,
            2020,
        )
    }

    #[test]
    fn lifecycle_and_immutability() {
        let mut rec = AnalysisRecord::queued("t1", request()).unwrap();
        assert_eq!(rec.view().retry_after_ms, Some(RETRY_AFTER_QUEUED_MS));
        assert!(rec.finish(Completion::Failed("x".into()), Utc::now()).is_err());

        rec.start(Utc::now()).unwrap();
        assert_eq!(rec.view().retry_after_ms, Some(RETRY_AFTER_RUNNING_MS));
        rec.finish(Completion::Success(serde_json::json!({"ok": true})), Utc::now()).unwrap();
        assert_eq!(rec.status, AnalysisStatus::Success);
        assert!(rec.error_message.is_none());
        assert_eq!(rec.view().retry_after_ms, None);

        let err = rec.finish(Completion::Failed("late".into()), Utc::now()).unwrap_err();
        assert_eq!(err.kind(), "invalid_transition");
        assert!(rec.start(Utc::now()).is_err());
        assert!(rec.result_full.is_some());
    }

    #[test]
    fn fingerprint_is_stable_and_distinct() {
        let a = AnalysisRecord::queued("t1", request()).unwrap();
        let b = AnalysisRecord::queued("t2", request()).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.request_fingerprint, b.request_fingerprint);
        assert_eq!(a.request_fingerprint.len(), 64);
        let other = fingerprint(&request().with_instrument("royalties")).unwrap();
        assert_ne!(other, a.request_fingerprint);
    }

    #[test]
    fn status_round_trips_through_column_text() {
        for s in [
            AnalysisStatus::Queued,
            AnalysisStatus::Running,
            AnalysisStatus::Success,
            AnalysisStatus::Failed,
        ] {
            assert_eq!(s.as_str().parse::<AnalysisStatus>().unwrap(), s);
        }
        assert!("cancelled".parse::<AnalysisStatus>().is_err());
    }
}
