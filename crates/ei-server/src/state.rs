//! Shared application state for the analysis server.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use crate::jobs::AnalysisService;

/// Shared state available to all request handlers.
pub struct AppState {
    /// Orchestrator.
    pub service: AnalysisService,

    /// Server start time (for uptime reporting).
    pub started_at: Instant,

    /// In-flight request counter (for /health).
    pub inflight: AtomicU64,

    /// Total requests served (for /health).
    pub total_requests: AtomicU64,
}

impl AppState {
    pub fn new(service: AnalysisService) -> Self {
        Self {
            service,
            started_at: Instant::now(),
            inflight: AtomicU64::new(0),
            total_requests: AtomicU64::new(0),
        }
    }
}

/// Type alias used in axum handlers.
pub type SharedState = Arc<AppState>;
