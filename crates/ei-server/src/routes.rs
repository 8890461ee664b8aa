//! HTTP route handlers for the analysis server.
//!
//! All endpoints live under `/v1/` and accept/return JSON. The tenant is read
//! verbatim from the `x-tenant-id` header.

use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use ei_core::{AnalysisRequest, Error};
use serde::Serialize;

use crate::jobs::SubmitResponse;
use crate::record::AnalysisView;
use crate::state::SharedState;

/// Header carrying the tenant id.
pub const TENANT_HEADER: &str = "x-tenant-id";

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/v1/analyses", post(submit_handler))
        .route("/v1/analyses/:id", get(get_handler))
        .route("/v1/health", get(health_handler))
}

// ---------------------------------------------------------------------------
// POST /v1/analyses
// ---------------------------------------------------------------------------

async fn submit_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(req): Json<AnalysisRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let _guard = count_request(&state.inflight, &state.total_requests);
    let tenant = tenant(&headers)?;
    let resp = state.service.submit(&tenant, req).await?;
    Ok((StatusCode::ACCEPTED, Json(resp)))
}

// ---------------------------------------------------------------------------
// GET /v1/analyses/:id
// ---------------------------------------------------------------------------

async fn get_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> Result<Json<AnalysisView>, AppError> {
    let _guard = count_request(&state.inflight, &state.total_requests);
    let tenant = tenant(&headers)?;
    Ok(Json(state.service.get(&tenant, &id).await?))
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    uptime_s: f64,
    store: String,
    inflight: u64,
    total_requests: u64,
}

async fn health_handler(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: ei_core::VERSION,
        uptime_s: state.started_at.elapsed().as_secs_f64(),
        store: state.service.store_name().to_string(),
        inflight: state.inflight.load(Ordering::Relaxed),
        total_requests: state.total_requests.load(Ordering::Relaxed),
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn tenant(headers: &HeaderMap) -> Result<String, AppError> {
    headers
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .ok_or_else(|| AppError::bad_request("missing_tenant", format!("{TENANT_HEADER} header is required")))
}

fn count_request<'a>(inflight: &'a AtomicU64, total: &AtomicU64) -> DecrementOnDrop<'a> {
    inflight.fetch_add(1, Ordering::Relaxed);
    total.fetch_add(1, Ordering::Relaxed);
    DecrementOnDrop(inflight)
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structured JSON error response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl AppError {
    fn bad_request(kind: &'static str, message: String) -> Self {
        Self { status: StatusCode::BAD_REQUEST, kind, message }
    }
}

impl From<Error> for AppError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Configuration(_) | Error::Validation(_) | Error::UnsupportedMethod(_) => {
                StatusCode::BAD_REQUEST
            }
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            tracing::error!(kind = e.kind(), error = %e, "request failed");
        }
        Self { status, kind: e.kind(), message: e.user_message() }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": self.message,
            "kind": self.kind,
        });
        (self.status, Json(body)).into_response()
    }
}

/// RAII guard to decrement an atomic counter on drop.
struct DecrementOnDrop<'a>(&'a AtomicU64);

impl Drop for DecrementOnDrop<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}
