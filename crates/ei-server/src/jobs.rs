//! Analysis job orchestration.
//!
//! Workflow:
//! 1. `submit` validates the request, persists a queued record and wakes a
//!    worker. It never waits for estimation.
//! 2. A worker claims the oldest queued record (`queued → running`), runs the
//!    pipeline and writes the result or error together with the terminal
//!    status.
//! 3. Clients poll `get` until the status is `success` or `failed`.
//!
//! Running analyses are not cancellable. On startup, records a previous
//! process left running are failed; queued records are picked up again.

use std::sync::Arc;
use std::time::Instant;

use ei_core::{AnalysisRequest, Error, Result, Warehouse};
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::pipeline::Pipeline;
use crate::record::{AnalysisRecord, AnalysisView, Completion};
use crate::store::{AnalysisStore, INTERRUPTED_BY_RESTART};

/// Response body for a submission.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct SubmitResponse {
    pub id: String,
    pub status: crate::record::AnalysisStatus,
    pub retry_after_ms: Option<u64>,
}

/// Submission, retrieval and the worker pool.
#[derive(Clone)]
pub struct AnalysisService {
    store: Arc<dyn AnalysisStore>,
    pipeline: Pipeline,
    wake: Arc<Notify>,
    config: EngineConfig,
}

impl AnalysisService {
    pub fn new(store: Arc<dyn AnalysisStore>, warehouse: Arc<dyn Warehouse>, config: EngineConfig) -> Self {
        let pipeline = Pipeline::new(warehouse, &config);
        Self { store, pipeline, wake: Arc::new(Notify::new()), config }
    }

    /// Store backend name.
    pub fn store_name(&self) -> &str {
        self.store.name()
    }

    /// Fail records a previous process left running. Call before starting
    /// workers.
    pub async fn recover(&self) -> Result<usize> {
        let n = self.store.fail_running(INTERRUPTED_BY_RESTART).await?;
        if n > 0 {
            tracing::warn!(n, "failed analyses interrupted by restart");
        }
        Ok(n)
    }

    /// Validate and enqueue. Configuration errors are returned here and no
    /// record is created.
    pub async fn submit(&self, tenant_id: &str, request: AnalysisRequest) -> Result<SubmitResponse> {
        if tenant_id.trim().is_empty() {
            return Err(Error::Configuration("tenant id must be non-empty".into()));
        }
        request.validate()?;
        let record = AnalysisRecord::queued(tenant_id, request)?;
        self.store.insert(&record).await?;
        tracing::info!(
            id = record.id.as_str(),
            tenant = tenant_id,
            method = %record.request.method,
            fingerprint = &record.request_fingerprint[..12],
            "analysis queued"
        );
        self.wake.notify_one();
        Ok(SubmitResponse {
            id: record.id,
            status: record.status,
            retry_after_ms: record.status.retry_after_ms(),
        })
    }

    /// Current view of an analysis.
    pub async fn get(&self, tenant_id: &str, id: &str) -> Result<AnalysisView> {
        self.store
            .get(tenant_id, id)
            .await?
            .map(|r| r.view())
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Start the worker pool. Workers exit when `shutdown` flips to `true`.
    pub fn spawn_workers(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers)
            .map(|worker| {
                let service = self.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { service.worker_loop(worker, shutdown).await })
            })
            .collect()
    }

    async fn worker_loop(self, worker: usize, mut shutdown: watch::Receiver<bool>) {
        tracing::debug!(worker, "worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_next().await {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => tracing::error!(worker, error = %e, "worker store error"),
            }
            tokio::select! {
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        tracing::debug!(worker, "worker stopped");
    }

    /// Claim and run one queued analysis. Returns `false` when the queue is
    /// empty.
    pub async fn run_next(&self) -> Result<bool> {
        let Some(record) = self.store.claim_next().await? else {
            return Ok(false);
        };
        let started = Instant::now();
        tracing::info!(id = record.id.as_str(), method = %record.request.method, "analysis running");

        let completion = match self.pipeline.run(&record.request).await.and_then(|p| p.to_value()) {
            Ok(value) => Completion::Success(value),
            Err(e) => {
                tracing::warn!(id = record.id.as_str(), kind = e.kind(), error = %e, "analysis failed");
                Completion::Failed(e.user_message())
            }
        };
        let done = self.store.complete(&record.tenant_id, &record.id, completion).await?;
        tracing::info!(
            id = done.id.as_str(),
            status = %done.status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis completed"
        );
        Ok(true)
    }
}
