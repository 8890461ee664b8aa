//! One analysis end to end: validate, build the panel, estimate, serialize.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use ei_core::{AnalysisRequest, Error, Method, Result, Warehouse};
use ei_inference::{
    FitOptions, PairEstimate, ResultPayload, compare, estimate_pairs, estimator_for, methods_for,
};
use ei_panel::PanelBuilder;

use crate::config::EngineConfig;

/// Stateless analysis runner.
#[derive(Clone)]
pub struct Pipeline {
    builder: PanelBuilder,
    synthetic_control: bool,
}

impl Pipeline {
    pub fn new(warehouse: Arc<dyn Warehouse>, config: &EngineConfig) -> Self {
        Self {
            builder: PanelBuilder::new(warehouse).with_timeout(config.warehouse_timeout),
            synthetic_control: config.synthetic_control,
        }
    }

    /// Run `request` to a result payload.
    ///
    /// A single-method run checks its preconditions before touching the
    /// warehouse and fails only when every outcome fails. A comparison always
    /// returns its table; failed `(method, outcome)` pairs are rows carrying
    /// their error.
    pub async fn run(&self, request: &AnalysisRequest) -> Result<ResultPayload> {
        request.validate()?;
        let methods = methods_for(request, self.synthetic_control);
        let options = FitOptions::from_request(request, self.synthetic_control);
        if request.method != Method::Compare
            && let [only] = methods.as_slice()
        {
            estimator_for(*only).check_preconditions(&options)?;
        }

        let started = Instant::now();
        let panel = Arc::new(self.builder.build(request).await?);
        tracing::info!(
            method = %request.method,
            n_rows = panel.n_rows(),
            n_entities = panel.entities().len(),
            n_warnings = panel.warnings().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "panel built"
        );

        let outcomes = request.outcomes.clone();
        let pairs = {
            let (panel, methods, outcomes) = (Arc::clone(&panel), methods.clone(), outcomes.clone());
            tokio::task::spawn_blocking(move || estimate_pairs(&panel, &methods, &outcomes, &options))
                .await
                .map_err(|e| Error::Internal(format!("estimation task failed: {e}")))?
        };

        let warnings: Vec<String> = panel.warnings().iter().map(ToString::to_string).collect();
        let payload = match request.method {
            Method::Compare => ResultPayload::comparison(Utc::now(), &compare(pairs, &outcomes), warnings),
            method => ResultPayload::single(method, Utc::now(), &fail_if_all_failed(pairs)?, warnings),
        };
        tracing::info!(
            method = %request.method,
            n_outcomes = payload.outcomes.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis finished"
        );
        Ok(payload)
    }
}

/// Surface the first error when nothing succeeded.
fn fail_if_all_failed(pairs: Vec<PairEstimate>) -> Result<Vec<PairEstimate>> {
    if pairs.iter().any(|p| p.result.is_ok()) {
        return Ok(pairs);
    }
    match pairs.into_iter().find_map(|p| p.result.err()) {
        Some(e) => Err(e),
        None => Err(Error::DataInsufficient("no estimates were requested".into())),
    }
}
