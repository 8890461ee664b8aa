//! # ei-server
//!
//! Job orchestrator and HTTP boundary for the economic-impact engine.
//!
//! - `record`: analysis records and the `queued → running → terminal` FSM
//! - `store`: in-memory and SQLite persistence with guarded transitions
//! - `pipeline`: panel build, parallel estimation, result payload
//! - `jobs`: submission, retrieval and the worker pool
//! - `routes`: `POST /v1/analyses`, `GET /v1/analyses/:id`, `GET /v1/health`

#![warn(clippy::all)]

pub mod config;
pub mod jobs;
pub mod pipeline;
pub mod record;
pub mod routes;
pub mod state;
pub mod store;

pub use config::{Config, EngineConfig};
pub use jobs::{AnalysisService, SubmitResponse};
pub use pipeline::Pipeline;
pub use record::{AnalysisRecord, AnalysisStatus, AnalysisView, Completion};
pub use state::{AppState, SharedState};
pub use store::{AnalysisStore, MemoryStore, SqliteStore};
