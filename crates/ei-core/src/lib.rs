//! # ei-core
//!
//! Core types, traits, and error handling for the economic-impact engine.
//!
//! This crate provides:
//! - The error taxonomy shared by every component
//! - Analysis request and estimation result types
//! - The read-only `Warehouse` capability trait

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use traits::{EntityFilter, EntityInfo, PanelQuery, SourceTables, Warehouse, WarehouseRow};
pub use types::{
    ALPHA, AnalysisRequest, Diagnostics, EntityId, EstimationResult, EstimatorKind,
    EventStudyPoint, EvidenceStrength, Method, PreTrendStatus, Scope, StandardErrorKind, Year,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
