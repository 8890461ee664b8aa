//! # ei-panel
//!
//! Panel Builder for the economic-impact engine.
//!
//! Resolves an analysis request into a tidy entity-year dataset with
//! outcomes, covariates, `treated`, `post` and `rel_time`, reading from an
//! injected read-only [`ei_core::Warehouse`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Panel assembly from a warehouse.
pub mod builder;
/// Entity-year dataset type.
pub mod dataset;
/// Name-declared unit transforms (`_log`, `_asinh`).
pub mod transforms;
/// Snapshot-backed warehouse.
pub mod warehouse;

pub use builder::{DEFAULT_WAREHOUSE_TIMEOUT, PanelBuilder};
pub use dataset::{CoverageIssue, CoverageWarning, PanelDataset, PanelLayout, PanelRecord};
pub use warehouse::{SnapshotWarehouse, WarehouseSnapshot, state_code_of};
