//! graft-cli: file-driven reconciliation runs.
//!
//! Reads a model, an optional seed and an incoming payload from JSON files,
//! reconciles the payload against the seeded in-memory store, and reports
//! what was staged (and committed).

pub mod error;
pub mod files;
pub mod run;

pub use error::{CliError, Result};
pub use run::{check_model, reconcile, ModelReport, ReconcileReport, ReconcileRequest};
