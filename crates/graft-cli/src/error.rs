//! Error types for the graft-cli crate.

use std::path::PathBuf;

use graft_core::{ModelError, TypeName};
use graft_reconcile::ReconcileError;
use graft_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid seed file: {0}")]
    InvalidSeed(String),

    #[error("Reconciled root {type_name} was removed")]
    RootRemoved { type_name: TypeName },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, CliError>;
