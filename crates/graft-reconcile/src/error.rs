//! Error types for the graft-reconcile crate.

use graft_core::{Cardinality, ModelError, TypeName};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReconcileError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Type {type_name} declares no primary key; its nodes cannot be matched")]
    NoPrimaryKey { type_name: TypeName },

    #[error("Value of relation {type_name}.{relation} cannot be read as {expected:?}")]
    UnreadableRelationValue {
        type_name: TypeName,
        relation: String,
        expected: Cardinality,
    },

    #[error("Collection in relation {type_name}.{relation} does not support {operation}")]
    UnsupportedCollectionType {
        type_name: TypeName,
        relation: String,
        operation: &'static str,
    },

    #[error("Type mismatch: stored node is {stored}, incoming node is {incoming}")]
    TypeMismatch { stored: TypeName, incoming: TypeName },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    #[error("Collaborator error: {source}")]
    Collaborator {
        #[source]
        source: anyhow::Error,
    },
}

impl ReconcileError {
    /// Wrap a failure internal to a persistence collaborator.
    pub fn collaborator(source: impl Into<anyhow::Error>) -> Self {
        Self::Collaborator {
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ReconcileError>;
