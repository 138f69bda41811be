use graft_core::{Identity, ModelError, TypeName};
use graft_reconcile::ReconcileError;
use thiserror::Error;

use crate::session::EntityId;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Entity {0:?} is not tracked by this session")]
    UnknownEntity(EntityId),

    #[error("No {type_name} row with key {identity}")]
    MissingRow {
        type_name: TypeName,
        identity: Identity,
    },

    #[error("A {type_name} row with key {identity} already exists")]
    DuplicateKey {
        type_name: TypeName,
        identity: Identity,
    },

    #[error("{type_name} key field {field} has no value")]
    MissingKey { type_name: TypeName, field: String },

    #[error("{type_name} with key {identity} is already tracked")]
    AlreadyTracked {
        type_name: TypeName,
        identity: Identity,
    },

    #[error("Relation {type_name}.{relation} is not loaded")]
    NotLoaded { type_name: TypeName, relation: String },

    #[error("Model error: {0}")]
    Model(#[from] ModelError),
}

impl From<StoreError> for ReconcileError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Model(e) => ReconcileError::Model(e),
            other => ReconcileError::collaborator(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
