use thiserror::Error;

use crate::types::{KeyKind, TypeName};

/// Errors raised while building a model or reading payloads against it.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("Unknown type: {0}")]
    UnknownType(TypeName),

    #[error("Type {0} is registered twice")]
    DuplicateType(TypeName),

    #[error("Unknown relation {relation} on type {type_name}")]
    UnknownRelation {
        type_name: TypeName,
        relation: String,
    },

    #[error("Unknown field {field} on type {type_name}")]
    UnknownField { type_name: TypeName, field: String },

    #[error("Member {member} is declared more than once on type {type_name}")]
    DuplicateMember { type_name: TypeName, member: String },

    #[error("Relation {type_name}.{relation} targets unknown type {target}")]
    DanglingTarget {
        type_name: TypeName,
        relation: String,
        target: TypeName,
    },

    #[error("Relation {type_name}.{relation} declares inverse {inverse}, which does not point back")]
    InvalidInverse {
        type_name: TypeName,
        relation: String,
        inverse: String,
    },

    #[error("Invalid {type_name} payload: {reason}")]
    InvalidPayload { type_name: TypeName, reason: String },

    #[error("Key field {field} expects a {expected:?} value, found {found}")]
    InvalidKey {
        field: String,
        expected: KeyKind,
        found: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;
