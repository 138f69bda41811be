//! graft-core: shared vocabulary for aggregate graph reconciliation.
//!
//! This crate provides the types every other graft crate speaks:
//! - Type names, key values and identities
//! - The statically registered model (entity types and relation descriptors)
//! - Detached incoming graphs read from API payloads
//! - Staged change records produced by persistence collaborators
//! - Configuration management
//! - Model and payload errors

pub mod changes;
pub mod config;
pub mod error;
pub mod model;
pub mod node;
pub mod types;

pub use changes::{ChangeSet, ChangeSetId, ChangeSummary, NodeRef, StagedChange};
pub use config::{ExclusionPolicy, GraftConfig};
pub use error::ModelError;
pub use model::{Cardinality, EntityType, KeyField, Model, OnRemove, RelationDescriptor};
pub use node::{DetachedNode, RelationPayload};
pub use types::{Fields, Identity, KeyKind, KeyValue, TypeName};
