//! graft-reconcile: graph reconciliation for detached aggregate updates.
//!
//! Given a tracked aggregate root loaded with some of its relations, and a
//! detached replacement graph supplied by a caller, the [`Reconciler`]
//! stages the inserts, deletes, scalar overwrites and collection changes
//! that make the stored graph match the incoming one. Nested nodes are
//! matched by primary-key identity.
//!
//! Storage is not implemented here: every read and write goes through a
//! [`PersistenceCollaborator`].

pub mod boundary;
pub mod collaborator;
pub mod error;
pub mod identity;
pub mod reconciler;

pub use collaborator::{PersistenceCollaborator, RelationValue};
pub use error::{ReconcileError, Result};
pub use reconciler::{update_graph, ReconcileStats, Reconciler};
