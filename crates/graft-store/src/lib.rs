//! graft-store: an in-memory unit-of-work store.
//!
//! [`Database`] holds committed rows and their relation links. A
//! [`Session`] borrows it, materialises aggregates with explicit include
//! paths, implements the reconciler's persistence collaborator, and writes
//! everything it staged in one commit.

pub mod database;
pub mod error;
pub mod mutations;
pub mod queries;
pub mod session;

pub use database::{Database, Row};
pub use error::{Result, StoreError};
pub use queries::Includes;
pub use session::{CommitSummary, EntityId, EntityState, Session};
