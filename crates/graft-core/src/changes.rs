//! Staged change records.
//!
//! A collaborator records one [`StagedChange`] per operation the reconciler
//! requests. The ordered list forms a [`ChangeSet`] that callers can inspect
//! (or print) before committing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Identity, TypeName};

/// Unique identifier for a change set.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ChangeSetId(pub Uuid);

impl ChangeSetId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChangeSetId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChangeSetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Reference to a node inside a change record. `identity` is `None` for a
/// node whose generated key has not been assigned yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeRef {
    pub type_name: TypeName,
    pub identity: Option<Identity>,
}

impl NodeRef {
    pub fn new(type_name: TypeName, identity: Option<Identity>) -> Self {
        Self {
            type_name,
            identity,
        }
    }
}

impl std::fmt::Display for NodeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.identity {
            Some(id) => write!(f, "{}{}", self.type_name, id),
            None => write!(f, "{}(new)", self.type_name),
        }
    }
}

/// One staged operation, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum StagedChange {
    /// A node (and the subtree it carries) will be created.
    Insert { node: NodeRef },
    /// A node will be removed.
    Delete { node: NodeRef },
    /// Scalar fields of a tracked node were overwritten.
    Update {
        node: NodeRef,
        changed_fields: Vec<String>,
    },
    /// A node joined a relation of its owner.
    Attach {
        owner: NodeRef,
        relation: String,
        member: NodeRef,
    },
    /// A node left a relation of its owner without being deleted.
    Detach {
        owner: NodeRef,
        relation: String,
        member: NodeRef,
    },
}

/// Counts per change kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeSummary {
    pub inserts: u32,
    pub deletes: u32,
    pub updates: u32,
    pub attaches: u32,
    pub detaches: u32,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// The ordered changes staged by one unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: ChangeSetId,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<StagedChange>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self {
            id: ChangeSetId::new(),
            created_at: Utc::now(),
            changes: Vec::new(),
        }
    }

    pub fn push(&mut self, change: StagedChange) {
        self.changes.push(change);
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for change in &self.changes {
            match change {
                StagedChange::Insert { .. } => summary.inserts += 1,
                StagedChange::Delete { .. } => summary.deletes += 1,
                StagedChange::Update { .. } => summary.updates += 1,
                StagedChange::Attach { .. } => summary.attaches += 1,
                StagedChange::Detach { .. } => summary.detaches += 1,
            }
        }
        summary
    }
}

impl Default for ChangeSet {
    fn default() -> Self {
        Self::new()
    }
}
