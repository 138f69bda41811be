//! The capability surface the reconciler consumes from a persistence layer.

use graft_core::{DetachedNode, Model, TypeName};

use crate::error::Result;

/// Current value of a loaded relation on a tracked node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelationValue<H> {
    One(Option<H>),
    Many(Vec<H>),
}

/// Identity tracking, metadata, and staged mutation primitives.
///
/// Implementors own node lifecycles: nothing staged through this trait is
/// durable until the implementor commits it. Tracked nodes are addressed by
/// a cheap copyable handle.
pub trait PersistenceCollaborator {
    type Handle: Copy + Eq + std::fmt::Debug;

    /// The relation-descriptor table for every domain type.
    fn model(&self) -> &Model;

    /// Domain type of a tracked node.
    fn type_of(&self, node: Self::Handle) -> Result<TypeName>;

    /// Current value of a scalar or key field of a tracked node.
    fn field(&self, node: Self::Handle, name: &str) -> Result<Option<&serde_json::Value>>;

    /// Whether `relation` is materialised on the tracked node.
    fn is_loaded(&self, node: Self::Handle, relation: &str) -> Result<bool>;

    /// Read access to a loaded relation.
    fn current_value(&self, node: Self::Handle, relation: &str) -> Result<RelationValue<Self::Handle>>;

    /// Copy every non-key scalar field of `source` onto `target`.
    fn overwrite_scalars(&mut self, target: Self::Handle, source: &DetachedNode) -> Result<()>;

    /// Start tracking `node` (and the subtree it carries) for creation.
    fn stage_insert(&mut self, node: &DetachedNode) -> Result<Self::Handle>;

    /// Mark a tracked node for removal.
    fn stage_delete(&mut self, node: Self::Handle) -> Result<()>;

    /// Point a singular relation of `owner` at `value`.
    fn assign_reference(
        &mut self,
        owner: Self::Handle,
        relation: &str,
        value: Option<Self::Handle>,
    ) -> Result<()>;

    /// Add `member` to a multi-valued relation of `owner`.
    fn collection_add(&mut self, owner: Self::Handle, relation: &str, member: Self::Handle) -> Result<()>;

    /// Remove `member` from a multi-valued relation of `owner`.
    ///
    /// Whether the member is only unlinked or also deleted is the
    /// implementor's referential rule, not the caller's decision.
    fn collection_remove(
        &mut self,
        owner: Self::Handle,
        relation: &str,
        member: Self::Handle,
    ) -> Result<()>;
}
