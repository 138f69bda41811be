//! The graph reconciler.
//!
//! Walks a tracked (stored) aggregate and a detached (incoming) one in
//! lockstep, depth first, and stages through the collaborator the inserts,
//! deletes, scalar overwrites and collection changes that make the stored
//! graph match the incoming one. Only relations loaded on the stored side
//! are visited.

use graft_core::config::ReconcileConfig;
use graft_core::{
    Cardinality, DetachedNode, ExclusionPolicy, Identity, ModelError, RelationDescriptor,
    RelationPayload, TypeName,
};
use serde::Serialize;

use crate::boundary::Boundary;
use crate::collaborator::{PersistenceCollaborator, RelationValue};
use crate::error::{ReconcileError, Result};
use crate::identity::{incoming_identity, stored_identity};

/// Counts of what one top-level call staged.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct ReconcileStats {
    /// Node pairs merged in place.
    pub visited: u32,
    pub inserts: u32,
    pub deletes: u32,
    pub collection_adds: u32,
    pub collection_removes: u32,
    /// Loaded relations skipped by the recursion boundary.
    pub excluded_relations: u32,
    pub max_depth: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: ExclusionPolicy,
    stats: ReconcileStats,
}

impl Reconciler {
    pub fn new(policy: ExclusionPolicy) -> Self {
        Self {
            policy,
            stats: ReconcileStats::default(),
        }
    }

    pub fn from_config(config: &ReconcileConfig) -> Self {
        Self::new(config.exclusion)
    }

    pub fn policy(&self) -> ExclusionPolicy {
        self.policy
    }

    /// Statistics of the most recent call.
    pub fn stats(&self) -> &ReconcileStats {
        &self.stats
    }

    /// Reconcile an aggregate root.
    ///
    /// Returns the node that now represents the root: the stored handle when
    /// both sides are present, a freshly staged handle when only `incoming`
    /// is, and `None` when the stored root was staged for deletion.
    pub fn reconcile<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        incoming: Option<&DetachedNode>,
        stored: Option<C::Handle>,
    ) -> Result<Option<C::Handle>> {
        self.reconcile_within(collab, incoming, stored, None)
    }

    /// Reconcile with an explicit excluded type: relations of the root that
    /// lead to `excluded` are not walked.
    pub fn reconcile_within<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        incoming: Option<&DetachedNode>,
        stored: Option<C::Handle>,
        excluded: Option<&TypeName>,
    ) -> Result<Option<C::Handle>> {
        self.stats = ReconcileStats::default();
        let boundary = Boundary::root(excluded);

        let result = self.reconcile_node(collab, incoming, stored, &boundary);
        match &result {
            Ok(_) => tracing::info!(
                visited = self.stats.visited,
                inserts = self.stats.inserts,
                deletes = self.stats.deletes,
                collection_adds = self.stats.collection_adds,
                collection_removes = self.stats.collection_removes,
                excluded_relations = self.stats.excluded_relations,
                max_depth = self.stats.max_depth,
                "Graph reconciled"
            ),
            Err(e) => tracing::warn!(error = %e, "Graph reconciliation failed"),
        }
        result
    }

    fn reconcile_node<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        incoming: Option<&DetachedNode>,
        stored: Option<C::Handle>,
        boundary: &Boundary,
    ) -> Result<Option<C::Handle>> {
        match (incoming, stored) {
            (None, None) => Err(ReconcileError::InvalidArgument(
                "at least one of the incoming and stored nodes must be supplied".to_string(),
            )),
            (Some(node), None) => {
                let handle = collab.stage_insert(node)?;
                self.stats.inserts += 1;
                tracing::debug!(type_name = %node.type_name, ?handle, "Staged insert");
                Ok(Some(handle))
            }
            (None, Some(handle)) => {
                collab.stage_delete(handle)?;
                self.stats.deletes += 1;
                tracing::debug!(?handle, "Staged delete");
                Ok(None)
            }
            (Some(node), Some(handle)) => {
                self.merge(collab, node, handle, boundary)?;
                Ok(Some(handle))
            }
        }
    }

    /// Case where both sides exist: overwrite scalars, then walk relations.
    fn merge<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        incoming: &DetachedNode,
        stored: C::Handle,
        boundary: &Boundary,
    ) -> Result<()> {
        let type_name = collab.type_of(stored)?;
        if type_name != incoming.type_name {
            return Err(ReconcileError::TypeMismatch {
                stored: type_name,
                incoming: incoming.type_name.clone(),
            });
        }

        self.stats.visited += 1;
        self.stats.max_depth = self.stats.max_depth.max(boundary.depth() as u32);
        tracing::trace!(
            %type_name,
            depth = boundary.depth(),
            via = ?boundary.arrived_via().map(ToString::to_string),
            "Merging node"
        );

        collab.overwrite_scalars(stored, incoming)?;

        // Loaded status is read once, before any relation is touched.
        let mut loaded = Vec::new();
        for relation in &collab.model().entity(&type_name)?.relations {
            if collab.is_loaded(stored, &relation.name)? {
                loaded.push(relation.clone());
            }
        }

        for relation in &loaded {
            if boundary.excludes(self.policy, &type_name, relation) {
                self.stats.excluded_relations += 1;
                tracing::trace!(%type_name, relation = %relation.name, "Relation excluded by boundary");
                continue;
            }

            let Some(payload) = incoming.relation(&relation.name) else {
                tracing::trace!(%type_name, relation = %relation.name, "Relation not represented; left untouched");
                continue;
            };

            let child_boundary = boundary.descend(&type_name, relation);
            match relation.cardinality {
                Cardinality::One => {
                    self.merge_one(collab, stored, &type_name, relation, payload, &child_boundary)?
                }
                Cardinality::Many => {
                    self.merge_many(collab, stored, &type_name, relation, payload, &child_boundary)?
                }
            }
        }

        Ok(())
    }

    fn merge_one<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        owner: C::Handle,
        owner_type: &TypeName,
        relation: &RelationDescriptor,
        payload: &RelationPayload,
        boundary: &Boundary,
    ) -> Result<()> {
        let RelationPayload::One(incoming) = payload else {
            return Err(payload_mismatch(owner_type, relation));
        };
        let RelationValue::One(stored) = collab.current_value(owner, &relation.name)? else {
            return Err(unreadable(owner_type, relation));
        };
        let incoming = incoming.as_deref();

        let result = match (incoming, stored) {
            (None, None) => return Ok(()),
            (Some(node), Some(current)) if self.is_replacement(&*collab, node, current)? => {
                tracing::debug!(
                    %owner_type,
                    relation = %relation.name,
                    "Related node identity changed; replacing"
                );
                self.reconcile_node(collab, None, Some(current), boundary)?;
                self.reconcile_node(collab, Some(node), None, boundary)?
            }
            _ => self.reconcile_node(collab, incoming, stored, boundary)?,
        };

        if result != stored {
            collab.assign_reference(owner, &relation.name, result)?;
        }
        Ok(())
    }

    /// A singular relation whose incoming and stored nodes carry different
    /// identities. Key fields are never overwritten, so this is a swap.
    fn is_replacement<C: PersistenceCollaborator>(
        &self,
        collab: &C,
        incoming: &DetachedNode,
        stored: C::Handle,
    ) -> Result<bool> {
        if !collab.model().entity(&incoming.type_name)?.has_key() {
            return Ok(false);
        }
        let incoming_id = incoming_identity(collab.model(), incoming)?;
        let stored_id = stored_identity(collab, stored)?;
        Ok(matches!((incoming_id, stored_id), (Some(a), Some(b)) if a != b))
    }

    fn merge_many<C: PersistenceCollaborator>(
        &mut self,
        collab: &mut C,
        owner: C::Handle,
        owner_type: &TypeName,
        relation: &RelationDescriptor,
        payload: &RelationPayload,
        boundary: &Boundary,
    ) -> Result<()> {
        let RelationPayload::Many(incoming) = payload else {
            return Err(payload_mismatch(owner_type, relation));
        };
        let RelationValue::Many(stored) = collab.current_value(owner, &relation.name)? else {
            return Err(unreadable(owner_type, relation));
        };

        let mut stored_ids: Vec<(C::Handle, Option<Identity>)> = Vec::with_capacity(stored.len());
        for member in stored {
            stored_ids.push((member, stored_identity(&*collab, member)?));
        }

        let mut incoming_ids = Vec::with_capacity(incoming.len());
        for node in incoming {
            let id = incoming_identity(collab.model(), node)?;
            let matched = id.as_ref().and_then(|id| {
                stored_ids
                    .iter()
                    .find(|(_, stored_id)| stored_id.as_ref() == Some(id))
                    .map(|(handle, _)| *handle)
            });

            match matched {
                Some(member) => {
                    self.reconcile_node(collab, Some(node), Some(member), boundary)?;
                }
                None => {
                    if let Some(added) = self.reconcile_node(collab, Some(node), None, boundary)? {
                        collab.collection_add(owner, &relation.name, added)?;
                        self.stats.collection_adds += 1;
                        tracing::debug!(%owner_type, relation = %relation.name, ?added, "Added to collection");
                    }
                }
            }
            incoming_ids.push(id);
        }

        for (member, stored_id) in &stored_ids {
            let kept = stored_id
                .as_ref()
                .is_some_and(|stored_id| incoming_ids.iter().any(|id| id.as_ref() == Some(stored_id)));
            if !kept {
                collab.collection_remove(owner, &relation.name, *member)?;
                self.stats.collection_removes += 1;
                tracing::debug!(%owner_type, relation = %relation.name, ?member, "Removed from collection");
            }
        }

        Ok(())
    }
}

fn unreadable(owner_type: &TypeName, relation: &RelationDescriptor) -> ReconcileError {
    ReconcileError::UnreadableRelationValue {
        type_name: owner_type.clone(),
        relation: relation.name.clone(),
        expected: relation.cardinality,
    }
}

fn payload_mismatch(owner_type: &TypeName, relation: &RelationDescriptor) -> ReconcileError {
    ReconcileError::Model(ModelError::InvalidPayload {
        type_name: owner_type.clone(),
        reason: format!(
            "relation {} is {:?} but the payload carries the other shape",
            relation.name, relation.cardinality
        ),
    })
}

/// Reconcile `incoming` into `stored` with the default exclusion policy.
pub fn update_graph<C: PersistenceCollaborator>(
    collab: &mut C,
    incoming: Option<&DetachedNode>,
    stored: Option<C::Handle>,
) -> Result<Option<C::Handle>> {
    Reconciler::default().reconcile(collab, incoming, stored)
}
