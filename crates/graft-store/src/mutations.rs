//! Staged writes: the [`PersistenceCollaborator`] surface of a session.
//!
//! Every operation changes tracked state and appends to the pending change
//! set. Relation changes mark the owner's relation dirty so the commit
//! rewrites its links; the far side of a declared inverse is mirrored in the
//! session and in the database.

use std::collections::HashSet;

use graft_core::{
    DetachedNode, Model, OnRemove, RelationDescriptor, StagedChange, TypeName,
};
use graft_reconcile::{PersistenceCollaborator, ReconcileError, RelationValue};

use crate::error::{Result, StoreError};
use crate::session::{EntityId, EntityState, Session};

type CollabResult<T> = graft_reconcile::Result<T>;

impl<'db> Session<'db> {
    fn writable_relation(
        &self,
        owner: EntityId,
        relation: &str,
        operation: &'static str,
    ) -> CollabResult<(TypeName, RelationDescriptor)> {
        let type_name = self.entry(owner)?.type_name.clone();
        let descriptor = self.db.model().relation(&type_name, relation)?.clone();
        if descriptor.read_only {
            return Err(ReconcileError::UnsupportedCollectionType {
                type_name,
                relation: relation.to_string(),
                operation,
            });
        }
        Ok((type_name, descriptor))
    }

    fn mark_dirty(&mut self, owner: EntityId, relation: &str) -> CollabResult<()> {
        self.entry_mut(owner)?.dirty.insert(relation.to_string());
        Ok(())
    }

    /// Withdraw a pending insert. New entities it owns through `delete`
    /// relations go with it, as do the changes that name any of them.
    fn withdraw_insert(&mut self, id: EntityId) -> Result<()> {
        let mut withdrawn = HashSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if self.entry(current)?.state != EntityState::Added {
                continue;
            }
            let type_name = self.entry(current)?.type_name.clone();
            let owned: Vec<String> = self
                .db
                .model()
                .entity(&type_name)?
                .relations
                .iter()
                .filter(|r| r.on_remove == OnRemove::Delete)
                .map(|r| r.name.clone())
                .collect();
            for relation in &owned {
                stack.extend(self.members(current, relation)?);
            }
            self.entry_mut(current)?.state = EntityState::Detached;
            withdrawn.insert(current);
        }

        self.discard_changes(&withdrawn);
        tracing::debug!(entities = withdrawn.len(), "Pending insert withdrawn");
        Ok(())
    }
}

impl<'db> PersistenceCollaborator for Session<'db> {
    type Handle = EntityId;

    fn model(&self) -> &Model {
        self.db.model()
    }

    fn type_of(&self, node: EntityId) -> CollabResult<TypeName> {
        Ok(self.entry(node)?.type_name.clone())
    }

    fn field(&self, node: EntityId, name: &str) -> CollabResult<Option<&serde_json::Value>> {
        Ok(self.entry(node)?.fields.get(name))
    }

    fn is_loaded(&self, node: EntityId, relation: &str) -> CollabResult<bool> {
        Ok(self.entry(node)?.slots.contains_key(relation))
    }

    fn current_value(&self, node: EntityId, relation: &str) -> CollabResult<RelationValue<EntityId>> {
        let entry = self.entry(node)?;
        entry.slots.get(relation).cloned().ok_or_else(|| {
            StoreError::NotLoaded {
                type_name: entry.type_name.clone(),
                relation: relation.to_string(),
            }
            .into()
        })
    }

    fn overwrite_scalars(&mut self, target: EntityId, source: &DetachedNode) -> CollabResult<()> {
        let type_name = self.entry(target)?.type_name.clone();
        let entity = self.db.model().entity(&type_name)?.clone();

        let entry = self.entry_mut(target)?;
        let mut changed = Vec::new();
        for name in &entity.fields {
            let value = source.field(name).cloned().unwrap_or(serde_json::Value::Null);
            let current = entry.fields.get(name).unwrap_or(&serde_json::Value::Null);
            if *current != value {
                entry.fields.insert(name.clone(), value);
                changed.push(name.clone());
            }
        }
        match entry.state {
            _ if changed.is_empty() => return Ok(()),
            // The pending insert writes the new values.
            EntityState::Added => return Ok(()),
            EntityState::Unchanged => entry.state = EntityState::Modified,
            _ => {}
        }

        let node = self.node_ref(target)?;
        self.stage_change(
            StagedChange::Update {
                node,
                changed_fields: changed,
            },
            vec![target],
        );
        Ok(())
    }

    fn stage_insert(&mut self, node: &DetachedNode) -> CollabResult<EntityId> {
        Ok(self.attach_tree(node, EntityState::Added)?)
    }

    fn stage_delete(&mut self, node: EntityId) -> CollabResult<()> {
        match self.entry(node)?.state {
            EntityState::Added => self.withdraw_insert(node)?,
            EntityState::Unchanged | EntityState::Modified => {
                let node_ref = self.node_ref(node)?;
                self.entry_mut(node)?.state = EntityState::Deleted;
                self.stage_change(StagedChange::Delete { node: node_ref }, vec![node]);
            }
            EntityState::Deleted | EntityState::Detached => {}
        }
        Ok(())
    }

    fn assign_reference(
        &mut self,
        owner: EntityId,
        relation: &str,
        value: Option<EntityId>,
    ) -> CollabResult<()> {
        let type_name = self.entry(owner)?.type_name.clone();
        let descriptor = self.db.model().relation(&type_name, relation)?.clone();

        let previous = match self.entry(owner)?.slots.get(relation) {
            Some(RelationValue::One(previous)) => *previous,
            _ => None,
        };
        if previous == value {
            return Ok(());
        }

        self.entry_mut(owner)?
            .slots
            .insert(relation.to_string(), RelationValue::One(value));
        self.mark_dirty(owner, relation)?;

        let owner_ref = self.node_ref(owner)?;
        if let Some(previous) = previous {
            self.mirror_inverse(owner, &descriptor, previous, false)?;
            if self.entry(previous)?.state.is_live() {
                let member = self.node_ref(previous)?;
                self.stage_change(
                    StagedChange::Detach {
                        owner: owner_ref.clone(),
                        relation: relation.to_string(),
                        member,
                    },
                    vec![owner, previous],
                );
            }
        }
        if let Some(value) = value {
            self.mirror_inverse(owner, &descriptor, value, true)?;
            let member = self.node_ref(value)?;
            self.stage_change(
                StagedChange::Attach {
                    owner: owner_ref,
                    relation: relation.to_string(),
                    member,
                },
                vec![owner, value],
            );
        }
        Ok(())
    }

    fn collection_add(&mut self, owner: EntityId, relation: &str, member: EntityId) -> CollabResult<()> {
        let (type_name, descriptor) = self.writable_relation(owner, relation, "add")?;

        match self.entry_mut(owner)?.slots.get_mut(relation) {
            Some(RelationValue::Many(members)) => {
                if !members.contains(&member) {
                    members.push(member);
                }
            }
            _ => {
                return Err(ReconcileError::UnreadableRelationValue {
                    type_name,
                    relation: relation.to_string(),
                    expected: descriptor.cardinality,
                })
            }
        }
        self.mark_dirty(owner, relation)?;
        self.mirror_inverse(owner, &descriptor, member, true)?;

        let change = StagedChange::Attach {
            owner: self.node_ref(owner)?,
            relation: relation.to_string(),
            member: self.node_ref(member)?,
        };
        self.stage_change(change, vec![owner, member]);
        Ok(())
    }

    fn collection_remove(
        &mut self,
        owner: EntityId,
        relation: &str,
        member: EntityId,
    ) -> CollabResult<()> {
        let (type_name, descriptor) = self.writable_relation(owner, relation, "remove")?;

        match self.entry_mut(owner)?.slots.get_mut(relation) {
            Some(RelationValue::Many(members)) => members.retain(|m| *m != member),
            _ => {
                return Err(ReconcileError::UnreadableRelationValue {
                    type_name,
                    relation: relation.to_string(),
                    expected: descriptor.cardinality,
                })
            }
        }
        self.mark_dirty(owner, relation)?;
        self.mirror_inverse(owner, &descriptor, member, false)?;

        match descriptor.on_remove {
            OnRemove::Delete => self.stage_delete(member),
            OnRemove::Detach => {
                let change = StagedChange::Detach {
                    owner: self.node_ref(owner)?,
                    relation: relation.to_string(),
                    member: self.node_ref(member)?,
                };
                self.stage_change(change, vec![owner, member]);
                Ok(())
            }
        }
    }
}
