//! Read operations: include-driven loading, attaching detached trees, and
//! rendering tracked graphs.

use std::collections::{BTreeMap, HashSet};

use graft_core::{
    DetachedNode, Identity, RelationDescriptor, RelationPayload, StagedChange, TypeName,
};
use graft_reconcile::RelationValue;

use crate::database::{declared_fields, identity_of};
use crate::error::{Result, StoreError};
use crate::session::{EntityId, EntityState, Entry, Session};

/// Relation paths to materialise when loading a root, e.g.
/// `classes.students`. Every prefix of a path is loaded too.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Includes {
    children: BTreeMap<String, Includes>,
}

impl Includes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dotted path.
    pub fn path(mut self, path: &str) -> Self {
        let mut node = &mut self;
        for segment in path.split('.').map(str::trim).filter(|s| !s.is_empty()) {
            node = node.children.entry(segment.to_string()).or_default();
        }
        self
    }

    pub fn parse<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        paths
            .into_iter()
            .fold(Self::new(), |includes, p| includes.path(p.as_ref()))
    }

    /// Every relation path a detached payload represents.
    pub fn from_payload(node: &DetachedNode) -> Self {
        let mut includes = Self::new();
        for (name, payload) in &node.relations {
            let child = includes.children.entry(name.clone()).or_default();
            let nodes: Vec<&DetachedNode> = match payload {
                RelationPayload::One(member) => member.as_deref().into_iter().collect(),
                RelationPayload::Many(members) => members.iter().collect(),
            };
            for nested in nodes {
                child.merge(Self::from_payload(nested));
            }
        }
        includes
    }

    fn merge(&mut self, other: Self) {
        for (name, nested) in other.children {
            self.children.entry(name).or_default().merge(nested);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn relations(&self) -> impl Iterator<Item = (&str, &Includes)> {
        self.children.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl<'db> Session<'db> {
    /// Materialise a stored root and the relations named by `includes`.
    /// Returns `None` when no such row exists.
    pub fn load(
        &mut self,
        type_name: &TypeName,
        identity: &Identity,
        includes: &Includes,
    ) -> Result<Option<EntityId>> {
        if !self.db.contains(type_name, identity) {
            tracing::debug!(%type_name, %identity, "Root not found");
            return Ok(None);
        }
        let root = self.materialize(type_name, identity)?;
        self.load_includes(root, includes)?;
        tracing::debug!(%type_name, %identity, tracked = self.tracked(), "Aggregate loaded");
        Ok(Some(root))
    }

    /// Tracked entity for a stored row, created from the row on first use.
    fn materialize(&mut self, type_name: &TypeName, identity: &Identity) -> Result<EntityId> {
        if let Some(id) = self.find(type_name, identity) {
            return Ok(id);
        }
        let row = self
            .db
            .get(type_name, identity)
            .ok_or_else(|| StoreError::MissingRow {
                type_name: type_name.clone(),
                identity: identity.clone(),
            })?;
        let entry = Entry::new(
            type_name.clone(),
            row.fields.clone(),
            Some(identity.clone()),
            EntityState::Unchanged,
        );
        Ok(self.push_entry(entry))
    }

    fn load_includes(&mut self, id: EntityId, includes: &Includes) -> Result<()> {
        for (name, nested) in includes.relations() {
            let entry = self.entry(id)?;
            let relation = self.db.model().relation(&entry.type_name, name)?.clone();

            if !entry.slots.contains_key(name) {
                let linked: Vec<Identity> = match &entry.key {
                    Some(key) => self
                        .db
                        .get(&entry.type_name, key)
                        .map(|row| row.linked(name).to_vec())
                        .unwrap_or_default(),
                    None => Vec::new(),
                };
                let mut members = Vec::with_capacity(linked.len());
                for identity in &linked {
                    members.push(self.materialize(&relation.target, identity)?);
                }
                let value = slot_value(&relation, members);
                self.entry_mut(id)?.slots.insert(name.to_string(), value);
            }

            for member in self.members(id, name)? {
                self.load_includes(member, nested)?;
            }
        }
        Ok(())
    }

    /// Attach a detached tree as already persisted. Exactly the relations
    /// the payload carries are marked loaded.
    pub fn track(&mut self, node: &DetachedNode) -> Result<EntityId> {
        let id = self.attach_tree(node, EntityState::Unchanged)?;
        tracing::debug!(type_name = %node.type_name, nodes = node.node_count(), "Tracked detached graph");
        Ok(id)
    }

    /// Track `node` and the subtree it carries in `state`. Added nodes are
    /// recorded as inserts and their carried relations as links to write.
    pub(crate) fn attach_tree(&mut self, node: &DetachedNode, state: EntityState) -> Result<EntityId> {
        let entity = self.db.model().entity(&node.type_name)?.clone();
        let fields = declared_fields(&entity, &node.fields);

        let key = match state {
            EntityState::Added => None,
            _ => {
                let identity = identity_of(&entity, &fields)?;
                if self.find(&entity.name, &identity).is_some() {
                    return Err(StoreError::AlreadyTracked {
                        type_name: entity.name.clone(),
                        identity,
                    });
                }
                Some(identity)
            }
        };

        let id = self.push_entry(Entry::new(entity.name.clone(), fields, key, state));
        if state == EntityState::Added {
            let node_ref = self.node_ref(id)?;
            self.stage_change(StagedChange::Insert { node: node_ref }, vec![id]);
        }

        for relation in &entity.relations {
            let Some(payload) = node.relation(&relation.name) else {
                continue;
            };
            let mut members = Vec::new();
            match payload {
                RelationPayload::One(child) => {
                    if let Some(child) = child {
                        members.push(self.attach_tree(child, state)?);
                    }
                }
                RelationPayload::Many(children) => {
                    for child in children {
                        members.push(self.attach_tree(child, state)?);
                    }
                }
            }
            // Only this side is marked dirty; the database mirrors the inverse.
            for &member in &members {
                self.mirror_inverse(id, relation, member, true)?;
            }
            let entry = self.entry_mut(id)?;
            entry.slots.insert(relation.name.clone(), slot_value(relation, members));
            if state == EntityState::Added {
                entry.dirty.insert(relation.name.clone());
            }
        }
        Ok(id)
    }

    /// Live members of a loaded relation.
    pub(crate) fn members(&self, id: EntityId, relation: &str) -> Result<Vec<EntityId>> {
        let members = match self.entry(id)?.slots.get(relation) {
            Some(RelationValue::One(member)) => member.iter().copied().collect(),
            Some(RelationValue::Many(members)) => members.clone(),
            None => Vec::new(),
        };
        let mut live = Vec::with_capacity(members.len());
        for member in members {
            if self.entry(member)?.state.is_live() {
                live.push(member);
            }
        }
        Ok(live)
    }

    /// Keep the far side of `relation` consistent in the session when it is
    /// loaded there. Only the owner side is written on commit.
    pub(crate) fn mirror_inverse(
        &mut self,
        owner: EntityId,
        relation: &RelationDescriptor,
        member: EntityId,
        attach: bool,
    ) -> Result<()> {
        let Some(inverse) = &relation.inverse else {
            return Ok(());
        };
        let inverse_desc = self.db.model().relation(&relation.target, inverse)?.clone();
        let far = self.entry_mut(member)?;
        let far_added = far.state == EntityState::Added;
        match far.slots.get_mut(inverse) {
            Some(RelationValue::One(back)) => {
                if attach {
                    *back = Some(owner);
                } else if *back == Some(owner) {
                    *back = None;
                }
            }
            Some(RelationValue::Many(back)) => {
                if attach {
                    if !back.contains(&owner) {
                        back.push(owner);
                    }
                } else {
                    back.retain(|m| *m != owner);
                }
            }
            // New entities see their owner without a round trip.
            None if attach && far_added => {
                far.slots
                    .insert(inverse.clone(), slot_value(&inverse_desc, vec![owner]));
            }
            None => {}
        }
        Ok(())
    }

    /// JSON rendering of a tracked graph: scalar fields plus every loaded
    /// relation. A node reached a second time is rendered by key only.
    pub fn snapshot(&self, id: EntityId) -> Result<serde_json::Value> {
        let mut rendered = HashSet::new();
        self.render(id, &mut rendered)
    }

    fn render(&self, id: EntityId, rendered: &mut HashSet<EntityId>) -> Result<serde_json::Value> {
        let entry = self.entry(id)?;
        let mut object = serde_json::Map::new();

        if !rendered.insert(id) {
            let entity = self.db.model().entity(&entry.type_name)?;
            for key in &entity.key {
                if let Some(value) = entry.fields.get(&key.name) {
                    object.insert(key.name.clone(), value.clone());
                }
            }
            return Ok(serde_json::Value::Object(object));
        }

        for (name, value) in &entry.fields {
            object.insert(name.clone(), value.clone());
        }
        for (name, slot) in &entry.slots {
            let value = match slot {
                RelationValue::One(_) => match self.members(id, name)?.first() {
                    Some(member) => self.render(*member, rendered)?,
                    None => serde_json::Value::Null,
                },
                RelationValue::Many(_) => {
                    let mut items = Vec::new();
                    for member in self.members(id, name)? {
                        items.push(self.render(member, rendered)?);
                    }
                    serde_json::Value::Array(items)
                }
            };
            object.insert(name.clone(), value);
        }
        Ok(serde_json::Value::Object(object))
    }
}

pub(crate) fn slot_value(
    relation: &RelationDescriptor,
    members: Vec<EntityId>,
) -> RelationValue<EntityId> {
    if relation.is_many() {
        RelationValue::Many(members)
    } else {
        RelationValue::One(members.into_iter().next())
    }
}
