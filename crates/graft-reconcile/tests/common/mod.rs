//! A recording in-memory collaborator for reconciler tests.

#![allow(dead_code)]

use std::collections::BTreeMap;

use graft_core::{
    DetachedNode, EntityType, Fields, KeyKind, Model, RelationDescriptor, TypeName,
};
use graft_reconcile::{PersistenceCollaborator, ReconcileError, RelationValue, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Overwrite(NodeId),
    Insert(NodeId),
    Delete(NodeId),
    Assign(NodeId, String, Option<NodeId>),
    Add(NodeId, String, NodeId),
    Remove(NodeId, String, NodeId),
}

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub type_name: TypeName,
    pub fields: Fields,
    /// Loaded relations only.
    pub slots: BTreeMap<String, RelationValue<NodeId>>,
}

pub struct Fake {
    pub model: Model,
    pub nodes: Vec<FakeNode>,
    pub calls: Vec<Call>,
}

impl Fake {
    pub fn new(model: Model) -> Self {
        Self {
            model,
            nodes: Vec::new(),
            calls: Vec::new(),
        }
    }

    /// Track a stored node with the given scalar fields and no loaded relations.
    pub fn stored(&mut self, type_name: &str, fields: serde_json::Value) -> NodeId {
        self.nodes.push(FakeNode {
            type_name: type_name.into(),
            fields: serde_json::from_value(fields).unwrap(),
            slots: BTreeMap::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    pub fn load_one(&mut self, owner: NodeId, relation: &str, value: Option<NodeId>) {
        self.nodes[owner.0]
            .slots
            .insert(relation.to_string(), RelationValue::One(value));
    }

    pub fn load_many(&mut self, owner: NodeId, relation: &str, members: Vec<NodeId>) {
        self.nodes[owner.0]
            .slots
            .insert(relation.to_string(), RelationValue::Many(members));
    }

    pub fn text(&self, node: NodeId) -> Option<&str> {
        self.nodes[node.0].fields.get("text").and_then(|v| v.as_str())
    }

    pub fn overwrites_of(&self, node: NodeId) -> usize {
        self.calls
            .iter()
            .filter(|c| **c == Call::Overwrite(node))
            .count()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn inserts(&self) -> usize {
        self.count(|c| matches!(c, Call::Insert(_)))
    }

    pub fn deletes(&self) -> usize {
        self.count(|c| matches!(c, Call::Delete(_)))
    }

    pub fn adds(&self) -> usize {
        self.count(|c| matches!(c, Call::Add(..)))
    }

    pub fn removes(&self) -> usize {
        self.count(|c| matches!(c, Call::Remove(..)))
    }

    fn node(&self, id: NodeId) -> Result<&FakeNode> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| ReconcileError::collaborator(anyhow::anyhow!("unknown node {id:?}")))
    }

    fn descriptor(&self, owner: NodeId, relation: &str) -> Result<RelationDescriptor> {
        let type_name = &self.node(owner)?.type_name;
        Ok(self.model.relation(type_name, relation)?.clone())
    }
}

impl PersistenceCollaborator for Fake {
    type Handle = NodeId;

    fn model(&self) -> &Model {
        &self.model
    }

    fn type_of(&self, node: NodeId) -> Result<TypeName> {
        Ok(self.node(node)?.type_name.clone())
    }

    fn field(&self, node: NodeId, name: &str) -> Result<Option<&serde_json::Value>> {
        Ok(self.node(node)?.fields.get(name))
    }

    fn is_loaded(&self, node: NodeId, relation: &str) -> Result<bool> {
        Ok(self.node(node)?.slots.contains_key(relation))
    }

    fn current_value(&self, node: NodeId, relation: &str) -> Result<RelationValue<NodeId>> {
        self.node(node)?
            .slots
            .get(relation)
            .cloned()
            .ok_or_else(|| ReconcileError::collaborator(anyhow::anyhow!("{relation} not loaded")))
    }

    fn overwrite_scalars(&mut self, target: NodeId, source: &DetachedNode) -> Result<()> {
        let entity = self.model.entity(&source.type_name)?.clone();
        let node = &mut self.nodes[target.0];
        for field in &entity.fields {
            let value = source.field(field).cloned().unwrap_or(serde_json::Value::Null);
            node.fields.insert(field.clone(), value);
        }
        self.calls.push(Call::Overwrite(target));
        Ok(())
    }

    fn stage_insert(&mut self, node: &DetachedNode) -> Result<NodeId> {
        self.nodes.push(FakeNode {
            type_name: node.type_name.clone(),
            fields: node.fields.clone(),
            slots: BTreeMap::new(),
        });
        let id = NodeId(self.nodes.len() - 1);
        self.calls.push(Call::Insert(id));
        Ok(id)
    }

    fn stage_delete(&mut self, node: NodeId) -> Result<()> {
        self.calls.push(Call::Delete(node));
        Ok(())
    }

    fn assign_reference(&mut self, owner: NodeId, relation: &str, value: Option<NodeId>) -> Result<()> {
        self.nodes[owner.0]
            .slots
            .insert(relation.to_string(), RelationValue::One(value));
        self.calls.push(Call::Assign(owner, relation.to_string(), value));
        Ok(())
    }

    fn collection_add(&mut self, owner: NodeId, relation: &str, member: NodeId) -> Result<()> {
        let descriptor = self.descriptor(owner, relation)?;
        if descriptor.read_only {
            return Err(ReconcileError::UnsupportedCollectionType {
                type_name: self.nodes[owner.0].type_name.clone(),
                relation: relation.to_string(),
                operation: "add",
            });
        }
        if let Some(RelationValue::Many(members)) = self.nodes[owner.0].slots.get_mut(relation) {
            members.push(member);
        }
        self.calls.push(Call::Add(owner, relation.to_string(), member));
        Ok(())
    }

    fn collection_remove(&mut self, owner: NodeId, relation: &str, member: NodeId) -> Result<()> {
        let descriptor = self.descriptor(owner, relation)?;
        if descriptor.read_only {
            return Err(ReconcileError::UnsupportedCollectionType {
                type_name: self.nodes[owner.0].type_name.clone(),
                relation: relation.to_string(),
                operation: "remove",
            });
        }
        if let Some(RelationValue::Many(members)) = self.nodes[owner.0].slots.get_mut(relation) {
            members.retain(|m| *m != member);
        }
        self.calls.push(Call::Remove(owner, relation.to_string(), member));
        Ok(())
    }
}

/// `Parent { id, text, children: [Child], child: Child?, tags: [Tag] (read-only),
/// notes: [Note] (keyless) }`, `Child { id, text, parent: Parent }`.
pub fn parent_child_model() -> Model {
    Model::new(vec![
        EntityType::new("Parent")
            .generated_key("id", KeyKind::Int)
            .field("text")
            .relation(RelationDescriptor::many("children", "Child").inverse("parent"))
            .relation(RelationDescriptor::one("child", "Child"))
            .relation(RelationDescriptor::many("tags", "Tag").read_only())
            .relation(RelationDescriptor::many("notes", "Note")),
        EntityType::new("Child")
            .generated_key("id", KeyKind::Int)
            .field("text")
            .relation(RelationDescriptor::one("parent", "Parent").inverse("children")),
        EntityType::new("Tag").key("name", KeyKind::Text),
        EntityType::new("Note").field("body"),
    ])
    .unwrap()
}

/// `A { id, text, bs: [B] }`, `B { id, text, a: A (inverse of bs), sponsor: A }`.
pub fn bidirectional_model() -> Model {
    Model::new(vec![
        EntityType::new("A")
            .key("id", KeyKind::Int)
            .field("text")
            .relation(RelationDescriptor::many("bs", "B").inverse("a")),
        EntityType::new("B")
            .key("id", KeyKind::Int)
            .field("text")
            .relation(RelationDescriptor::one("a", "A").inverse("bs"))
            .relation(RelationDescriptor::one("sponsor", "A")),
    ])
    .unwrap()
}
