//! Detached incoming graphs.
//!
//! A [`DetachedNode`] is the desired end state of one node as supplied by
//! a caller (typically deserialised from an API payload). It distinguishes a
//! relation that is *omitted* (absent from `relations`, leave the stored side
//! untouched) from one that is explicitly empty or null (clear it).

use std::collections::BTreeMap;

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::error::{ModelError, Result};
use crate::model::{Cardinality, EntityType, Model};
use crate::types::{Fields, TypeName};

/// The incoming value of one relation.
#[derive(Debug, Clone, PartialEq)]
pub enum RelationPayload {
    One(Option<Box<DetachedNode>>),
    Many(Vec<DetachedNode>),
}

impl RelationPayload {
    pub fn cardinality(&self) -> Cardinality {
        match self {
            Self::One(_) => Cardinality::One,
            Self::Many(_) => Cardinality::Many,
        }
    }
}

/// An incoming node: scalar fields plus the relations it represents.
#[derive(Debug, Clone, PartialEq)]
pub struct DetachedNode {
    pub type_name: TypeName,
    pub fields: Fields,
    pub relations: BTreeMap<String, RelationPayload>,
}

impl DetachedNode {
    pub fn new(type_name: impl Into<TypeName>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: Fields::new(),
            relations: BTreeMap::new(),
        }
    }

    /// Set a scalar (or key) field.
    pub fn with(mut self, field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Represent a singular relation; `None` asks for it to be cleared.
    pub fn with_one(mut self, relation: impl Into<String>, node: Option<DetachedNode>) -> Self {
        self.relations
            .insert(relation.into(), RelationPayload::One(node.map(Box::new)));
        self
    }

    /// Represent a multi-valued relation; an empty list asks for it to be cleared.
    pub fn with_many(mut self, relation: impl Into<String>, nodes: Vec<DetachedNode>) -> Self {
        self.relations
            .insert(relation.into(), RelationPayload::Many(nodes));
        self
    }

    pub fn field(&self, name: &str) -> Option<&serde_json::Value> {
        self.fields.get(name)
    }

    /// `None` when the relation is not represented in the payload at all.
    pub fn relation(&self, name: &str) -> Option<&RelationPayload> {
        self.relations.get(name)
    }

    /// Read a JSON object as a node of `type_name`.
    ///
    /// Object keys must name a key field, scalar field or relation of the
    /// type. For a multi-valued relation, `null` reads as an empty list.
    pub fn from_json(model: &Model, type_name: &TypeName, value: &serde_json::Value) -> Result<Self> {
        let entity = model.entity(type_name)?;
        let serde_json::Value::Object(object) = value else {
            return Err(ModelError::InvalidPayload {
                type_name: type_name.clone(),
                reason: format!("expected an object, found {value}"),
            });
        };

        let mut node = Self::new(type_name.clone());
        for (name, raw) in object {
            if let Some(relation) = entity.find_relation(name) {
                let payload = read_relation(model, entity, name, relation.cardinality, &relation.target, raw)?;
                node.relations.insert(name.clone(), payload);
            } else if entity.has_scalar(name) {
                node.fields.insert(name.clone(), raw.clone());
            } else {
                return Err(ModelError::UnknownField {
                    type_name: type_name.clone(),
                    field: name.clone(),
                });
            }
        }
        Ok(node)
    }

    /// Count this node and every node reachable through its payload.
    pub fn node_count(&self) -> usize {
        1 + self
            .relations
            .values()
            .map(|payload| match payload {
                RelationPayload::One(Some(child)) => child.node_count(),
                RelationPayload::One(None) => 0,
                RelationPayload::Many(children) => children.iter().map(Self::node_count).sum(),
            })
            .sum::<usize>()
    }
}

fn read_relation(
    model: &Model,
    owner: &EntityType,
    name: &str,
    cardinality: Cardinality,
    target: &TypeName,
    raw: &serde_json::Value,
) -> Result<RelationPayload> {
    use serde_json::Value;

    match (cardinality, raw) {
        (Cardinality::One, Value::Null) => Ok(RelationPayload::One(None)),
        (Cardinality::One, value) => {
            let child = DetachedNode::from_json(model, target, value)?;
            Ok(RelationPayload::One(Some(Box::new(child))))
        }
        (Cardinality::Many, Value::Null) => Ok(RelationPayload::Many(Vec::new())),
        (Cardinality::Many, Value::Array(items)) => items
            .iter()
            .map(|item| DetachedNode::from_json(model, target, item))
            .collect::<Result<Vec<_>>>()
            .map(RelationPayload::Many),
        (Cardinality::Many, other) => Err(ModelError::InvalidPayload {
            type_name: owner.name.clone(),
            reason: format!("relation {name} expects an array, found {other}"),
        }),
    }
}

impl Serialize for DetachedNode {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len() + self.relations.len()))?;
        for (name, value) in &self.fields {
            map.serialize_entry(name, value)?;
        }
        for (name, payload) in &self.relations {
            match payload {
                RelationPayload::One(child) => map.serialize_entry(name, child)?,
                RelationPayload::Many(children) => map.serialize_entry(name, children)?,
            }
        }
        map.end()
    }
}
