//! Statically registered entity metadata.
//!
//! A [`Model`] is built once at startup from a list of [`EntityType`]s and
//! validated as a whole, so relation lookups during reconciliation never
//! fail on a misspelled or dangling relation.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::types::{KeyKind, TypeName};

/// One component of an entity's primary key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyField {
    pub name: String,
    pub kind: KeyKind,
    /// Assigned by the store on commit. A generated integer key of `0`
    /// counts as unassigned.
    #[serde(default)]
    pub generated: bool,
}

/// Whether a relation holds at most one node or a collection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// What the store does with a collection member that the incoming graph
/// no longer lists.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OnRemove {
    /// Unlink the member; it stays persisted (optional FK, join rows).
    #[default]
    Detach,
    /// Delete the member (owned or cascading relations).
    Delete,
}

/// A named edge from one domain type to another.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationDescriptor {
    pub name: String,
    pub target: TypeName,
    pub cardinality: Cardinality,
    #[serde(default)]
    pub on_remove: OnRemove,
    /// Name of the relation on `target` that points back at the declaring type.
    #[serde(default)]
    pub inverse: Option<String>,
    /// Materialised for reading only; the store refuses add/remove on it.
    #[serde(default)]
    pub read_only: bool,
}

impl RelationDescriptor {
    pub fn one(name: impl Into<String>, target: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            cardinality: Cardinality::One,
            on_remove: OnRemove::Detach,
            inverse: None,
            read_only: false,
        }
    }

    pub fn many(name: impl Into<String>, target: impl Into<TypeName>) -> Self {
        Self {
            cardinality: Cardinality::Many,
            ..Self::one(name, target)
        }
    }

    pub fn on_remove(mut self, rule: OnRemove) -> Self {
        self.on_remove = rule;
        self
    }

    pub fn inverse(mut self, name: impl Into<String>) -> Self {
        self.inverse = Some(name.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }
}

/// Metadata for one domain type: key, scalar fields and relations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityType {
    pub name: TypeName,
    #[serde(default)]
    pub key: Vec<KeyField>,
    #[serde(default)]
    pub fields: Vec<String>,
    #[serde(default)]
    pub relations: Vec<RelationDescriptor>,
}

impl EntityType {
    pub fn new(name: impl Into<TypeName>) -> Self {
        Self {
            name: name.into(),
            key: Vec::new(),
            fields: Vec::new(),
            relations: Vec::new(),
        }
    }

    /// Add a key component supplied by the caller.
    pub fn key(mut self, name: impl Into<String>, kind: KeyKind) -> Self {
        self.key.push(KeyField {
            name: name.into(),
            kind,
            generated: false,
        });
        self
    }

    /// Add a key component assigned by the store on commit.
    pub fn generated_key(mut self, name: impl Into<String>, kind: KeyKind) -> Self {
        self.key.push(KeyField {
            name: name.into(),
            kind,
            generated: true,
        });
        self
    }

    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.fields.push(name.into());
        self
    }

    pub fn relation(mut self, relation: RelationDescriptor) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn find_relation(&self, name: &str) -> Option<&RelationDescriptor> {
        self.relations.iter().find(|r| r.name == name)
    }

    pub fn key_field(&self, name: &str) -> Option<&KeyField> {
        self.key.iter().find(|k| k.name == name)
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Whether `name` is a scalar (key or non-key) field of this type.
    pub fn has_scalar(&self, name: &str) -> bool {
        self.key_field(name).is_some() || self.fields.iter().any(|f| f == name)
    }

    fn validate_members(&self) -> Result<()> {
        let mut seen = HashSet::new();
        let members = self
            .key
            .iter()
            .map(|k| k.name.as_str())
            .chain(self.fields.iter().map(String::as_str))
            .chain(self.relations.iter().map(|r| r.name.as_str()));

        for member in members {
            if !seen.insert(member) {
                return Err(ModelError::DuplicateMember {
                    type_name: self.name.clone(),
                    member: member.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// On-disk model format: `{ "types": [ ... ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFile {
    pub types: Vec<EntityType>,
}

/// The validated relation-descriptor table for every registered type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    types: BTreeMap<TypeName, EntityType>,
}

impl Model {
    /// Register and validate a set of entity types.
    pub fn new(types: impl IntoIterator<Item = EntityType>) -> Result<Self> {
        let mut registry = BTreeMap::new();
        for entity in types {
            entity.validate_members()?;
            let name = entity.name.clone();
            if registry.insert(name.clone(), entity).is_some() {
                return Err(ModelError::DuplicateType(name));
            }
        }

        let model = Self { types: registry };
        model.validate_relations()?;

        tracing::debug!(types = model.types.len(), "Model registered");
        Ok(model)
    }

    /// Parse a JSON [`ModelFile`] and validate it.
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ModelFile = serde_json::from_str(json)?;
        Self::new(file.types)
    }

    pub fn entity(&self, name: &TypeName) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| ModelError::UnknownType(name.clone()))
    }

    pub fn relation(&self, type_name: &TypeName, relation: &str) -> Result<&RelationDescriptor> {
        self.entity(type_name)?
            .find_relation(relation)
            .ok_or_else(|| ModelError::UnknownRelation {
                type_name: type_name.clone(),
                relation: relation.to_string(),
            })
    }

    pub fn types(&self) -> impl Iterator<Item = &EntityType> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    fn validate_relations(&self) -> Result<()> {
        for entity in self.types.values() {
            for relation in &entity.relations {
                let Some(target) = self.types.get(&relation.target) else {
                    return Err(ModelError::DanglingTarget {
                        type_name: entity.name.clone(),
                        relation: relation.name.clone(),
                        target: relation.target.clone(),
                    });
                };

                let Some(inverse) = &relation.inverse else {
                    continue;
                };

                let points_back = target.find_relation(inverse).is_some_and(|back| {
                    back.target == entity.name
                        && back.inverse.as_deref().map_or(true, |n| n == relation.name)
                });
                if !points_back {
                    return Err(ModelError::InvalidInverse {
                        type_name: entity.name.clone(),
                        relation: relation.name.clone(),
                        inverse: inverse.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
