//! Committed rows and relation links.
//!
//! Every type has its own table of rows keyed by identity. A row keeps its
//! scalar fields and, per relation, the identities of the rows it links to.
//! Links along a relation with a declared inverse are mirrored on the far
//! side whenever they are written.

use std::collections::BTreeMap;

use graft_core::config::StoreConfig;
use graft_core::{
    DetachedNode, EntityType, Fields, Identity, KeyKind, KeyValue, Model, OnRemove,
    RelationPayload, TypeName,
};
use uuid::Uuid;

use crate::error::{Result, StoreError};

/// A committed row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    pub fields: Fields,
    pub links: BTreeMap<String, Vec<Identity>>,
}

impl Row {
    pub fn linked(&self, relation: &str) -> &[Identity] {
        self.links.get(relation).map(Vec::as_slice).unwrap_or(&[])
    }
}

pub struct Database {
    model: Model,
    tables: BTreeMap<TypeName, BTreeMap<Identity, Row>>,
    sequences: BTreeMap<TypeName, i64>,
    key_start: i64,
}

impl Database {
    pub fn new(model: Model, config: &StoreConfig) -> Self {
        Self {
            model,
            tables: BTreeMap::new(),
            sequences: BTreeMap::new(),
            key_start: config.generated_key_start,
        }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn get(&self, type_name: &TypeName, identity: &Identity) -> Option<&Row> {
        self.tables.get(type_name).and_then(|t| t.get(identity))
    }

    pub fn contains(&self, type_name: &TypeName, identity: &Identity) -> bool {
        self.get(type_name, identity).is_some()
    }

    pub fn rows(&self, type_name: &TypeName) -> impl Iterator<Item = (&Identity, &Row)> {
        self.tables.get(type_name).into_iter().flat_map(|t| t.iter())
    }

    pub fn count(&self, type_name: &TypeName) -> usize {
        self.tables.get(type_name).map_or(0, BTreeMap::len)
    }

    pub fn total_rows(&self) -> usize {
        self.tables.values().map(BTreeMap::len).sum()
    }

    /// Insert a detached tree directly, bypassing any session. Generated
    /// keys are assigned; relations the payload carries become links.
    pub fn seed(&mut self, node: &DetachedNode) -> Result<Identity> {
        let entity = self.model.entity(&node.type_name)?.clone();
        let mut fields = declared_fields(&entity, &node.fields);

        let mut sequences = std::mem::take(&mut self.sequences);
        let assigned = self.assign_keys(&entity, &mut fields, &mut sequences);
        self.sequences = sequences;
        let identity = assigned?;

        self.insert_row(&entity.name, identity.clone(), fields)?;

        for relation in &entity.relations {
            let Some(payload) = node.relation(&relation.name) else {
                continue;
            };
            let mut members = Vec::new();
            match payload {
                RelationPayload::One(child) => {
                    if let Some(child) = child {
                        members.push(self.seed(child)?);
                    }
                }
                RelationPayload::Many(children) => {
                    for child in children {
                        members.push(self.seed(child)?);
                    }
                }
            }
            self.set_links(&entity.name, &identity, &relation.name, members)?;
        }

        tracing::trace!(type_name = %entity.name, %identity, "Seeded row");
        Ok(identity)
    }

    pub(crate) fn sequences(&self) -> &BTreeMap<TypeName, i64> {
        &self.sequences
    }

    pub(crate) fn set_sequences(&mut self, sequences: BTreeMap<TypeName, i64>) {
        self.sequences = sequences;
    }

    /// Fill every unassigned generated key component of `fields` and return
    /// the resulting identity. Sequences advance in `sequences` only, so a
    /// caller can plan keys without touching the database.
    pub(crate) fn assign_keys(
        &self,
        entity: &EntityType,
        fields: &mut Fields,
        sequences: &mut BTreeMap<TypeName, i64>,
    ) -> Result<Identity> {
        for key in &entity.key {
            let current = match fields.get(&key.name) {
                Some(raw) => KeyValue::from_json(key.kind, &key.name, raw)?,
                None => None,
            };
            let unassigned = match current {
                None => true,
                Some(value) => key.generated && value.is_default_value(),
            };
            if !unassigned {
                continue;
            }
            if !key.generated {
                return Err(StoreError::MissingKey {
                    type_name: entity.name.clone(),
                    field: key.name.clone(),
                });
            }

            let value = match key.kind {
                KeyKind::Int => {
                    let mut next = *sequences.get(&entity.name).unwrap_or(&self.key_start);
                    while self.column_has(&entity.name, &key.name, next) {
                        next += 1;
                    }
                    sequences.insert(entity.name.clone(), next + 1);
                    serde_json::Value::from(next)
                }
                KeyKind::Uuid | KeyKind::Text => {
                    serde_json::Value::String(Uuid::new_v4().to_string())
                }
            };
            fields.insert(key.name.clone(), value);
        }
        identity_of(entity, fields)
    }

    fn column_has(&self, type_name: &TypeName, column: &str, value: i64) -> bool {
        self.rows(type_name)
            .any(|(_, row)| row.fields.get(column).and_then(|v| v.as_i64()) == Some(value))
    }

    pub(crate) fn insert_row(
        &mut self,
        type_name: &TypeName,
        identity: Identity,
        fields: Fields,
    ) -> Result<()> {
        let table = self.tables.entry(type_name.clone()).or_default();
        if table.contains_key(&identity) {
            return Err(StoreError::DuplicateKey {
                type_name: type_name.clone(),
                identity,
            });
        }
        table.insert(
            identity,
            Row {
                fields,
                links: BTreeMap::new(),
            },
        );
        Ok(())
    }

    /// Overwrite the non-key fields of a row.
    pub(crate) fn update_fields(
        &mut self,
        type_name: &TypeName,
        identity: &Identity,
        fields: &Fields,
    ) -> Result<()> {
        let entity = self.model.entity(type_name)?;
        let row = self
            .tables
            .get_mut(type_name)
            .and_then(|t| t.get_mut(identity))
            .ok_or_else(|| missing(type_name, identity))?;
        for name in &entity.fields {
            let value = fields.get(name).cloned().unwrap_or(serde_json::Value::Null);
            row.fields.insert(name.clone(), value);
        }
        Ok(())
    }

    /// Replace the links of one relation of a row, mirroring the change on
    /// the declared inverse.
    pub(crate) fn set_links(
        &mut self,
        type_name: &TypeName,
        identity: &Identity,
        relation: &str,
        members: Vec<Identity>,
    ) -> Result<()> {
        let descriptor = self.model.relation(type_name, relation)?.clone();
        let row = self.row_mut(type_name, identity)?;
        let old = row
            .links
            .insert(relation.to_string(), members.clone())
            .unwrap_or_default();

        let Some(inverse) = &descriptor.inverse else {
            return Ok(());
        };
        for removed in old.iter().filter(|m| !members.contains(m)) {
            if let Ok(far) = self.row_mut(&descriptor.target, removed) {
                if let Some(back) = far.links.get_mut(inverse) {
                    back.retain(|id| id != identity);
                }
            }
        }
        for added in members.iter().filter(|m| !old.contains(m)) {
            self.link_back(&descriptor.target, added, inverse, type_name, identity, relation)?;
        }
        Ok(())
    }

    /// Record `owner` on the inverse side of `target`. A singular inverse
    /// that pointed elsewhere is moved, and the previous owner loses its
    /// forward link.
    fn link_back(
        &mut self,
        target_type: &TypeName,
        target: &Identity,
        inverse: &str,
        owner_type: &TypeName,
        owner: &Identity,
        forward: &str,
    ) -> Result<()> {
        let inverse_many = self.model.relation(target_type, inverse)?.is_many();
        let far = self.row_mut(target_type, target)?;
        let back = far.links.entry(inverse.to_string()).or_default();

        if inverse_many {
            if !back.contains(owner) {
                back.push(owner.clone());
            }
            return Ok(());
        }

        let previous = std::mem::replace(back, vec![owner.clone()]);
        for prev in previous.iter().filter(|p| *p != owner) {
            if let Ok(prev_row) = self.row_mut(owner_type, prev) {
                if let Some(links) = prev_row.links.get_mut(forward) {
                    links.retain(|id| id != target);
                }
            }
        }
        Ok(())
    }

    /// Delete a row, cascading over its `delete` relations. Links pointing
    /// at a deleted row are dropped. Returns the number of rows removed.
    pub(crate) fn delete_row(&mut self, type_name: &TypeName, identity: &Identity) -> Result<u32> {
        let Some(row) = self
            .tables
            .get_mut(type_name)
            .and_then(|t| t.remove(identity))
        else {
            return Ok(0);
        };

        for (owner_type, table) in self.tables.iter_mut() {
            let Ok(owner) = self.model.entity(owner_type) else {
                continue;
            };
            let incoming: Vec<&str> = owner
                .relations
                .iter()
                .filter(|r| r.target == *type_name)
                .map(|r| r.name.as_str())
                .collect();
            if incoming.is_empty() {
                continue;
            }
            for other in table.values_mut() {
                for relation in &incoming {
                    if let Some(links) = other.links.get_mut(*relation) {
                        links.retain(|id| id != identity);
                    }
                }
            }
        }

        let entity = self.model.entity(type_name)?.clone();
        let mut deleted = 1;
        for relation in entity
            .relations
            .iter()
            .filter(|r| r.on_remove == OnRemove::Delete)
        {
            for member in row.linked(&relation.name) {
                deleted += self.delete_row(&relation.target, member)?;
            }
        }
        Ok(deleted)
    }

    fn row_mut(&mut self, type_name: &TypeName, identity: &Identity) -> Result<&mut Row> {
        self.tables
            .get_mut(type_name)
            .and_then(|t| t.get_mut(identity))
            .ok_or_else(|| missing(type_name, identity))
    }
}

fn missing(type_name: &TypeName, identity: &Identity) -> StoreError {
    StoreError::MissingRow {
        type_name: type_name.clone(),
        identity: identity.clone(),
    }
}

/// Key and scalar fields of a payload that `entity` declares.
pub(crate) fn declared_fields(entity: &EntityType, fields: &Fields) -> Fields {
    fields
        .iter()
        .filter(|(name, _)| entity.has_scalar(name))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect()
}

/// Complete identity of a row's fields; every component must be present.
pub(crate) fn identity_of(entity: &EntityType, fields: &Fields) -> Result<Identity> {
    let mut values = Vec::with_capacity(entity.key.len());
    for key in &entity.key {
        let value = match fields.get(&key.name) {
            Some(raw) => KeyValue::from_json(key.kind, &key.name, raw)?,
            None => None,
        };
        let value = value.ok_or_else(|| StoreError::MissingKey {
            type_name: entity.name.clone(),
            field: key.name.clone(),
        })?;
        values.push(value);
    }
    Ok(Identity::new(values))
}
