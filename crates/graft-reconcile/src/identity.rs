//! Primary-key extraction.
//!
//! Pure functions over the model and a node's fields; no process-wide state.

use graft_core::{DetachedNode, EntityType, Fields, Identity, KeyField, KeyValue, Model};

use crate::collaborator::PersistenceCollaborator;
use crate::error::{ReconcileError, Result};

/// Identity of a node given its scalar fields.
///
/// Returns `Ok(None)` when any key component is missing, null, or a
/// generated key still at its default value (`0` or the nil UUID): such a
/// node matches nothing.
pub fn primary_key(entity: &EntityType, fields: &Fields) -> Result<Option<Identity>> {
    collect_key(entity, |name| Ok(fields.get(name)))
}

/// Identity of a detached incoming node.
pub fn incoming_identity(model: &Model, node: &DetachedNode) -> Result<Option<Identity>> {
    let entity = model.entity(&node.type_name)?;
    primary_key(entity, &node.fields)
}

/// Identity of a node tracked by the collaborator.
pub fn stored_identity<C>(collab: &C, node: C::Handle) -> Result<Option<Identity>>
where
    C: PersistenceCollaborator + ?Sized,
{
    let type_name = collab.type_of(node)?;
    let entity = collab.model().entity(&type_name)?;
    collect_key(entity, |name| collab.field(node, name))
}

fn collect_key<'a, F>(entity: &EntityType, mut read: F) -> Result<Option<Identity>>
where
    F: FnMut(&str) -> Result<Option<&'a serde_json::Value>>,
{
    if !entity.has_key() {
        return Err(ReconcileError::NoPrimaryKey {
            type_name: entity.name.clone(),
        });
    }

    let mut values = Vec::with_capacity(entity.key.len());
    for key in &entity.key {
        match component(key, read(&key.name)?)? {
            Some(value) => values.push(value),
            None => return Ok(None),
        }
    }
    Ok(Some(Identity::new(values)))
}

fn component(key: &KeyField, raw: Option<&serde_json::Value>) -> Result<Option<KeyValue>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let value = KeyValue::from_json(key.kind, &key.name, raw)?;
    Ok(match value {
        Some(value) if key.generated && value.is_default_value() => None,
        other => other,
    })
}
