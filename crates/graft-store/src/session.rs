//! Unit of work over a [`Database`].
//!
//! A session tracks the entities it loads or receives in an arena, keeps an
//! identity map so each stored row is materialised once, and records every
//! staged operation. Nothing reaches the database until [`Session::commit`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use graft_core::{ChangeSet, ChangeSetId, Fields, Identity, NodeRef, StagedChange, TypeName};
use graft_reconcile::identity::primary_key;
use graft_reconcile::RelationValue;
use serde::Serialize;

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Handle of an entity tracked by a [`Session`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct EntityId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityState {
    Unchanged,
    Added,
    Modified,
    Deleted,
    /// No longer tracked: deleted by a commit, or inserted and deleted
    /// again before one.
    Detached,
}

impl EntityState {
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Deleted | Self::Detached)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub type_name: TypeName,
    pub fields: Fields,
    /// Identity of the committed row; `None` until an insert commits.
    pub key: Option<Identity>,
    pub state: EntityState,
    /// Loaded relations.
    pub slots: BTreeMap<String, RelationValue<EntityId>>,
    /// Loaded relations whose links must be written on commit.
    pub dirty: BTreeSet<String>,
}

impl Entry {
    pub fn new(
        type_name: TypeName,
        fields: Fields,
        key: Option<Identity>,
        state: EntityState,
    ) -> Self {
        Self {
            type_name,
            fields,
            key,
            state,
            slots: BTreeMap::new(),
            dirty: BTreeSet::new(),
        }
    }
}

/// What a commit wrote.
#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub change_set: ChangeSetId,
    pub committed_at: DateTime<Utc>,
    pub inserted: u32,
    pub updated: u32,
    /// Rows removed, including those removed by cascade.
    pub deleted: u32,
    pub links_written: u32,
}

pub struct Session<'db> {
    pub(crate) db: &'db mut Database,
    pub(crate) entries: Vec<Entry>,
    pub(crate) identity_map: HashMap<(TypeName, Identity), EntityId>,
    pub(crate) pending: ChangeSet,
    /// Entities each pending change names, index-aligned with `pending`.
    pub(crate) subjects: Vec<Vec<EntityId>>,
}

/// A commit worked out in full before the database is touched.
struct CommitPlan {
    sequences: BTreeMap<TypeName, i64>,
    inserts: Vec<(EntityId, Identity, Fields)>,
    updates: Vec<(TypeName, Identity, Fields)>,
    links: Vec<(TypeName, Identity, String, Vec<Identity>)>,
    deletes: Vec<(TypeName, Identity)>,
}

impl<'db> Session<'db> {
    pub fn new(db: &'db mut Database) -> Self {
        Self {
            db,
            entries: Vec::new(),
            identity_map: HashMap::new(),
            pending: ChangeSet::new(),
            subjects: Vec::new(),
        }
    }

    pub fn database(&self) -> &Database {
        &*self.db
    }

    /// Operations staged since the session opened or last committed.
    pub fn pending(&self) -> &ChangeSet {
        &self.pending
    }

    pub fn state(&self, id: EntityId) -> Result<EntityState> {
        Ok(self.entry(id)?.state)
    }

    /// The tracked entity for a stored row, if the session has loaded it.
    pub fn find(&self, type_name: &TypeName, identity: &Identity) -> Option<EntityId> {
        self.identity_map
            .get(&(type_name.clone(), identity.clone()))
            .copied()
    }

    /// Number of live tracked entities.
    pub fn tracked(&self) -> usize {
        self.entries.iter().filter(|e| e.state.is_live()).count()
    }

    pub(crate) fn entry(&self, id: EntityId) -> Result<&Entry> {
        self.entries.get(id.0).ok_or(StoreError::UnknownEntity(id))
    }

    pub(crate) fn entry_mut(&mut self, id: EntityId) -> Result<&mut Entry> {
        self.entries.get_mut(id.0).ok_or(StoreError::UnknownEntity(id))
    }

    pub(crate) fn push_entry(&mut self, entry: Entry) -> EntityId {
        let id = EntityId(self.entries.len());
        if let Some(key) = &entry.key {
            self.identity_map
                .insert((entry.type_name.clone(), key.clone()), id);
        }
        self.entries.push(entry);
        id
    }

    /// Record a change naming `subjects`.
    pub(crate) fn stage_change(&mut self, change: StagedChange, subjects: Vec<EntityId>) {
        tracing::debug!(?change, "Staged change");
        self.pending.push(change);
        self.subjects.push(subjects);
    }

    /// Drop every pending change that names one of `withdrawn`.
    pub(crate) fn discard_changes(&mut self, withdrawn: &HashSet<EntityId>) {
        let changes = std::mem::take(&mut self.pending.changes);
        let subjects = std::mem::take(&mut self.subjects);
        let (changes, subjects): (Vec<_>, Vec<_>) = changes
            .into_iter()
            .zip(subjects)
            .filter(|(_, named)| !named.iter().any(|id| withdrawn.contains(id)))
            .unzip();
        self.pending.changes = changes;
        self.subjects = subjects;
    }

    /// Reference to an entity for change records. Inserted entities carry
    /// whatever key the caller supplied.
    pub(crate) fn node_ref(&self, id: EntityId) -> Result<NodeRef> {
        let entry = self.entry(id)?;
        let identity = match &entry.key {
            Some(key) => Some(key.clone()),
            None => {
                let entity = self.db.model().entity(&entry.type_name)?;
                primary_key(entity, &entry.fields).ok().flatten()
            }
        };
        Ok(NodeRef::new(entry.type_name.clone(), identity))
    }

    /// Write every staged change to the database.
    ///
    /// Keys, duplicates and link targets are resolved first; an error at
    /// that stage leaves the database and the session untouched.
    pub fn commit(&mut self) -> Result<CommitSummary> {
        let plan = self.plan_commit()?;
        let mut summary = CommitSummary {
            change_set: self.pending.id,
            committed_at: Utc::now(),
            inserted: plan.inserts.len() as u32,
            updated: plan.updates.len() as u32,
            deleted: 0,
            links_written: plan.links.len() as u32,
        };

        self.db.set_sequences(plan.sequences);
        for (id, identity, fields) in &plan.inserts {
            let type_name = self.entry(*id)?.type_name.clone();
            self.db.insert_row(&type_name, identity.clone(), fields.clone())?;
        }
        for (type_name, identity, fields) in &plan.updates {
            self.db.update_fields(type_name, identity, fields)?;
        }
        for (type_name, identity, relation, members) in plan.links {
            self.db.set_links(&type_name, &identity, &relation, members)?;
        }
        for (type_name, identity) in &plan.deletes {
            summary.deleted += self.db.delete_row(type_name, identity)?;
        }

        self.accept(plan.inserts);
        self.pending = ChangeSet::new();
        self.subjects.clear();

        tracing::info!(
            change_set = %summary.change_set,
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            links_written = summary.links_written,
            "Committed change set"
        );
        Ok(summary)
    }

    fn plan_commit(&self) -> Result<CommitPlan> {
        let mut sequences = self.db.sequences().clone();
        let mut inserts = Vec::new();
        let mut planned: HashMap<EntityId, Identity> = HashMap::new();
        let mut seen: HashSet<(TypeName, Identity)> = HashSet::new();

        for (index, entry) in self.entries.iter().enumerate() {
            if entry.state != EntityState::Added {
                continue;
            }
            let entity = self.db.model().entity(&entry.type_name)?;
            let mut fields = entry.fields.clone();
            let identity = self.db.assign_keys(entity, &mut fields, &mut sequences)?;

            let slot = (entry.type_name.clone(), identity.clone());
            if self.db.contains(&entry.type_name, &identity) || !seen.insert(slot) {
                return Err(StoreError::DuplicateKey {
                    type_name: entry.type_name.clone(),
                    identity,
                });
            }
            planned.insert(EntityId(index), identity.clone());
            inserts.push((EntityId(index), identity, fields));
        }

        let resolve = |id: EntityId| -> Result<Option<Identity>> {
            let entry = self.entry(id)?;
            if !entry.state.is_live() {
                return Ok(None);
            }
            Ok(entry.key.clone().or_else(|| planned.get(&id).cloned()))
        };

        let mut updates = Vec::new();
        let mut links = Vec::new();
        let mut deletes = Vec::new();
        for (index, entry) in self.entries.iter().enumerate() {
            match entry.state {
                EntityState::Modified => {
                    if let Some(key) = &entry.key {
                        updates.push((entry.type_name.clone(), key.clone(), entry.fields.clone()));
                    }
                }
                EntityState::Deleted => {
                    if let Some(key) = &entry.key {
                        deletes.push((entry.type_name.clone(), key.clone()));
                    }
                    continue;
                }
                EntityState::Detached => continue,
                EntityState::Unchanged | EntityState::Added => {}
            }

            let Some(owner) = resolve(EntityId(index))? else {
                continue;
            };
            for relation in &entry.dirty {
                let members = match entry.slots.get(relation) {
                    Some(RelationValue::One(member)) => member.iter().copied().collect(),
                    Some(RelationValue::Many(members)) => members.clone(),
                    None => continue,
                };
                let mut resolved = Vec::with_capacity(members.len());
                for member in members {
                    if let Some(identity) = resolve(member)? {
                        resolved.push(identity);
                    }
                }
                links.push((entry.type_name.clone(), owner.clone(), relation.clone(), resolved));
            }
        }

        Ok(CommitPlan {
            sequences,
            inserts,
            updates,
            links,
            deletes,
        })
    }

    /// Bring tracked state in line with what was just committed.
    fn accept(&mut self, inserts: Vec<(EntityId, Identity, Fields)>) {
        for (id, identity, fields) in inserts {
            if let Some(entry) = self.entries.get_mut(id.0) {
                entry.fields = fields;
                entry.key = Some(identity.clone());
                entry.state = EntityState::Unchanged;
                self.identity_map
                    .insert((entry.type_name.clone(), identity), id);
            }
        }

        let mut gone = HashSet::new();
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.dirty.clear();
            let still_stored = entry
                .key
                .as_ref()
                .is_some_and(|key| self.db.contains(&entry.type_name, key));
            match entry.state {
                EntityState::Modified => entry.state = EntityState::Unchanged,
                EntityState::Unchanged if !still_stored => entry.state = EntityState::Detached,
                EntityState::Deleted => entry.state = EntityState::Detached,
                _ => {}
            }
            if entry.state == EntityState::Detached {
                if let Some(key) = &entry.key {
                    self.identity_map.remove(&(entry.type_name.clone(), key.clone()));
                }
                gone.insert(EntityId(index));
            }
        }

        for entry in &mut self.entries {
            for slot in entry.slots.values_mut() {
                match slot {
                    RelationValue::One(member) => {
                        if member.is_some_and(|m| gone.contains(&m)) {
                            *member = None;
                        }
                    }
                    RelationValue::Many(members) => members.retain(|m| !gone.contains(m)),
                }
            }
        }
    }
}
