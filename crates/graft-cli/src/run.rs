//! The `reconcile` and `check-model` commands.

use std::path::{Path, PathBuf};

use graft_core::{ChangeSet, GraftConfig, NodeRef, TypeName};
use graft_reconcile::identity::incoming_identity;
use graft_reconcile::{ReconcileStats, Reconciler};
use graft_store::{CommitSummary, Database, Includes, Session};
use serde::Serialize;

use crate::error::{CliError, Result};
use crate::files;

#[derive(Debug, Clone)]
pub struct ReconcileRequest {
    pub model: PathBuf,
    pub seed: Option<PathBuf>,
    pub incoming: PathBuf,
    pub root: TypeName,
    /// Relation paths to load; derived from the incoming payload when empty.
    pub includes: Vec<String>,
    pub commit: bool,
}

#[derive(Debug, Serialize)]
pub struct ReconcileReport {
    /// The stored root the payload matched, or `new` when it was inserted.
    pub root: NodeRef,
    pub stats: ReconcileStats,
    pub changes: ChangeSet,
    pub commit: Option<CommitSummary>,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct ModelReport {
    pub types: usize,
    pub relations: usize,
    pub keyless_types: Vec<TypeName>,
}

/// Seed a fresh store, load the stored aggregate the payload names, and
/// reconcile the payload into it.
pub fn reconcile(config: &GraftConfig, request: &ReconcileRequest) -> Result<ReconcileReport> {
    let model = files::read_model(&request.model)?;
    let mut db = Database::new(model.clone(), &config.store);
    if let Some(seed) = &request.seed {
        let roots = files::read_seed(&model, seed)?;
        for root in &roots {
            db.seed(root)?;
        }
        tracing::info!(roots = roots.len(), rows = db.total_rows(), "Database seeded");
    }

    let incoming = files::read_node(&model, &request.root, &request.incoming)?;
    let includes = if request.includes.is_empty() {
        Includes::from_payload(&incoming)
    } else {
        Includes::parse(&request.includes)
    };

    let identity = incoming_identity(&model, &incoming)?;
    let mut session = Session::new(&mut db);
    let stored = match &identity {
        Some(identity) => session.load(&request.root, identity, &includes)?,
        None => None,
    };
    if stored.is_none() {
        tracing::info!(root = %request.root, "No stored aggregate; the payload will be inserted");
    }
    let root = NodeRef::new(request.root.clone(), stored.and(identity));

    let mut reconciler = Reconciler::from_config(&config.reconcile);
    let handle = reconciler
        .reconcile(&mut session, Some(&incoming), stored)?
        .ok_or_else(|| CliError::RootRemoved {
            type_name: request.root.clone(),
        })?;

    let changes = session.pending().clone();
    let commit = if request.commit {
        Some(session.commit()?)
    } else {
        None
    };
    let snapshot = session.snapshot(handle)?;

    Ok(ReconcileReport {
        root,
        stats: *reconciler.stats(),
        changes,
        commit,
        snapshot,
    })
}

/// Validate a model file and summarise it.
pub fn check_model(path: &Path) -> Result<ModelReport> {
    let model = files::read_model(path)?;
    Ok(ModelReport {
        types: model.len(),
        relations: model.types().map(|t| t.relations.len()).sum(),
        keyless_types: model
            .types()
            .filter(|t| !t.has_key())
            .map(|t| t.name.clone())
            .collect(),
    })
}
