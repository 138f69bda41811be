//! Recursion boundary: which relations a visit must not walk.
//!
//! A boundary is call-scoped state describing how the walk reached the
//! current node. It is what keeps bidirectional relations from recursing
//! back toward an ancestor.

use graft_core::{ExclusionPolicy, RelationDescriptor, TypeName};

/// A relation identified by its declaring type and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RelationId {
    pub declaring: TypeName,
    pub name: String,
}

impl RelationId {
    pub fn new(declaring: &TypeName, name: &str) -> Self {
        Self {
            declaring: declaring.clone(),
            name: name.to_string(),
        }
    }
}

impl std::fmt::Display for RelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.declaring, self.name)
    }
}

/// The edge a visit arrived through.
#[derive(Debug, Clone)]
struct Arrival {
    via: RelationId,
    inverse: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Boundary {
    /// Type of the node one level up, or the caller-supplied exclusion at
    /// the top level.
    parent_type: Option<TypeName>,
    arrival: Option<Arrival>,
    path: Vec<RelationId>,
}

impl Boundary {
    /// Boundary of a top-level call.
    pub fn root(excluded: Option<&TypeName>) -> Self {
        Self {
            parent_type: excluded.cloned(),
            arrival: None,
            path: Vec::new(),
        }
    }

    /// Whether a visit to a node of type `declaring` must skip `relation`.
    pub fn excludes(
        &self,
        policy: ExclusionPolicy,
        declaring: &TypeName,
        relation: &RelationDescriptor,
    ) -> bool {
        let leads_to_parent = self.parent_type.as_ref() == Some(&relation.target);

        match policy {
            ExclusionPolicy::ParentType => leads_to_parent,
            ExclusionPolicy::RelationPath => {
                if self
                    .path
                    .iter()
                    .any(|id| id.declaring == *declaring && id.name == relation.name)
                {
                    return true;
                }
                match &self.arrival {
                    Some(Arrival {
                        inverse: Some(inverse),
                        ..
                    }) => *inverse == relation.name,
                    // No inverse metadata on the edge: fall back to the type.
                    Some(Arrival { inverse: None, .. }) | None => leads_to_parent,
                }
            }
        }
    }

    /// Boundary for the children reached through `relation` of `declaring`.
    pub fn descend(&self, declaring: &TypeName, relation: &RelationDescriptor) -> Self {
        let via = RelationId::new(declaring, &relation.name);
        let mut path = self.path.clone();
        path.push(via.clone());
        Self {
            parent_type: Some(declaring.clone()),
            arrival: Some(Arrival {
                via,
                inverse: relation.inverse.clone(),
            }),
            path,
        }
    }

    /// Depth below the top-level node.
    pub fn depth(&self) -> usize {
        self.path.len()
    }

    /// The relation this visit arrived through, if any.
    pub fn arrived_via(&self) -> Option<&RelationId> {
        self.arrival.as_ref().map(|a| &a.via)
    }
}
