//! Core vocabulary for aggregate reconciliation.
//!
//! Type names, primary-key values and identities are shared by the model,
//! the reconciler, and every persistence collaborator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ModelError;

/// Scalar field values of a node, keyed by field name.
pub type Fields = BTreeMap<String, serde_json::Value>;

// ── Type Names ────────────────────────────────────────────────────

/// Name of a domain type registered in the [`Model`](crate::model::Model).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct TypeName(pub String);

impl TypeName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TypeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl PartialEq<str> for TypeName {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for TypeName {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

// ── Keys ──────────────────────────────────────────────────────────

/// How a primary-key component is stored and parsed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    Int,
    Uuid,
    Text,
}

/// A single primary-key component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(untagged)]
pub enum KeyValue {
    Int(i64),
    Uuid(Uuid),
    Text(String),
}

impl KeyValue {
    /// Interpret a raw field value as a key component of the given kind.
    ///
    /// Returns `Ok(None)` for `null`. A UUID is parsed, so two spellings that
    /// differ only in case or braces yield the same key.
    pub fn from_json(
        kind: KeyKind,
        field: &str,
        value: &serde_json::Value,
    ) -> Result<Option<Self>, ModelError> {
        use serde_json::Value;

        let invalid = || ModelError::InvalidKey {
            field: field.to_string(),
            expected: kind,
            found: value.to_string(),
        };

        match (kind, value) {
            (_, Value::Null) => Ok(None),
            (KeyKind::Int, Value::Number(n)) => n.as_i64().map(|i| Some(Self::Int(i))).ok_or_else(invalid),
            (KeyKind::Uuid, Value::String(s)) => Uuid::parse_str(s)
                .map(|u| Some(Self::Uuid(u)))
                .map_err(|_| invalid()),
            (KeyKind::Text, Value::String(s)) => Ok(Some(Self::Text(s.clone()))),
            _ => Err(invalid()),
        }
    }

    /// The zero value of the kind: `0` or the nil UUID. A generated key
    /// carrying it has not been assigned yet.
    pub fn is_default_value(&self) -> bool {
        match self {
            Self::Int(i) => *i == 0,
            Self::Uuid(u) => u.is_nil(),
            Self::Text(_) => false,
        }
    }

    /// Canonical field representation of this key component.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(i) => serde_json::Value::from(*i),
            Self::Uuid(u) => serde_json::Value::String(u.to_string()),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{i}"),
            Self::Uuid(u) => write!(f, "{u}"),
            Self::Text(s) => write!(f, "{s:?}"),
        }
    }
}

/// The ordered tuple of primary-key values naming a node within its type.
///
/// Components follow the key order declared by the entity type, so two
/// payloads listing the same key fields in a different order compare equal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(transparent)]
pub struct Identity(pub Vec<KeyValue>);

impl Identity {
    pub fn new(values: Vec<KeyValue>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[KeyValue] {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{value}")?;
        }
        f.write_str(")")
    }
}

impl From<i64> for Identity {
    fn from(id: i64) -> Self {
        Self(vec![KeyValue::Int(id)])
    }
}
