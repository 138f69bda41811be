//! Reading model, seed and payload files.

use std::fs;
use std::path::Path;

use graft_core::{DetachedNode, Model, TypeName};

use crate::error::{CliError, Result};

pub fn read_json(path: &Path) -> Result<serde_json::Value> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// A model file: `{ "types": [ ... ] }`.
pub fn read_model(path: &Path) -> Result<Model> {
    let text = fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let model = Model::from_json(&text)?;
    tracing::debug!(path = %path.display(), types = model.len(), "Model loaded");
    Ok(model)
}

/// A seed file: an object mapping type names to arrays of root payloads.
pub fn read_seed(model: &Model, path: &Path) -> Result<Vec<DetachedNode>> {
    let serde_json::Value::Object(types) = read_json(path)? else {
        return Err(CliError::InvalidSeed(
            "expected an object keyed by type name".to_string(),
        ));
    };

    let mut roots = Vec::new();
    for (type_name, payloads) in &types {
        let serde_json::Value::Array(payloads) = payloads else {
            return Err(CliError::InvalidSeed(format!(
                "entry {type_name} must be an array of payloads"
            )));
        };
        let type_name = TypeName::from(type_name.as_str());
        for payload in payloads {
            roots.push(DetachedNode::from_json(model, &type_name, payload)?);
        }
    }
    Ok(roots)
}

/// A single payload of `type_name`.
pub fn read_node(model: &Model, type_name: &TypeName, path: &Path) -> Result<DetachedNode> {
    let value = read_json(path)?;
    Ok(DetachedNode::from_json(model, type_name, &value)?)
}
