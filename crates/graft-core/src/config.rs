//! Configuration management for graft.
//!
//! Configuration is loaded from (in priority order):
//! 1. Environment variables (`GRAFT__` prefix, `__` separator)
//! 2. Config file (`graft.toml` by default)
//! 3. Defaults

use serde::Deserialize;

/// How the reconciler avoids walking back toward the node it came from.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionPolicy {
    /// Skip the declared inverse of the edge just traversed and any relation
    /// already on the current path.
    #[default]
    RelationPath,
    /// Skip every relation whose target is the parent node's type.
    ParentType,
}

/// Reconciler settings.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ReconcileConfig {
    #[serde(default)]
    pub exclusion: ExclusionPolicy,
}

/// Settings for the in-memory reference store.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// First value handed out by integer key sequences.
    #[serde(default = "default_key_start")]
    pub generated_key_start: i64,
}

fn default_key_start() -> i64 {
    1
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            generated_key_start: default_key_start(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct GraftConfig {
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl GraftConfig {
    /// Load from `<file_prefix>.{toml,json,...}` (optional) and `GRAFT__*`
    /// environment variables.
    pub fn load(file_prefix: &str) -> Result<Self, config::ConfigError> {
        let cfg = config::Config::builder()
            .add_source(config::File::with_name(file_prefix).required(false))
            .add_source(
                config::Environment::with_prefix("GRAFT")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: Self = cfg.try_deserialize()?;
        tracing::debug!(
            exclusion = ?loaded.reconcile.exclusion,
            generated_key_start = loaded.store.generated_key_start,
            "Configuration loaded"
        );
        Ok(loaded)
    }
}
