use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Where a record lands when its preceding key is not held locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OrphanPlacement {
    #[default]
    Append,
    Prepend,
}

/// Tunables shared by all collection engines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub orphan_placement: OrphanPlacement,
    /// Let the batched array hand snapshot change hints to the diff
    pub use_change_hints: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            orphan_placement: OrphanPlacement::Append,
            use_change_hints: true,
        }
    }
}

impl SyncConfig {
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse sync config")
    }
}
