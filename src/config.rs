//! `grove.toml` loading

use std::path::Path;

use anyhow::Context;
use grove_core::ModelConfig;
use grove_indexer::IndexerConfig;
use grove_watcher::WorkspaceConfig;
use serde::Deserialize;

pub const CONFIG_FILE: &str = "grove.toml";

/// Settings read from `grove.toml` at the workspace root. Every table is
/// optional; unknown keys are rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GroveConfig {
    pub model: ModelConfig,
    pub workspace: WorkspaceConfig,
    pub indexer: IndexerConfig,
}

impl GroveConfig {
    pub fn load(root: &Path) -> anyhow::Result<Self> {
        let path = root.join(CONFIG_FILE);
        if !path.is_file() {
            return Ok(GroveConfig::default());
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let config = toml::from_str(&text)
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }
}
