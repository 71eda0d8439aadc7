//! Config store for loading and saving fleet.toml.

use std::path::{Path, PathBuf};

use anyhow::Context;

use super::{DaemonConfig, parser};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    config_path: PathBuf,
}

impl ConfigStore {
    /// `<config dir>/fleet/fleet.toml`
    pub fn from_default_location() -> anyhow::Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("fleet");
        Ok(Self::from_path(dir.join("fleet.toml")))
    }

    pub fn from_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Load the config, falling back to defaults when the file does not exist.
    pub fn load(&self) -> anyhow::Result<DaemonConfig> {
        if !self.config_path.exists() {
            return Ok(DaemonConfig::new());
        }
        parser::parse_fleet_toml(&self.config_path)
    }

    pub fn save(&self, config: &DaemonConfig) -> anyhow::Result<()> {
        let content = parser::to_toml(config).context("Failed to serialize config to TOML")?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        std::fs::write(&self.config_path, content).with_context(|| {
            format!(
                "Failed to write config file: {}",
                self.config_path.display()
            )
        })?;
        Ok(())
    }
}
