//! Package installer contract
//!
//! The daemon never touches package repositories itself. Every lifecycle
//! operation goes through an [`Installer`], and the installer self-update path
//! goes through a [`SelfUpdater`].

pub mod exec;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::InstallerError;

pub use exec::ExecInstaller;

/// Package name of the installer itself.
pub const INSTALLER_PACKAGE: &str = "datadog-installer";

/// Installed versions of one package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageVersions {
    #[serde(default)]
    pub stable: String,
    /// Empty when no experiment is running.
    #[serde(default)]
    pub experiment: String,
}

impl PackageVersions {
    pub fn new(stable: impl Into<String>, experiment: impl Into<String>) -> Self {
        Self {
            stable: stable.into(),
            experiment: experiment.into(),
        }
    }

    pub fn has_experiment(&self) -> bool {
        !self.experiment.is_empty()
    }
}

#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, url: &str, args: &[String]) -> Result<(), InstallerError>;

    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError>;

    async fn remove_experiment(&self, package: &str) -> Result<(), InstallerError>;

    async fn promote_experiment(&self, package: &str) -> Result<(), InstallerError>;

    async fn state(&self, package: &str) -> Result<PackageVersions, InstallerError>;

    async fn states(&self) -> Result<BTreeMap<String, PackageVersions>, InstallerError>;

    async fn garbage_collect(&self) -> Result<(), InstallerError>;
}

/// Starts an experiment of the installer package.
///
/// The experiment installer is responsible for starting its own experiment,
/// so this path never goes through [`Installer::install_experiment`].
#[async_trait]
pub trait SelfUpdater: Send + Sync {
    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError>;
}
