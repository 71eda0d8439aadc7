//! Installer backed by the installer binary.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::process::Command;
use tracing::debug;

use crate::errors::{ErrorCode, InstallerError};
use crate::installer::{Installer, PackageVersions, SelfUpdater};

/// Error payload the installer binary prints on stderr when it fails.
#[derive(Debug, Deserialize)]
struct ErrorPayload {
    error: String,
    #[serde(default)]
    code: u64,
}

/// Runs each operation as a subcommand of the installer binary.
#[derive(Debug, Clone)]
pub struct ExecInstaller {
    bin: PathBuf,
}

impl ExecInstaller {
    pub fn new(bin: PathBuf) -> Self {
        Self { bin }
    }

    pub fn bin(&self) -> &Path {
        &self.bin
    }

    async fn run(&self, args: &[&str]) -> Result<Vec<u8>, InstallerError> {
        debug!(bin = %self.bin.display(), ?args, "Running installer");
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                InstallerError::unknown(format!(
                    "could not run installer {}: {}",
                    self.bin.display(),
                    e
                ))
            })?;

        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(parse_failure(&output.stderr, output.status.code()))
    }

    async fn run_json<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, InstallerError> {
        let stdout = self.run(args).await?;
        serde_json::from_slice(&stdout).map_err(|e| {
            InstallerError::unknown(format!("could not decode installer output: {}", e))
        })
    }
}

fn parse_failure(stderr: &[u8], status: Option<i32>) -> InstallerError {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if let Ok(payload) = serde_json::from_str::<ErrorPayload>(text) {
        return InstallerError::new(ErrorCode::from(payload.code), payload.error);
    }
    match status {
        Some(code) if text.is_empty() => {
            InstallerError::unknown(format!("installer exited with status {}", code))
        }
        None if text.is_empty() => InstallerError::unknown("installer terminated by signal"),
        _ => InstallerError::unknown(text.to_string()),
    }
}

#[async_trait]
impl Installer for ExecInstaller {
    async fn install(&self, url: &str, args: &[String]) -> Result<(), InstallerError> {
        let mut cmd = vec!["install", url];
        cmd.extend(args.iter().map(String::as_str));
        self.run(&cmd).await.map(drop)
    }

    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError> {
        self.run(&["install-experiment", url]).await.map(drop)
    }

    async fn remove_experiment(&self, package: &str) -> Result<(), InstallerError> {
        self.run(&["remove-experiment", package]).await.map(drop)
    }

    async fn promote_experiment(&self, package: &str) -> Result<(), InstallerError> {
        self.run(&["promote-experiment", package]).await.map(drop)
    }

    async fn state(&self, package: &str) -> Result<PackageVersions, InstallerError> {
        self.run_json(&["state", package]).await
    }

    async fn states(&self) -> Result<BTreeMap<String, PackageVersions>, InstallerError> {
        self.run_json(&["states"]).await
    }

    async fn garbage_collect(&self) -> Result<(), InstallerError> {
        self.run(&["garbage-collect"]).await.map(drop)
    }
}

#[async_trait]
impl SelfUpdater for ExecInstaller {
    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError> {
        self.run(&["bootstrap", "--experiment", url]).await.map(drop)
    }
}
