//! fleet.toml schema

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::remote::PreconditionMode;

/// Interval between two garbage collections, in seconds.
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 60 * 60;

/// Capacity of the remote request queue.
pub const DEFAULT_REQUEST_QUEUE_CAPACITY: usize = 32;

pub const DEFAULT_INSTALLER_BIN: &str =
    "/opt/datadog-packages/datadog-installer/stable/bin/installer/installer";

/// Version of this daemon, compared against `expected_state.installer_version`.
pub const DEFAULT_INSTALLER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Start the remote config transport
    pub remote_updates: bool,

    pub gc_interval_secs: u64,

    pub request_queue_capacity: usize,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer_bin: Option<PathBuf>,

    pub precondition: PreconditionMode,

    pub apm: ApmConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            remote_updates: false,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            request_queue_capacity: DEFAULT_REQUEST_QUEUE_CAPACITY,
            installer_version: None,
            installer_bin: None,
            precondition: PreconditionMode::default(),
            apm: ApmConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn installer_version(&self) -> &str {
        self.installer_version
            .as_deref()
            .unwrap_or(DEFAULT_INSTALLER_VERSION)
    }

    pub fn installer_bin(&self) -> PathBuf {
        self.installer_bin
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_INSTALLER_BIN))
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gc_interval_secs == 0 {
            anyhow::bail!("gc_interval_secs must be greater than 0");
        }
        if self.request_queue_capacity == 0 {
            anyhow::bail!("request_queue_capacity must be greater than 0");
        }
        if let Some(version) = &self.installer_version
            && version.trim().is_empty()
        {
            anyhow::bail!("installer_version cannot be empty");
        }
        Ok(())
    }

    /// Apply `FLEET_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> anyhow::Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides using `lookup` to read variables.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FLEET_REMOTE_UPDATES") {
            self.remote_updates = match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                other => anyhow::bail!("Invalid FLEET_REMOTE_UPDATES value: '{}'", other),
            };
        }
        Ok(())
    }
}

/// Paths inspected by the APM injection status check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApmConfig {
    pub ld_preload_path: PathBuf,
    pub docker_daemon_config_path: PathBuf,
}

impl Default for ApmConfig {
    fn default() -> Self {
        Self {
            ld_preload_path: PathBuf::from("/etc/ld.so.preload"),
            docker_daemon_config_path: PathBuf::from("/etc/docker/daemon.json"),
        }
    }
}
