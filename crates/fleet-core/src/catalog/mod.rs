//! Package catalog
//!
//! The catalog maps (package, version, arch, os) to a download location. It is
//! pushed by remote config and always replaced as a whole.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;

/// A downloadable package for one platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(rename = "package")]
    pub name: String,
    pub version: String,
    pub url: Url,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub size: u64,
    /// Operating system, empty when the package is platform independent.
    #[serde(default)]
    pub platform: String,
    /// CPU architecture, empty when the package is architecture independent.
    #[serde(default)]
    pub arch: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub packages: Vec<Package>,
}

impl Catalog {
    pub fn new(packages: Vec<Package>) -> Self {
        Self { packages }
    }

    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json).context("Failed to parse catalog")
    }

    pub fn from_slice(bytes: &[u8]) -> anyhow::Result<Self> {
        serde_json::from_slice(bytes).context("Failed to parse catalog")
    }

    /// Find the package matching name and version for the given platform.
    ///
    /// Entries with an empty arch or platform match any value.
    pub fn get_package(&self, name: &str, version: &str, arch: &str, os: &str) -> Option<&Package> {
        self.packages.iter().find(|p| {
            p.name == name
                && p.version == version
                && (p.arch.is_empty() || p.arch == arch)
                && (p.platform.is_empty() || p.platform == os)
        })
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }
}

/// Platform identifiers in the catalog naming convention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub arch: String,
    pub os: String,
}

impl Platform {
    pub fn new(arch: impl Into<String>, os: impl Into<String>) -> Self {
        Self {
            arch: arch.into(),
            os: os.into(),
        }
    }

    /// The platform this process runs on.
    pub fn current() -> Self {
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            other => other,
        };
        Self::new(arch, std::env::consts::OS)
    }
}

impl Default for Platform {
    fn default() -> Self {
        Self::current()
    }
}
