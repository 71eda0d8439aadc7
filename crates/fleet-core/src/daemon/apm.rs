//! APM injection status of the host.

use std::ffi::OsString;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApmConfig;
use crate::errors::{DaemonError, Result};

/// Path of the stable injector, as referenced by instrumented configs.
pub const INJECTOR_PATH: &str = "/opt/datadog-packages/datadog-apm-inject/stable/inject";

const DOCKER_BINARY: &str = "docker";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApmInjectionStatus {
    pub host_instrumented: bool,
    pub docker_installed: bool,
    pub docker_instrumented: bool,
}

/// Reads the files that tell whether the injector is active.
#[derive(Debug, Clone)]
pub struct ApmInjectionProbe {
    ld_preload_path: PathBuf,
    docker_config_path: PathBuf,
    search_path: Option<OsString>,
}

impl ApmInjectionProbe {
    pub fn new(ld_preload_path: PathBuf, docker_config_path: PathBuf) -> Self {
        Self {
            ld_preload_path,
            docker_config_path,
            search_path: None,
        }
    }

    pub fn from_config(config: &ApmConfig) -> Self {
        Self::new(
            config.ld_preload_path.clone(),
            config.docker_daemon_config_path.clone(),
        )
    }

    /// Directories searched for `docker` instead of `$PATH`.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }

    /// The ld.so.preload file must exist; a missing docker binary or docker
    /// config only stops the check early.
    pub fn status(&self) -> Result<ApmInjectionStatus> {
        let mut status = ApmInjectionStatus::default();

        let preload = std::fs::read(&self.ld_preload_path).map_err(|source| {
            DaemonError::ReadFile {
                path: self.ld_preload_path.clone(),
                source,
            }
        })?;
        status.host_instrumented = contains_injector(&preload);

        if !self.docker_installed()? {
            return Ok(status);
        }
        status.docker_installed = true;

        let docker_config = match std::fs::read(&self.docker_config_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(status),
            Err(source) => {
                return Err(DaemonError::ReadFile {
                    path: self.docker_config_path.clone(),
                    source,
                });
            }
        };
        status.docker_instrumented = contains_injector(&docker_config);

        Ok(status)
    }

    fn docker_installed(&self) -> Result<bool> {
        let search_path = self
            .search_path
            .clone()
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        match which::which_in(DOCKER_BINARY, Some(search_path), cwd) {
            Ok(path) => {
                debug!(path = %path.display(), "Found docker");
                Ok(true)
            }
            Err(which::Error::CannotFindBinaryPath) => Ok(false),
            Err(source) => Err(DaemonError::Lookup {
                binary: DOCKER_BINARY,
                source,
            }),
        }
    }
}

impl Default for ApmInjectionProbe {
    fn default() -> Self {
        Self::from_config(&ApmConfig::default())
    }
}

fn contains_injector(content: &[u8]) -> bool {
    memchr::memmem::find(content, INJECTOR_PATH.as_bytes()).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_injector() {
        assert!(contains_injector(
            b"/opt/datadog-packages/datadog-apm-inject/stable/inject/launcher.preload.so\n"
        ));
        assert!(!contains_injector(b"/usr/lib/libfoo.so\n"));
        assert!(!contains_injector(b""));
    }

    #[test]
    fn test_contains_injector_at_end_of_large_file() {
        let mut content = vec![b'#'; 1 << 20];
        content.extend_from_slice(INJECTOR_PATH.as_bytes());
        assert!(contains_injector(&content));
        assert!(!contains_injector(&content[..content.len() - 1]));
    }

    #[test]
    fn test_docker_lookup_skips_missing_dirs() {
        let temp = tempfile::TempDir::new().unwrap();
        let search_path =
            std::env::join_paths([temp.path().join("missing"), temp.path().to_path_buf()])
                .unwrap();
        let probe = ApmInjectionProbe::new(temp.path().join("preload"), temp.path().join("d.json"))
            .with_search_path(search_path);
        assert!(!probe.docker_installed().unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_docker_lookup_finds_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::TempDir::new().unwrap();
        let docker = temp.path().join("docker");
        std::fs::write(&docker, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&docker, std::fs::Permissions::from_mode(0o755)).unwrap();

        let probe = ApmInjectionProbe::new(temp.path().join("preload"), temp.path().join("d.json"))
            .with_search_path(temp.path());
        assert!(probe.docker_installed().unwrap());
    }
}
