//! Fleet Core Library
//!
//! Provides the fleet daemon: remote experiment lifecycle management for
//! installed packages, serialized against garbage collection and state
//! queries, with state reporting to remote config.

pub mod catalog;
pub mod config;
pub mod daemon;
pub mod errors;
pub mod installer;
pub mod remote;

/// Re-exports of commonly used types
pub mod prelude {
    // Configuration
    pub use crate::config::{ApmConfig, ConfigStore, DaemonConfig};

    // Daemon
    pub use crate::daemon::{ApmInjectionStatus, Daemon, DaemonBuilder};
    pub use crate::errors::{DaemonError, ErrorCode, InstallerError};

    // Catalog
    pub use crate::catalog::{Catalog, Package, Platform};

    // Installer
    pub use crate::installer::{ExecInstaller, Installer, PackageVersions, SelfUpdater};

    // Remote config
    pub use crate::remote::{
        LocalRemoteConfig, PackageState, PackageTask, PreconditionMode, RemoteApiRequest,
        RemoteConfig, RemoteHooks, TaskState,
    };
}
