//! Remote configuration contract
//!
//! A [`RemoteConfig`] transport delivers catalog updates and remote API
//! requests to the daemon through [`RemoteHooks`], and receives the package
//! state snapshots the daemon publishes.

pub mod local;
pub mod request;

use serde::{Deserialize, Serialize};

use crate::errors::DaemonError;

pub use crate::daemon::RemoteHooks;
pub use local::{LocalRemoteClient, LocalRemoteConfig};
pub use request::{ExpectedState, Method, PreconditionMode, RemoteApiRequest, VersionParams};

/// Lifecycle status of a remote request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Running,
    InvalidState,
    Done,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: u64,
    pub message: String,
}

impl From<&DaemonError> for TaskError {
    fn from(err: &DaemonError) -> Self {
        Self {
            code: err.code().as_u64(),
            message: err.to_string(),
        }
    }
}

/// The request currently being processed for a package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTask {
    pub id: String,
    pub state: TaskState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<TaskError>,
}

/// Published state of one installed package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageState {
    pub package: String,
    pub stable_version: String,
    pub experiment_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<PackageTask>,
}

pub trait RemoteConfig: Send + Sync {
    /// Start delivering catalog updates and requests to `hooks`.
    fn start(&self, hooks: RemoteHooks);

    /// Stop delivering. Hooks handed over by [`RemoteConfig::start`] are released.
    fn close(&self);

    /// Publish a full snapshot of package states.
    fn set_state(&self, packages: Vec<PackageState>);
}
