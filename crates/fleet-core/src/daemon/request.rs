//! Request-scoped task state.

use crate::errors::DaemonError;
use crate::remote::{PackageTask, RemoteApiRequest, TaskError, TaskState};

/// Status of the remote request being processed.
///
/// Starts as `RUNNING`, is completed exactly once, and is attached to the
/// matching package by every state refresh done while the request runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestState {
    package: String,
    id: String,
    state: TaskState,
    error: Option<TaskError>,
}

impl RequestState {
    pub fn new(request: &RemoteApiRequest) -> Self {
        Self {
            package: request.package.clone(),
            id: request.id.clone(),
            state: TaskState::Running,
            error: None,
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn mark_invalid(&mut self) {
        self.state = TaskState::InvalidState;
    }

    pub fn complete(&mut self, result: Result<(), &DaemonError>) {
        match result {
            Ok(()) => self.state = TaskState::Done,
            Err(err) => {
                self.state = TaskState::Error;
                self.error = Some(TaskError::from(err));
            }
        }
    }

    pub fn task(&self) -> PackageTask {
        PackageTask {
            id: self.id.clone(),
            state: self.state,
            error: self.error.clone(),
        }
    }
}
