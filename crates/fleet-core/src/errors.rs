//! Error types for the fleet daemon.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DaemonError>;

/// Numeric error codes reported upstream with a failed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u64", from = "u64")]
pub enum ErrorCode {
    Unknown,
    DownloadFailed,
    NotEnoughDiskSpace,
    PackageNotFound,
    FilesystemIssue,
}

impl ErrorCode {
    pub fn as_u64(self) -> u64 {
        match self {
            ErrorCode::Unknown => 0,
            ErrorCode::DownloadFailed => 1,
            ErrorCode::NotEnoughDiskSpace => 2,
            ErrorCode::PackageNotFound => 3,
            ErrorCode::FilesystemIssue => 4,
        }
    }
}

impl From<u64> for ErrorCode {
    fn from(code: u64) -> Self {
        match code {
            1 => ErrorCode::DownloadFailed,
            2 => ErrorCode::NotEnoughDiskSpace,
            3 => ErrorCode::PackageNotFound,
            4 => ErrorCode::FilesystemIssue,
            _ => ErrorCode::Unknown,
        }
    }
}

impl From<ErrorCode> for u64 {
    fn from(code: ErrorCode) -> Self {
        code.as_u64()
    }
}

/// Failure reported by the package installer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct InstallerError {
    code: ErrorCode,
    message: String,
}

impl InstallerError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unknown, message)
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("could not {op}: {source}")]
    Operation {
        op: &'static str,
        #[source]
        source: InstallerError,
    },

    #[error("could not get package {package}, {version} for {arch}, {os}")]
    PackageNotFound {
        package: String,
        version: String,
        arch: String,
        os: String,
    },

    #[error("could not unmarshal {method} params: {source}")]
    InvalidParams {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("unknown method: {0}")]
    UnknownMethod(String),

    #[error("could not read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not look up {binary}: {source}")]
    Lookup {
        binary: &'static str,
        #[source]
        source: which::Error,
    },

    #[error("remote request queue is closed")]
    QueueClosed,

    #[error("daemon is already started")]
    AlreadyStarted,

    #[error("daemon is not running")]
    NotRunning,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DaemonError {
    pub(crate) fn operation(op: &'static str, source: InstallerError) -> Self {
        DaemonError::Operation { op, source }
    }

    /// Returns the installer error at the root of this failure, if any.
    pub fn installer_error(&self) -> Option<&InstallerError> {
        let mut current: Option<&(dyn std::error::Error + 'static)> = Some(self);
        while let Some(err) = current {
            if let Some(installer) = err.downcast_ref::<InstallerError>() {
                return Some(installer);
            }
            current = err.source();
        }
        None
    }

    /// Error code reported upstream for this failure.
    pub fn code(&self) -> ErrorCode {
        self.installer_error()
            .map(InstallerError::code)
            .unwrap_or(ErrorCode::Unknown)
    }
}
