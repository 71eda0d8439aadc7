//! Remote API requests and their preconditions.

use serde::{Deserialize, Serialize};

use crate::installer::PackageVersions;

/// State the issuer of a request believes the package is in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedState {
    /// Version of the installer expected to run the request. Empty matches any.
    #[serde(default)]
    pub installer_version: String,
    #[serde(default)]
    pub stable: String,
    #[serde(default)]
    pub experiment: String,
}

/// How the expected state is compared with the installed state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreconditionMode {
    /// The request is rejected when
    /// `(installer_version_ok && stable differs) || experiment differs`.
    ///
    /// An installer version mismatch alone therefore never rejects a request,
    /// and it also hides a stable version mismatch.
    #[default]
    Legacy,
    /// Every field must match.
    Strict,
}

impl ExpectedState {
    /// Whether a request with this expectation may run against `actual`.
    pub fn matches(
        &self,
        actual: &PackageVersions,
        installer_version: &str,
        mode: PreconditionMode,
    ) -> bool {
        let version_ok =
            self.installer_version.is_empty() || self.installer_version == installer_version;
        let stable_differs = actual.stable != self.stable;
        let experiment_differs = actual.experiment != self.experiment;

        let mismatch = match mode {
            PreconditionMode::Legacy => (version_ok && stable_differs) || experiment_differs,
            PreconditionMode::Strict => !version_ok || stable_differs || experiment_differs,
        };
        !mismatch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    StartExperiment,
    StopExperiment,
    PromoteExperiment,
}

impl Method {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "start_experiment" => Some(Method::StartExperiment),
            "stop_experiment" => Some(Method::StopExperiment),
            "promote_experiment" => Some(Method::PromoteExperiment),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Method::StartExperiment => "start_experiment",
            Method::StopExperiment => "stop_experiment",
            Method::PromoteExperiment => "promote_experiment",
        }
    }
}

/// Params of `start_experiment`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionParams {
    pub version: String,
}

/// A command delivered by remote config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteApiRequest {
    pub id: String,
    #[serde(rename = "package_name")]
    pub package: String,
    #[serde(default)]
    pub trace_id: String,
    #[serde(default, rename = "span_id")]
    pub parent_span_id: String,
    #[serde(default)]
    pub expected_state: ExpectedState,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}
