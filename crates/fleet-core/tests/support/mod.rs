#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_core::catalog::{Catalog, Package, Platform};
use fleet_core::config::DaemonConfig;
use fleet_core::daemon::Daemon;
use fleet_core::errors::InstallerError;
use fleet_core::installer::{Installer, PackageVersions, SelfUpdater};
use fleet_core::remote::{
    ExpectedState, PackageState, RemoteApiRequest, RemoteConfig, RemoteHooks,
};

pub const ARCH: &str = "amd64";
pub const OS: &str = "linux";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Install(String, Vec<String>),
    InstallExperiment(String),
    SelfUpdate(String),
    RemoveExperiment(String),
    PromoteExperiment(String),
    State(String),
    States,
    GarbageCollect,
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Call::State(_) | Call::States)
    }
}

/// In-memory installer recording every call and detecting overlapping calls.
#[derive(Default)]
pub struct RecordingInstaller {
    states: Mutex<BTreeMap<String, PackageVersions>>,
    calls: Mutex<Vec<Call>>,
    failures: Mutex<HashMap<&'static str, InstallerError>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
    delay: Duration,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl RecordingInstaller {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_package(self, package: &str, stable: &str, experiment: &str) -> Self {
        self.states
            .lock()
            .unwrap()
            .insert(package.to_string(), PackageVersions::new(stable, experiment));
        self
    }

    /// Every call sleeps for `delay` while marked in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the named operation fail with `err`.
    pub fn fail(&self, op: &'static str, err: InstallerError) {
        self.failures.lock().unwrap().insert(op, err);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn versions(&self, package: &str) -> Option<PackageVersions> {
        self.states.lock().unwrap().get(package).cloned()
    }

    async fn begin(&self, op: &'static str, call: Call) -> Result<InFlight<'_>, InstallerError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        let guard = InFlight(&self.in_flight);
        self.calls.lock().unwrap().push(call);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.failures.lock().unwrap().get(op) {
            Some(err) => Err(err.clone()),
            None => Ok(guard),
        }
    }
}

/// `oci://registry.example/<package>:<version>` to (package, version)
fn parse_url(url: &str) -> Option<(String, String)> {
    let reference = url.rsplit('/').next()?;
    let (package, version) = reference.split_once(':')?;
    Some((package.to_string(), version.to_string()))
}

#[async_trait]
impl Installer for RecordingInstaller {
    async fn install(&self, url: &str, args: &[String]) -> Result<(), InstallerError> {
        let _op = self
            .begin("install", Call::Install(url.to_string(), args.to_vec()))
            .await?;
        if let Some((package, version)) = parse_url(url) {
            self.states
                .lock()
                .unwrap()
                .insert(package, PackageVersions::new(version, ""));
        }
        Ok(())
    }

    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError> {
        let _op = self
            .begin("install_experiment", Call::InstallExperiment(url.to_string()))
            .await?;
        if let Some((package, version)) = parse_url(url) {
            self.states
                .lock()
                .unwrap()
                .entry(package)
                .or_default()
                .experiment = version;
        }
        Ok(())
    }

    async fn remove_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self
            .begin("remove_experiment", Call::RemoveExperiment(package.to_string()))
            .await?;
        if let Some(state) = self.states.lock().unwrap().get_mut(package) {
            state.experiment.clear();
        }
        Ok(())
    }

    async fn promote_experiment(&self, package: &str) -> Result<(), InstallerError> {
        let _op = self
            .begin("promote_experiment", Call::PromoteExperiment(package.to_string()))
            .await?;
        if let Some(state) = self.states.lock().unwrap().get_mut(package) {
            state.stable = std::mem::take(&mut state.experiment);
        }
        Ok(())
    }

    async fn state(&self, package: &str) -> Result<PackageVersions, InstallerError> {
        let _op = self.begin("state", Call::State(package.to_string())).await?;
        Ok(self.versions(package).unwrap_or_default())
    }

    async fn states(&self) -> Result<BTreeMap<String, PackageVersions>, InstallerError> {
        let _op = self.begin("states", Call::States).await?;
        Ok(self.states.lock().unwrap().clone())
    }

    async fn garbage_collect(&self) -> Result<(), InstallerError> {
        let _op = self.begin("garbage_collect", Call::GarbageCollect).await?;
        Ok(())
    }
}

#[async_trait]
impl SelfUpdater for RecordingInstaller {
    async fn install_experiment(&self, url: &str) -> Result<(), InstallerError> {
        let _op = self
            .begin("self_update", Call::SelfUpdate(url.to_string()))
            .await?;
        Ok(())
    }
}

/// Remote config transport keeping every published snapshot.
#[derive(Default)]
pub struct RecordingRemote {
    hooks: Mutex<Option<RemoteHooks>>,
    snapshots: Mutex<Vec<Vec<PackageState>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl RecordingRemote {
    /// Hooks received on start. Still returned after close.
    pub fn hooks(&self) -> RemoteHooks {
        self.hooks
            .lock()
            .unwrap()
            .clone()
            .expect("remote config was not started")
    }

    pub fn snapshots(&self) -> Vec<Vec<PackageState>> {
        self.snapshots.lock().unwrap().clone()
    }

    pub fn last(&self) -> Vec<PackageState> {
        self.snapshots().last().cloned().unwrap_or_default()
    }

    pub fn last_for(&self, package: &str) -> Option<PackageState> {
        self.last().into_iter().find(|p| p.package == package)
    }

    pub fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl RemoteConfig for RecordingRemote {
    fn start(&self, hooks: RemoteHooks) {
        self.started.store(true, Ordering::SeqCst);
        *self.hooks.lock().unwrap() = Some(hooks);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn set_state(&self, packages: Vec<PackageState>) {
        self.snapshots.lock().unwrap().push(packages);
    }
}

pub struct Harness {
    pub daemon: Daemon,
    pub installer: Arc<RecordingInstaller>,
    pub remote: Arc<RecordingRemote>,
}

pub fn test_config() -> DaemonConfig {
    DaemonConfig {
        remote_updates: true,
        installer_version: Some("7.50.0".to_string()),
        ..DaemonConfig::default()
    }
}

pub fn harness(installer: RecordingInstaller) -> Harness {
    harness_with_config(installer, test_config())
}

pub fn harness_with_config(installer: RecordingInstaller, config: DaemonConfig) -> Harness {
    let installer = Arc::new(installer);
    let remote = Arc::new(RecordingRemote::default());
    let daemon = Daemon::builder(installer.clone(), installer.clone(), remote.clone())
        .config(config)
        .platform(Platform::new(ARCH, OS))
        .build();
    Harness {
        daemon,
        installer,
        remote,
    }
}

pub fn package_url(name: &str, version: &str) -> String {
    format!("oci://registry.example/{}:{}", name, version)
}

pub fn package(name: &str, version: &str) -> Package {
    Package {
        name: name.to_string(),
        version: version.to_string(),
        url: package_url(name, version).parse().unwrap(),
        sha256: String::new(),
        size: 0,
        platform: OS.to_string(),
        arch: ARCH.to_string(),
    }
}

pub fn catalog(entries: &[(&str, &str)]) -> Catalog {
    Catalog::new(
        entries
            .iter()
            .map(|(name, version)| package(name, version))
            .collect(),
    )
}

pub fn request(
    id: &str,
    package: &str,
    method: &str,
    params: serde_json::Value,
    stable: &str,
    experiment: &str,
) -> RemoteApiRequest {
    RemoteApiRequest {
        id: id.to_string(),
        package: package.to_string(),
        trace_id: "1234".to_string(),
        parent_span_id: "5678".to_string(),
        expected_state: ExpectedState {
            installer_version: String::new(),
            stable: stable.to_string(),
            experiment: experiment.to_string(),
        },
        method: method.to_string(),
        params,
    }
}
