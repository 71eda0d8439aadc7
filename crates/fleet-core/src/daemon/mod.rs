//! Fleet daemon
//!
//! The daemon executes package lifecycle operations requested either directly
//! (CLI, local API) or by remote config. Every operation that touches the
//! installer or the catalog runs under one lock, so installs, experiments,
//! garbage collection, state refreshes and catalog swaps are totally ordered.
//!
//! Remote requests go through a bounded queue drained by a single worker task,
//! which also runs garbage collection on a fixed interval. Each operation
//! publishes a state snapshot before it starts and after it ends, whatever the
//! outcome.

pub mod apm;
pub(crate) mod queue;
pub mod request;
pub mod trace;
pub(crate) mod worker;

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tokio::sync::MutexGuard;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::catalog::{Catalog, Package, Platform};
use crate::config::DaemonConfig;
use crate::errors::{DaemonError, Result};
use crate::installer::{INSTALLER_PACKAGE, Installer, PackageVersions, SelfUpdater};
use crate::remote::{Method, PackageState, RemoteApiRequest, RemoteConfig, VersionParams};

pub use apm::{ApmInjectionProbe, ApmInjectionStatus};
pub use request::RequestState;
pub use trace::TraceContext;

use queue::RequestQueue;

/// Proof that the daemon lock is held. Derefs to the current catalog.
type Locked<'a> = MutexGuard<'a, Catalog>;

/// Outcome of a remote request that did not fail.
enum Dispatch {
    Executed,
    Rejected,
}

pub(crate) struct DaemonInner {
    lock: tokio::sync::Mutex<Catalog>,
    installer: Arc<dyn Installer>,
    self_updater: Arc<dyn SelfUpdater>,
    remote: Arc<dyn RemoteConfig>,
    config: DaemonConfig,
    platform: Platform,
    apm: ApmInjectionProbe,
    queue: RequestQueue,
    shutdown: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a fleet daemon. Clones share the same daemon.
#[derive(Clone)]
pub struct Daemon {
    inner: Arc<DaemonInner>,
}

pub struct DaemonBuilder {
    installer: Arc<dyn Installer>,
    self_updater: Arc<dyn SelfUpdater>,
    remote: Arc<dyn RemoteConfig>,
    config: DaemonConfig,
    platform: Platform,
    apm: Option<ApmInjectionProbe>,
}

impl DaemonBuilder {
    pub fn new(
        installer: Arc<dyn Installer>,
        self_updater: Arc<dyn SelfUpdater>,
        remote: Arc<dyn RemoteConfig>,
    ) -> Self {
        Self {
            installer,
            self_updater,
            remote,
            config: DaemonConfig::default(),
            platform: Platform::current(),
            apm: None,
        }
    }

    pub fn config(mut self, config: DaemonConfig) -> Self {
        self.config = config;
        self
    }

    /// Platform used for catalog lookups. Defaults to the running one.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Defaults to a probe built from the `[apm]` config section.
    pub fn apm_probe(mut self, probe: ApmInjectionProbe) -> Self {
        self.apm = Some(probe);
        self
    }

    pub fn build(self) -> Daemon {
        let apm = self
            .apm
            .unwrap_or_else(|| ApmInjectionProbe::from_config(&self.config.apm));
        Daemon {
            inner: Arc::new(DaemonInner {
                lock: tokio::sync::Mutex::new(Catalog::default()),
                installer: self.installer,
                self_updater: self.self_updater,
                remote: self.remote,
                queue: RequestQueue::new(self.config.request_queue_capacity),
                config: self.config,
                platform: self.platform,
                apm,
                shutdown: CancellationToken::new(),
                worker: Mutex::new(None),
            }),
        }
    }
}

impl Daemon {
    pub fn builder(
        installer: Arc<dyn Installer>,
        self_updater: Arc<dyn SelfUpdater>,
        remote: Arc<dyn RemoteConfig>,
    ) -> DaemonBuilder {
        DaemonBuilder::new(installer, self_updater, remote)
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.inner.config
    }

    /// Publish the initial state, spawn the worker and, when remote updates
    /// are enabled, start the remote config transport.
    ///
    /// A daemon can only be started once.
    pub async fn start(&self) -> Result<()> {
        let receiver = self
            .inner
            .queue
            .take_receiver()
            .ok_or(DaemonError::AlreadyStarted)?;

        {
            let _lock = self.inner.lock.lock().await;
            self.inner.refresh_state(None).await;
        }

        let handle = tokio::spawn(worker::run(
            Arc::clone(&self.inner),
            receiver,
            self.inner.shutdown.clone(),
        ));
        *self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);

        if !self.inner.config.remote_updates {
            info!("Daemon: Remote updates are disabled");
            return Ok(());
        }
        self.inner.remote.start(RemoteHooks {
            inner: Arc::downgrade(&self.inner),
        });
        info!("Daemon: Remote updates are enabled");
        Ok(())
    }

    /// Stop accepting remote requests and wait until every scheduled request
    /// has been processed and the worker has exited.
    pub async fn stop(&self) -> Result<()> {
        let handle = self
            .inner
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(DaemonError::NotRunning)?;

        self.inner.remote.close();
        self.inner.queue.close();
        self.inner.shutdown.cancel();

        handle
            .await
            .map_err(|e| DaemonError::Internal(format!("daemon worker failed: {}", e)))?;
        let pending = self.inner.queue.pending();
        if pending != 0 {
            warn!(pending, "Daemon stopped with unprocessed remote requests");
        }
        info!("Daemon stopped");
        Ok(())
    }

    /// Remote requests scheduled but not yet fully processed.
    pub fn pending_requests(&self) -> usize {
        self.inner.queue.pending()
    }

    pub async fn install(&self, url: &str, args: &[String]) -> Result<()> {
        let lock = self.inner.lock.lock().await;
        self.inner.install(&lock, None, url, args).await
    }

    pub async fn start_experiment(&self, url: &str) -> Result<()> {
        let lock = self.inner.lock.lock().await;
        self.inner.start_experiment(&lock, None, url).await
    }

    pub async fn stop_experiment(&self, package: &str) -> Result<()> {
        let lock = self.inner.lock.lock().await;
        self.inner.stop_experiment(&lock, None, package).await
    }

    pub async fn promote_experiment(&self, package: &str) -> Result<()> {
        let lock = self.inner.lock.lock().await;
        self.inner.promote_experiment(&lock, None, package).await
    }

    pub async fn get_state(&self) -> Result<BTreeMap<String, PackageVersions>> {
        let _lock = self.inner.lock.lock().await;
        self.inner
            .installer
            .states()
            .await
            .map_err(|e| DaemonError::operation("get installer states", e))
    }

    /// Catalog entry for `package` at `version` on this daemon's platform.
    pub async fn get_package(&self, package: &str, version: &str) -> Result<Package> {
        let lock = self.inner.lock.lock().await;
        self.inner
            .find_package(&lock, package, version)
            .cloned()
    }

    pub async fn get_apm_injection_status(&self) -> Result<ApmInjectionStatus> {
        let _lock = self.inner.lock.lock().await;
        self.inner.apm.status()
    }

    /// Replace the catalog as a whole.
    pub async fn update_catalog(&self, catalog: Catalog) {
        self.inner.update_catalog(catalog).await;
    }
}

impl DaemonInner {
    async fn update_catalog(&self, catalog: Catalog) {
        let mut lock = self.lock.lock().await;
        info!(packages = catalog.len(), "Daemon: Received catalog update");
        *lock = catalog;
    }

    fn find_package<'a>(
        &self,
        lock: &'a Locked<'_>,
        package: &str,
        version: &str,
    ) -> Result<&'a Package> {
        lock.get_package(package, version, &self.platform.arch, &self.platform.os)
            .ok_or_else(|| DaemonError::PackageNotFound {
                package: package.to_string(),
                version: version.to_string(),
                arch: self.platform.arch.clone(),
                os: self.platform.os.clone(),
            })
    }

    /// Run `op` between two state refreshes. The second refresh happens on
    /// every exit path of `op`.
    async fn refreshed<F>(&self, request: Option<&RequestState>, op: F) -> Result<()>
    where
        F: Future<Output = Result<()>>,
    {
        self.refresh_state(request).await;
        let result = op.await;
        if let Err(e) = &result {
            debug!("operation failed: {}", e);
        }
        self.refresh_state(request).await;
        result
    }

    async fn install(
        &self,
        _lock: &Locked<'_>,
        request: Option<&RequestState>,
        url: &str,
        args: &[String],
    ) -> Result<()> {
        self.refreshed(request, async {
            info!("Daemon: Installing package from {}", url);
            self.installer
                .install(url, args)
                .await
                .map_err(|e| DaemonError::operation("install", e))?;
            info!("Daemon: Successfully installed package from {}", url);
            Ok(())
        })
        .instrument(info_span!("install", url = %url))
        .await
    }

    async fn start_experiment(
        &self,
        _lock: &Locked<'_>,
        request: Option<&RequestState>,
        url: &str,
    ) -> Result<()> {
        self.refreshed(request, async {
            info!("Daemon: Starting experiment for package from {}", url);
            self.installer
                .install_experiment(url)
                .await
                .map_err(|e| DaemonError::operation("install experiment", e))?;
            info!("Daemon: Successfully started experiment for package from {}", url);
            Ok(())
        })
        .instrument(info_span!("start_experiment", url = %url))
        .await
    }

    async fn start_installer_experiment(
        &self,
        _lock: &Locked<'_>,
        request: Option<&RequestState>,
        url: &str,
    ) -> Result<()> {
        self.refreshed(request, async {
            info!("Daemon: Starting installer experiment for package from {}", url);
            self.self_updater
                .install_experiment(url)
                .await
                .map_err(|e| DaemonError::operation("install installer experiment", e))?;
            info!(
                "Daemon: Successfully started installer experiment for package from {}",
                url
            );
            Ok(())
        })
        .instrument(info_span!("start_installer_experiment", url = %url))
        .await
    }

    async fn stop_experiment(
        &self,
        _lock: &Locked<'_>,
        request: Option<&RequestState>,
        package: &str,
    ) -> Result<()> {
        self.refreshed(request, async {
            info!("Daemon: Stopping experiment for package {}", package);
            self.installer
                .remove_experiment(package)
                .await
                .map_err(|e| DaemonError::operation("stop experiment", e))?;
            info!("Daemon: Successfully stopped experiment for package {}", package);
            Ok(())
        })
        .instrument(info_span!("stop_experiment", package = %package))
        .await
    }

    async fn promote_experiment(
        &self,
        _lock: &Locked<'_>,
        request: Option<&RequestState>,
        package: &str,
    ) -> Result<()> {
        self.refreshed(request, async {
            info!("Daemon: Promoting experiment for package {}", package);
            self.installer
                .promote_experiment(package)
                .await
                .map_err(|e| DaemonError::operation("promote experiment", e))?;
            info!("Daemon: Successfully promoted experiment for package {}", package);
            Ok(())
        })
        .instrument(info_span!("promote_experiment", package = %package))
        .await
    }

    pub(crate) async fn handle_remote_request(&self, request: RemoteApiRequest) -> Result<()> {
        let lock = self.lock.lock().await;
        let span = TraceContext::for_request(&request).span(&request);

        async {
            let mut request_state = RequestState::new(&request);
            self.refresh_state(Some(&request_state)).await;

            let result = self.dispatch(&lock, &request, &mut request_state).await;
            match &result {
                Ok(Dispatch::Executed) => request_state.complete(Ok(())),
                Ok(Dispatch::Rejected) => {}
                Err(e) => request_state.complete(Err(e)),
            }

            self.refresh_state(Some(&request_state)).await;
            result.map(drop)
        }
        .instrument(span)
        .await
    }

    async fn dispatch(
        &self,
        lock: &Locked<'_>,
        request: &RemoteApiRequest,
        request_state: &mut RequestState,
    ) -> Result<Dispatch> {
        let current = self
            .installer
            .state(&request.package)
            .await
            .map_err(|e| DaemonError::operation("get installer state", e))?;

        if !request.expected_state.matches(
            &current,
            self.config.installer_version(),
            self.config.precondition,
        ) {
            info!(
                "remote request {} not executed as state does not match: expected {:?}, got {:?}",
                request.id, request.expected_state, current
            );
            request_state.mark_invalid();
            self.refresh_state(Some(&*request_state)).await;
            return Ok(Dispatch::Rejected);
        }

        let request_state = Some(&*request_state);
        match Method::parse(&request.method) {
            Some(Method::StartExperiment) => {
                let params: VersionParams = serde_json::from_value(request.params.clone())
                    .map_err(|source| DaemonError::InvalidParams {
                        method: request.method.clone(),
                        source,
                    })?;
                let url = self
                    .find_package(lock, &request.package, &params.version)?
                    .url
                    .to_string();
                info!(
                    "Daemon: Received remote request {} to start experiment for package {} version {}",
                    request.id, request.package, params.version
                );
                if request.package == INSTALLER_PACKAGE {
                    self.start_installer_experiment(lock, request_state, &url)
                        .await?;
                } else {
                    self.start_experiment(lock, request_state, &url).await?;
                }
            }
            Some(Method::StopExperiment) => {
                info!(
                    "Daemon: Received remote request {} to stop experiment for package {}",
                    request.id, request.package
                );
                self.stop_experiment(lock, request_state, &request.package)
                    .await?;
            }
            Some(Method::PromoteExperiment) => {
                info!(
                    "Daemon: Received remote request {} to promote experiment for package {}",
                    request.id, request.package
                );
                self.promote_experiment(lock, request_state, &request.package)
                    .await?;
            }
            None => return Err(DaemonError::UnknownMethod(request.method.clone())),
        }
        Ok(Dispatch::Executed)
    }

    /// Publish installer state, tagging the package of `request` with its
    /// task. Best effort: failures are logged and nothing is published.
    async fn refresh_state(&self, request: Option<&RequestState>) {
        let states = match self.installer.states().await {
            Ok(states) => states,
            Err(e) => {
                error!("could not get installer state: {}", e);
                return;
            }
        };

        let packages = states
            .into_iter()
            .map(|(package, versions)| {
                let task = request
                    .filter(|r| r.package() == package)
                    .map(RequestState::task);
                PackageState {
                    package,
                    stable_version: versions.stable,
                    experiment_version: versions.experiment,
                    task,
                }
            })
            .collect();
        self.remote.set_state(packages);
    }
}

/// Callbacks handed to the remote config transport on start.
///
/// Holds a weak reference: once the daemon is dropped every hook fails with
/// [`DaemonError::NotRunning`].
#[derive(Debug, Clone)]
pub struct RemoteHooks {
    inner: Weak<DaemonInner>,
}

impl RemoteHooks {
    fn daemon(&self) -> Result<Arc<DaemonInner>> {
        self.inner.upgrade().ok_or(DaemonError::NotRunning)
    }

    pub async fn on_catalog_update(&self, catalog: Catalog) -> Result<()> {
        self.daemon()?.update_catalog(catalog).await;
        Ok(())
    }

    /// Schedule a request. Waits while the queue is full.
    pub async fn on_request(&self, request: RemoteApiRequest) -> Result<()> {
        let daemon = self.daemon()?;
        debug!(request_id = %request.id, "Scheduling remote request");
        daemon.queue.schedule(request).await
    }
}
