//! In-process remote config transport.
//!
//! Used when the daemon runs in the foreground: catalogs and requests are fed
//! through a [`LocalRemoteClient`] instead of a network channel.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::watch;
use tracing::debug;

use crate::catalog::Catalog;
use crate::errors::{DaemonError, Result};
use crate::remote::{PackageState, RemoteApiRequest, RemoteConfig, RemoteHooks};

#[derive(Debug)]
struct Shared {
    hooks: Mutex<Option<RemoteHooks>>,
    state: watch::Sender<Vec<PackageState>>,
}

#[derive(Debug, Clone)]
pub struct LocalRemoteConfig {
    shared: Arc<Shared>,
}

impl LocalRemoteConfig {
    pub fn new() -> Self {
        let (state, _) = watch::channel(Vec::new());
        Self {
            shared: Arc::new(Shared {
                hooks: Mutex::new(None),
                state,
            }),
        }
    }

    /// Handle for pushing updates and reading published state.
    pub fn client(&self) -> LocalRemoteClient {
        LocalRemoteClient {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Default for LocalRemoteConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteConfig for LocalRemoteConfig {
    fn start(&self, hooks: RemoteHooks) {
        debug!("Local remote config started");
        *self
            .shared
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(hooks);
    }

    fn close(&self) {
        debug!("Local remote config closed");
        self.shared
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn set_state(&self, packages: Vec<PackageState>) {
        self.shared.state.send_replace(packages);
    }
}

#[derive(Debug, Clone)]
pub struct LocalRemoteClient {
    shared: Arc<Shared>,
}

impl LocalRemoteClient {
    fn hooks(&self) -> Result<RemoteHooks> {
        self.shared
            .hooks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(DaemonError::NotRunning)
    }

    pub async fn push_catalog(&self, catalog: Catalog) -> Result<()> {
        self.hooks()?.on_catalog_update(catalog).await
    }

    pub async fn push_request(&self, request: RemoteApiRequest) -> Result<()> {
        self.hooks()?.on_request(request).await
    }

    /// Last published snapshot.
    pub fn state(&self) -> Vec<PackageState> {
        self.shared.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Vec<PackageState>> {
        self.shared.state.subscribe()
    }
}
