//! Background loop serializing GC and remote requests.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::DaemonInner;
use crate::remote::RemoteApiRequest;

pub(crate) async fn run(
    inner: Arc<DaemonInner>,
    mut requests: mpsc::Receiver<RemoteApiRequest>,
    shutdown: CancellationToken,
) {
    let mut gc = tokio::time::interval(inner.config.gc_interval());
    gc.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick completes immediately
    gc.tick().await;

    info!(
        gc_interval_secs = inner.config.gc_interval().as_secs(),
        "Daemon worker started"
    );

    loop {
        tokio::select! {
            _ = gc.tick() => {
                let _lock = inner.lock.lock().await;
                if let Err(e) = inner.installer.garbage_collect().await {
                    error!("Daemon: could not run GC: {}", e);
                }
            }
            _ = shutdown.cancelled() => break,
            request = requests.recv() => match request {
                Some(request) => process(&inner, request).await,
                None => {
                    debug!("Request queue closed and drained");
                    return;
                }
            },
        }
    }

    // The queue is closed before shutdown is signalled, so this ends once
    // every scheduled request has been handled.
    while let Some(request) = requests.recv().await {
        process(&inner, request).await;
    }
    debug!("Daemon worker stopped");
}

async fn process(inner: &DaemonInner, request: RemoteApiRequest) {
    let _pending = inner.queue.pending_guard();
    if let Err(e) = inner.handle_remote_request(request).await {
        error!("Daemon: could not handle remote request: {}", e);
    }
}
