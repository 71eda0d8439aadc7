//! Bounded queue of remote requests with an outstanding-request counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;

use crate::errors::{DaemonError, Result};
use crate::remote::RemoteApiRequest;

#[derive(Debug)]
pub(crate) struct RequestQueue {
    sender: Mutex<Option<mpsc::Sender<RemoteApiRequest>>>,
    receiver: Mutex<Option<mpsc::Receiver<RemoteApiRequest>>>,
    pending: Arc<AtomicUsize>,
}

impl RequestQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        Self {
            sender: Mutex::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            pending: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Enqueue a request, waiting for room when the queue is full.
    ///
    /// The request is counted only once a slot is reserved, and counting and
    /// sending happen without an await in between. Dropping the returned
    /// future while it waits leaves the counter untouched.
    pub(crate) async fn schedule(&self, request: RemoteApiRequest) -> Result<()> {
        let sender = self
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .ok_or(DaemonError::QueueClosed)?
            .clone();

        let permit = sender
            .reserve()
            .await
            .map_err(|_| DaemonError::QueueClosed)?;
        self.pending.fetch_add(1, Ordering::SeqCst);
        permit.send(request);
        Ok(())
    }

    /// Refuse new requests. Already scheduled ones stay in the channel.
    pub(crate) fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// Hand the receiving side to the worker. Only succeeds once.
    pub(crate) fn take_receiver(&self) -> Option<mpsc::Receiver<RemoteApiRequest>> {
        self.receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Marks one request as done when dropped.
    pub(crate) fn pending_guard(&self) -> PendingGuard {
        PendingGuard {
            pending: Arc::clone(&self.pending),
        }
    }
}

pub(crate) struct PendingGuard {
    pending: Arc<AtomicUsize>,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }
}
