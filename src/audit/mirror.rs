//! Remote Audit Mirror
//!
//! Best-effort forwarding of audit entries to a remote collector. Entries are
//! queued without blocking; a single background task POSTs each one exactly
//! once. Delivery failures are logged and dropped.

use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::audit::entry::AuditEntry;

/// Delivery counters, readable while the mirror runs.
#[derive(Debug, Default)]
pub struct MirrorStats {
    pub delivered: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

pub struct RemoteMirror {
    endpoint: String,
    sender: Mutex<Option<mpsc::Sender<AuditEntry>>>,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    stats: Arc<MirrorStats>,
}

impl RemoteMirror {
    /// Spawn the delivery task on the current Tokio runtime.
    ///
    /// Returns `None` when called outside a runtime.
    pub fn spawn(endpoint: String, queue_size: usize, timeout: Duration) -> Option<Self> {
        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("No async runtime available, remote audit mirroring disabled");
                return None;
            }
        };

        let client = match Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build HTTP client, remote audit mirroring disabled: {}", e);
                return None;
            }
        };

        let (sender, receiver) = mpsc::channel(queue_size.max(1));
        let stats = Arc::new(MirrorStats::default());
        let worker = handle.spawn(deliver(client, endpoint.clone(), receiver, stats.clone()));

        Some(Self {
            endpoint,
            sender: Mutex::new(Some(sender)),
            worker: tokio::sync::Mutex::new(Some(worker)),
            stats,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn stats(&self) -> &MirrorStats {
        &self.stats
    }

    /// Queue `entry` for delivery. Never blocks and never fails the caller.
    pub fn enqueue(&self, entry: &AuditEntry) {
        let guard = self.sender.lock().unwrap_or_else(|p| p.into_inner());
        let Some(sender) = guard.as_ref() else {
            debug!("Remote mirror closed, not forwarding {}", entry.summary());
            return;
        };

        match sender.try_send(entry.clone()) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Remote audit queue full, dropping {}", entry.summary());
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Remote audit task stopped, dropping {}", entry.summary());
            }
        }
    }

    /// Stop accepting entries and wait up to `grace` for queued ones to be sent.
    pub async fn close(&self, grace: Duration) {
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();

        if let Some(worker) = self.worker.lock().await.take() {
            if tokio::time::timeout(grace, worker).await.is_err() {
                warn!("Remote audit mirror did not drain within {:?}", grace);
            }
        }
    }
}

async fn deliver(
    client: Client,
    endpoint: String,
    mut receiver: mpsc::Receiver<AuditEntry>,
    stats: Arc<MirrorStats>,
) {
    while let Some(entry) = receiver.recv().await {
        match client.post(&endpoint).json(&entry).send().await {
            Ok(response) if response.status().is_success() => {
                stats.delivered.fetch_add(1, Ordering::Relaxed);
                debug!("Mirrored {} to {}", entry.summary(), endpoint);
            }
            Ok(response) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    "Remote collector rejected {}: HTTP {}",
                    entry.summary(),
                    response.status()
                );
            }
            Err(e) => {
                stats.failed.fetch_add(1, Ordering::Relaxed);
                warn!("Failed to sync audit entry {}: {}", entry.summary(), e);
            }
        }
    }
    debug!("Remote audit mirror for {} stopped", endpoint);
}
