//! Host watcher.
//!
//! Feeds Host change notifications into the work queue. Deletions are queued
//! too: the reconcile that follows finds the Host gone and forgets the key.
//!
//! Updates that leave `metadata.generation` and the deletion timestamp alone
//! are dropped: they are the controller's own status and finalizer writes
//! echoed back, and must not cut a pending requeue delay short.

use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::store::{HostEvent, HostEventKind, HostKey, HostStore};
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Watches Host resources for changes.
pub struct HostWatcher {
    store: Arc<dyn HostStore>,
    queue: Arc<WorkQueue<HostKey>>,
}

impl std::fmt::Debug for HostWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostWatcher").finish_non_exhaustive()
    }
}

/// Last generation and deletion state forwarded per Host
#[derive(Debug, Default)]
struct SeenGenerations {
    seen: HashMap<HostKey, (i64, bool)>,
}

impl SeenGenerations {
    /// Whether `event` carries a change the reconciler has not been told about
    fn is_new(&mut self, event: &HostEvent) -> bool {
        match event.kind {
            HostEventKind::Deleted => {
                self.seen.remove(&event.key);
                true
            }
            HostEventKind::Applied => {
                let Some(generation) = event.generation else {
                    return true;
                };
                let current = (generation, event.deleting);
                self.seen.insert(event.key.clone(), current) != Some(current)
            }
        }
    }
}

impl HostWatcher {
    pub fn new(store: Arc<dyn HostStore>, queue: Arc<WorkQueue<HostKey>>) -> Self {
        Self { store, queue }
    }

    /// Forward events until the watch stream ends.
    ///
    /// The Kubernetes watch reconnects with backoff on its own, so reaching
    /// the end of the stream is an error.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("Starting Host watcher");
        let mut events = self.store.watch();
        let mut seen = SeenGenerations::default();

        while let Some(event) = events.next().await {
            match event {
                Ok(event) => {
                    if !seen.is_new(&event) {
                        debug!(host = %event.key, "Ignoring status-only change");
                        continue;
                    }
                    match event.kind {
                        HostEventKind::Applied => debug!(host = %event.key, "Host changed"),
                        HostEventKind::Deleted => debug!(host = %event.key, "Host deleted"),
                    }
                    self.queue.add(event.key);
                }
                Err(e) => warn!("Host watch error: {}", e),
            }
        }

        Err(ControllerError::Watch("Host watch stream ended".to_string()))
    }
}
