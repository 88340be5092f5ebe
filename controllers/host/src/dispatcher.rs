//! Event dispatch loop
//!
//! A fixed pool of workers drains the work queue. The queue guarantees a key
//! is held by at most one worker, so reconciles for the same Host never
//! overlap while distinct Hosts proceed in parallel. Each reconcile's action
//! decides when the key comes back.

use crate::backoff::ExponentialBackoff;
use crate::queue::WorkQueue;
use crate::reconciler::{ReconcileAction, Reconciler};
use crate::store::{HostKey, HostStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Backoff state for a Host
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: ExponentialBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            backoff: ExponentialBackoff::new(base, max),
            error_count: 0,
        }
    }
}

/// Tunables for the dispatch loop
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub workers: usize,
    pub reconcile_timeout: Duration,
    pub resync_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

/// Runs reconciles for queued Host keys
pub struct Dispatcher {
    reconciler: Arc<Reconciler>,
    store: Arc<dyn HostStore>,
    queue: Arc<WorkQueue<HostKey>>,
    /// Per-Host transient failure tracking
    backoff_states: Arc<Mutex<HashMap<HostKey, BackoffState>>>,
    settings: DispatcherSettings,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(
        reconciler: Arc<Reconciler>,
        store: Arc<dyn HostStore>,
        queue: Arc<WorkQueue<HostKey>>,
        settings: DispatcherSettings,
    ) -> Self {
        Self {
            reconciler,
            store,
            queue,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
            settings,
        }
    }

    /// Run workers and the resync ticker until the queue is shut down
    pub async fn run(self: Arc<Self>) {
        info!(
            "Starting dispatcher with {} workers (resync every {}s)",
            self.settings.workers,
            self.settings.resync_interval.as_secs()
        );

        let resync = {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.resync_loop().await })
        };

        let workers: Vec<_> = (0..self.settings.workers)
            .map(|id| {
                let dispatcher = self.clone();
                tokio::spawn(async move {
                    while dispatcher.process_next().await.is_some() {}
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        for worker in futures::future::join_all(workers).await {
            if let Err(e) = worker {
                error!("Worker task failed: {}", e);
            }
        }
        resync.abort();
        info!("Dispatcher stopped");
    }

    /// Take one key off the queue and reconcile it.
    ///
    /// Returns `None` once the queue has been shut down.
    pub async fn process_next(&self) -> Option<(HostKey, ReconcileAction)> {
        let key = self.queue.pop().await?;
        debug!(host = %key, "Reconciling");

        let action = match tokio::time::timeout(
            self.settings.reconcile_timeout,
            self.reconciler.reconcile(&key),
        )
        .await
        {
            Ok(Ok(action)) => action,
            Ok(Err(e)) => {
                warn!(host = %key, "Reconciliation failed: {}", e);
                ReconcileAction::Backoff
            }
            Err(_) => {
                warn!(
                    host = %key,
                    "Reconciliation timed out after {}s",
                    self.settings.reconcile_timeout.as_secs()
                );
                ReconcileAction::Backoff
            }
        };

        self.schedule(&key, action);
        self.queue.done(&key);
        Some((key, action))
    }

    fn schedule(&self, key: &HostKey, action: ReconcileAction) {
        match action {
            ReconcileAction::AwaitChange => self.reset_error(key),
            ReconcileAction::RequeueAfter(delay) => {
                self.reset_error(key);
                self.queue.add_after(key.clone(), delay);
            }
            ReconcileAction::Backoff => {
                let (delay, error_count) = self.next_backoff(key);
                debug!(host = %key, errors = error_count, "Retrying in {:?}", delay);
                self.queue.add_after(key.clone(), delay);
            }
            ReconcileAction::Forget => {
                self.forget_backoff(key);
                self.queue.forget(key);
            }
        }
    }

    /// Advance the backoff for a Host; returns (delay, consecutive errors)
    fn next_backoff(&self, key: &HostKey) -> (Duration, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(key.clone())
                    .or_insert_with(|| BackoffState::new(self.settings.backoff_base, self.settings.backoff_max));
                state.error_count += 1;
                (state.backoff.next_backoff(), state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using base backoff", e);
                (self.settings.backoff_base, 0)
            }
        }
    }

    /// Reset error count for a Host (on any outcome other than backoff)
    fn reset_error(&self, key: &HostKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(key) {
                state.error_count = 0;
                state.backoff.reset();
            }
        }
    }

    fn forget_backoff(&self, key: &HostKey) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states.remove(key);
        }
    }

    /// Requeue every Host on a fixed interval to recover from missed events
    async fn resync_loop(&self) {
        let mut ticker = tokio::time::interval(self.settings.resync_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately; the initial watch list covers it
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.resync().await;
        }
    }

    /// Queue every Host currently in the store
    pub async fn resync(&self) {
        match self.store.list_keys().await {
            Ok(keys) => {
                let count = keys.len();
                for key in keys {
                    self.queue.add(key);
                }
                debug!("Resync queued {} hosts ({} pending)", count, self.queue.len());
            }
            Err(e) => warn!("Resync failed to list hosts: {}", e),
        }
    }
}
