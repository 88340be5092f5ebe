//! Host reconciler
//!
//! Drives a Host toward its desired power state. Each pass loads the Host,
//! asks the fulfillment service what it sees, decides what to do next, and
//! writes status only when something actually changed.

use crate::error::ControllerError;
use crate::store::{HOST_FINALIZER, HostKey, HostRecord, HostStore, StoreError};
use chrono::{DateTime, Utc};
use crds::{
    ConditionStatus, Host, HostConditionType, HostPhaseType, HostPowerState, HostReferenceType,
    HostStateType, HostStatus,
};
use fulfillment_client::{FulfillmentClientTrait, HostObservation, HostTarget};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Immediate reload-and-retry attempts after a write conflict
const MAX_CONFLICT_RETRIES: u32 = 3;

/// What the dispatch loop should do with a key after a reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileAction {
    /// Nothing to do until the Host changes or the next resync
    AwaitChange,
    /// Check again after a fixed delay
    RequeueAfter(Duration),
    /// Retry with the key's exponential backoff
    Backoff,
    /// The Host is gone; drop all scheduling state for the key
    Forget,
}

/// Reconciles Host resources.
pub struct Reconciler {
    store: Arc<dyn HostStore>,
    fulfillment: Box<dyn FulfillmentClientTrait>,
    /// Provisioning namespace; falls back to the Host's namespace
    host_namespace: Option<String>,
    progress_check: Duration,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("fulfillment", &self.fulfillment.base_url())
            .field("host_namespace", &self.host_namespace)
            .field("progress_check", &self.progress_check)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Reconciler that records `host_namespace` (or the Host's own namespace)
    /// in `hostReference` and re-checks converging hosts every `progress_check`
    pub fn new(
        store: Arc<dyn HostStore>,
        fulfillment: Box<dyn FulfillmentClientTrait>,
        host_namespace: Option<String>,
        progress_check: Duration,
    ) -> Self {
        Self {
            store,
            fulfillment,
            host_namespace,
            progress_check,
        }
    }

    /// Reconcile one Host.
    ///
    /// Write conflicts are retried immediately against a fresh read, up to
    /// `MAX_CONFLICT_RETRIES` times, before falling back to backoff.
    pub async fn reconcile(&self, key: &HostKey) -> Result<ReconcileAction, ControllerError> {
        let mut conflicts = 0;
        loop {
            match self.reconcile_once(key).await {
                Err(ControllerError::Store(StoreError::Conflict(_))) if conflicts < MAX_CONFLICT_RETRIES => {
                    conflicts += 1;
                    debug!(host = %key, attempt = conflicts, "Write conflict, reloading");
                }
                Err(ControllerError::Store(StoreError::Conflict(_))) => {
                    warn!(host = %key, "Write conflict persisted after {} retries, backing off", conflicts);
                    return Ok(ReconcileAction::Backoff);
                }
                Err(ControllerError::Store(StoreError::NotFound(_))) => {
                    debug!(host = %key, "Host vanished during reconcile");
                    return Ok(ReconcileAction::Forget);
                }
                result => return result,
            }
        }
    }

    async fn reconcile_once(&self, key: &HostKey) -> Result<ReconcileAction, ControllerError> {
        let Some(HostRecord { host, mut version }) = self.store.get(key).await? else {
            debug!(host = %key, "Host not found, nothing to do");
            return Ok(ReconcileAction::Forget);
        };
        let now = Utc::now();

        if host.metadata.deletion_timestamp.is_some() {
            return self.finalize(key, &host, version, now).await;
        }

        let mut finalizers = host.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == HOST_FINALIZER) {
            finalizers.push(HOST_FINALIZER.to_string());
            version = self.store.set_finalizers(key, finalizers, &version).await?;
            info!(host = %key, "Added finalizer {}", HOST_FINALIZER);
        }

        let current = host.status.clone().unwrap_or_default();
        let mut status = current.clone();

        if status.host_reference.is_none() {
            status.host_reference = Some(HostReferenceType {
                namespace: self.reference_namespace(key),
                host_pool: None,
            });
        }
        status.conditions.set(
            HostConditionType::Accepted,
            ConditionStatus::True,
            "Accepted",
            "Host accepted for reconciliation",
            now,
        );

        let target = self.target(key, &status);
        let desired = host.spec.power_state;

        let action = match self.fulfillment.fetch_state(&target).await {
            Ok(observed) => self.converge(key, &target, desired, observed, &mut status, now).await,
            Err(e) if e.is_transient() => {
                warn!(host = %key, "Failed to fetch host state: {}", e);
                if status.phase.is_none() {
                    status.phase = Some(HostPhaseType::Progressing);
                }
                status.conditions.set(
                    HostConditionType::Progressing,
                    ConditionStatus::True,
                    "FetchError",
                    e.to_string(),
                    now,
                );
                ReconcileAction::Backoff
            }
            Err(e) => {
                error!(host = %key, "Fulfillment rejected state query: {}", e);
                mark_failed(&mut status, "FetchFailed", e.to_string(), now);
                ReconcileAction::AwaitChange
            }
        };

        self.persist(key, &current, &status, &version).await?;
        Ok(action)
    }

    /// Compare what the service sees with what the Host asks for
    async fn converge(
        &self,
        key: &HostKey,
        target: &HostTarget,
        desired: HostPowerState,
        observed: HostObservation,
        status: &mut HostStatus,
        now: DateTime<Utc>,
    ) -> ReconcileAction {
        status.state = Some(observed.state);
        status.power_state = Some(observed.power_state);
        if let (Some(pool), Some(reference)) = (observed.host_pool, status.host_reference.as_mut()) {
            reference.host_pool = Some(pool);
        }

        if observed.state == HostStateType::Failed {
            error!(host = %key, "Fulfillment reports host failed");
            mark_failed(status, "FulfillmentFailed", "Fulfillment service reports the host as failed", now);
            return ReconcileAction::AwaitChange;
        }

        if desired == HostPowerState::Unspecified {
            debug!(host = %key, "No power state requested");
            mark_progressing(
                status,
                "PowerStateUnspecified",
                "spec.powerState is unset or not recognised; no power change will be requested",
                now,
            );
            return ReconcileAction::AwaitChange;
        }

        if observed.power_state == desired {
            if observed.state == HostStateType::Ready {
                mark_ready(status, desired, now);
                debug!(host = %key, "Host converged");
                return ReconcileAction::AwaitChange;
            }
            mark_progressing(
                status,
                "AwaitingFulfillment",
                format!("Power state is {} but host state is {}", desired, observed.state),
                now,
            );
            return ReconcileAction::RequeueAfter(self.progress_check);
        }

        match self.fulfillment.request_power_state(target, desired).await {
            Ok(()) => {
                info!(host = %key, "Requested power state {} (observed {})", desired, observed.power_state);
                mark_progressing(
                    status,
                    "PowerStateRequested",
                    format!("Requested {}, observed {}", desired, observed.power_state),
                    now,
                );
                ReconcileAction::RequeueAfter(self.progress_check)
            }
            Err(e) if e.is_transient() => {
                warn!(host = %key, "Power request failed: {}", e);
                status.phase = Some(HostPhaseType::Progressing);
                status.conditions.set(
                    HostConditionType::Progressing,
                    ConditionStatus::True,
                    "PowerRequestError",
                    e.to_string(),
                    now,
                );
                ReconcileAction::Backoff
            }
            Err(e) => {
                error!(host = %key, "Power request rejected: {}", e);
                mark_failed(status, "PowerRequestFailed", e.to_string(), now);
                ReconcileAction::AwaitChange
            }
        }
    }

    /// Release provisioning resources and let the Host go
    async fn finalize(
        &self,
        key: &HostKey,
        host: &Host,
        mut version: String,
        now: DateTime<Utc>,
    ) -> Result<ReconcileAction, ControllerError> {
        let finalizers = host.metadata.finalizers.clone().unwrap_or_default();
        if !finalizers.iter().any(|f| f == HOST_FINALIZER) {
            debug!(host = %key, "Deleting without our finalizer, nothing to release");
            return Ok(ReconcileAction::Forget);
        }

        let current = host.status.clone().unwrap_or_default();
        let mut status = current.clone();
        status.phase = Some(HostPhaseType::Deleting);
        status.conditions.set(
            HostConditionType::Deleting,
            ConditionStatus::True,
            "DeletionRequested",
            "Releasing provisioning resources",
            now,
        );
        version = self.persist(key, &current, &status, &version).await?;

        let target = self.target(key, &status);
        let current = status.clone();
        match self.fulfillment.release_host(&target).await {
            Ok(()) => {
                status.host_reference = None;
                version = self.persist(key, &current, &status, &version).await?;

                let remaining: Vec<String> = finalizers
                    .into_iter()
                    .filter(|f| f != HOST_FINALIZER)
                    .collect();
                self.store.set_finalizers(key, remaining, &version).await?;
                info!(host = %key, "Released host and removed finalizer");
                Ok(ReconcileAction::Forget)
            }
            Err(e) if e.is_transient() => {
                warn!(host = %key, "Failed to release host: {}", e);
                status.conditions.set(
                    HostConditionType::Deleting,
                    ConditionStatus::True,
                    "ReleaseError",
                    e.to_string(),
                    now,
                );
                self.persist(key, &current, &status, &version).await?;
                Ok(ReconcileAction::Backoff)
            }
            Err(e) => {
                error!(host = %key, "Fulfillment rejected release: {}", e);
                status.conditions.set(
                    HostConditionType::Failed,
                    ConditionStatus::True,
                    "ReleaseFailed",
                    e.to_string(),
                    now,
                );
                self.persist(key, &current, &status, &version).await?;
                Ok(ReconcileAction::Backoff)
            }
        }
    }

    /// Write `status` if it differs from `current`; returns the version to use next
    async fn persist(
        &self,
        key: &HostKey,
        current: &HostStatus,
        status: &HostStatus,
        version: &str,
    ) -> Result<String, ControllerError> {
        if status == current {
            debug!(host = %key, "Status unchanged, skipping write");
            return Ok(version.to_string());
        }

        let new_version = self.store.update_status(key, status, version).await?;
        if status.phase != current.phase {
            if let Some(phase) = status.phase {
                info!(host = %key, "Phase is now {}", phase);
            }
        }
        Ok(new_version)
    }

    fn reference_namespace(&self, key: &HostKey) -> String {
        self.host_namespace
            .clone()
            .unwrap_or_else(|| key.namespace.clone())
    }

    fn target(&self, key: &HostKey, status: &HostStatus) -> HostTarget {
        let namespace = status
            .host_reference
            .as_ref()
            .map(|r| r.namespace.clone())
            .unwrap_or_else(|| self.reference_namespace(key));
        HostTarget::new(namespace, key.name.clone())
    }
}

fn mark_ready(status: &mut HostStatus, power_state: HostPowerState, now: DateTime<Utc>) {
    let message = format!("Host is {}", power_state);
    status.phase = Some(HostPhaseType::Ready);
    status.conditions.set(HostConditionType::Ready, ConditionStatus::True, "Converged", message.clone(), now);
    status.conditions.set(HostConditionType::Available, ConditionStatus::True, "Converged", message, now);
    status.conditions.set(HostConditionType::Progressing, ConditionStatus::False, "Converged", "", now);
    status.conditions.clear_if_present(HostConditionType::Failed, "Recovered", "", now);
}

fn mark_progressing(status: &mut HostStatus, reason: &str, message: impl Into<String>, now: DateTime<Utc>) {
    status.phase = Some(HostPhaseType::Progressing);
    status.conditions.set(HostConditionType::Progressing, ConditionStatus::True, reason, message, now);
    status.conditions.clear_if_present(HostConditionType::Ready, reason, "", now);
    status.conditions.clear_if_present(HostConditionType::Available, reason, "", now);
    status.conditions.clear_if_present(HostConditionType::Failed, "Recovered", "", now);
}

fn mark_failed(status: &mut HostStatus, reason: &str, message: impl Into<String>, now: DateTime<Utc>) {
    status.phase = Some(HostPhaseType::Failed);
    status.conditions.set(HostConditionType::Failed, ConditionStatus::True, reason, message, now);
    status.conditions.clear_if_present(HostConditionType::Ready, reason, "", now);
    status.conditions.clear_if_present(HostConditionType::Available, reason, "", now);
    status.conditions.clear_if_present(HostConditionType::Progressing, reason, "", now);
}
