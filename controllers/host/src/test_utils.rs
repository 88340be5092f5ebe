//! Test utilities for unit testing the reconciler and dispatcher
//!
//! `MemoryHostStore` mimics the API server closely enough for the
//! reconciler: versioned writes, optimistic-concurrency conflicts, finalizers
//! holding back deletion, and a watch stream.

use crate::store::{HostEvent, HostEventKind, HostKey, HostRecord, HostStore, StoreError};
use crds::{Host, HostPowerState, HostSpec, HostStatus};
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Helper to create a test Host
pub fn create_test_host(name: &str, namespace: &str, power_state: HostPowerState) -> Host {
    let mut host = Host::new(name, HostSpec { power_state });
    host.metadata.namespace = Some(namespace.to_string());
    host
}

fn deletion_time() -> Time {
    serde_json::from_value(serde_json::json!("2024-01-01T00:00:00Z")).unwrap()
}

#[derive(Default)]
struct MemoryState {
    hosts: BTreeMap<HostKey, Host>,
    next_version: u64,
    status_writes: usize,
    finalizer_writes: usize,
    pending_conflicts: usize,
    watchers: Vec<mpsc::UnboundedSender<Result<HostEvent, StoreError>>>,
}

impl MemoryState {
    fn bump(&mut self, key: &HostKey) -> String {
        self.next_version += 1;
        let version = self.next_version.to_string();
        if let Some(host) = self.hosts.get_mut(key) {
            host.metadata.resource_version = Some(version.clone());
        }
        version
    }

    /// Spec and deletion changes move the generation; status and metadata writes do not
    fn bump_generation(&mut self, key: &HostKey) {
        if let Some(host) = self.hosts.get_mut(key) {
            host.metadata.generation = Some(host.metadata.generation.unwrap_or(0) + 1);
        }
    }

    fn emit(&mut self, key: &HostKey, kind: HostEventKind) {
        let event = match self.hosts.get(key) {
            Some(host) => HostEvent::for_host(host, kind),
            None => Some(HostEvent {
                key: key.clone(),
                kind,
                generation: None,
                deleting: true,
            }),
        };
        if let Some(event) = event {
            self.watchers
                .retain(|tx| tx.unbounded_send(Ok(event.clone())).is_ok());
        }
    }

    fn check_write(&mut self, key: &HostKey, expected_version: &str) -> Result<(), StoreError> {
        let Some(host) = self.hosts.get(key) else {
            return Err(StoreError::NotFound(key.to_string()));
        };
        if self.pending_conflicts > 0 {
            self.pending_conflicts -= 1;
            return Err(StoreError::Conflict(key.to_string()));
        }
        if host.metadata.resource_version.as_deref() != Some(expected_version) {
            return Err(StoreError::Conflict(key.to_string()));
        }
        Ok(())
    }
}

/// In-memory `HostStore`
#[derive(Clone, Default)]
pub struct MemoryHostStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryHostStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap()
    }

    /// Create or replace a Host, as a user applying a manifest would
    pub fn apply(&self, mut host: Host) -> HostKey {
        let key = HostKey::from_host(&host).unwrap();
        let mut state = self.lock();
        host.metadata.generation = state.hosts.get(&key).and_then(|h| h.metadata.generation);
        state.hosts.insert(key.clone(), host);
        state.bump_generation(&key);
        state.bump(&key);
        state.emit(&key, HostEventKind::Applied);
        key
    }

    /// Change the desired power state, bumping the version
    pub fn set_desired(&self, key: &HostKey, power_state: HostPowerState) {
        let mut state = self.lock();
        if let Some(host) = state.hosts.get_mut(key) {
            host.spec.power_state = power_state;
        }
        state.bump_generation(key);
        state.bump(key);
        state.emit(key, HostEventKind::Applied);
    }

    /// Request deletion; the Host stays until its finalizers are gone
    pub fn delete(&self, key: &HostKey) {
        let mut state = self.lock();
        let has_finalizers = match state.hosts.get_mut(key) {
            Some(host) => {
                host.metadata.deletion_timestamp = Some(deletion_time());
                host.metadata.finalizers.as_ref().is_some_and(|f| !f.is_empty())
            }
            None => return,
        };
        if has_finalizers {
            state.bump_generation(key);
            state.bump(key);
            state.emit(key, HostEventKind::Applied);
        } else {
            state.hosts.remove(key);
            state.emit(key, HostEventKind::Deleted);
        }
    }

    /// Fail the next `n` writes with a conflict
    pub fn inject_conflicts(&self, n: usize) {
        self.lock().pending_conflicts = n;
    }

    pub fn host(&self, key: &HostKey) -> Option<Host> {
        self.lock().hosts.get(key).cloned()
    }

    pub fn status(&self, key: &HostKey) -> Option<HostStatus> {
        self.host(key).and_then(|h| h.status)
    }

    pub fn exists(&self, key: &HostKey) -> bool {
        self.lock().hosts.contains_key(key)
    }

    pub fn version(&self, key: &HostKey) -> Option<String> {
        self.host(key).and_then(|h| h.metadata.resource_version)
    }

    pub fn status_writes(&self) -> usize {
        self.lock().status_writes
    }

    pub fn finalizer_writes(&self) -> usize {
        self.lock().finalizer_writes
    }
}

#[async_trait::async_trait]
impl HostStore for MemoryHostStore {
    async fn get(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError> {
        Ok(self.lock().hosts.get(key).map(|host| HostRecord {
            host: host.clone(),
            version: host.metadata.resource_version.clone().unwrap_or_default(),
        }))
    }

    async fn update_status(
        &self,
        key: &HostKey,
        status: &HostStatus,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.lock();
        state.check_write(key, expected_version)?;
        if let Some(host) = state.hosts.get_mut(key) {
            host.status = Some(status.clone());
        }
        state.status_writes += 1;
        let version = state.bump(key);
        state.emit(key, HostEventKind::Applied);
        Ok(version)
    }

    async fn set_finalizers(
        &self,
        key: &HostKey,
        finalizers: Vec<String>,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        let mut state = self.lock();
        state.check_write(key, expected_version)?;
        state.finalizer_writes += 1;

        let remove = match state.hosts.get_mut(key) {
            Some(host) => {
                let deleting = host.metadata.deletion_timestamp.is_some();
                let empty = finalizers.is_empty();
                host.metadata.finalizers = Some(finalizers);
                deleting && empty
            }
            None => false,
        };

        let version = state.bump(key);
        if remove {
            state.hosts.remove(key);
            state.emit(key, HostEventKind::Deleted);
        } else {
            state.emit(key, HostEventKind::Applied);
        }
        Ok(version)
    }

    async fn list_keys(&self) -> Result<Vec<HostKey>, StoreError> {
        Ok(self.lock().hosts.keys().cloned().collect())
    }

    fn watch(&self) -> BoxStream<'static, Result<HostEvent, StoreError>> {
        let (tx, rx) = mpsc::unbounded();
        self.lock().watchers.push(tx);
        rx.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stale_version_conflicts() {
        let store = MemoryHostStore::new();
        let key = store.apply(create_test_host("h1", "ns", HostPowerState::On));
        let stale = store.version(&key).unwrap();

        let fresh = store
            .update_status(&key, &HostStatus::default(), &stale)
            .await
            .unwrap();
        assert_ne!(fresh, stale);

        let err = store
            .update_status(&key, &HostStatus::default(), &stale)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_finalizer_removal_completes_deletion() {
        let store = MemoryHostStore::new();
        let key = store.apply(create_test_host("h1", "ns", HostPowerState::On));
        let version = store.version(&key).unwrap();
        store
            .set_finalizers(&key, vec!["x".to_string()], &version)
            .await
            .unwrap();

        store.delete(&key);
        assert!(store.exists(&key));

        let version = store.version(&key).unwrap();
        store.set_finalizers(&key, Vec::new(), &version).await.unwrap();
        assert!(!store.exists(&key));
    }

    #[tokio::test]
    async fn test_watch_reports_changes() {
        let store = MemoryHostStore::new();
        let mut events = store.watch();
        let key = store.apply(create_test_host("h1", "ns", HostPowerState::Off));
        store.delete(&key);

        let first = events.next().await.unwrap().unwrap();
        assert_eq!(first.kind, HostEventKind::Applied);
        let second = events.next().await.unwrap().unwrap();
        assert_eq!((second.key, second.kind), (key, HostEventKind::Deleted));
    }

    #[tokio::test]
    async fn test_status_writes_echo_without_new_generation() {
        let store = MemoryHostStore::new();
        let mut events = store.watch();
        let key = store.apply(create_test_host("h1", "ns", HostPowerState::Off));
        let version = store.version(&key).unwrap();
        store
            .update_status(&key, &HostStatus::default(), &version)
            .await
            .unwrap();
        store.set_desired(&key, HostPowerState::On);

        let applied = events.next().await.unwrap().unwrap();
        let echo = events.next().await.unwrap().unwrap();
        let edit = events.next().await.unwrap().unwrap();
        assert_eq!(applied.generation, Some(1));
        assert_eq!(echo.generation, Some(1));
        assert_eq!(edit.generation, Some(2));
    }
}
