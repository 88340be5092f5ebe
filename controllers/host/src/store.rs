//! Host persistence
//!
//! `HostStore` is the seam between the reconciler and the Kubernetes API
//! server. Every write carries the version the caller read; a stale version
//! comes back as `StoreError::Conflict`.

use crds::{Host, HostStatus};
use futures::StreamExt;
use futures::stream::BoxStream;
use kube::api::{ListParams, Patch, PatchParams};
use kube::{Api, Client};
use kube_runtime::{WatchStreamExt, watcher};
use serde_json::{Value, json};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Finalizer that keeps a Host around until its provisioning resources are released
pub const HOST_FINALIZER: &str = "hostops.io/host-cleanup";

/// Stable identity of a Host
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostKey {
    pub namespace: String,
    pub name: String,
}

impl HostKey {
    /// Key for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a Host object; `None` when the object has no name
    pub fn from_host(host: &Host) -> Option<Self> {
        let name = host.metadata.name.clone()?;
        let namespace = host
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A Host together with the version token it was read at
#[derive(Debug, Clone)]
pub struct HostRecord {
    pub host: Host,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEventKind {
    Applied,
    Deleted,
}

/// Change notification for a single Host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEvent {
    pub key: HostKey,
    pub kind: HostEventKind,
    /// `metadata.generation` of the object; status and finalizer writes leave it alone
    pub generation: Option<i64>,
    /// Whether the object carries a deletion timestamp
    pub deleting: bool,
}

impl HostEvent {
    /// Event describing the current state of `host`
    pub fn for_host(host: &Host, kind: HostEventKind) -> Option<Self> {
        Some(Self {
            key: HostKey::from_host(host)?,
            kind,
            generation: host.metadata.generation,
            deleting: host.metadata.deletion_timestamp.is_some(),
        })
    }
}

/// Errors returned by a `HostStore`
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Host no longer exists
    #[error("Host not found: {0}")]
    NotFound(String),

    /// The write was based on a stale version
    #[error("Conflicting update for host {0}")]
    Conflict(String),

    /// Any other Kubernetes API failure
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The watch stream reported an error
    #[error("Watch error: {0}")]
    Watch(String),

    /// Unexpected response from the API server
    #[error("{0}")]
    Other(String),
}

/// Read, write and watch Host objects
#[async_trait::async_trait]
pub trait HostStore: Send + Sync {
    /// Current Host and its version, or `None` when it does not exist
    async fn get(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError>;

    /// Replace the status subresource; returns the new version
    async fn update_status(
        &self,
        key: &HostKey,
        status: &HostStatus,
        expected_version: &str,
    ) -> Result<String, StoreError>;

    /// Replace `metadata.finalizers`; returns the new version
    async fn set_finalizers(
        &self,
        key: &HostKey,
        finalizers: Vec<String>,
        expected_version: &str,
    ) -> Result<String, StoreError>;

    /// Keys of every Host in scope
    async fn list_keys(&self) -> Result<Vec<HostKey>, StoreError>;

    /// Change notifications for every Host in scope. Never ends on its own.
    fn watch(&self) -> BoxStream<'static, Result<HostEvent, StoreError>>;
}

/// Builds a merge patch that replaces the whole status.
///
/// Absent optional fields are sent as explicit nulls so the API server drops
/// them; a plain merge would leave stale values behind.
pub fn status_merge_patch(status: &HostStatus, expected_version: &str) -> Value {
    let mut body = match serde_json::to_value(status) {
        Ok(Value::Object(map)) => map,
        _ => serde_json::Map::new(),
    };
    for field in ["phase", "state", "powerState", "conditions", "hostReference"] {
        body.entry(field).or_insert(Value::Null);
    }

    json!({
        "metadata": { "resourceVersion": expected_version },
        "status": Value::Object(body),
    })
}

/// `HostStore` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeHostStore {
    client: Client,
    namespace: Option<String>,
}

impl fmt::Debug for KubeHostStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeHostStore")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

impl KubeHostStore {
    /// Watch `namespace`, or every namespace when `None`
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    fn api_for(&self, key: &HostKey) -> Api<Host> {
        Api::namespaced(self.client.clone(), &key.namespace)
    }

    fn scoped_api(&self) -> Api<Host> {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }
}

fn map_kube_error(key: &HostKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(api_err) if api_err.code == 409 => StoreError::Conflict(key.to_string()),
        kube::Error::Api(api_err) if api_err.code == 404 => StoreError::NotFound(key.to_string()),
        other => StoreError::Kube(other),
    }
}

fn version_of(key: &HostKey, host: &Host) -> Result<String, StoreError> {
    host.metadata
        .resource_version
        .clone()
        .ok_or_else(|| StoreError::Other(format!("host {} has no resourceVersion", key)))
}

#[async_trait::async_trait]
impl HostStore for KubeHostStore {
    async fn get(&self, key: &HostKey) -> Result<Option<HostRecord>, StoreError> {
        let host = self
            .api_for(key)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_kube_error(key, e))?;

        match host {
            Some(host) => Ok(Some(HostRecord {
                version: version_of(key, &host)?,
                host,
            })),
            None => Ok(None),
        }
    }

    async fn update_status(
        &self,
        key: &HostKey,
        status: &HostStatus,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        let patch = status_merge_patch(status, expected_version);
        debug!(host = %key, "Patching status: {}", patch);

        let updated = self
            .api_for(key)
            .patch_status(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(key, e))?;
        version_of(key, &updated)
    }

    async fn set_finalizers(
        &self,
        key: &HostKey,
        finalizers: Vec<String>,
        expected_version: &str,
    ) -> Result<String, StoreError> {
        let patch = json!({
            "metadata": {
                "finalizers": finalizers,
                "resourceVersion": expected_version,
            }
        });

        let updated = self
            .api_for(key)
            .patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_kube_error(key, e))?;
        version_of(key, &updated)
    }

    async fn list_keys(&self) -> Result<Vec<HostKey>, StoreError> {
        let hosts = self.scoped_api().list(&ListParams::default()).await?;
        Ok(hosts.items.iter().filter_map(HostKey::from_host).collect())
    }

    fn watch(&self) -> BoxStream<'static, Result<HostEvent, StoreError>> {
        watcher(self.scoped_api(), watcher::Config::default())
            .default_backoff()
            .filter_map(|event| async move {
                let (host, kind) = match event {
                    Ok(watcher::Event::Apply(host) | watcher::Event::InitApply(host)) => {
                        (host, HostEventKind::Applied)
                    }
                    Ok(watcher::Event::Delete(host)) => (host, HostEventKind::Deleted),
                    Ok(watcher::Event::Init | watcher::Event::InitDone) => return None,
                    Err(e) => return Some(Err(StoreError::Watch(e.to_string()))),
                };
                HostEvent::for_host(&host, kind).map(Ok)
            })
            .boxed()
    }
}
