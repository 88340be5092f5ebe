//! Main controller implementation.
//!
//! Wires the store, fulfillment client, reconciler, work queue, dispatcher,
//! watcher and probe server together and runs them until shutdown.

use crate::config::ControllerConfig;
use crate::dispatcher::{Dispatcher, DispatcherSettings};
use crate::error::ControllerError;
use crate::queue::WorkQueue;
use crate::reconciler::Reconciler;
use crate::server::{ProbeState, start_server};
use crate::store::{HostKey, HostStore, KubeHostStore};
use crate::watcher::HostWatcher;
use crds::ResourceRegistry;
use fulfillment_client::{FulfillmentClient, FulfillmentClientTrait};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Main controller for Host lifecycle management.
pub struct Controller {
    dispatcher: Arc<Dispatcher>,
    watcher: HostWatcher,
    queue: Arc<WorkQueue<HostKey>>,
    probes: Arc<ProbeState>,
    probe_port: u16,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("dispatcher", &self.dispatcher)
            .field("probe_port", &self.probe_port)
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(
        config: ControllerConfig,
        registry: &ResourceRegistry,
    ) -> Result<Self, ControllerError> {
        info!("Initializing Host Controller");

        let kube_client = Client::try_default().await?;
        verify_crds(&kube_client, registry).await;

        let fulfillment = FulfillmentClient::with_timeout(
            config.fulfillment_url.clone(),
            config.fulfillment_token.clone(),
            config.fulfillment_timeout,
        )?;

        check_fulfillment(&fulfillment).await;

        let store: Arc<dyn HostStore> = Arc::new(KubeHostStore::new(
            kube_client,
            config.watch_namespace.clone(),
        ));
        let reconciler = Arc::new(Reconciler::new(
            store.clone(),
            Box::new(fulfillment),
            config.host_namespace.clone(),
            config.progress_check,
        ));

        let queue = Arc::new(WorkQueue::new());
        let dispatcher = Arc::new(Dispatcher::new(
            reconciler,
            store.clone(),
            queue.clone(),
            DispatcherSettings {
                workers: config.worker_count,
                reconcile_timeout: config.reconcile_timeout,
                resync_interval: config.resync_interval,
                backoff_base: config.backoff_base,
                backoff_max: config.backoff_max,
            },
        ));
        let watcher = HostWatcher::new(store, queue.clone());

        Ok(Self {
            dispatcher,
            watcher,
            queue,
            probes: Arc::new(ProbeState::default()),
            probe_port: config.probe_port,
        })
    }

    /// Runs until interrupted or until the watch fails.
    pub async fn run(self) -> Result<(), ControllerError> {
        let probe_server = {
            let probes = self.probes.clone();
            let port = self.probe_port;
            tokio::spawn(async move { start_server(port, probes).await })
        };

        let dispatcher = tokio::spawn(self.dispatcher.clone().run());
        self.probes.set_ready(true);
        info!("Host Controller running");

        let result = tokio::select! {
            result = self.watcher.run() => {
                error!("Host watcher stopped");
                result
            }
            signal = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                signal.map_err(ControllerError::from)
            }
        };

        self.probes.set_ready(false);
        self.queue.shutdown();
        if let Err(e) = dispatcher.await {
            warn!("Dispatcher task ended abnormally: {}", e);
        }
        probe_server.abort();

        result
    }
}

/// Probe the fulfillment service; returns whether it answered.
///
/// Startup continues either way: reconciles treat an unreachable service as
/// transient and back off.
async fn check_fulfillment(fulfillment: &FulfillmentClient) -> bool {
    info!("Validating fulfillment service connectivity...");
    match fulfillment.validate_connectivity().await {
        Ok(()) => {
            info!("Fulfillment service reachable");
            true
        }
        Err(e) => {
            warn!("Failed to reach fulfillment service: {}", e);
            warn!("Please ensure:");
            warn!("  1. FULFILLMENT_URL points at the fulfillment service");
            warn!("  2. FULFILLMENT_TOKEN is valid if the service requires one");
            warn!("  3. The service is reachable at {}", fulfillment.base_url());
            false
        }
    }
}

/// Warn about registered resources whose CRD is not installed
async fn verify_crds(client: &Client, registry: &ResourceRegistry) {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for resource in registry.resources() {
        match crds.get_opt(&resource.crd_name).await {
            Ok(Some(_)) => info!("CRD {} installed", resource.crd_name),
            Ok(None) => warn!(
                "CRD {} is not installed; apply the output of `crdgen` first",
                resource.crd_name
            ),
            Err(e) => warn!("Could not check CRD {}: {}", resource.crd_name, e),
        }
    }
}
