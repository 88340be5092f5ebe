//! Controller-specific error types.

use crate::store::StoreError;
use crds::RegistryError;
use fulfillment_client::FulfillmentError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the Host Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Host persistence error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Fulfillment service error
    #[error("Fulfillment error: {0}")]
    Fulfillment(#[from] FulfillmentError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource registry rejected a type
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Probe server failed
    #[error("Probe server error: {0}")]
    Server(#[from] std::io::Error),
}
