//! FulfillmentClient trait for mocking
//!
//! The concrete `FulfillmentClient` implements this trait, and tests can use
//! `MockFulfillmentClient` instead.

use crate::error::FulfillmentError;
use crate::models::{HostObservation, HostTarget};
use crds::HostPowerState;

/// Fulfillment service operations
///
/// Every call is a single attempt; retrying is the caller's job.
#[async_trait::async_trait]
pub trait FulfillmentClientTrait: Send + Sync {
    /// Get the base URL
    fn base_url(&self) -> &str;

    /// Ask the service to drive the host to `desired`
    async fn request_power_state(
        &self,
        host: &HostTarget,
        desired: HostPowerState,
    ) -> Result<(), FulfillmentError>;

    /// Read the current state of the host
    async fn fetch_state(&self, host: &HostTarget) -> Result<HostObservation, FulfillmentError>;

    /// Release all provisioning resources held for the host.
    /// A host the service no longer knows counts as released.
    async fn release_host(&self, host: &HostTarget) -> Result<(), FulfillmentError>;
}
