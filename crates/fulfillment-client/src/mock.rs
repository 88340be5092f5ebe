//! Mock FulfillmentClient for unit testing
//!
//! Keeps hosts in memory and lets tests script one-shot failures per
//! operation. With auto-converge on (the default), a successful power request
//! immediately reports the host as powered to the requested state and `Ready`.

use crate::error::FulfillmentError;
use crate::fulfillment_trait::FulfillmentClientTrait;
use crate::models::{HostObservation, HostTarget};
use crds::{HostPowerState, HostStateType};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Operation selector for scripted failures and call counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOperation {
    RequestPowerState,
    FetchState,
    ReleaseHost,
}

/// Mock FulfillmentClient for testing
#[derive(Clone)]
pub struct MockFulfillmentClient {
    base_url: String,
    hosts: Arc<Mutex<HashMap<HostTarget, HostObservation>>>,
    failures: Arc<Mutex<HashMap<MockOperation, VecDeque<FulfillmentError>>>>,
    calls: Arc<Mutex<HashMap<MockOperation, usize>>>,
    power_requests: Arc<Mutex<Vec<(HostTarget, HostPowerState)>>>,
    released: Arc<Mutex<HashSet<HostTarget>>>,
    auto_converge: Arc<AtomicBool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockFulfillmentClient {
    /// Create a new mock client
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            hosts: Arc::new(Mutex::new(HashMap::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
            calls: Arc::new(Mutex::new(HashMap::new())),
            power_requests: Arc::new(Mutex::new(Vec::new())),
            released: Arc::new(Mutex::new(HashSet::new())),
            auto_converge: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Seed or overwrite what the service reports for a host
    pub fn set_host(&self, host: HostTarget, observation: HostObservation) {
        lock(&self.hosts).insert(host, observation);
    }

    /// Current observation for a host, if one was seeded or produced
    pub fn host(&self, host: &HostTarget) -> Option<HostObservation> {
        lock(&self.hosts).get(host).cloned()
    }

    /// Toggle whether power requests converge immediately
    pub fn set_auto_converge(&self, enabled: bool) {
        self.auto_converge.store(enabled, Ordering::SeqCst);
    }

    /// Make the next call to `op` fail with `error`. Calls queue up in order.
    pub fn fail_next(&self, op: MockOperation, error: FulfillmentError) {
        lock(&self.failures).entry(op).or_default().push_back(error);
    }

    /// Number of times `op` was invoked, failures included
    pub fn call_count(&self, op: MockOperation) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    /// Successful power requests, oldest first
    pub fn power_requests(&self) -> Vec<(HostTarget, HostPowerState)> {
        lock(&self.power_requests).clone()
    }

    /// Whether `release_host` succeeded for the host
    pub fn was_released(&self, host: &HostTarget) -> bool {
        lock(&self.released).contains(host)
    }

    fn record(&self, op: MockOperation) -> Result<(), FulfillmentError> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        match lock(&self.failures).get_mut(&op).and_then(VecDeque::pop_front) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for MockFulfillmentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockFulfillmentClient")
            .field("base_url", &self.base_url)
            .field("hosts", &lock(&self.hosts).len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl FulfillmentClientTrait for MockFulfillmentClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request_power_state(
        &self,
        host: &HostTarget,
        desired: HostPowerState,
    ) -> Result<(), FulfillmentError> {
        self.record(MockOperation::RequestPowerState)?;
        lock(&self.power_requests).push((host.clone(), desired));

        if self.auto_converge.load(Ordering::SeqCst) {
            let mut hosts = lock(&self.hosts);
            let entry = hosts.entry(host.clone()).or_insert_with(|| HostObservation {
                state: HostStateType::Unspecified,
                power_state: HostPowerState::Unspecified,
                host_pool: None,
            });
            entry.power_state = desired;
            entry.state = HostStateType::Ready;
        }
        Ok(())
    }

    async fn fetch_state(&self, host: &HostTarget) -> Result<HostObservation, FulfillmentError> {
        self.record(MockOperation::FetchState)?;
        Ok(lock(&self.hosts).get(host).cloned().unwrap_or(HostObservation {
            state: HostStateType::Unspecified,
            power_state: HostPowerState::Unspecified,
            host_pool: None,
        }))
    }

    async fn release_host(&self, host: &HostTarget) -> Result<(), FulfillmentError> {
        self.record(MockOperation::ReleaseHost)?;
        lock(&self.hosts).remove(host);
        lock(&self.released).insert(host.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_auto_converge_applies_power_request() {
        let mock = MockFulfillmentClient::new("http://mock");
        let host = HostTarget::new("ns", "h1");

        mock.request_power_state(&host, HostPowerState::On).await.unwrap();
        let observed = mock.fetch_state(&host).await.unwrap();

        assert_eq!(observed.power_state, HostPowerState::On);
        assert_eq!(observed.state, HostStateType::Ready);
        assert_eq!(mock.power_requests(), vec![(host, HostPowerState::On)]);
    }

    #[tokio::test]
    async fn test_scripted_failure_is_one_shot() {
        let mock = MockFulfillmentClient::new("http://mock");
        let host = HostTarget::new("ns", "h1");
        mock.fail_next(
            MockOperation::FetchState,
            FulfillmentError::Unavailable("503".to_string()),
        );

        assert!(mock.fetch_state(&host).await.is_err());
        assert!(mock.fetch_state(&host).await.is_ok());
        assert_eq!(mock.call_count(MockOperation::FetchState), 2);
    }

    #[tokio::test]
    async fn test_without_auto_converge_state_is_unchanged() {
        let mock = MockFulfillmentClient::new("http://mock");
        mock.set_auto_converge(false);
        let host = HostTarget::new("ns", "h1");

        mock.request_power_state(&host, HostPowerState::Off).await.unwrap();
        let observed = mock.fetch_state(&host).await.unwrap();
        assert_eq!(observed.power_state, HostPowerState::Unspecified);
    }

    #[tokio::test]
    async fn test_release_marks_host_released() {
        let mock = MockFulfillmentClient::new("http://mock");
        let host = HostTarget::new("ns", "h1");
        mock.release_host(&host).await.unwrap();
        assert!(mock.was_released(&host));
    }
}
