//! Fulfillment service REST client
//!
//! Hosts live under `/api/v1/namespaces/{namespace}/hosts/{name}`.

use crate::error::FulfillmentError;
use crate::fulfillment_trait::FulfillmentClientTrait;
use crate::models::*;
use crds::HostPowerState;
use reqwest::{Client, RequestBuilder, Response};
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Default per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Fulfillment service client
pub struct FulfillmentClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl FulfillmentClient {
    /// Create a new fulfillment client
    ///
    /// # Arguments
    /// * `base_url` - Service base URL (e.g., "http://fulfillment:8000")
    /// * `token` - Optional bearer token
    pub fn new(base_url: String, token: Option<String>) -> Result<Self, FulfillmentError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(
        base_url: String,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FulfillmentError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.is_empty()),
        })
    }

    /// Check that the service is reachable and accepts our credentials.
    pub async fn validate_connectivity(&self) -> Result<(), FulfillmentError> {
        let url = format!("{}/healthz", self.base_url);
        debug!("Validating fulfillment service connectivity");

        let response = self.send(self.client.get(&url)).await?;
        Self::check(response, "health check").await?;

        debug!("Fulfillment service reachable");
        Ok(())
    }

    fn host_url(&self, host: &HostTarget) -> String {
        format!(
            "{}/api/v1/namespaces/{}/hosts/{}",
            self.base_url,
            urlencoding::encode(&host.namespace),
            urlencoding::encode(&host.name)
        )
    }

    /// Attach common headers and send
    async fn send(&self, request: RequestBuilder) -> Result<Response, FulfillmentError> {
        let request_id = Uuid::new_v4().to_string();
        let mut request = request
            .header("Accept", "application/json")
            .header("X-Request-Id", &request_id);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        debug!(request_id = %request_id, status = %response.status(), "Fulfillment response");
        Ok(response)
    }

    /// Turn a non-success response into an error
    async fn check(response: Response, context: &str) -> Result<Response, FulfillmentError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(FulfillmentError::from_status(
            status.as_u16(),
            format!("{}: {} - {}", context, status, body),
        ))
    }
}

#[async_trait::async_trait]
impl FulfillmentClientTrait for FulfillmentClient {
    fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request_power_state(
        &self,
        host: &HostTarget,
        desired: HostPowerState,
    ) -> Result<(), FulfillmentError> {
        let url = format!("{}/power", self.host_url(host));
        debug!(host = %host, desired = %desired, "Requesting power state");

        let body = PowerStateRequest { power_state: desired };
        let response = self.send(self.client.put(&url).json(&body)).await?;
        Self::check(response, &format!("power request for host {}", host)).await?;
        Ok(())
    }

    async fn fetch_state(&self, host: &HostTarget) -> Result<HostObservation, FulfillmentError> {
        let url = self.host_url(host);
        debug!(host = %host, "Fetching host state");

        let response = self.send(self.client.get(&url)).await?;
        let response = Self::check(response, &format!("fetch host {}", host)).await?;

        let text = response.text().await?;
        let observation: HostObservation = serde_json::from_str(&text)?;
        Ok(observation)
    }

    async fn release_host(&self, host: &HostTarget) -> Result<(), FulfillmentError> {
        let url = self.host_url(host);
        debug!(host = %host, "Releasing host");

        let response = self.send(self.client.delete(&url)).await?;
        match Self::check(response, &format!("release host {}", host)).await {
            Ok(_) => Ok(()),
            Err(FulfillmentError::NotFound(_)) => {
                debug!(host = %host, "Host already released");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
