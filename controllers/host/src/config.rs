//! Controller configuration
//!
//! Read once at startup from environment variables.

use crate::error::ControllerError;
use std::str::FromStr;
use std::time::Duration;

/// Runtime settings for the Host Controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Fulfillment service base URL (`FULFILLMENT_URL`)
    pub fulfillment_url: String,
    /// Bearer token for the fulfillment service (`FULFILLMENT_TOKEN`)
    pub fulfillment_token: Option<String>,
    /// Namespace to watch; all namespaces when unset (`WATCH_NAMESPACE`)
    pub watch_namespace: Option<String>,
    /// Provisioning namespace recorded in `hostReference`; the Host's own
    /// namespace when unset (`HOST_NAMESPACE`)
    pub host_namespace: Option<String>,
    /// Concurrent reconcile workers (`WORKER_COUNT`)
    pub worker_count: usize,
    /// Full relist interval (`RESYNC_INTERVAL_SECS`)
    pub resync_interval: Duration,
    /// Upper bound on a single reconcile (`RECONCILE_TIMEOUT_SECS`)
    pub reconcile_timeout: Duration,
    /// Per-request timeout for fulfillment calls (`FULFILLMENT_TIMEOUT_SECS`)
    pub fulfillment_timeout: Duration,
    /// Delay before re-checking a host that is converging (`PROGRESS_CHECK_SECS`)
    pub progress_check: Duration,
    /// First transient-failure delay (`BACKOFF_BASE_SECS`)
    pub backoff_base: Duration,
    /// Transient-failure delay ceiling (`BACKOFF_MAX_SECS`)
    pub backoff_max: Duration,
    /// Port for `/healthz` and `/readyz` (`PROBE_PORT`)
    pub probe_port: u16,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            fulfillment_url: "http://fulfillment:8000".to_string(),
            fulfillment_token: None,
            watch_namespace: None,
            host_namespace: None,
            worker_count: 4,
            resync_interval: Duration::from_secs(300),
            reconcile_timeout: Duration::from_secs(30),
            fulfillment_timeout: Duration::from_secs(10),
            progress_check: Duration::from_secs(10),
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(300),
            probe_port: 8080,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let config = Self {
            fulfillment_url: text("FULFILLMENT_URL").unwrap_or(defaults.fulfillment_url),
            fulfillment_token: text("FULFILLMENT_TOKEN"),
            watch_namespace: text("WATCH_NAMESPACE"),
            host_namespace: text("HOST_NAMESPACE"),
            worker_count: parse(&text, "WORKER_COUNT", defaults.worker_count)?,
            resync_interval: seconds(&text, "RESYNC_INTERVAL_SECS", defaults.resync_interval)?,
            reconcile_timeout: seconds(&text, "RECONCILE_TIMEOUT_SECS", defaults.reconcile_timeout)?,
            fulfillment_timeout: seconds(&text, "FULFILLMENT_TIMEOUT_SECS", defaults.fulfillment_timeout)?,
            progress_check: seconds(&text, "PROGRESS_CHECK_SECS", defaults.progress_check)?,
            backoff_base: seconds(&text, "BACKOFF_BASE_SECS", defaults.backoff_base)?,
            backoff_max: seconds(&text, "BACKOFF_MAX_SECS", defaults.backoff_max)?,
            probe_port: parse(&text, "PROBE_PORT", defaults.probe_port)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ControllerError> {
        if self.worker_count == 0 {
            return Err(ControllerError::InvalidConfig(
                "WORKER_COUNT must be at least 1".to_string(),
            ));
        }
        if self.backoff_base > self.backoff_max {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_BASE_SECS ({}s) exceeds BACKOFF_MAX_SECS ({}s)",
                self.backoff_base.as_secs(),
                self.backoff_max.as_secs()
            )));
        }
        // Fetch and power request must both time out before the pass does
        if self.reconcile_timeout <= self.fulfillment_timeout * 2 {
            return Err(ControllerError::InvalidConfig(format!(
                "RECONCILE_TIMEOUT_SECS ({}s) must exceed twice FULFILLMENT_TIMEOUT_SECS ({}s)",
                self.reconcile_timeout.as_secs(),
                self.fulfillment_timeout.as_secs()
            )));
        }
        Ok(())
    }
}

fn parse<T, F>(text: &F, name: &str, default: T) -> Result<T, ControllerError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match text(name) {
        Some(raw) => raw.parse().map_err(|e| {
            ControllerError::InvalidConfig(format!("{} has invalid value {:?}: {}", name, raw, e))
        }),
        None => Ok(default),
    }
}

/// Parses a whole number of seconds; zero is rejected
fn seconds<F>(text: &F, name: &str, default: Duration) -> Result<Duration, ControllerError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse(text, name, default.as_secs())?;
    if secs == 0 {
        return Err(ControllerError::InvalidConfig(format!("{} must be greater than 0", name)));
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<ControllerConfig, ControllerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ControllerConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = load(&[]).unwrap();
        assert_eq!(config, ControllerConfig::default());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.backoff_max, Duration::from_secs(300));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("FULFILLMENT_URL", "http://svc:9000"),
            ("FULFILLMENT_TOKEN", "secret"),
            ("WATCH_NAMESPACE", "hosts"),
            ("WORKER_COUNT", "8"),
            ("PROGRESS_CHECK_SECS", "3"),
            ("PROBE_PORT", "9090"),
        ])
        .unwrap();

        assert_eq!(config.fulfillment_url, "http://svc:9000");
        assert_eq!(config.fulfillment_token.as_deref(), Some("secret"));
        assert_eq!(config.watch_namespace.as_deref(), Some("hosts"));
        assert!(config.host_namespace.is_none());
        assert_eq!(config.worker_count, 8);
        assert_eq!(config.progress_check, Duration::from_secs(3));
        assert_eq!(config.probe_port, 9090);
    }

    #[test]
    fn test_blank_values_fall_back_to_defaults() {
        let config = load(&[("WATCH_NAMESPACE", "  "), ("WORKER_COUNT", "")]).unwrap();
        assert!(config.watch_namespace.is_none());
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            load(&[("WORKER_COUNT", "many")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("WORKER_COUNT", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("RESYNC_INTERVAL_SECS", "0")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("BACKOFF_BASE_SECS", "600")]),
            Err(ControllerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_reconcile_timeout_must_cover_two_fulfillment_calls() {
        let config = load(&[]).unwrap();
        assert!(config.reconcile_timeout > config.fulfillment_timeout * 2);

        assert!(matches!(
            load(&[("RECONCILE_TIMEOUT_SECS", "20"), ("FULFILLMENT_TIMEOUT_SECS", "10")]),
            Err(ControllerError::InvalidConfig(_))
        ));
        assert!(matches!(
            load(&[("FULFILLMENT_TIMEOUT_SECS", "30")]),
            Err(ControllerError::InvalidConfig(_))
        ));

        let config = load(&[("RECONCILE_TIMEOUT_SECS", "61"), ("FULFILLMENT_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(config.fulfillment_timeout, Duration::from_secs(30));
    }
}
