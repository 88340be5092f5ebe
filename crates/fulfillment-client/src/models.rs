//! Fulfillment service data models

use crds::{HostPowerState, HostStateType};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a host on the provisioning side
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostTarget {
    /// Provisioning namespace (`status.hostReference.namespace`)
    pub namespace: String,
    /// Host name
    pub name: String,
}

impl HostTarget {
    /// Target for `namespace/name`
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for HostTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// State of a host as reported by the fulfillment service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostObservation {
    /// Overall host state
    #[serde(default)]
    pub state: HostStateType,

    /// Actual power state
    #[serde(default)]
    pub power_state: HostPowerState,

    /// Pool the host is assigned to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pool: Option<String>,
}

/// Body of a power state change request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PowerStateRequest {
    pub power_state: HostPowerState,
}
