//! Host CRD
//!
//! Declares the desired power state of a physical or virtual machine and the
//! state observed from the fulfillment service.

use crate::conditions::ConditionLedger;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// HostSpec defines the desired state of a Host
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[kube(
    group = "hostops.io",
    version = "v1alpha1",
    kind = "Host",
    namespaced,
    status = "HostStatus",
    shortname = "h",
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Power State","type":"string","jsonPath":".status.powerState"}"#,
    printcolumn = r#"{"name":"Host Pool","type":"string","jsonPath":".status.hostReference.hostPool"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct HostSpec {
    /// Desired power state of the host
    #[serde(default)]
    pub power_state: HostPowerState,
}

/// Valid value for `.spec.powerState` and `.status.powerState`
///
/// Unrecognised strings deserialize as `Unspecified` so that a bad manifest
/// leaves the host progressing instead of breaking the watch.
#[derive(Debug, Clone, Copy, Serialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum HostPowerState {
    /// The power state is not known or not requested
    #[default]
    #[serde(rename = "HOST_POWER_STATE_UNSPECIFIED")]
    Unspecified,

    /// The host is (or should be) powered on
    #[serde(rename = "HOST_POWER_STATE_ON")]
    On,

    /// The host is (or should be) powered off
    #[serde(rename = "HOST_POWER_STATE_OFF")]
    Off,
}

impl HostPowerState {
    /// Wire representation of the power state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "HOST_POWER_STATE_UNSPECIFIED",
            Self::On => "HOST_POWER_STATE_ON",
            Self::Off => "HOST_POWER_STATE_OFF",
        }
    }

    /// Parse a wire value, mapping anything unrecognised to `Unspecified`
    pub fn from_wire(raw: &str) -> Self {
        raw.parse().unwrap_or_default()
    }
}

impl FromStr for HostPowerState {
    type Err = UnknownValue;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "HOST_POWER_STATE_UNSPECIFIED" | "" => Ok(Self::Unspecified),
            "HOST_POWER_STATE_ON" => Ok(Self::On),
            "HOST_POWER_STATE_OFF" => Ok(Self::Off),
            other => Err(UnknownValue(other.to_string())),
        }
    }
}

impl<'de> Deserialize<'de> for HostPowerState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

impl fmt::Display for HostPowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Overall state of a host as reported by the fulfillment service
#[derive(Debug, Clone, Copy, Serialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum HostStateType {
    /// The state is unknown
    #[default]
    Unspecified,

    /// The host isn't ready yet
    Progressing,

    /// The host is ready
    Ready,

    /// The host is unusable
    Failed,
}

impl HostStateType {
    /// Wire representation of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::Progressing => "Progressing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
        }
    }

    /// Parse a wire value, mapping anything unrecognised to `Unspecified`
    pub fn from_wire(raw: &str) -> Self {
        match raw {
            "Progressing" => Self::Progressing,
            "Ready" => Self::Ready,
            "Failed" => Self::Failed,
            _ => Self::Unspecified,
        }
    }
}

impl<'de> Deserialize<'de> for HostStateType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::from_wire(&raw))
    }
}

impl fmt::Display for HostStateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Valid value for `.status.phase`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum HostPhaseType {
    /// An update is in progress
    Progressing,

    /// The host operation has failed
    Failed,

    /// The host is ready and operational
    Ready,

    /// There has been a request to delete the Host
    Deleting,
}

impl fmt::Display for HostPhaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Self::Progressing => "Progressing",
            Self::Failed => "Failed",
            Self::Ready => "Ready",
            Self::Deleting => "Deleting",
        };
        f.write_str(phase)
    }
}

/// Reference to the provisioning-side resources created for a Host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HostReferenceType {
    /// Namespace that contains the Host resources
    pub namespace: String,

    /// HostPool that this host is assigned to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_pool: Option<String>,
}

/// HostStatus defines the observed state of a Host
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostStatus {
    /// Single-value overview of the state of the Host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<HostPhaseType>,

    /// Overall state of the host from the fulfillment service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<HostStateType>,

    /// Current power state of the host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<HostPowerState>,

    /// Conditions describing the state of the Host, one per type
    #[serde(default, skip_serializing_if = "ConditionLedger::is_empty")]
    pub conditions: ConditionLedger,

    /// Reference to the resources created for this Host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_reference: Option<HostReferenceType>,
}

/// A wire value that does not name any known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown value: {0}")]
pub struct UnknownValue(pub String);
