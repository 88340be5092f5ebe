//! Condition ledger
//!
//! Keeps one condition per type, in first-set order. A condition's
//! `lastTransitionTime` only moves when its status flips.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// Valid value for `.status.conditions.type`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum HostConditionType {
    /// The host has been accepted but work has not yet started
    Accepted,

    /// An update is in progress
    Progressing,

    /// The host is ready to use
    Ready,

    /// The host is unusable
    Failed,

    /// The host is available
    Available,

    /// The host is being deleted
    Deleting,
}

impl fmt::Display for HostConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Accepted => "Accepted",
            Self::Progressing => "Progressing",
            Self::Ready => "Ready",
            Self::Failed => "Failed",
            Self::Available => "Available",
            Self::Deleting => "Deleting",
        };
        f.write_str(name)
    }
}

/// Condition status following Kubernetes conventions
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq, Hash)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value { Self::True } else { Self::False }
    }
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// A single typed, timestamped status flag
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HostCondition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: HostConditionType,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the last update
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the status flipped
    pub last_transition_time: DateTime<Utc>,
}

/// Ordered set of conditions keyed by type
#[derive(Debug, Clone, Default, Serialize, JsonSchema, PartialEq)]
#[serde(transparent)]
pub struct ConditionLedger(Vec<HostCondition>);

impl ConditionLedger {
    /// Sets a condition, inserting it when absent.
    ///
    /// `lastTransitionTime` is set to `now` on insert and on a status flip;
    /// when the status is unchanged only `reason` and `message` are refreshed.
    /// Returns whether a transition occurred.
    pub fn set(
        &mut self,
        type_: HostConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        let reason = reason.into();
        let message = message.into();

        match self.0.iter_mut().find(|c| c.type_ == type_) {
            Some(existing) => {
                let flipped = existing.status != status;
                if flipped {
                    existing.status = status;
                    existing.last_transition_time = now;
                }
                existing.reason = reason;
                existing.message = message;
                flipped
            }
            None => {
                self.0.push(HostCondition {
                    type_,
                    status,
                    reason,
                    message,
                    last_transition_time: now,
                });
                true
            }
        }
    }

    /// Sets an existing condition to `False`; absent conditions stay absent.
    pub fn clear_if_present(
        &mut self,
        type_: HostConditionType,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.get(type_).is_none() {
            return false;
        }
        self.set(type_, ConditionStatus::False, reason, message, now)
    }

    /// Looks up a condition by type
    pub fn get(&self, type_: HostConditionType) -> Option<&HostCondition> {
        self.0.iter().find(|c| c.type_ == type_)
    }

    /// Whether the condition is present with status `True`
    pub fn is_true(&self, type_: HostConditionType) -> bool {
        self.get(type_)
            .is_some_and(|c| c.status == ConditionStatus::True)
    }

    /// Iterates in first-set order
    pub fn iter(&self) -> impl Iterator<Item = &HostCondition> {
        self.0.iter()
    }

    /// Number of condition types recorded
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no condition has been set
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for ConditionLedger {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<HostCondition>::deserialize(deserializer)?;
        let mut conditions: Vec<HostCondition> = Vec::with_capacity(raw.len());
        for condition in raw {
            // First occurrence of a type wins
            if !conditions.iter().any(|c| c.type_ == condition.type_) {
                conditions.push(condition);
            }
        }
        Ok(Self(conditions))
    }
}
