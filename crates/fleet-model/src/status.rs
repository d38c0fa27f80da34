//! Liveness and maintenance status enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Liveness of a single service instance, as reported by the topology source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Up,
    Down,
    /// The service is not monitored. Treated as up.
    NotChecked,
    #[default]
    Unknown,
}

impl ServiceStatus {
    /// Whether the instance counts toward a cluster's available capacity.
    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Up | Self::NotChecked)
    }
}

/// Operator-visible maintenance state of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
    /// The host has been cleared for permanent removal.
    PermanentlyDown,
}

impl HostStatus {
    /// Whether the host is out of service (suspended or removed).
    pub fn is_down(self) -> bool {
        !matches!(self, Self::NoRemarks)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRemarks => "no_remarks",
            Self::AllowedToBeDown => "allowed_to_be_down",
            Self::PermanentlyDown => "permanently_down",
        }
    }
}

impl fmt::Display for HostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maintenance state of a whole application instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationInstanceStatus {
    #[default]
    NoRemarks,
    AllowedToBeDown,
}

impl ApplicationInstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoRemarks => "no_remarks",
            Self::AllowedToBeDown => "allowed_to_be_down",
        }
    }
}

impl fmt::Display for ApplicationInstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
