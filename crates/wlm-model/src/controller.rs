//! Controllers and their cluster roles
//!
//! Orchestrating and ordinary members differ only in what they are allowed to
//! do, so the role is a tagged variant checked by callers rather than a
//! separate type per role.

use crate::firmware::FirmwareVersion;
use crate::ids::ControllerId;
use serde::{Deserialize, Serialize};

/// Where to reach a controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ControllerEndpoint {
    /// Controller identifier
    pub id: ControllerId,
    /// Management address (IP or hostname)
    pub address: String,
}

impl ControllerEndpoint {
    /// Create new endpoint
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<ControllerId>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Role of a controller within its cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ClusterRole {
    /// Cluster leader, allowed to issue cluster-wide mutations
    Orchestrator {
        /// Cluster (group profile) name
        cluster: String,
    },
    /// Ordinary cluster member
    Member {
        /// Cluster (group profile) name
        cluster: String,
    },
    /// Not part of any cluster
    Standalone,
}

impl ClusterRole {
    /// Cluster name, if clustered
    #[inline]
    #[must_use]
    pub fn cluster(&self) -> Option<&str> {
        match self {
            Self::Orchestrator { cluster } | Self::Member { cluster } => Some(cluster),
            Self::Standalone => None,
        }
    }

    /// True for the orchestrating member
    #[inline]
    #[must_use]
    pub fn is_orchestrator(&self) -> bool {
        matches!(self, Self::Orchestrator { .. })
    }

    /// True when not clustered
    #[inline]
    #[must_use]
    pub fn is_standalone(&self) -> bool {
        matches!(self, Self::Standalone)
    }
}

/// Reachability observed while collecting inventory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Reachability {
    /// Answered every inventory query
    Reachable,
    /// Could not be queried
    Unreachable {
        /// Last error seen
        reason: String,
    },
}

/// A cluster member as seen in a snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Controller {
    /// Controller identifier
    pub id: ControllerId,
    /// Management address
    pub address: String,
    /// Cluster role
    pub role: ClusterRole,
    /// Peer addresses reported by the cluster membership table
    pub peers: Vec<String>,
    /// Running firmware, when reported
    pub firmware: Option<FirmwareVersion>,
    /// Reachability at snapshot time
    pub reachability: Reachability,
}

impl Controller {
    /// Create reachable controller with a role
    #[must_use]
    pub fn new(endpoint: &ControllerEndpoint, role: ClusterRole) -> Self {
        Self {
            id: endpoint.id.clone(),
            address: endpoint.address.clone(),
            role,
            peers: Vec::new(),
            firmware: None,
            reachability: Reachability::Reachable,
        }
    }

    /// Placeholder for a controller that never answered
    #[must_use]
    pub fn unreachable(endpoint: &ControllerEndpoint, reason: impl Into<String>) -> Self {
        Self {
            id: endpoint.id.clone(),
            address: endpoint.address.clone(),
            role: ClusterRole::Standalone,
            peers: Vec::new(),
            firmware: None,
            reachability: Reachability::Unreachable {
                reason: reason.into(),
            },
        }
    }

    /// With firmware version
    #[inline]
    #[must_use]
    pub fn with_firmware(mut self, firmware: FirmwareVersion) -> Self {
        self.firmware = Some(firmware);
        self
    }

    /// With peer list
    #[inline]
    #[must_use]
    pub fn with_peers(mut self, peers: Vec<String>) -> Self {
        self.peers = peers;
        self
    }

    /// True if the controller answered inventory queries
    #[inline]
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        matches!(self.reachability, Reachability::Reachable)
    }

    /// Endpoint for this controller
    #[must_use]
    pub fn endpoint(&self) -> ControllerEndpoint {
        ControllerEndpoint::new(self.id.clone(), self.address.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_cluster_name() {
        let role = ClusterRole::Member {
            cluster: "campus".to_string(),
        };
        assert_eq!(role.cluster(), Some("campus"));
        assert!(!role.is_orchestrator());
        assert_eq!(ClusterRole::Standalone.cluster(), None);
    }

    #[test]
    fn unreachable_controller_is_not_reachable() {
        let ep = ControllerEndpoint::new("md-1", "10.0.0.1");
        let c = Controller::unreachable(&ep, "connection refused");
        assert!(!c.is_reachable());
        assert_eq!(c.endpoint(), ep);
    }
}
