//! Cluster inventory collection
//!
//! Queries every configured controller concurrently for its cluster role,
//! AP groups and AP database, and assembles one [`ClusterSnapshot`]. The
//! snapshot is read-only input to everything downstream.
//!
//! Controllers come either from configuration or from a conductor's switch
//! list.

use crate::error::MigrationError;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use wlm_client::{ApiError, ControllerApi};
use wlm_model::{AccessPoint, ClusterSnapshot, Controller, ControllerEndpoint, ControllerId, GroupId};

/// Collected inventory
#[derive(Debug, Clone)]
pub enum Inventory {
    /// Every controller answered
    Complete(ClusterSnapshot),
    /// Some controllers could not be reached
    Partial {
        /// Snapshot of the reachable part; unreachable controllers are marked
        snapshot: ClusterSnapshot,
        /// Controllers that did not answer, with the reason
        unreachable: Vec<(ControllerId, String)>,
    },
}

impl Inventory {
    /// Snapshot, complete or partial
    #[must_use]
    pub fn snapshot(&self) -> &ClusterSnapshot {
        match self {
            Self::Complete(snapshot) | Self::Partial { snapshot, .. } => snapshot,
        }
    }

    /// Some controllers were missing
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Take the snapshot regardless of completeness
    #[must_use]
    pub fn into_snapshot(self) -> ClusterSnapshot {
        match self {
            Self::Complete(snapshot) | Self::Partial { snapshot, .. } => snapshot,
        }
    }

    /// Require a complete inventory
    ///
    /// # Errors
    /// - `PartialInventory` listing the missing controllers
    pub fn into_complete(self) -> Result<ClusterSnapshot, MigrationError> {
        match self {
            Self::Complete(snapshot) => Ok(snapshot),
            Self::Partial { unreachable, .. } => Err(MigrationError::PartialInventory {
                unreachable: unreachable.into_iter().map(|(id, _)| id).collect(),
            }),
        }
    }
}

const DOWN_IN_SWITCH_LIST: &str = "down in conductor switch list";

struct ControllerReport {
    controller: Controller,
    groups: Vec<GroupId>,
    access_points: Vec<AccessPoint>,
}

/// Builds snapshots from live controllers
pub struct InventoryCollector {
    api: Arc<dyn ControllerApi>,
}

impl InventoryCollector {
    /// Create over a controller API
    #[must_use]
    pub fn new(api: Arc<dyn ControllerApi>) -> Self {
        Self { api }
    }

    /// Collect an inventory from the given controllers
    ///
    /// # Errors
    /// - `Config` if no controllers are given
    /// - `AuthenticationFailed` if any controller rejects the credentials
    /// - `ControllerUnreachable` if no controller answers
    /// - `MembershipConflict` if an AP is reported in two groups
    #[instrument(skip_all, fields(controllers = endpoints.len()))]
    pub async fn collect(&self, endpoints: &[ControllerEndpoint]) -> Result<Inventory, MigrationError> {
        if endpoints.is_empty() {
            return Err(MigrationError::Config("no controllers to inventory".into()));
        }
        self.collect_reachable(endpoints, Vec::new()).await
    }

    /// Collect an inventory from the controllers a conductor manages
    ///
    /// Controllers the conductor lists as down are not queried; they are
    /// recorded unreachable and the inventory is partial.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the conductor or any controller rejects the credentials
    /// - `ControllerUnreachable` if the conductor, or every listed controller, is unreachable
    /// - `Config` if the conductor lists no managed controllers
    /// - `MembershipConflict` if an AP is reported in two groups
    #[instrument(skip_all, fields(conductor = %conductor.id))]
    pub async fn collect_from_conductor(
        &self,
        conductor: &ControllerEndpoint,
    ) -> Result<Inventory, MigrationError> {
        let discovered = self
            .api
            .discover_controllers(conductor)
            .await
            .map_err(|error| match error {
                ApiError::Unauthorized(message) => MigrationError::AuthenticationFailed {
                    controller: conductor.id.clone(),
                    message,
                },
                error => MigrationError::ControllerUnreachable {
                    controllers: vec![conductor.id.clone()],
                    reason: error.to_string(),
                },
            })?;
        if discovered.is_empty() {
            return Err(MigrationError::Config(format!(
                "conductor {} lists no managed controllers",
                conductor.id
            )));
        }

        let (up, down): (Vec<_>, Vec<_>) = discovered.into_iter().partition(|c| c.up);
        debug!(up = up.len(), down = down.len(), "controllers discovered");
        let endpoints: Vec<ControllerEndpoint> = up.into_iter().map(|c| c.endpoint).collect();
        let down = down.into_iter().map(|c| c.endpoint).collect();
        self.collect_reachable(&endpoints, down).await
    }

    async fn collect_reachable(
        &self,
        endpoints: &[ControllerEndpoint],
        down: Vec<ControllerEndpoint>,
    ) -> Result<Inventory, MigrationError> {
        let reports = join_all(endpoints.iter().map(|endpoint| self.query(endpoint))).await;

        let mut builder = ClusterSnapshot::builder();
        let mut reported_groups = Vec::new();
        let mut unreachable = Vec::new();
        for endpoint in &down {
            warn!(controller = %endpoint.id, "controller marked down by conductor");
            builder.controller(Controller::unreachable(endpoint, DOWN_IN_SWITCH_LIST));
            unreachable.push((endpoint.id.clone(), DOWN_IN_SWITCH_LIST.to_string()));
        }
        for (endpoint, report) in endpoints.iter().zip(reports) {
            match report {
                Ok(report) => {
                    for ap in report.access_points {
                        builder.access_point(ap)?;
                    }
                    reported_groups.extend(report.groups.into_iter().map(|g| (g, endpoint.id.clone())));
                    builder.controller(report.controller);
                }
                Err(ApiError::Unauthorized(message)) => {
                    return Err(MigrationError::AuthenticationFailed {
                        controller: endpoint.id.clone(),
                        message,
                    });
                }
                Err(error) => {
                    warn!(controller = %endpoint.id, %error, "controller unreachable during inventory");
                    builder.controller(Controller::unreachable(endpoint, error.to_string()));
                    unreachable.push((endpoint.id.clone(), error.to_string()));
                }
            }
        }

        if unreachable.len() == endpoints.len() + down.len() {
            let reason = unreachable.last().map(|(_, r)| r.clone()).unwrap_or_default();
            return Err(MigrationError::ControllerUnreachable {
                controllers: unreachable.into_iter().map(|(id, _)| id).collect(),
                reason,
            });
        }

        // Groups without members are attributed to the controllers listing them;
        // populated groups belong to the controllers their APs terminate on.
        for (group, controller) in reported_groups {
            if !builder.has_group(&group) {
                builder.group(group, controller);
            }
        }

        let snapshot = builder.build();
        info!(
            groups = snapshot.groups().count(),
            access_points = snapshot.access_points().count(),
            unreachable = unreachable.len(),
            "inventory collected"
        );

        Ok(if unreachable.is_empty() {
            Inventory::Complete(snapshot)
        } else {
            Inventory::Partial { snapshot, unreachable }
        })
    }

    async fn query(&self, endpoint: &ControllerEndpoint) -> Result<ControllerReport, ApiError> {
        let membership = self.api.cluster_membership(endpoint).await?;
        let groups = self.api.list_ap_groups(endpoint).await?;
        let access_points = self.api.list_access_points(endpoint).await?;

        let mut controller = Controller::new(endpoint, membership.role).with_peers(membership.peers);
        if let Some(firmware) = membership.firmware {
            controller = controller.with_firmware(firmware);
        }
        Ok(ControllerReport {
            controller,
            groups,
            access_points,
        })
    }
}
