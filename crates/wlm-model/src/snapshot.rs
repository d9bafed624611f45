//! Cluster snapshot
//!
//! A snapshot is built once per run from controller queries and is never
//! mutated afterwards. The builder is the only way to assemble one and it
//! enforces that every access point belongs to exactly one AP group.

use crate::controller::Controller;
use crate::device::DeviceState;
use crate::ids::{ControllerId, GroupId, Serial};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// An access point as reported by its controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPoint {
    /// Serial number
    pub serial: Serial,
    /// Configured AP name
    pub name: String,
    /// Wired MAC address
    pub mac: String,
    /// Hardware model (e.g. `515`)
    pub model: String,
    /// Owning AP group
    pub group: GroupId,
    /// Controller the AP terminates on
    pub controller: ControllerId,
    /// Device state at snapshot time
    pub state: DeviceState,
}

impl AccessPoint {
    /// Create a legacy-managed access point
    #[must_use]
    pub fn new(
        serial: impl Into<Serial>,
        model: impl Into<String>,
        group: impl Into<GroupId>,
        controller: impl Into<ControllerId>,
    ) -> Self {
        let serial = serial.into();
        Self {
            name: serial.to_string(),
            mac: String::new(),
            serial,
            model: model.into(),
            group: group.into(),
            controller: controller.into(),
            state: DeviceState::Legacy,
        }
    }

    /// With AP name
    #[inline]
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// With wired MAC
    #[inline]
    #[must_use]
    pub fn with_mac(mut self, mac: impl Into<String>) -> Self {
        self.mac = mac.into();
        self
    }
}

/// Administrative AP group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApGroup {
    /// Group name
    pub id: GroupId,
    /// Member access points
    pub members: BTreeSet<Serial>,
    /// Controllers that reported this group
    pub controllers: BTreeSet<ControllerId>,
}

impl ApGroup {
    /// Empty group
    #[inline]
    #[must_use]
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            members: BTreeSet::new(),
            controllers: BTreeSet::new(),
        }
    }
}

/// An access point was reported under two different groups
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("access point {serial} reported in both {existing} and {conflicting}")]
pub struct MembershipConflict {
    /// Device serial
    pub serial: Serial,
    /// Group already recorded
    pub existing: GroupId,
    /// Group in the new report
    pub conflicting: GroupId,
}

/// Immutable view of the cluster for one run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSnapshot {
    taken_at: DateTime<Utc>,
    controllers: BTreeMap<ControllerId, Controller>,
    groups: BTreeMap<GroupId, ApGroup>,
    access_points: BTreeMap<Serial, AccessPoint>,
}

impl ClusterSnapshot {
    /// Start building a snapshot
    #[inline]
    #[must_use]
    pub fn builder() -> SnapshotBuilder {
        SnapshotBuilder::default()
    }

    /// When the snapshot was taken
    #[inline]
    #[must_use]
    pub fn taken_at(&self) -> DateTime<Utc> {
        self.taken_at
    }

    /// Controller by id
    #[inline]
    #[must_use]
    pub fn controller(&self, id: &ControllerId) -> Option<&Controller> {
        self.controllers.get(id)
    }

    /// All controllers
    pub fn controllers(&self) -> impl Iterator<Item = &Controller> {
        self.controllers.values()
    }

    /// AP group by id
    #[inline]
    #[must_use]
    pub fn group(&self, id: &GroupId) -> Option<&ApGroup> {
        self.groups.get(id)
    }

    /// All AP groups
    pub fn groups(&self) -> impl Iterator<Item = &ApGroup> {
        self.groups.values()
    }

    /// Access point by serial
    #[inline]
    #[must_use]
    pub fn access_point(&self, serial: &Serial) -> Option<&AccessPoint> {
        self.access_points.get(serial)
    }

    /// All access points
    pub fn access_points(&self) -> impl Iterator<Item = &AccessPoint> {
        self.access_points.values()
    }

    /// Access points belonging to a group, ordered by serial
    #[must_use]
    pub fn members_of(&self, group: &GroupId) -> Vec<&AccessPoint> {
        self.groups
            .get(group)
            .map(|g| {
                g.members
                    .iter()
                    .filter_map(|s| self.access_points.get(s))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Groups reported by a controller
    #[must_use]
    pub fn groups_on(&self, controller: &ControllerId) -> Vec<&ApGroup> {
        self.groups
            .values()
            .filter(|g| g.controllers.contains(controller))
            .collect()
    }

    /// Controllers that are members of the named cluster
    #[must_use]
    pub fn cluster_members(&self, cluster: &str) -> Vec<&Controller> {
        self.controllers
            .values()
            .filter(|c| c.role.cluster() == Some(cluster))
            .collect()
    }

    /// Orchestrating member of the named cluster
    #[must_use]
    pub fn orchestrator_of(&self, cluster: &str) -> Option<&Controller> {
        self.cluster_members(cluster)
            .into_iter()
            .find(|c| c.role.is_orchestrator())
    }

    /// Orchestrating member responsible for a group
    #[must_use]
    pub fn orchestrator_for_group(&self, group: &GroupId) -> Option<&Controller> {
        let group = self.groups.get(group)?;
        group
            .controllers
            .iter()
            .filter_map(|id| self.controllers.get(id))
            .find_map(|c| c.role.cluster())
            .and_then(|cluster| self.orchestrator_of(cluster))
    }

    /// AP counts per hardware model
    #[must_use]
    pub fn model_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for ap in self.access_points.values() {
            *counts.entry(ap.model.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Controllers that could not be queried
    #[must_use]
    pub fn unreachable(&self) -> Vec<&ControllerId> {
        self.controllers
            .values()
            .filter(|c| !c.is_reachable())
            .map(|c| &c.id)
            .collect()
    }
}

/// Builder for [`ClusterSnapshot`]
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    controllers: BTreeMap<ControllerId, Controller>,
    groups: BTreeMap<GroupId, ApGroup>,
    access_points: BTreeMap<Serial, AccessPoint>,
}

impl SnapshotBuilder {
    /// Record a controller (later records replace earlier ones)
    pub fn controller(&mut self, controller: Controller) -> &mut Self {
        self.controllers.insert(controller.id.clone(), controller);
        self
    }

    /// Record that a controller reports a group
    pub fn group(&mut self, group: GroupId, reported_by: ControllerId) -> &mut Self {
        self.groups
            .entry(group.clone())
            .or_insert_with(|| ApGroup::new(group))
            .controllers
            .insert(reported_by);
        self
    }

    /// Group already recorded
    #[must_use]
    pub fn has_group(&self, group: &GroupId) -> bool {
        self.groups.contains_key(group)
    }

    /// Record an access point
    ///
    /// # Errors
    /// - `MembershipConflict` if the serial is already recorded under another group
    pub fn access_point(&mut self, ap: AccessPoint) -> Result<&mut Self, MembershipConflict> {
        if let Some(existing) = self.access_points.get(&ap.serial) {
            if existing.group != ap.group {
                return Err(MembershipConflict {
                    serial: ap.serial,
                    existing: existing.group.clone(),
                    conflicting: ap.group,
                });
            }
            return Ok(self);
        }

        let group = self
            .groups
            .entry(ap.group.clone())
            .or_insert_with(|| ApGroup::new(ap.group.clone()));
        group.members.insert(ap.serial.clone());
        group.controllers.insert(ap.controller.clone());
        self.access_points.insert(ap.serial.clone(), ap);
        Ok(self)
    }

    /// Finish the snapshot
    #[must_use]
    pub fn build(&mut self) -> ClusterSnapshot {
        ClusterSnapshot {
            taken_at: Utc::now(),
            controllers: std::mem::take(&mut self.controllers),
            groups: std::mem::take(&mut self.groups),
            access_points: std::mem::take(&mut self.access_points),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{ClusterRole, ControllerEndpoint};
    use proptest::prelude::*;

    fn cluster_controller(id: &str, leader: bool) -> Controller {
        let role = if leader {
            ClusterRole::Orchestrator {
                cluster: "campus".into(),
            }
        } else {
            ClusterRole::Member {
                cluster: "campus".into(),
            }
        };
        Controller::new(&ControllerEndpoint::new(id, "10.0.0.1"), role)
    }

    #[test]
    fn builder_rejects_second_group_for_same_serial() {
        let mut builder = ClusterSnapshot::builder();
        builder
            .access_point(AccessPoint::new("S1", "515", "lobby", "md-1"))
            .unwrap();
        let err = builder
            .access_point(AccessPoint::new("S1", "515", "floor-2", "md-2"))
            .unwrap_err();
        assert_eq!(err.existing, GroupId::new("lobby"));
        assert_eq!(err.conflicting, GroupId::new("floor-2"));
    }

    #[test]
    fn repeated_report_in_same_group_is_accepted() {
        let mut builder = ClusterSnapshot::builder();
        builder
            .access_point(AccessPoint::new("S1", "515", "lobby", "md-1"))
            .unwrap();
        builder
            .access_point(AccessPoint::new("S1", "515", "lobby", "md-1"))
            .unwrap();
        let snapshot = builder.build();
        assert_eq!(snapshot.members_of(&GroupId::new("lobby")).len(), 1);
    }

    #[test]
    fn orchestrator_lookup_through_group() {
        let mut builder = ClusterSnapshot::builder();
        builder
            .controller(cluster_controller("md-1", true))
            .controller(cluster_controller("md-2", false));
        builder
            .access_point(AccessPoint::new("S1", "515", "lobby", "md-2"))
            .unwrap();
        let snapshot = builder.build();

        let leader = snapshot
            .orchestrator_for_group(&GroupId::new("lobby"))
            .unwrap();
        assert_eq!(leader.id, ControllerId::new("md-1"));
        assert_eq!(snapshot.groups_on(&ControllerId::new("md-2")).len(), 1);
    }

    #[test]
    fn model_counts_tally_per_model() {
        let mut builder = ClusterSnapshot::builder();
        for (serial, model) in [("A", "515"), ("B", "515"), ("C", "335")] {
            builder
                .access_point(AccessPoint::new(serial, model, "g", "md-1"))
                .unwrap();
        }
        let counts = builder.build().model_counts();
        assert_eq!(counts.get("515"), Some(&2));
        assert_eq!(counts.get("335"), Some(&1));
    }

    proptest! {
        #[test]
        fn prop_no_access_point_in_two_groups(
            reports in proptest::collection::vec((0u8..20, 0u8..4), 0..60)
        ) {
            let mut builder = ClusterSnapshot::builder();
            for (serial, group) in reports {
                let _ = builder.access_point(AccessPoint::new(
                    format!("S{serial}"),
                    "515",
                    format!("g{group}"),
                    "md-1",
                ));
            }
            let snapshot = builder.build();

            let mut seen = BTreeSet::new();
            for group in snapshot.groups() {
                for serial in &group.members {
                    prop_assert!(seen.insert(serial.clone()));
                    let ap = snapshot.access_point(serial).unwrap();
                    prop_assert_eq!(&ap.group, &group.id);
                }
            }
        }
    }
}
