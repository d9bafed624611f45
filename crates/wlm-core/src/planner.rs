//! Per-device target configuration
//!
//! Planning is pure: given the group's members, it decides which activation
//! profile each device receives, or refuses the whole group if any device
//! model cannot be converted.

use crate::config::PlanningConfig;
use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use wlm_model::{AccessPoint, ClusterSnapshot, ControllerEndpoint, GroupId, Serial};

/// Target configuration for one device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetAssignment {
    /// Device serial
    pub serial: Serial,
    /// Device name
    pub name: String,
    /// Wired MAC address
    pub mac: String,
    /// Reported model
    pub model: String,
    /// Activation profile to assign
    pub profile: String,
    /// Controller the device terminates on
    pub controller: ControllerEndpoint,
}

impl TargetAssignment {
    /// Device as the controller knows it, for status queries
    #[must_use]
    pub fn access_point(&self, group: &GroupId) -> AccessPoint {
        AccessPoint::new(
            self.serial.clone(),
            self.model.clone(),
            group.clone(),
            self.controller.id.clone(),
        )
        .with_name(self.name.clone())
        .with_mac(self.mac.clone())
    }
}

/// Computed plan for one group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationPlan {
    /// Group
    pub group: GroupId,
    /// One assignment per member, ordered by serial
    pub assignments: Vec<TargetAssignment>,
    /// Every controller in the group's cluster
    pub cluster: Vec<ControllerEndpoint>,
}

impl MigrationPlan {
    /// Serials covered by the plan
    pub fn serials(&self) -> impl Iterator<Item = &Serial> {
        self.assignments.iter().map(|a| &a.serial)
    }

    /// Assignments grouped by hosting controller
    #[must_use]
    pub fn by_controller(&self) -> Vec<(&ControllerEndpoint, Vec<&TargetAssignment>)> {
        let mut grouped: Vec<(&ControllerEndpoint, Vec<&TargetAssignment>)> = Vec::new();
        for assignment in &self.assignments {
            match grouped.iter_mut().find(|(c, _)| c.id == assignment.controller.id) {
                Some((_, list)) => list.push(assignment),
                None => grouped.push((&assignment.controller, vec![assignment])),
            }
        }
        grouped
    }
}

/// Supported models and their profiles
#[derive(Debug, Clone)]
pub struct Planner {
    config: PlanningConfig,
}

impl Planner {
    /// Create from configuration
    #[must_use]
    pub fn new(config: PlanningConfig) -> Self {
        Self { config }
    }

    /// Normalized model: vendor prefix stripped, upper-cased
    #[must_use]
    pub fn normalize_model(model: &str) -> String {
        let upper = model.trim().to_ascii_uppercase();
        upper
            .strip_prefix("AP-")
            .or_else(|| upper.strip_prefix("IAP-"))
            .unwrap_or(&upper)
            .to_string()
    }

    /// Model can be converted
    #[must_use]
    pub fn supports(&self, model: &str) -> bool {
        let model = Self::normalize_model(model);
        !model.is_empty()
            && self
                .config
                .supported_models
                .iter()
                .any(|prefix| model.starts_with(&prefix.to_ascii_uppercase()))
    }

    /// Profile for a model, longest matching prefix first
    #[must_use]
    pub fn profile_for(&self, model: &str) -> &str {
        let model = Self::normalize_model(model);
        self.config
            .model_profiles
            .iter()
            .filter(|(prefix, _)| model.starts_with(&prefix.to_ascii_uppercase()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map_or(self.config.default_profile.as_str(), |(_, profile)| profile)
    }

    /// Plan a group from its members
    ///
    /// `endpoint_of` resolves the controller each member terminates on.
    ///
    /// # Errors
    /// - `PlanningError` if the group is empty, a model is unsupported, or a
    ///   member's controller is unknown
    pub fn plan<'a, F>(
        &self,
        group: &GroupId,
        members: &[&AccessPoint],
        cluster: Vec<ControllerEndpoint>,
        endpoint_of: F,
    ) -> Result<MigrationPlan, MigrationError>
    where
        F: Fn(&AccessPoint) -> Option<&'a ControllerEndpoint>,
    {
        if members.is_empty() {
            return Err(MigrationError::PlanningError {
                group: group.clone(),
                message: "group has no access points".into(),
            });
        }

        let unsupported: Vec<String> = members
            .iter()
            .filter(|ap| !self.supports(&ap.model))
            .map(|ap| format!("{} ({})", ap.serial, ap.model))
            .collect();
        if !unsupported.is_empty() {
            return Err(MigrationError::PlanningError {
                group: group.clone(),
                message: format!("unsupported models: {}", unsupported.join(", ")),
            });
        }

        let mut assignments = members
            .iter()
            .map(|ap| {
                let controller = endpoint_of(ap).ok_or_else(|| MigrationError::PlanningError {
                    group: group.clone(),
                    message: format!("{} terminates on unknown controller {}", ap.serial, ap.controller),
                })?;
                Ok(TargetAssignment {
                    serial: ap.serial.clone(),
                    name: ap.name.clone(),
                    mac: ap.mac.clone(),
                    model: ap.model.clone(),
                    profile: self.profile_for(&ap.model).to_string(),
                    controller: controller.clone(),
                })
            })
            .collect::<Result<Vec<_>, MigrationError>>()?;
        assignments.sort_by(|a, b| a.serial.cmp(&b.serial));

        Ok(MigrationPlan {
            group: group.clone(),
            assignments,
            cluster,
        })
    }

    /// Plan a group straight from a snapshot
    ///
    /// # Errors
    /// - `PlanningError` as for [`Planner::plan`], or if the group has no
    ///   orchestrating cluster in the snapshot
    pub fn plan_from_snapshot(
        &self,
        group: &GroupId,
        snapshot: &ClusterSnapshot,
    ) -> Result<MigrationPlan, MigrationError> {
        let cluster: Vec<ControllerEndpoint> = snapshot
            .orchestrator_for_group(group)
            .and_then(|o| o.role.cluster())
            .map(|name| snapshot.cluster_members(name).iter().map(|c| c.endpoint()).collect())
            .ok_or_else(|| MigrationError::PlanningError {
                group: group.clone(),
                message: "group has no orchestrating controller".into(),
            })?;
        let lookup = cluster.clone();
        self.plan(group, &snapshot.members_of(group), cluster, |ap| {
            lookup.iter().find(|c| c.id == ap.controller)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlm_model::ControllerId;

    fn planner() -> Planner {
        let mut config = PlanningConfig::default();
        config.model_profiles.insert("5".into(), "wifi6".into());
        config.model_profiles.insert("55".into(), "wifi6-hd".into());
        Planner::new(config)
    }

    fn ap(serial: &str, model: &str) -> AccessPoint {
        AccessPoint::new(
            Serial::new(serial),
            model,
            GroupId::new("lobby"),
            ControllerId::new("md-1"),
        )
    }

    #[test]
    fn normalizes_vendor_prefix() {
        assert_eq!(Planner::normalize_model("AP-515"), "515");
        assert_eq!(Planner::normalize_model(" ap-335 "), "335");
        assert_eq!(Planner::normalize_model("505H"), "505H");
    }

    #[test]
    fn support_by_prefix() {
        let planner = planner();
        assert!(planner.supports("AP-515"));
        assert!(planner.supports("AP-303H"));
        assert!(!planner.supports("AP-225"));
        assert!(!planner.supports(""));
    }

    #[test]
    fn longest_prefix_profile_wins() {
        let planner = planner();
        assert_eq!(planner.profile_for("AP-555"), "wifi6-hd");
        assert_eq!(planner.profile_for("AP-515"), "wifi6");
        assert_eq!(planner.profile_for("AP-335"), "default");
    }

    #[test]
    fn unsupported_model_fails_whole_group() {
        let endpoint = ControllerEndpoint::new("md-1", "10.0.0.1");
        let a = ap("A", "AP-515");
        let b = ap("B", "AP-225");
        let err = planner()
            .plan(&GroupId::new("lobby"), &[&a, &b], vec![endpoint.clone()], |_| Some(&endpoint))
            .unwrap_err();
        assert!(matches!(err, MigrationError::PlanningError { ref message, .. } if message.contains("AP-225")));
    }

    #[test]
    fn plan_is_sorted_by_serial() {
        let endpoint = ControllerEndpoint::new("md-1", "10.0.0.1");
        let a = ap("B2", "AP-515");
        let b = ap("A1", "AP-335");
        let plan = planner()
            .plan(&GroupId::new("lobby"), &[&a, &b], vec![endpoint.clone()], |_| Some(&endpoint))
            .unwrap();
        let serials: Vec<_> = plan.serials().map(Serial::as_str).collect();
        assert_eq!(serials, vec!["A1", "B2"]);
        assert_eq!(plan.by_controller().len(), 1);
    }

    #[test]
    fn empty_group_cannot_be_planned() {
        let endpoint = ControllerEndpoint::new("md-1", "10.0.0.1");
        assert!(planner()
            .plan(&GroupId::new("lobby"), &[], vec![endpoint.clone()], |_| Some(&endpoint))
            .is_err());
    }
}
