//! Readiness validation
//!
//! Checks each controller for the conditions a conversion needs:
//! - Clustered, with an orchestrating member
//! - Firmware with conversion support
//! - Working DNS and reach to the provisioning service
//! - Every hosted device enrolled with the activation service
//!
//! A failing controller excludes the groups it hosts. It never aborts the run.

use crate::error::{MigrationError, ValidationFailure};
use crate::planner::MigrationPlan;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use wlm_client::{ActivationService, ApiError, ClusterMembership, Connectivity, ControllerApi};
use wlm_model::{
    AccessPoint, ClusterRole, ClusterSnapshot, Controller, ControllerEndpoint, ControllerId,
    FirmwareVersion, GroupId, Serial,
};

const ENROLLMENT_CONCURRENCY: usize = 16;

/// Validation outcome for one controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerVerdict {
    /// Controller
    pub controller: ControllerId,
    /// Failed checks; empty when the controller passed
    pub failures: BTreeSet<ValidationFailure>,
    /// Hosted devices not enrolled for activation
    pub unenrolled: Vec<Serial>,
}

impl ControllerVerdict {
    /// No check failed
    #[inline]
    #[must_use]
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Result of validating a snapshot
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    verdicts: BTreeMap<ControllerId, ControllerVerdict>,
    candidates: BTreeSet<GroupId>,
    excluded: BTreeMap<GroupId, Vec<ControllerId>>,
}

impl ValidationReport {
    /// Report proposing the given groups, with no controller verdicts
    #[cfg(any(test, feature = "test-utils"))]
    #[must_use]
    pub fn with_candidates(groups: impl IntoIterator<Item = GroupId>) -> Self {
        Self {
            candidates: groups.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Groups eligible for confirmation
    pub fn candidates(&self) -> impl Iterator<Item = &GroupId> {
        self.candidates.iter()
    }

    /// Group is eligible for confirmation
    #[must_use]
    pub fn is_candidate(&self, group: &GroupId) -> bool {
        self.candidates.contains(group)
    }

    /// Excluded groups with the failing controllers responsible
    #[must_use]
    pub fn excluded(&self) -> &BTreeMap<GroupId, Vec<ControllerId>> {
        &self.excluded
    }

    /// All verdicts
    pub fn verdicts(&self) -> impl Iterator<Item = &ControllerVerdict> {
        self.verdicts.values()
    }

    /// Verdict for one controller
    #[must_use]
    pub fn verdict(&self, controller: &ControllerId) -> Option<&ControllerVerdict> {
        self.verdicts.get(controller)
    }

    /// Controller passed every check
    #[must_use]
    pub fn passed(&self, controller: &ControllerId) -> bool {
        self.verdict(controller).is_some_and(ControllerVerdict::passed)
    }

    /// Every (controller, reason) failure
    #[must_use]
    pub fn failures(&self) -> Vec<(&ControllerId, ValidationFailure)> {
        self.verdicts
            .values()
            .flat_map(|v| v.failures.iter().map(move |f| (&v.controller, *f)))
            .collect()
    }

    /// Failures as errors, one per failed check
    #[must_use]
    pub fn errors(&self) -> Vec<MigrationError> {
        self.failures()
            .into_iter()
            .map(|(controller, reason)| MigrationError::ValidationFailed {
                controller: controller.clone(),
                reason,
            })
            .collect()
    }
}

/// Runs readiness checks against live controllers and the activation service
pub struct ReadinessValidator {
    controllers: Arc<dyn ControllerApi>,
    activation: Arc<dyn ActivationService>,
    min_firmware: FirmwareVersion,
}

impl ReadinessValidator {
    /// Create a validator
    #[must_use]
    pub fn new(
        controllers: Arc<dyn ControllerApi>,
        activation: Arc<dyn ActivationService>,
        min_firmware: FirmwareVersion,
    ) -> Self {
        Self {
            controllers,
            activation,
            min_firmware,
        }
    }

    /// Validate every controller in a snapshot and derive candidate groups
    pub async fn validate(&self, snapshot: &ClusterSnapshot) -> ValidationReport {
        let verdicts: Vec<ControllerVerdict> = futures::future::join_all(
            snapshot
                .controllers()
                .map(|controller| self.check_controller(controller, snapshot)),
        )
        .await;

        let mut report = ValidationReport::default();
        for verdict in verdicts {
            report.verdicts.insert(verdict.controller.clone(), verdict);
        }
        for error in report.errors() {
            warn!(%error, "controller failed validation");
        }

        for group in snapshot.groups() {
            let failing: Vec<ControllerId> = group
                .controllers
                .iter()
                .filter(|id| !report.passed(id))
                .cloned()
                .collect();
            if !failing.is_empty() {
                report.excluded.insert(group.id.clone(), failing);
            } else if group.members.is_empty() {
                debug!(group = %group.id, "group has no access points, not proposed");
            } else if snapshot.orchestrator_for_group(&group.id).is_none() {
                report.excluded.insert(group.id.clone(), group.controllers.iter().cloned().collect());
            } else {
                report.candidates.insert(group.id.clone());
            }
        }

        info!(
            candidates = report.candidates.len(),
            excluded = report.excluded.len(),
            "validation complete"
        );
        report
    }

    /// Re-check a planned group against live state
    ///
    /// Returns the group's current members. The outer error is a controller or
    /// activation call failure; the inner error is a readiness failure.
    ///
    /// # Errors
    /// - `ApiError` if a live query fails
    pub async fn check_group_live(
        &self,
        plan: &MigrationPlan,
        orchestrator: &ControllerEndpoint,
    ) -> Result<Result<Vec<AccessPoint>, String>, ApiError> {
        let membership = self.controllers.cluster_membership(orchestrator).await?;
        if !membership.role.is_orchestrator() {
            return Ok(Err(format!(
                "{} is no longer the orchestrating member",
                orchestrator.id
            )));
        }

        let mut members = Vec::new();
        for endpoint in &plan.cluster {
            let reported = self.controllers.list_access_points(endpoint).await?;
            members.extend(reported.into_iter().filter(|ap| ap.group == plan.group));
        }
        members.sort_by(|a, b| a.serial.cmp(&b.serial));
        members.dedup_by(|a, b| a.serial == b.serial);

        let hosting: BTreeSet<&ControllerId> = members.iter().map(|ap| &ap.controller).collect();
        for endpoint in plan.cluster.iter().filter(|e| hosting.contains(&e.id)) {
            let live = if endpoint.id == orchestrator.id {
                membership.clone()
            } else {
                self.controllers.cluster_membership(endpoint).await?
            };
            let connectivity = self.controllers.connectivity(endpoint).await?;
            let failures = self.assess(&live, true, Some(&connectivity));
            if let Some(failure) = failures.first() {
                return Ok(Err(format!("{}: {failure}", endpoint.id)));
            }
        }

        let refs: Vec<&AccessPoint> = members.iter().collect();
        let unenrolled = self.unenrolled(&refs).await?;
        if !unenrolled.is_empty() {
            let list: Vec<&str> = unenrolled.iter().map(Serial::as_str).collect();
            return Ok(Err(format!("devices not enrolled: {}", list.join(", "))));
        }
        Ok(Ok(members))
    }

    async fn check_controller(&self, controller: &Controller, snapshot: &ClusterSnapshot) -> ControllerVerdict {
        let mut verdict = ControllerVerdict {
            controller: controller.id.clone(),
            failures: BTreeSet::new(),
            unenrolled: Vec::new(),
        };
        if !controller.is_reachable() {
            verdict.failures.insert(ValidationFailure::Unreachable);
            return verdict;
        }

        let membership = ClusterMembership {
            role: controller.role.clone(),
            peers: controller.peers.clone(),
            firmware: controller.firmware.clone(),
        };
        let has_orchestrator = controller
            .role
            .cluster()
            .is_some_and(|cluster| snapshot.orchestrator_of(cluster).is_some());

        let connectivity = match self.controllers.connectivity(&controller.endpoint()).await {
            Ok(connectivity) => Some(connectivity),
            Err(error) => {
                warn!(controller = %controller.id, %error, "connectivity check failed");
                verdict.failures.insert(ValidationFailure::Unreachable);
                None
            }
        };
        verdict
            .failures
            .extend(self.assess(&membership, has_orchestrator, connectivity.as_ref()));

        let hosted: Vec<&AccessPoint> = snapshot
            .access_points()
            .filter(|ap| ap.controller == controller.id)
            .collect();
        match self.unenrolled(&hosted).await {
            Ok(unenrolled) if unenrolled.is_empty() => {}
            Ok(unenrolled) => {
                verdict.failures.insert(ValidationFailure::NotActivated);
                verdict.unenrolled = unenrolled;
            }
            Err(error) => {
                warn!(controller = %controller.id, %error, "activation lookup failed");
                verdict.failures.insert(ValidationFailure::NotActivated);
            }
        }
        verdict
    }

    /// Failures derivable from role, firmware and connectivity
    fn assess(
        &self,
        membership: &ClusterMembership,
        has_orchestrator: bool,
        connectivity: Option<&Connectivity>,
    ) -> Vec<ValidationFailure> {
        let mut failures = Vec::new();
        match membership.role {
            ClusterRole::Standalone => failures.push(ValidationFailure::StandaloneController),
            _ if !has_orchestrator => failures.push(ValidationFailure::NoOrchestratingMember),
            _ => {}
        }
        if !membership
            .firmware
            .as_ref()
            .is_some_and(|fw| fw.at_least(&self.min_firmware))
        {
            failures.push(ValidationFailure::MissingCapability);
        }
        if let Some(connectivity) = connectivity {
            if !connectivity.dns_configured {
                failures.push(ValidationFailure::NoDns);
            }
            if !connectivity.provisioning_reachable {
                failures.push(ValidationFailure::NoInternet);
            }
        }
        failures
    }

    async fn unenrolled(&self, aps: &[&AccessPoint]) -> Result<Vec<Serial>, ApiError> {
        let results: Vec<Result<Option<Serial>, ApiError>> = stream::iter(aps.iter().map(|ap| {
            let serial = ap.serial.clone();
            async move {
                let enrolled = self.activation.is_enrolled(&serial).await?;
                Ok((!enrolled).then_some(serial))
            }
        }))
        .buffer_unordered(ENROLLMENT_CONCURRENCY)
        .collect()
        .await;

        let mut unenrolled = results
            .into_iter()
            .filter_map(Result::transpose)
            .collect::<Result<Vec<_>, _>>()?;
        unenrolled.sort();
        Ok(unenrolled)
    }
}
