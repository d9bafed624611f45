//! Error types for the migration engine
//!
//! Provides the failure taxonomy used across the run:
//! - Inventory failures (unreachable controllers, partial inventory)
//! - Readiness failures per controller
//! - Per-phase job failures, with per-AP breakdowns where devices were touched
//! - Fatal run conditions (authentication, total loss of reachability)

use crate::job::{ApBreakdown, JobPhase};
use serde::{Deserialize, Serialize};
use std::fmt;
use wlm_client::ApiError;
use wlm_model::{ControllerId, GroupId, MembershipConflict, Serial};

/// Reason a controller failed readiness validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ValidationFailure {
    /// Provisioning service not reachable from the controller
    NoInternet,
    /// No working name resolution on the controller
    NoDns,
    /// One or more devices not enrolled with the activation service
    NotActivated,
    /// Controller is not part of a cluster
    StandaloneController,
    /// Cluster has no orchestrating member
    NoOrchestratingMember,
    /// Firmware lacks conversion support
    MissingCapability,
    /// Controller could not be queried
    Unreachable,
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoInternet => "provisioning service unreachable",
            Self::NoDns => "DNS not configured",
            Self::NotActivated => "devices not enrolled for activation",
            Self::StandaloneController => "standalone controller",
            Self::NoOrchestratingMember => "cluster has no orchestrating member",
            Self::MissingCapability => "firmware lacks conversion capability",
            Self::Unreachable => "controller unreachable",
        };
        f.write_str(text)
    }
}

/// Main migration error type
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    /// Controller(s) could not be reached at all
    #[error("controller unreachable ({}): {reason}", join(.controllers))]
    ControllerUnreachable {
        /// Controllers that failed
        controllers: Vec<ControllerId>,
        /// Last error seen
        reason: String,
    },

    /// Some controllers answered, others did not
    #[error("partial inventory, unreachable: {}", join(.unreachable))]
    PartialInventory {
        /// Controllers that did not answer
        unreachable: Vec<ControllerId>,
    },

    /// Readiness validation failed on a controller
    #[error("validation failed on {controller}: {reason}")]
    ValidationFailed {
        /// Failing controller
        controller: ControllerId,
        /// First failure reason
        reason: ValidationFailure,
    },

    /// Target configuration could not be computed
    #[error("planning failed for {group}: {message}")]
    PlanningError {
        /// Group being planned
        group: GroupId,
        /// What was unsupported
        message: String,
    },

    /// Live readiness re-check failed immediately before mutation
    #[error("precheck failed for {group}: {message}")]
    PrecheckFailed {
        /// Group being checked
        group: GroupId,
        /// Reason
        message: String,
    },

    /// Activation enrollment or profile assignment failed
    #[error("provisioning failed for {group}{}: {message}", serial_suffix(.serial))]
    ProvisioningError {
        /// Group being provisioned
        group: GroupId,
        /// Device that failed, if specific
        serial: Option<Serial>,
        /// Reason
        message: String,
    },

    /// The cutover mutation failed or devices reported conversion failure
    #[error("cutover failed for {group}: {message} ({breakdown})")]
    CutoverError {
        /// Group
        group: GroupId,
        /// Reason
        message: String,
        /// Per-AP status
        breakdown: ApBreakdown,
    },

    /// Devices did not all report new management before the deadline
    #[error("verification timed out for {group} ({breakdown})")]
    VerifyTimeout {
        /// Group
        group: GroupId,
        /// Per-AP status at the deadline
        breakdown: ApBreakdown,
    },

    /// A job for this group is already running
    #[error("a migration job is already active for {group}")]
    JobAlreadyActive {
        /// Group
        group: GroupId,
    },

    /// Credentials rejected by the cluster
    #[error("authentication failed against {controller}: {message}")]
    AuthenticationFailed {
        /// Controller that refused
        controller: ControllerId,
        /// Detail
        message: String,
    },

    /// Cancellation is no longer possible once cutover has begun
    #[error("cannot cancel {group} in phase {phase:?}")]
    CancellationWithdrawn {
        /// Group
        group: GroupId,
        /// Current phase
        phase: JobPhase,
    },

    /// Job phase change outside the allowed order
    #[error("illegal phase transition {from:?} -> {to:?}")]
    IllegalTransition {
        /// Current phase
        from: JobPhase,
        /// Requested phase
        to: JobPhase,
    },

    /// No job known for the group
    #[error("no job for {group}")]
    UnknownJob {
        /// Group
        group: GroupId,
    },

    /// Abort requested for a group without a failed conversion
    #[error("no failed conversion to abort for {group}")]
    NothingToAbort {
        /// Group
        group: GroupId,
    },

    /// Controller-wide conversion abort would hit other groups mid-cutover
    #[error("cannot abort conversion for {group}: {} still converting on {controller}", join_groups(.others))]
    ConversionInProgress {
        /// Group the abort was requested for
        group: GroupId,
        /// Orchestrating controller shared with the other jobs
        controller: ControllerId,
        /// Groups with an issued cutover on the same controller
        others: Vec<GroupId>,
    },

    /// Inventory reported an AP in two groups
    #[error(transparent)]
    MembershipConflict(#[from] MembershipConflict),

    /// Controller call failed outside a specific phase
    #[error("controller {controller}: {source}")]
    Controller {
        /// Controller
        controller: ControllerId,
        /// Underlying error
        #[source]
        source: ApiError,
    },

    /// Job ledger could not be read or written
    #[error("ledger error: {0}")]
    Ledger(String),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

fn join(ids: &[ControllerId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn join_groups(groups: &[GroupId]) -> String {
    groups.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

fn serial_suffix(serial: &Option<Serial>) -> String {
    serial.as_ref().map(|s| format!(" ({s})")).unwrap_or_default()
}

impl MigrationError {
    /// Ends the whole run rather than a single job
    #[inline]
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed { .. } | Self::ControllerUnreachable { .. }
        )
    }

    /// Transient condition worth retrying within a phase
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Controller { source, .. } if source.is_transient())
    }

    /// Per-AP breakdown, for errors that carry one
    #[must_use]
    pub fn breakdown(&self) -> Option<&ApBreakdown> {
        match self {
            Self::CutoverError { breakdown, .. } | Self::VerifyTimeout { breakdown, .. } => {
                Some(breakdown)
            }
            _ => None,
        }
    }

    /// Translate a controller error, lifting credential rejection to a fatal error
    #[must_use]
    pub fn from_api(controller: &ControllerId, source: ApiError) -> Self {
        match source {
            ApiError::Unauthorized(message) => Self::AuthenticationFailed {
                controller: controller.clone(),
                message,
            },
            source => Self::Controller {
                controller: controller.clone(),
                source,
            },
        }
    }
}
