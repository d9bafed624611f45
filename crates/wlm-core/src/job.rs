//! Migration job model and phase state machine
//!
//! A job moves along a single success path:
//!
//! ```text
//! Planning -> Precheck -> Provisioning -> CutoverInitiate -> CutoverVerify -> Finalize
//! ```
//!
//! with two diverting terminal phases:
//! - `RolledBack`, reachable only before `CutoverInitiate` (nothing was mutated)
//! - `Failed`, reachable from any non-terminal phase
//!
//! Phase changes go through [`validate_transition`]; every accepted change is
//! appended to the job's history.

use crate::error::MigrationError;
use crate::planner::MigrationPlan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use ulid::Ulid;
use wlm_model::{ControllerEndpoint, DeviceState, GroupId, Serial};

/// Job phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum JobPhase {
    /// Computing the per-device target configuration
    Planning,
    /// Live re-check of readiness immediately before mutation
    Precheck,
    /// Assigning activation profiles
    Provisioning,
    /// Issuing the detach/convert request
    CutoverInitiate,
    /// Polling devices until they report new management
    CutoverVerify,
    /// Recording the migrated state
    Finalize,
    /// Operator cancelled or interrupted before mutation
    RolledBack,
    /// Phase failure
    Failed,
}

impl JobPhase {
    /// Phases in success order
    pub const SUCCESS_PATH: [JobPhase; 6] = [
        JobPhase::Planning,
        JobPhase::Precheck,
        JobPhase::Provisioning,
        JobPhase::CutoverInitiate,
        JobPhase::CutoverVerify,
        JobPhase::Finalize,
    ];

    /// Phase is a diverting terminal (`RolledBack` or `Failed`)
    #[inline]
    #[must_use]
    pub fn is_diverted(self) -> bool {
        matches!(self, Self::RolledBack | Self::Failed)
    }

    /// Cancellation still possible in this phase
    #[inline]
    #[must_use]
    pub fn is_cancellable(self) -> bool {
        matches!(self, Self::Planning | Self::Precheck | Self::Provisioning)
    }

    /// Phase may see the cluster mutated
    #[inline]
    #[must_use]
    pub fn is_post_cutover(self) -> bool {
        matches!(self, Self::CutoverInitiate | Self::CutoverVerify | Self::Finalize)
    }

    /// Transient failures in this phase are retried with backoff
    #[inline]
    #[must_use]
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Planning | Self::Precheck | Self::Provisioning)
    }
}

/// Validate a phase transition
///
/// # Errors
/// - `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(from: JobPhase, to: JobPhase) -> Result<(), MigrationError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(MigrationError::IllegalTransition { from, to })
    }
}

/// Phases reachable from `from`
#[must_use]
pub fn allowed_transitions(from: JobPhase) -> Vec<JobPhase> {
    use JobPhase::*;
    match from {
        Planning => vec![Precheck, RolledBack, Failed],
        Precheck => vec![Provisioning, RolledBack, Failed],
        Provisioning => vec![CutoverInitiate, RolledBack, Failed],
        CutoverInitiate => vec![CutoverVerify, Failed],
        CutoverVerify => vec![Finalize, Failed],
        Finalize => vec![Failed],
        RolledBack | Failed => vec![],
    }
}

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub Ulid);

impl JobId {
    /// Generate a new id
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known migration status of one AP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApStatus {
    /// Not yet under new management
    Pending,
    /// Managed by the cloud platform
    Migrated,
    /// Hosting controller could not be queried
    Unreachable,
    /// Device reported conversion failure
    Failed(String),
}

impl ApStatus {
    /// Map a controller-reported device state
    #[must_use]
    pub fn from_device(state: &DeviceState) -> Self {
        match state {
            DeviceState::ManagedByTarget => Self::Migrated,
            DeviceState::ConversionFailed(reason) => Self::Failed(reason.clone()),
            DeviceState::Legacy | DeviceState::Converting | DeviceState::Unknown => Self::Pending,
        }
    }

    /// Settled: will not change without operator action
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Migrated | Self::Failed(_))
    }
}

/// Per-AP outcome counts for a job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApBreakdown {
    /// Migrated devices
    pub success: Vec<Serial>,
    /// Devices still converting or never started
    pub pending: Vec<Serial>,
    /// Devices whose controller could not be queried
    pub unreachable: Vec<Serial>,
    /// Devices that reported failure
    pub failed: Vec<Serial>,
}

impl ApBreakdown {
    /// Bucket a status map
    #[must_use]
    pub fn from_statuses(statuses: &BTreeMap<Serial, ApStatus>) -> Self {
        let mut breakdown = Self::default();
        for (serial, status) in statuses {
            let bucket = match status {
                ApStatus::Migrated => &mut breakdown.success,
                ApStatus::Pending => &mut breakdown.pending,
                ApStatus::Unreachable => &mut breakdown.unreachable,
                ApStatus::Failed(_) => &mut breakdown.failed,
            };
            bucket.push(serial.clone());
        }
        breakdown
    }

    /// Total devices counted
    #[must_use]
    pub fn total(&self) -> usize {
        self.success.len() + self.pending.len() + self.unreachable.len() + self.failed.len()
    }

    /// Every device migrated
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total() > 0 && self.success.len() == self.total()
    }
}

impl fmt::Display for ApBreakdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} migrated, {} pending, {} unreachable, {} failed",
            self.success.len(),
            self.pending.len(),
            self.unreachable.len(),
            self.failed.len()
        )
    }
}

/// Structured record of a failed job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureReport {
    /// Phase in which the failure occurred
    pub phase: JobPhase,
    /// Error message
    pub message: String,
    /// Whether the cluster may have been mutated
    pub mutation_started: bool,
    /// Last known per-AP status
    pub breakdown: ApBreakdown,
}

/// Phase entry in the job history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseRecord {
    /// Phase entered
    pub phase: JobPhase,
    /// When
    pub entered_at: DateTime<Utc>,
}

/// One attempt to migrate one AP group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationJob {
    /// Job id
    pub id: JobId,
    /// Target group
    pub group: GroupId,
    /// Attempt number for this group; bumps on each fresh confirmation
    pub epoch: u32,
    /// Current phase
    pub phase: JobPhase,
    /// Accepted phase changes, oldest first
    pub history: Vec<PhaseRecord>,
    /// Attempts consumed per phase
    pub attempts: BTreeMap<JobPhase, u32>,
    /// Computed plan, once Planning completes
    pub plan: Option<MigrationPlan>,
    /// Orchestrating controller the cutover is issued against
    pub orchestrator: ControllerEndpoint,
    /// Cluster whose load balancing and redundancy are suspended for the cutover
    #[serde(default)]
    pub cluster: Option<String>,
    /// Devices that received a profile during Provisioning
    pub provisioned: BTreeSet<Serial>,
    /// Last known status per AP
    pub ap_status: BTreeMap<Serial, ApStatus>,
    /// Cutover about to be, or already, issued; job must be reconciled on restart
    pub in_flight: bool,
    /// Cutover request sent for this epoch
    pub cutover_issued: bool,
    /// When the job was confirmed and created
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
    /// Reached a terminal phase
    pub completed_at: Option<DateTime<Utc>>,
    /// Set when the job failed
    pub failure: Option<FailureReport>,
}

impl MigrationJob {
    /// Create a job in the Planning phase
    #[must_use]
    pub fn new(group: GroupId, epoch: u32, orchestrator: ControllerEndpoint) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            group,
            epoch,
            phase: JobPhase::Planning,
            history: vec![PhaseRecord {
                phase: JobPhase::Planning,
                entered_at: now,
            }],
            attempts: BTreeMap::new(),
            plan: None,
            orchestrator,
            cluster: None,
            provisioned: BTreeSet::new(),
            ap_status: BTreeMap::new(),
            in_flight: false,
            cutover_issued: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
            failure: None,
        }
    }

    /// Set the cluster the group belongs to
    #[inline]
    #[must_use]
    pub fn with_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Job will not change phase again
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Move to `to`, recording history
    ///
    /// # Errors
    /// - `IllegalTransition` if the job is terminal or `to` is not reachable
    pub fn advance(&mut self, to: JobPhase) -> Result<(), MigrationError> {
        if self.is_terminal() {
            return Err(MigrationError::IllegalTransition { from: self.phase, to });
        }
        validate_transition(self.phase, to)?;
        let now = Utc::now();
        self.phase = to;
        self.updated_at = now;
        self.history.push(PhaseRecord { phase: to, entered_at: now });
        if to.is_diverted() {
            self.complete(now);
        }
        Ok(())
    }

    /// Mark the Finalize phase done
    ///
    /// # Errors
    /// - `IllegalTransition` if the job is not in Finalize
    pub fn finish(&mut self) -> Result<(), MigrationError> {
        if self.phase != JobPhase::Finalize || self.is_terminal() {
            return Err(MigrationError::IllegalTransition {
                from: self.phase,
                to: JobPhase::Finalize,
            });
        }
        self.complete(Utc::now());
        Ok(())
    }

    /// Fail the job with a report built from the current status map
    ///
    /// # Errors
    /// - `IllegalTransition` if the job is already terminal
    pub fn fail(&mut self, error: &MigrationError) -> Result<&FailureReport, MigrationError> {
        let phase = self.phase;
        let breakdown = error
            .breakdown()
            .cloned()
            .unwrap_or_else(|| self.breakdown());
        self.advance(JobPhase::Failed)?;
        Ok(&*self.failure.insert(FailureReport {
            phase,
            message: error.to_string(),
            mutation_started: self.cutover_issued,
            breakdown,
        }))
    }

    /// Record that an attempt in the current phase was made
    pub fn record_attempts(&mut self, attempts: u32) {
        *self.attempts.entry(self.phase).or_insert(0) += attempts;
    }

    /// Current per-AP breakdown
    #[must_use]
    pub fn breakdown(&self) -> ApBreakdown {
        ApBreakdown::from_statuses(&self.ap_status)
    }

    fn complete(&mut self, at: DateTime<Utc>) {
        self.completed_at = Some(at);
        self.in_flight = false;
    }
}
