//! Run results
//!
//! Accumulates what happened during a run into a serializable
//! [`RunSummary`] and logs it.

use crate::error::ValidationFailure;
use crate::inventory::Inventory;
use crate::job::{ApBreakdown, FailureReport, JobId, JobPhase, MigrationJob};
use crate::readiness::ValidationReport;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};
use wlm_model::{ControllerId, GroupId};

/// Inventory figures
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventorySummary {
    /// Controllers queried
    pub controllers: usize,
    /// Controllers that did not answer
    pub unreachable: Vec<ControllerId>,
    /// AP groups found
    pub groups: usize,
    /// Access points found
    pub access_points: usize,
    /// Access points per model
    pub model_counts: BTreeMap<String, usize>,
}

/// Final state of one job
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobSummary {
    /// Job id
    pub id: JobId,
    /// Group
    pub group: GroupId,
    /// Attempt number
    pub epoch: u32,
    /// Phase the job ended in
    pub phase: JobPhase,
    /// Per-AP outcome
    pub breakdown: ApBreakdown,
    /// Failure detail, if failed
    pub failure: Option<FailureReport>,
}

/// Everything recorded during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Inventory figures, once collected
    pub inventory: Option<InventorySummary>,
    /// Validation failures per controller
    pub validation_failures: BTreeMap<ControllerId, Vec<ValidationFailure>>,
    /// Groups proposed for confirmation
    pub candidates: Vec<GroupId>,
    /// Jobs, in the order they were recorded
    pub jobs: Vec<JobSummary>,
}

impl RunSummary {
    /// Groups whose job finished
    #[must_use]
    pub fn migrated(&self) -> Vec<&GroupId> {
        self.groups_in(JobPhase::Finalize)
    }

    /// Groups whose job failed
    #[must_use]
    pub fn failed(&self) -> Vec<&GroupId> {
        self.groups_in(JobPhase::Failed)
    }

    /// Groups whose job rolled back
    #[must_use]
    pub fn rolled_back(&self) -> Vec<&GroupId> {
        self.groups_in(JobPhase::RolledBack)
    }

    fn groups_in(&self, phase: JobPhase) -> Vec<&GroupId> {
        self.jobs
            .iter()
            .filter(|job| job.phase == phase)
            .map(|job| &job.group)
            .collect()
    }
}

/// Collects run results
#[derive(Debug, Default)]
pub struct ResultReporter {
    summary: RunSummary,
}

impl ResultReporter {
    /// Empty reporter
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the collected inventory
    pub fn record_inventory(&mut self, inventory: &Inventory) {
        let snapshot = inventory.snapshot();
        let summary = InventorySummary {
            controllers: snapshot.controllers().count(),
            unreachable: snapshot.unreachable().into_iter().cloned().collect(),
            groups: snapshot.groups().count(),
            access_points: snapshot.access_points().count(),
            model_counts: snapshot.model_counts(),
        };
        info!(
            controllers = summary.controllers,
            unreachable = summary.unreachable.len(),
            groups = summary.groups,
            access_points = summary.access_points,
            "inventory"
        );
        for (model, count) in &summary.model_counts {
            info!(%model, count, "access points by model");
        }
        self.summary.inventory = Some(summary);
    }

    /// Record validation results
    pub fn record_validation(&mut self, report: &ValidationReport) {
        for (controller, failure) in report.failures() {
            self.summary
                .validation_failures
                .entry(controller.clone())
                .or_default()
                .push(failure);
        }
        self.summary.candidates = report.candidates().cloned().collect();
        info!(
            candidates = self.summary.candidates.len(),
            failing_controllers = self.summary.validation_failures.len(),
            "validation"
        );
    }

    /// Record a job's final state
    pub fn record_job(&mut self, job: &MigrationJob) {
        let summary = JobSummary {
            id: job.id,
            group: job.group.clone(),
            epoch: job.epoch,
            phase: job.phase,
            breakdown: job.breakdown(),
            failure: job.failure.clone(),
        };
        match &summary.failure {
            Some(failure) => warn!(
                group = %summary.group,
                phase = ?failure.phase,
                mutation_started = failure.mutation_started,
                breakdown = %failure.breakdown,
                message = %failure.message,
                "job failed"
            ),
            None => info!(
                group = %summary.group,
                phase = ?summary.phase,
                breakdown = %summary.breakdown,
                "job finished"
            ),
        }
        self.summary.jobs.push(summary);
    }

    /// Summary so far
    #[must_use]
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Take the summary
    #[must_use]
    pub fn into_summary(self) -> RunSummary {
        self.summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ApStatus;
    use wlm_model::{ControllerEndpoint, Serial};

    fn finished_job(group: &str) -> MigrationJob {
        let mut job = MigrationJob::new(
            GroupId::new(group),
            1,
            ControllerEndpoint::new("md-1", "10.0.0.1"),
        );
        job.ap_status.insert(Serial::new("A"), ApStatus::Migrated);
        for phase in &JobPhase::SUCCESS_PATH[1..] {
            job.advance(*phase).unwrap();
        }
        job.finish().unwrap();
        job
    }

    #[test]
    fn jobs_are_bucketed_by_final_phase() {
        let mut reporter = ResultReporter::new();
        reporter.record_job(&finished_job("lobby"));

        let mut rolled = MigrationJob::new(
            GroupId::new("annex"),
            1,
            ControllerEndpoint::new("md-1", "10.0.0.1"),
        );
        rolled.advance(JobPhase::RolledBack).unwrap();
        reporter.record_job(&rolled);

        let summary = reporter.summary();
        assert_eq!(summary.migrated(), vec![&GroupId::new("lobby")]);
        assert_eq!(summary.rolled_back(), vec![&GroupId::new("annex")]);
        assert!(summary.failed().is_empty());
        assert_eq!(summary.jobs[0].breakdown.success.len(), 1);
    }

    #[test]
    fn validation_failures_grouped_by_controller() {
        let mut reporter = ResultReporter::new();
        reporter.record_validation(&ValidationReport::with_candidates([GroupId::new("lobby")]));
        assert_eq!(reporter.summary().candidates, vec![GroupId::new("lobby")]);
        assert!(reporter.summary().validation_failures.is_empty());
    }
}
