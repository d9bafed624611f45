//! Migration orchestrator
//!
//! Drives one [`MigrationJob`] per confirmed group through its phases:
//! - Planning, Precheck and Provisioning retry transient failures and can be cancelled
//! - CutoverInitiate is issued at most once per epoch, against the group's
//!   orchestrating controller, after the job is durably marked in flight
//! - CutoverVerify polls device status with backoff up to a deadline
//!
//! Every phase change is flushed to the [`LedgerStore`] before the next phase
//! runs. Independent groups run concurrently; controller access is serialized
//! by the controller adapter.

use crate::config::{CutoverConfig, MigrationConfig, RollbackPolicy, VerifyConfig};
use crate::error::MigrationError;
use crate::gate::Confirmation;
use crate::job::{ApBreakdown, ApStatus, JobId, JobPhase, MigrationJob};
use crate::ledger::{JobLedger, LedgerStore};
use crate::planner::{MigrationPlan, Planner};
use crate::readiness::ReadinessValidator;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use wlm_client::{
    retry, ActivationService, ApiError, ControllerApi, DetachRequest, Retryable, RetryPolicy,
};
use wlm_model::{AccessPoint, ClusterSnapshot, ControllerId, GroupId, Serial};

/// Failure inside a retried step
#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("{0}")]
    Rejected(String),
}

impl Retryable for StepError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::Api(error) if error.is_transient())
    }
}

/// What a phase handler asks the driver to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Next,
    Cancelled,
}

/// Runs migration jobs and owns the job ledger
pub struct MigrationOrchestrator {
    controllers: Arc<dyn ControllerApi>,
    activation: Arc<dyn ActivationService>,
    validator: ReadinessValidator,
    planner: Planner,
    retry: RetryPolicy,
    verify: VerifyConfig,
    cutover: CutoverConfig,
    rollback: RollbackPolicy,
    ledger: Mutex<JobLedger>,
    store: Arc<dyn LedgerStore>,
    cancellations: DashMap<GroupId, Arc<AtomicBool>>,
}

impl MigrationOrchestrator {
    /// Create an orchestrator, loading the ledger from `store`
    ///
    /// # Errors
    /// - `Ledger` if the stored ledger cannot be read
    /// - `Config` if the minimum firmware is malformed
    pub fn new(
        controllers: Arc<dyn ControllerApi>,
        activation: Arc<dyn ActivationService>,
        store: Arc<dyn LedgerStore>,
        config: &MigrationConfig,
    ) -> Result<Self, MigrationError> {
        let ledger = store.load()?;
        let active = ledger.active_jobs().count();
        if active > 0 {
            info!(active, "ledger holds unfinished jobs, reconcile before starting new ones");
        }
        let validator = ReadinessValidator::new(
            Arc::clone(&controllers),
            Arc::clone(&activation),
            config.min_firmware()?,
        );
        Ok(Self {
            controllers,
            activation,
            validator,
            planner: Planner::new(config.planning.clone()),
            retry: config.retry.clone(),
            verify: config.verify.clone(),
            cutover: config.cutover,
            rollback: config.rollback,
            ledger: Mutex::new(ledger),
            store,
            cancellations: DashMap::new(),
        })
    }

    /// Create a job for a confirmed group
    ///
    /// The confirmation is consumed; a later attempt needs a fresh one.
    ///
    /// # Errors
    /// - `JobAlreadyActive` if the group already has an active job
    /// - `PlanningError` if the group or its orchestrating controller is not in the snapshot
    /// - `Ledger` if the new job cannot be persisted
    pub fn start(
        &self,
        confirmation: Confirmation,
        snapshot: &ClusterSnapshot,
    ) -> Result<JobId, MigrationError> {
        let group = confirmation.group().clone();
        let planning_error = |message: &str| MigrationError::PlanningError {
            group: group.clone(),
            message: message.to_string(),
        };
        if snapshot.group(&group).is_none() {
            return Err(planning_error("group is not in the snapshot"));
        }
        let orchestrator = snapshot
            .orchestrator_for_group(&group)
            .ok_or_else(|| planning_error("group has no orchestrating controller"))?;
        let cluster = orchestrator.role.cluster().map(str::to_string);
        let orchestrator = orchestrator.endpoint();

        let mut ledger = self.ledger.lock();
        let epoch = ledger.next_epoch(&group);
        let mut job = MigrationJob::new(group.clone(), epoch, orchestrator);
        job.cluster = cluster;
        job.ap_status = snapshot
            .members_of(&group)
            .into_iter()
            .map(|ap| (ap.serial.clone(), ApStatus::Pending))
            .collect();
        let id = job.id;
        ledger.insert(job)?;
        self.store.flush(&ledger)?;
        // Under the ledger lock, so it is ordered before any `cancel` of this job
        self.cancellations
            .insert(group.clone(), Arc::new(AtomicBool::new(false)));
        info!(%group, job = %id, epoch, confirmed_at = %confirmation.confirmed_at(), "migration job created");
        Ok(id)
    }

    /// Drive a group's active job to a terminal phase
    ///
    /// Returns the archived job when it finalized or was rolled back.
    ///
    /// # Errors
    /// - `UnknownJob` if the group has no active job
    /// - The phase error that failed the job; the job is archived as `Failed`
    pub async fn run(
        &self,
        group: &GroupId,
        snapshot: &ClusterSnapshot,
    ) -> Result<MigrationJob, MigrationError> {
        self.drive(group, Some(snapshot)).await
    }

    /// Start and run a job for a confirmed group
    ///
    /// # Errors
    /// As for [`MigrationOrchestrator::start`] and [`MigrationOrchestrator::run`]
    pub async fn migrate(
        &self,
        confirmation: Confirmation,
        snapshot: &ClusterSnapshot,
    ) -> Result<MigrationJob, MigrationError> {
        let group = confirmation.group().clone();
        self.start(confirmation, snapshot)?;
        self.run(&group, snapshot).await
    }

    /// Migrate every confirmed group concurrently
    pub async fn migrate_all(
        &self,
        confirmations: Vec<Confirmation>,
        snapshot: &ClusterSnapshot,
    ) -> Vec<(GroupId, Result<MigrationJob, MigrationError>)> {
        join_all(confirmations.into_iter().map(|confirmation| async move {
            let group = confirmation.group().clone();
            let result = self.migrate(confirmation, snapshot).await;
            (group, result)
        }))
        .await
    }

    /// Request cancellation of a group's job
    ///
    /// Takes effect at the next phase boundary.
    ///
    /// # Errors
    /// - `UnknownJob` if the group has no active job
    /// - `CancellationWithdrawn` once the cutover has begun
    pub fn cancel(&self, group: &GroupId) -> Result<(), MigrationError> {
        let ledger = self.ledger.lock();
        let job = ledger
            .active(group)
            .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
        if !job.phase.is_cancellable() {
            return Err(MigrationError::CancellationWithdrawn {
                group: group.clone(),
                phase: job.phase,
            });
        }
        self.cancel_flag(group).store(true, Ordering::SeqCst);
        info!(%group, phase = ?job.phase, "cancellation requested");
        Ok(())
    }

    /// Resolve jobs left unfinished by a previous process
    ///
    /// Jobs that may have issued a cutover are resolved from live device
    /// status; the cutover is never re-sent. Jobs interrupted before cutover
    /// are rolled back.
    pub async fn reconcile(&self) -> Vec<(GroupId, Result<MigrationJob, MigrationError>)> {
        let pending: Vec<(GroupId, JobPhase, bool)> = self
            .ledger
            .lock()
            .active_jobs()
            .map(|job| (job.group.clone(), job.phase, job.in_flight))
            .collect();

        join_all(pending.into_iter().map(|(group, phase, in_flight)| async move {
            let result = self.reconcile_job(&group, phase, in_flight).await;
            (group, result)
        }))
        .await
    }

    /// Ask the orchestrating controller to abandon a failed conversion
    ///
    /// Only for groups whose latest job failed after the cutover was issued.
    /// The abort clears every pending conversion on the controller, so it is
    /// refused while another group's cutover there is still running. Cluster
    /// load balancing and redundancy are restored afterwards.
    ///
    /// # Errors
    /// - `UnknownJob` if the group has no job
    /// - `NothingToAbort` if the latest job did not fail after cutover
    /// - `ConversionInProgress` if other groups are converting on the same controller
    /// - Controller errors from the abort request
    pub async fn abort_conversion(&self, group: &GroupId) -> Result<(), MigrationError> {
        let job = self
            .job(group)
            .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
        if job.phase != JobPhase::Failed || !job.cutover_issued {
            return Err(MigrationError::NothingToAbort { group: group.clone() });
        }
        let others = self.converting_on(&job.orchestrator.id, group);
        if !others.is_empty() {
            return Err(MigrationError::ConversionInProgress {
                group: group.clone(),
                controller: job.orchestrator.id.clone(),
                others,
            });
        }
        warn!(%group, controller = %job.orchestrator.id, "aborting conversion on operator request");
        self.controllers
            .cancel_conversion(&job.orchestrator)
            .await
            .map_err(|e| MigrationError::from_api(&job.orchestrator.id, e))?;
        self.restore_cluster(&job).await;
        Ok(())
    }

    /// Snapshot of the active jobs
    #[must_use]
    pub fn active_jobs(&self) -> Vec<MigrationJob> {
        self.ledger.lock().active_jobs().cloned().collect()
    }

    /// Active job for a group, else its most recent archived job
    #[must_use]
    pub fn job(&self, group: &GroupId) -> Option<MigrationJob> {
        self.ledger.lock().latest(group).cloned()
    }

    /// Group has completed migration
    #[must_use]
    pub fn is_migrated(&self, group: &GroupId) -> bool {
        self.ledger.lock().is_migrated(group)
    }

    /// Readiness validator sharing this orchestrator's clients
    #[must_use]
    pub fn validator(&self) -> &ReadinessValidator {
        &self.validator
    }

    /// Copy of the whole ledger
    #[must_use]
    pub fn ledger(&self) -> JobLedger {
        self.ledger.lock().clone()
    }

    #[instrument(skip_all, fields(%group))]
    async fn drive(
        &self,
        group: &GroupId,
        snapshot: Option<&ClusterSnapshot>,
    ) -> Result<MigrationJob, MigrationError> {
        loop {
            let phase = self.read(group, |job| job.phase)?;
            let step = match phase {
                JobPhase::Planning => self.plan(group, snapshot),
                JobPhase::Precheck => self.precheck(group).await,
                JobPhase::Provisioning => self.provision(group).await,
                JobPhase::CutoverInitiate => self.initiate_cutover(group).await,
                JobPhase::CutoverVerify => self.verify(group).await,
                JobPhase::Finalize => return self.finalize(group).await,
                JobPhase::RolledBack | JobPhase::Failed => {
                    return Err(MigrationError::IllegalTransition {
                        from: phase,
                        to: JobPhase::Finalize,
                    })
                }
            };
            match step {
                Ok(Flow::Next) => {}
                Ok(Flow::Cancelled) => return self.roll_back(group).await,
                Err(error) => return Err(self.fail(group, error)),
            }
        }
    }

    fn plan(&self, group: &GroupId, snapshot: Option<&ClusterSnapshot>) -> Result<Flow, MigrationError> {
        if self.is_cancel_requested(group) {
            return Ok(Flow::Cancelled);
        }
        let snapshot = snapshot.ok_or_else(|| MigrationError::PlanningError {
            group: group.clone(),
            message: "no inventory snapshot to plan from".into(),
        })?;
        let plan = self.planner.plan_from_snapshot(group, snapshot)?;
        debug!(%group, devices = plan.assignments.len(), "plan computed");
        self.mutate(group, |job| {
            job.record_attempts(1);
            job.ap_status = pending_statuses(&plan);
            job.plan = Some(plan);
        })?;
        self.advance(group, JobPhase::Precheck)
    }

    async fn precheck(&self, group: &GroupId) -> Result<Flow, MigrationError> {
        if self.is_cancel_requested(group) {
            return Ok(Flow::Cancelled);
        }
        let (plan, orchestrator) = self.read(group, |job| (job.plan.clone(), job.orchestrator.clone()))?;
        let plan = plan.ok_or_else(|| MigrationError::PrecheckFailed {
            group: group.clone(),
            message: "job has no plan".into(),
        })?;

        let attempts = AtomicU32::new(0);
        let outcome = retry(&self.retry, "precheck", |attempt| {
            attempts.store(attempt, Ordering::Relaxed);
            let (plan, orchestrator) = (&plan, &orchestrator);
            async move {
                self.validator
                    .check_group_live(plan, orchestrator)
                    .await?
                    .map_err(StepError::Rejected)
            }
        })
        .await;
        self.mutate(group, |job| job.record_attempts(attempts.load(Ordering::Relaxed)))?;

        let members = match outcome {
            Ok(members) => members,
            Err(StepError::Api(ApiError::Unauthorized(message))) => {
                return Err(MigrationError::AuthenticationFailed {
                    controller: orchestrator.id,
                    message,
                })
            }
            Err(error) => {
                return Err(MigrationError::PrecheckFailed {
                    group: group.clone(),
                    message: error.to_string(),
                })
            }
        };

        let planned: BTreeSet<&Serial> = plan.serials().collect();
        let live: BTreeSet<&Serial> = members.iter().map(|ap| &ap.serial).collect();
        if planned != live {
            warn!(%group, planned = planned.len(), live = live.len(), "group membership changed, re-planning");
            let refs: Vec<&AccessPoint> = members.iter().collect();
            let replanned = self
                .planner
                .plan(group, &refs, plan.cluster.clone(), |ap| {
                    plan.cluster.iter().find(|c| c.id == ap.controller)
                })
                .map_err(|e| MigrationError::PrecheckFailed {
                    group: group.clone(),
                    message: e.to_string(),
                })?;
            self.mutate(group, |job| {
                job.ap_status = pending_statuses(&replanned);
                job.plan = Some(replanned);
            })?;
        }
        self.advance(group, JobPhase::Provisioning)
    }

    async fn provision(&self, group: &GroupId) -> Result<Flow, MigrationError> {
        let (plan, done) = self.read(group, |job| (job.plan.clone(), job.provisioned.clone()))?;
        let plan = plan.ok_or_else(|| MigrationError::ProvisioningError {
            group: group.clone(),
            serial: None,
            message: "job has no plan".into(),
        })?;

        for assignment in plan.assignments.iter().filter(|a| !done.contains(&a.serial)) {
            if self.is_cancel_requested(group) {
                return Ok(Flow::Cancelled);
            }
            let attempts = AtomicU32::new(0);
            let outcome = retry(&self.retry, "provision", |attempt| {
                attempts.store(attempt, Ordering::Relaxed);
                async move {
                    if !self.activation.is_enrolled(&assignment.serial).await? {
                        return Err(StepError::Rejected("device not enrolled".into()));
                    }
                    self.activation
                        .assign_profile(&assignment.serial, &assignment.profile)
                        .await?;
                    Ok::<(), StepError>(())
                }
            })
            .await;

            let serial = assignment.serial.clone();
            self.mutate(group, |job| job.record_attempts(attempts.load(Ordering::Relaxed)))?;
            match outcome {
                Ok(()) => {
                    debug!(%group, %serial, profile = %assignment.profile, "profile assigned");
                    self.mutate(group, |job| {
                        job.provisioned.insert(serial);
                    })?;
                }
                Err(error) => {
                    return Err(MigrationError::ProvisioningError {
                        group: group.clone(),
                        serial: Some(serial),
                        message: error.to_string(),
                    })
                }
            }
        }
        self.advance(group, JobPhase::CutoverInitiate)
    }

    async fn initiate_cutover(&self, group: &GroupId) -> Result<Flow, MigrationError> {
        let (plan, orchestrator, cluster, issued) = self.read(group, |job| {
            (
                job.plan.clone(),
                job.orchestrator.clone(),
                job.cluster.clone(),
                job.cutover_issued,
            )
        })?;
        let plan = plan.ok_or_else(|| MigrationError::CutoverError {
            group: group.clone(),
            message: "job has no plan".into(),
            breakdown: ApBreakdown::default(),
        })?;
        if issued {
            return Err(MigrationError::CutoverError {
                group: group.clone(),
                message: "cutover already issued for this epoch".into(),
                breakdown: self.read(group, MigrationJob::breakdown)?,
            });
        }

        self.mutate(group, |job| {
            job.in_flight = true;
            job.cutover_issued = true;
            job.record_attempts(1);
        })?;
        self.persist()?;

        match cluster.as_deref() {
            Some(cluster) => {
                if let Err(error) = self.controllers.prepare_cluster(&orchestrator, cluster).await {
                    return Err(MigrationError::CutoverError {
                        group: group.clone(),
                        message: format!("cluster {cluster} not prepared: {error}"),
                        breakdown: self.read(group, MigrationJob::breakdown)?,
                    });
                }
            }
            None => warn!(%group, "cluster unknown, load balancing and redundancy left as is"),
        }

        let request = DetachRequest {
            group: group.clone(),
            max_downloads: self.cutover.max_downloads,
            pre_validation: self.cutover.pre_validation,
        };
        info!(%group, controller = %orchestrator.id, devices = plan.assignments.len(), "issuing cutover");
        match self.controllers.detach_group(&orchestrator, &request).await {
            Ok(()) => self.advance(group, JobPhase::CutoverVerify),
            Err(error) => {
                let statuses = self.poll_devices(&plan).await;
                let breakdown = ApBreakdown::from_statuses(&statuses);
                self.mutate(group, |job| job.ap_status = statuses)?;
                Err(MigrationError::CutoverError {
                    group: group.clone(),
                    message: error.to_string(),
                    breakdown,
                })
            }
        }
    }

    async fn verify(&self, group: &GroupId) -> Result<Flow, MigrationError> {
        let plan = self
            .read(group, |job| job.plan.clone())?
            .ok_or_else(|| MigrationError::CutoverError {
                group: group.clone(),
                message: "job has no plan".into(),
                breakdown: ApBreakdown::default(),
            })?;

        let deadline = Instant::now() + self.verify.timeout();
        let mut interval = self.verify.initial_interval();
        let mut polls = 0;
        loop {
            polls += 1;
            let statuses = self.poll_devices(&plan).await;
            let breakdown = ApBreakdown::from_statuses(&statuses);
            let settled = statuses.values().all(ApStatus::is_settled);
            self.mutate(group, |job| job.ap_status = statuses)?;
            self.persist()?;
            debug!(%group, polls, %breakdown, "verification poll");

            if breakdown.is_complete() {
                self.mutate(group, |job| job.record_attempts(polls))?;
                return self.advance(group, JobPhase::Finalize);
            }
            if settled {
                return Err(MigrationError::CutoverError {
                    group: group.clone(),
                    message: "devices reported conversion failure".into(),
                    breakdown,
                });
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(MigrationError::VerifyTimeout {
                    group: group.clone(),
                    breakdown,
                });
            }
            tokio::time::sleep(interval.min(deadline - now)).await;
            interval = self.verify.next_interval(interval);
        }
    }

    async fn finalize(&self, group: &GroupId) -> Result<MigrationJob, MigrationError> {
        let job = {
            let mut ledger = self.ledger.lock();
            let job = ledger
                .active_mut(group)
                .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
            job.finish()?;
            let job = ledger
                .archive(group)
                .cloned()
                .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
            self.store.flush(&ledger)?;
            job
        };

        self.cancellations.remove(group);
        info!(%group, job = %job.id, devices = job.ap_status.len(), "group migrated");
        self.restore_cluster(&job).await;
        Ok(job)
    }

    /// Re-enable load balancing and redundancy unless another cutover on the
    /// same controller is still running
    async fn restore_cluster(&self, job: &MigrationJob) {
        let Some(cluster) = job.cluster.as_deref() else {
            return;
        };
        let others = self.converting_on(&job.orchestrator.id, &job.group);
        if !others.is_empty() {
            debug!(group = %job.group, %cluster, converting = others.len(), "cluster restore deferred");
            return;
        }
        if let Err(error) = self.controllers.restore_cluster(&job.orchestrator, cluster).await {
            warn!(group = %job.group, %cluster, %error, "failed to restore cluster settings");
        }
    }

    /// Other active groups with a cutover issued against `controller`
    fn converting_on(&self, controller: &ControllerId, except: &GroupId) -> Vec<GroupId> {
        self.ledger
            .lock()
            .active_jobs()
            .filter(|job| job.cutover_issued && job.orchestrator.id == *controller && job.group != *except)
            .map(|job| job.group.clone())
            .collect()
    }

    async fn roll_back(&self, group: &GroupId) -> Result<MigrationJob, MigrationError> {
        let provisioned = self.read(group, |job| job.provisioned.clone())?;
        if self.rollback.revoke_profiles {
            for serial in &provisioned {
                if let Err(error) = self.activation.revoke_profile(serial).await {
                    warn!(%group, %serial, %error, "failed to revoke profile during rollback");
                }
            }
        }

        let job = {
            let mut ledger = self.ledger.lock();
            let job = ledger
                .active_mut(group)
                .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
            job.advance(JobPhase::RolledBack)?;
            let job = ledger
                .archive(group)
                .cloned()
                .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
            self.store.flush(&ledger)?;
            job
        };
        self.cancellations.remove(group);
        info!(%group, job = %job.id, provisioned = provisioned.len(), "job rolled back");
        Ok(job)
    }

    /// Archive the job as failed and hand the error back
    fn fail(&self, group: &GroupId, error: MigrationError) -> MigrationError {
        {
            let mut ledger = self.ledger.lock();
            if let Some(job) = ledger.active_mut(group) {
                match job.fail(&error) {
                    Ok(report) => error!(
                        %group,
                        phase = ?report.phase,
                        mutation_started = report.mutation_started,
                        breakdown = %report.breakdown,
                        %error,
                        "migration job failed"
                    ),
                    Err(transition) => error!(%group, %transition, "could not mark job failed"),
                }
                ledger.archive(group);
            }
            if let Err(flush) = self.store.flush(&ledger) {
                error!(%group, %flush, "failed to persist job failure");
            }
        }
        self.cancellations.remove(group);

        if error.is_fatal() {
            self.halt_cancellable();
        }
        error
    }

    /// Cancel every job that can still be cancelled
    fn halt_cancellable(&self) {
        let ledger = self.ledger.lock();
        for job in ledger.active_jobs().filter(|job| job.phase.is_cancellable()) {
            warn!(group = %job.group, "halting job after fatal error");
            self.cancel_flag(&job.group).store(true, Ordering::SeqCst);
        }
    }

    async fn reconcile_job(
        &self,
        group: &GroupId,
        phase: JobPhase,
        in_flight: bool,
    ) -> Result<MigrationJob, MigrationError> {
        if !in_flight && !phase.is_post_cutover() {
            info!(%group, ?phase, "job interrupted before cutover, rolling back");
            return self.roll_back(group).await;
        }

        if phase == JobPhase::CutoverInitiate && !in_flight {
            info!(%group, "job interrupted before the cutover was sent");
            let error = MigrationError::CutoverError {
                group: group.clone(),
                message: "interrupted before the cutover was sent".into(),
                breakdown: self.read(group, MigrationJob::breakdown)?,
            };
            return Err(self.fail(group, error));
        }

        info!(%group, ?phase, "reconciling in-flight job from live device status");
        if phase == JobPhase::CutoverInitiate {
            if let Err(error) = self.advance(group, JobPhase::CutoverVerify) {
                return Err(self.fail(group, error));
            }
        }
        self.drive(group, None).await
    }

    /// Query every planned device through its hosting controller
    async fn poll_devices(&self, plan: &MigrationPlan) -> BTreeMap<Serial, ApStatus> {
        let queries = plan.by_controller().into_iter().map(|(endpoint, assignments)| async move {
            let aps: Vec<AccessPoint> = assignments
                .iter()
                .map(|a| a.access_point(&plan.group))
                .collect();
            let result = self.controllers.device_status(endpoint, &aps).await;
            (endpoint, assignments, result)
        });

        let mut statuses = BTreeMap::new();
        for (endpoint, assignments, result) in join_all(queries).await {
            match result {
                Ok(states) => {
                    for assignment in assignments {
                        let status = states
                            .get(&assignment.serial)
                            .map_or(ApStatus::Pending, ApStatus::from_device);
                        statuses.insert(assignment.serial.clone(), status);
                    }
                }
                Err(error) => {
                    warn!(controller = %endpoint.id, %error, "device status query failed");
                    for assignment in assignments {
                        statuses.insert(assignment.serial.clone(), ApStatus::Unreachable);
                    }
                }
            }
        }
        statuses
    }

    /// Move the job forward and flush
    ///
    /// Forward moves out of a cancellable phase honor a pending cancellation
    /// under the same lock that `cancel` takes.
    fn advance(&self, group: &GroupId, to: JobPhase) -> Result<Flow, MigrationError> {
        let mut ledger = self.ledger.lock();
        let job = ledger
            .active_mut(group)
            .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
        if job.phase.is_cancellable() && !to.is_diverted() && self.is_cancel_requested(group) {
            return Ok(Flow::Cancelled);
        }
        let from = job.phase;
        job.advance(to)?;
        info!(%group, epoch = job.epoch, ?from, ?to, "phase advanced");
        self.store.flush(&ledger)?;
        Ok(Flow::Next)
    }

    fn read<R>(&self, group: &GroupId, f: impl FnOnce(&MigrationJob) -> R) -> Result<R, MigrationError> {
        self.ledger
            .lock()
            .active(group)
            .map(f)
            .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })
    }

    fn mutate<R>(&self, group: &GroupId, f: impl FnOnce(&mut MigrationJob) -> R) -> Result<R, MigrationError> {
        let mut ledger = self.ledger.lock();
        let job = ledger
            .active_mut(group)
            .ok_or_else(|| MigrationError::UnknownJob { group: group.clone() })?;
        let result = f(job);
        job.updated_at = chrono::Utc::now();
        Ok(result)
    }

    fn persist(&self) -> Result<(), MigrationError> {
        let ledger = self.ledger.lock();
        self.store.flush(&ledger)
    }

    fn cancel_flag(&self, group: &GroupId) -> Arc<AtomicBool> {
        Arc::clone(self.cancellations.entry(group.clone()).or_default().value())
    }

    fn is_cancel_requested(&self, group: &GroupId) -> bool {
        self.cancellations
            .get(group)
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

fn pending_statuses(plan: &MigrationPlan) -> BTreeMap<Serial, ApStatus> {
    plan.serials().map(|s| (s.clone(), ApStatus::Pending)).collect()
}
