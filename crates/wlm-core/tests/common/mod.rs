#![allow(dead_code)]

use std::sync::Arc;
use wlm_core::{
    ConfirmationGate, InventoryCollector, JobLedger, LedgerStore, MemoryLedgerStore,
    MigrationConfig, MigrationJob, MigrationOrchestrator, JobPhase, Planner, ValidationReport,
};
use wlm_model::{ClusterSnapshot, GroupId};
use wlm_test_utils::{test_config, FakeActivation, FakeCluster};

/// A fake cluster, activation service and orchestrator wired together
pub struct Harness {
    pub cluster: Arc<FakeCluster>,
    pub activation: Arc<FakeActivation>,
    pub store: Arc<MemoryLedgerStore>,
    pub config: MigrationConfig,
    pub snapshot: ClusterSnapshot,
    pub orchestrator: MigrationOrchestrator,
}

impl Harness {
    /// Every AP enrolled, default test timings
    pub async fn new(cluster: FakeCluster) -> Self {
        Self::build(cluster, |config| config, MemoryLedgerStore::new()).await
    }

    pub async fn build(
        cluster: FakeCluster,
        configure: impl FnOnce(MigrationConfig) -> MigrationConfig,
        store: MemoryLedgerStore,
    ) -> Self {
        let cluster = Arc::new(cluster);
        let serials = cluster.serials();
        let activation = Arc::new(FakeActivation::enrolling(serials.iter().map(String::as_str)));
        let config = configure(test_config(&cluster));
        let snapshot = InventoryCollector::new(cluster.clone())
            .collect(&config.controllers)
            .await
            .expect("inventory")
            .into_snapshot();
        let store = Arc::new(store);
        let orchestrator =
            MigrationOrchestrator::new(cluster.clone(), activation.clone(), store.clone(), &config)
                .expect("orchestrator");
        Self {
            cluster,
            activation,
            store,
            config,
            snapshot,
            orchestrator,
        }
    }

    /// A new orchestrator over the same store, as after a process restart
    pub fn restart(&self) -> MigrationOrchestrator {
        MigrationOrchestrator::new(
            self.cluster.clone(),
            self.activation.clone(),
            self.store.clone(),
            &self.config,
        )
        .expect("orchestrator")
    }

    pub async fn validate(&self) -> ValidationReport {
        self.orchestrator.validator().validate(&self.snapshot).await
    }

    /// Validate, propose and confirm one group through the gate
    pub async fn confirmed_gate(&self, group: &str) -> ConfirmationGate {
        let report = self.validate().await;
        let mut gate = ConfirmationGate::new();
        gate.propose(&report);
        assert!(gate.confirm(&GroupId::new(group)), "{group} should be confirmable");
        gate
    }

    /// Seed the store with a planned job advanced to `phase`, bypassing execution
    pub fn seed_job(&self, group: &str, phase: JobPhase, configure: impl FnOnce(&mut MigrationJob)) {
        let group = GroupId::new(group);
        let plan = Planner::new(self.config.planning.clone())
            .plan_from_snapshot(&group, &self.snapshot)
            .expect("plan");
        let orchestrator = self
            .snapshot
            .orchestrator_for_group(&group)
            .expect("orchestrator");
        let mut job = MigrationJob::new(group, 1, orchestrator.endpoint());
        if let Some(cluster) = orchestrator.role.cluster() {
            job = job.with_cluster(cluster);
        }
        job.ap_status = plan
            .serials()
            .map(|s| (s.clone(), wlm_core::ApStatus::Pending))
            .collect();
        job.plan = Some(plan);
        for next in JobPhase::SUCCESS_PATH.iter().skip(1) {
            if job.phase == phase {
                break;
            }
            job.advance(*next).expect("success path");
        }
        configure(&mut job);

        let mut ledger = self.store.load().expect("load");
        ledger.insert(job).expect("insert");
        self.store.flush(&ledger).expect("flush");
    }
}

/// Empty ledger store
pub fn empty_store() -> MemoryLedgerStore {
    MemoryLedgerStore::with_ledger(JobLedger::default())
}
