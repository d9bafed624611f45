mod common;

use common::Harness;
use std::sync::Arc;
use wlm_core::{FileLedgerStore, JobPhase, LedgerStore, MigrationOrchestrator};
use wlm_model::GroupId;
use wlm_test_utils::{confirm, two_member_cluster};

#[tokio::test(start_paused = true)]
async fn migrated_state_survives_restart_through_file_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("ledger.json");
    let h = Harness::new(two_member_cluster()).await;

    let store = Arc::new(FileLedgerStore::new(&path));
    let orchestrator =
        MigrationOrchestrator::new(h.cluster.clone(), h.activation.clone(), store, &h.config)
            .unwrap();
    orchestrator.migrate(confirm("lobby"), &h.snapshot).await.unwrap();
    drop(orchestrator);

    let reloaded = FileLedgerStore::new(&path).load().unwrap();
    let lobby = GroupId::new("lobby");
    assert!(reloaded.is_migrated(&lobby));
    assert_eq!(reloaded.latest(&lobby).unwrap().phase, JobPhase::Finalize);
    assert_eq!(reloaded.active_jobs().count(), 0);

    let restarted = MigrationOrchestrator::new(
        h.cluster.clone(),
        h.activation.clone(),
        Arc::new(FileLedgerStore::new(&path)),
        &h.config,
    )
    .unwrap();
    assert!(restarted.is_migrated(&lobby));
    assert!(restarted.reconcile().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn every_phase_change_is_flushed() {
    let h = Harness::new(two_member_cluster()).await;
    h.orchestrator.migrate(confirm("lobby"), &h.snapshot).await.unwrap();

    // creation, five phase changes and the final archive
    assert!(h.store.flush_count() >= 7);
    let stored = h.store.snapshot().unwrap();
    assert!(stored.is_migrated(&GroupId::new("lobby")));
}
