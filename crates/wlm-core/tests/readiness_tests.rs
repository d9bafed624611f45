mod common;

use common::Harness;
use wlm_core::ValidationFailure;
use wlm_model::{ControllerId, FirmwareVersion, GroupId};
use wlm_test_utils::{ap, two_member_cluster, FakeCluster, FakeController};

fn failures_of(report: &wlm_core::ValidationReport, id: &str) -> Vec<ValidationFailure> {
    report
        .verdict(&ControllerId::new(id))
        .map(|v| v.failures.iter().copied().collect())
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn old_firmware_lacks_capability() {
    let cluster = FakeCluster::new()
        .with_controller(
            FakeController::orchestrator("md-1", "c1").with_firmware(FirmwareVersion::new([8, 6, 0, 4])),
        )
        .with_access_point(ap("CN001", "AP-515", "lobby", "md-1"));
    let h = Harness::new(cluster).await;

    let report = h.validate().await;
    assert_eq!(failures_of(&report, "md-1"), vec![ValidationFailure::MissingCapability]);
    assert!(report.candidates().next().is_none());
}

#[tokio::test(start_paused = true)]
async fn cluster_without_orchestrator_is_rejected() {
    let cluster = FakeCluster::new()
        .with_controller(FakeController::member("md-1", "c1"))
        .with_controller(FakeController::member("md-2", "c1"))
        .with_access_point(ap("CN001", "AP-515", "lobby", "md-1"));
    let h = Harness::new(cluster).await;

    let report = h.validate().await;
    assert!(failures_of(&report, "md-1").contains(&ValidationFailure::NoOrchestratingMember));
    assert!(!report.is_candidate(&GroupId::new("lobby")));
}

#[tokio::test(start_paused = true)]
async fn unenrolled_device_fails_its_controller() {
    let h = Harness::new(two_member_cluster()).await;
    h.activation.unenroll("CN003");

    let report = h.validate().await;
    let verdict = report.verdict(&ControllerId::new("md-2")).unwrap();
    assert_eq!(verdict.unenrolled.len(), 1);
    assert!(verdict.failures.contains(&ValidationFailure::NotActivated));
    assert!(report.passed(&ControllerId::new("md-1")));
    assert!(!report.is_candidate(&GroupId::new("lobby")));
}

#[tokio::test(start_paused = true)]
async fn no_internet_is_reported_separately_from_dns() {
    let cluster = two_member_cluster()
        .with_controller(FakeController::member("md-3", "c1").without_internet())
        .with_access_point(ap("CN010", "AP-515", "annex", "md-3"));
    let h = Harness::new(cluster).await;

    let report = h.validate().await;
    assert_eq!(failures_of(&report, "md-3"), vec![ValidationFailure::NoInternet]);
    assert!(report.is_candidate(&GroupId::new("lobby")));
    assert!(!report.is_candidate(&GroupId::new("annex")));
}

#[tokio::test(start_paused = true)]
async fn activation_outage_counts_as_not_activated() {
    let h = Harness::new(two_member_cluster()).await;
    h.activation.set_unavailable(true);

    let report = h.validate().await;
    for id in ["md-1", "md-2"] {
        assert!(failures_of(&report, id).contains(&ValidationFailure::NotActivated));
    }
    assert!(report.candidates().next().is_none());
}
