//! Testing utilities for the WLM workspace
//!
//! In-memory stand-ins for the remote services, with fault injection and
//! call counters, plus small fixtures for common cluster shapes.

#![allow(missing_docs)]

mod activation;
mod cluster;

pub use activation::FakeActivation;
pub use cluster::{FakeCluster, FakeController};

use std::time::Duration;
use wlm_client::RetryPolicy;
use wlm_core::{Confirmation, ConfirmationGate, MigrationConfig, ValidationReport, VerifyConfig};
use wlm_model::{AccessPoint, ControllerEndpoint, ControllerId, GroupId, Serial};

/// Access point fixture with a derived name and MAC
pub fn ap(serial: &str, model: &str, group: &str, controller: &str) -> AccessPoint {
    AccessPoint::new(
        Serial::new(serial),
        model,
        GroupId::new(group),
        ControllerId::new(controller),
    )
    .with_name(format!("ap-{}", serial.to_ascii_lowercase()))
    .with_mac(format!("00:1a:1e:00:00:{:02x}", serial.bytes().map(u32::from).sum::<u32>() % 256))
}

/// Two-member cluster `c1` (md-1 orchestrates) hosting group `lobby` with three APs
pub fn two_member_cluster() -> FakeCluster {
    FakeCluster::new()
        .with_controller(FakeController::orchestrator("md-1", "c1"))
        .with_controller(FakeController::member("md-2", "c1"))
        .with_access_point(ap("CN001", "AP-515", "lobby", "md-1"))
        .with_access_point(ap("CN002", "AP-515", "lobby", "md-2"))
        .with_access_point(ap("CN003", "AP-335", "lobby", "md-2"))
}

/// Configuration pointing at every controller of a fake cluster, with fast timings
pub fn test_config(cluster: &FakeCluster) -> MigrationConfig {
    let config = cluster
        .endpoints()
        .into_iter()
        .fold(MigrationConfig::default(), MigrationConfig::with_controller);
    config
        .with_retry(RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 100,
            multiplier: 2.0,
        })
        .with_verify(VerifyConfig {
            timeout_secs: 60,
            poll_initial_ms: 1_000,
            poll_max_ms: 5_000,
            poll_multiplier: 2.0,
        })
}

/// Operator confirmation for a group, as the gate would issue it
pub fn confirm(group: &str) -> Confirmation {
    let group = GroupId::new(group);
    let mut gate = ConfirmationGate::new();
    gate.propose(&ValidationReport::with_candidates([group.clone()]));
    gate.confirm(&group);
    gate.take_confirmation(&group)
        .expect("proposed and confirmed group yields a token")
}

/// Endpoint fixture
pub fn endpoint(id: &str) -> ControllerEndpoint {
    ControllerEndpoint::new(id, format!("{id}.example.net"))
}

/// Short duration helper for paused-clock tests
pub fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}
