use pretty_assertions::assert_eq;
use std::sync::Arc;
use wlm_core::{Inventory, InventoryCollector, MigrationError};
use wlm_model::{ControllerId, GroupId};
use wlm_test_utils::{ap, endpoint, test_config, two_member_cluster, FakeController};

#[tokio::test]
async fn complete_inventory_groups_access_points() {
    let cluster = Arc::new(two_member_cluster());
    let config = test_config(&cluster);
    let inventory = InventoryCollector::new(cluster)
        .collect(&config.controllers)
        .await
        .unwrap();
    assert!(!inventory.is_partial());

    let snapshot = inventory.into_complete().unwrap();
    let lobby = snapshot.group(&GroupId::new("lobby")).unwrap();
    assert_eq!(lobby.members.len(), 3);
    assert_eq!(lobby.controllers.len(), 2);
    assert_eq!(
        snapshot.orchestrator_for_group(&lobby.id).unwrap().id,
        ControllerId::new("md-1")
    );
    assert_eq!(snapshot.model_counts()["AP-515"], 2);
    assert!(snapshot.controller(&ControllerId::new("md-1")).unwrap().firmware.is_some());
}

#[tokio::test]
async fn unreachable_member_yields_partial_inventory() {
    let cluster = Arc::new(
        two_member_cluster().with_controller(FakeController::member("md-3", "c1").unreachable()),
    );
    let config = test_config(&cluster);
    let inventory = InventoryCollector::new(cluster)
        .collect(&config.controllers)
        .await
        .unwrap();

    let Inventory::Partial { snapshot, unreachable } = &inventory else {
        panic!("expected partial inventory");
    };
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].0, ControllerId::new("md-3"));
    assert_eq!(snapshot.unreachable(), vec![&ControllerId::new("md-3")]);
    assert!(matches!(
        inventory.into_complete(),
        Err(MigrationError::PartialInventory { .. })
    ));
}

#[tokio::test]
async fn no_reachable_controller_is_an_error() {
    let cluster = Arc::new(
        wlm_test_utils::FakeCluster::new()
            .with_controller(FakeController::orchestrator("md-1", "c1").unreachable())
            .with_access_point(ap("CN001", "AP-515", "lobby", "md-1")),
    );
    let config = test_config(&cluster);
    let err = InventoryCollector::new(cluster)
        .collect(&config.controllers)
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::ControllerUnreachable { ref controllers, .. } if controllers.len() == 1));
    assert!(err.is_fatal());
}

#[tokio::test]
async fn empty_groups_are_attributed_to_reporting_controller() {
    let cluster = Arc::new(
        wlm_test_utils::FakeCluster::new()
            .with_controller(FakeController::orchestrator("md-1", "c1").with_empty_group("spare"))
            .with_access_point(ap("CN001", "AP-515", "lobby", "md-1")),
    );
    let config = test_config(&cluster);
    let snapshot = InventoryCollector::new(cluster)
        .collect(&config.controllers)
        .await
        .unwrap()
        .into_snapshot();
    let spare = snapshot.group(&GroupId::new("spare")).unwrap();
    assert!(spare.members.is_empty());
    assert!(spare.controllers.contains(&ControllerId::new("md-1")));
}

#[tokio::test]
async fn conductor_switch_list_supplies_controllers() {
    let cluster = Arc::new(two_member_cluster().with_conductor(endpoint("mm-1")));
    let inventory = InventoryCollector::new(cluster)
        .collect_from_conductor(&endpoint("mm-1"))
        .await
        .unwrap();
    assert!(!inventory.is_partial());

    let snapshot = inventory.into_snapshot();
    assert_eq!(snapshot.controllers().count(), 2);
    assert_eq!(snapshot.group(&GroupId::new("lobby")).unwrap().members.len(), 3);
}

#[tokio::test]
async fn controllers_down_in_switch_list_are_reported_unreachable() {
    let cluster = two_member_cluster().with_conductor(endpoint("mm-1"));
    cluster.down_in_switch_list("md-2");
    let inventory = InventoryCollector::new(Arc::new(cluster))
        .collect_from_conductor(&endpoint("mm-1"))
        .await
        .unwrap();

    let Inventory::Partial { snapshot, unreachable } = &inventory else {
        panic!("expected partial inventory");
    };
    let md2 = ControllerId::new("md-2");
    assert_eq!(unreachable.len(), 1);
    assert_eq!(unreachable[0].0, md2);
    assert!(unreachable[0].1.contains("down"));
    assert!(!snapshot.controller(&md2).unwrap().is_reachable());
    assert!(snapshot.controller(&ControllerId::new("md-1")).unwrap().is_reachable());
}

#[tokio::test]
async fn unknown_conductor_is_unreachable() {
    let cluster = Arc::new(two_member_cluster());
    let err = InventoryCollector::new(cluster)
        .collect_from_conductor(&endpoint("mm-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::ControllerUnreachable { ref controllers, .. } if controllers[0] == ControllerId::new("mm-1")));
}
