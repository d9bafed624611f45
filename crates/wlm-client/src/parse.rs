//! Controller response parsing
//!
//! Show commands come back as JSON objects keyed by table title, with free
//! text lines under `_data`. Parsers here are tolerant: unknown keys are
//! ignored and missing tables yield empty results.

use crate::controller::{ClusterMembership, Connectivity, DiscoveredController};
use crate::error::{ApiError, ApiResult};
use crate::session::Session;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use wlm_model::{
    AccessPoint, ClusterRole, ControllerEndpoint, ControllerId, DeviceState, FirmwareVersion,
    GroupId,
};

fn global_status(body: &Value) -> Option<String> {
    let status = body.get("_global_result")?.get("status")?;
    Some(match status {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}

/// Extract session tokens from a login response
///
/// # Errors
/// - `ApiError::Unauthorized` if the controller reports a non-zero status
/// - `ApiError::Decode` if the session id is missing
pub fn parse_login(body: &Value) -> ApiResult<Session> {
    match global_status(body).as_deref() {
        Some("0") => {}
        Some(other) => {
            return Err(ApiError::Unauthorized(format!("login status {other}")));
        }
        None => return Err(ApiError::Decode("login response without _global_result".into())),
    }
    let result = &body["_global_result"];
    let uid = result
        .get("UIDARUBA")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Decode("login response without UIDARUBA".into()))?;
    let token = result
        .get("X-CSRF-Token")
        .and_then(Value::as_str)
        .map(str::to_string);
    Ok(Session::new(uid, token))
}

/// Fail if a configuration write reports a non-zero status
///
/// # Errors
/// - `ApiError::CommandFailed` with the controller's status string
pub fn check_global_result(body: &Value) -> ApiResult<()> {
    match global_status(body).as_deref() {
        None | Some("0") => Ok(()),
        Some(status) => {
            let message = body["_global_result"]
                .get("status_str")
                .and_then(Value::as_str)
                .unwrap_or(status);
            Err(ApiError::CommandFailed(message.to_string()))
        }
    }
}

fn data_lines(body: &Value) -> impl Iterator<Item = &str> {
    body.get("_data")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}

fn table<'a>(body: &'a Value, title: &str) -> impl Iterator<Item = &'a serde_json::Map<String, Value>> {
    body.get(title)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
}

fn field<'a>(row: &'a serde_json::Map<String, Value>, key: &str) -> Option<&'a str> {
    row.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Parse `show lc-cluster group-membership`
#[must_use]
pub fn parse_cluster_membership(body: &Value) -> ClusterMembership {
    let mut cluster = None;
    let mut leader = false;
    let mut peers = Vec::new();

    for line in data_lines(body) {
        if let Some((_, name)) = line.split_once("Profile Name =") {
            let name = name.trim();
            if !name.is_empty() {
                cluster = Some(name.to_string());
            }
        }
        if line.contains("self") && line.contains("CONNECTED (Leader)") {
            leader = true;
        }
        if line.contains("peer") {
            if let Some(address) = line.split_whitespace().nth(1) {
                peers.push(address.to_string());
            }
        }
    }

    let role = match cluster {
        Some(cluster) if leader => ClusterRole::Orchestrator { cluster },
        Some(cluster) => ClusterRole::Member { cluster },
        None => ClusterRole::Standalone,
    };
    ClusterMembership {
        role,
        peers,
        firmware: None,
    }
}

/// Parse the running firmware out of `show version`
#[must_use]
pub fn parse_version(body: &Value) -> Option<FirmwareVersion> {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let re = VERSION.get_or_init(|| {
        Regex::new(r"Version\s+(\d+(?:\.\d+)+(?:_\d+)?)").expect("static regex")
    });
    data_lines(body)
        .find_map(|line| re.captures(line))
        .and_then(|caps| caps[1].parse().ok())
}

/// Parse `show ap-group`
#[must_use]
pub fn parse_ap_groups(body: &Value) -> Vec<GroupId> {
    table(body, "AP group List")
        .filter_map(|row| field(row, "AP Group").or_else(|| field(row, "Name")))
        .map(GroupId::from)
        .collect()
}

/// Parse `show ap database long` for APs terminating on `controller`
#[must_use]
pub fn parse_ap_database(body: &Value, controller: &ControllerId) -> Vec<AccessPoint> {
    table(body, "AP Database")
        .filter_map(|row| {
            let serial = field(row, "Serial #")?;
            let group = field(row, "Group")?;
            let model = field(row, "AP Type").unwrap_or("unknown");
            let mut ap = AccessPoint::new(serial, model, group, controller.clone());
            if let Some(name) = field(row, "Name") {
                ap = ap.with_name(name);
            }
            if let Some(mac) = field(row, "Wired MAC Address") {
                ap = ap.with_mac(mac.to_ascii_lowercase());
            }
            if field(row, "Status").is_some_and(|s| s.starts_with("Down")) {
                ap.state = DeviceState::Unknown;
            }
            Some(ap)
        })
        .collect()
}

/// Parse `show switches debug` from a conductor
///
/// Only managed controllers are kept. Rows without a name or address are
/// skipped.
#[must_use]
pub fn parse_switch_list(body: &Value) -> Vec<DiscoveredController> {
    table(body, "All Switches")
        .filter(|row| field(row, "Type").is_some_and(|t| t.eq_ignore_ascii_case("MD")))
        .filter_map(|row| {
            let name = field(row, "Name")?;
            let address = field(row, "IP Address")?;
            Some(DiscoveredController {
                endpoint: ControllerEndpoint::new(name, address),
                model: field(row, "Model").map(str::to_string),
                firmware: field(row, "Version").and_then(|v| v.parse().ok()),
                up: !field(row, "Status").is_some_and(|s| s.eq_ignore_ascii_case("down")),
            })
        })
        .collect()
}

/// Map a conversion upgrade state to a device state
#[must_use]
pub fn classify_upgrade_state(state: &str, failure_reason: Option<&str>) -> DeviceState {
    let lowered = state.to_ascii_lowercase();
    if lowered.contains("fail") || lowered.contains("error") {
        DeviceState::ConversionFailed(failure_reason.unwrap_or(state).to_string())
    } else if lowered.contains("success") || lowered.contains("complete") || lowered.contains("done")
    {
        DeviceState::ManagedByTarget
    } else if lowered.is_empty() || lowered.contains("queued") || lowered.contains("pending") {
        DeviceState::Legacy
    } else {
        DeviceState::Converting
    }
}

/// Parse `show ap convert-status`, keyed by lowercase MAC and by AP name
#[must_use]
pub fn parse_convert_status(body: &Value) -> BTreeMap<String, DeviceState> {
    let mut states = BTreeMap::new();
    for row in table(body, "AP Image Conversion Status") {
        let state = classify_upgrade_state(
            field(row, "Upgrade State").unwrap_or(""),
            field(row, "Failure Reason"),
        );
        if let Some(mac) = field(row, "AP Mac") {
            states.insert(mac.to_ascii_lowercase(), state.clone());
        }
        if let Some(name) = field(row, "AP Name") {
            states.insert(name.to_string(), state);
        }
    }
    states
}

/// Combine `show ip name-server` and `show activate status` into a connectivity report
#[must_use]
pub fn parse_connectivity(name_servers: &Value, activate: &Value) -> Connectivity {
    let dns_configured = table(name_servers, "Name Server List")
        .any(|row| row.values().any(|v| v.as_str().is_some_and(|s| !s.trim().is_empty())))
        || data_lines(name_servers)
            .any(|l| l.to_ascii_lowercase().contains("name-server") && l.contains('.'));

    let provisioning_reachable = data_lines(activate).any(|l| {
        let l = l.to_ascii_lowercase();
        l.contains("connected") && !l.contains("not connected") && !l.contains("disconnected")
    });

    Connectivity {
        dns_configured,
        provisioning_reachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn login_extracts_tokens() {
        let body = json!({"_global_result": {"status": "0", "UIDARUBA": "u-1", "X-CSRF-Token": "t-1"}});
        let session = parse_login(&body).unwrap();
        assert_eq!(session.uid, "u-1");
        assert_eq!(session.csrf_token.as_deref(), Some("t-1"));

        let denied = json!({"_global_result": {"status": "1"}});
        assert!(matches!(parse_login(&denied), Err(ApiError::Unauthorized(_))));
    }

    #[test]
    fn membership_detects_leader_and_peers() {
        let body = json!({"_data": [
            "Profile Name = campus-cluster",
            "Redundancy Mode On = True",
            "self     10.1.1.2    128    CONNECTED (Leader)",
            "peer     10.1.1.3    128    CONNECTED (Member, last HBT_RSP 0ms ago)",
        ]});
        let membership = parse_cluster_membership(&body);
        assert_eq!(
            membership.role,
            ClusterRole::Orchestrator {
                cluster: "campus-cluster".into()
            }
        );
        assert_eq!(membership.peers, vec!["10.1.1.3".to_string()]);
    }

    #[test]
    fn membership_without_profile_is_standalone() {
        let body = json!({"_data": ["Cluster Enabled: No"]});
        assert_eq!(parse_cluster_membership(&body).role, ClusterRole::Standalone);
    }

    #[test]
    fn version_is_read_from_banner() {
        let body = json!({"_data": ["Aruba Operating System Software.", "ArubaOS (MODEL: Aruba7210), Version 8.10.0.7_89354"]});
        let version = parse_version(&body).unwrap();
        assert_eq!(version.components, vec![8, 10, 0, 7]);
    }

    #[test]
    fn ap_database_rows_become_access_points() {
        let body = json!({"AP Database": [
            {"Name": "lobby-1", "Group": "lobby", "AP Type": "515", "Serial #": "CNABC001",
             "Wired MAC Address": "AA:BB:CC:00:00:01", "Status": "Up 2d:3h"},
            {"Name": "lobby-2", "Group": "lobby", "AP Type": "515", "Serial #": "CNABC002",
             "Status": "Down"},
            {"Name": "orphan", "AP Type": "515"}
        ]});
        let aps = parse_ap_database(&body, &ControllerId::new("md-1"));
        assert_eq!(aps.len(), 2);
        assert_eq!(aps[0].mac, "aa:bb:cc:00:00:01");
        assert_eq!(aps[0].state, DeviceState::Legacy);
        assert_eq!(aps[1].state, DeviceState::Unknown);
    }

    #[test]
    fn switch_list_keeps_managed_controllers() {
        let body = json!({"All Switches": [
            {"Name": "mm-1", "IP Address": "10.0.0.10", "Type": "master", "Status": "up"},
            {"Name": "md-1", "IP Address": "10.0.0.11", "Type": "MD", "Model": "Aruba7210",
             "Version": "8.10.0.7_89354", "Status": "up"},
            {"Name": "md-2", "IP Address": "10.0.0.12", "Type": "MD", "Status": "down"},
            {"IP Address": "10.0.0.13", "Type": "MD", "Status": "up"}
        ]});
        let found = parse_switch_list(&body);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].endpoint, ControllerEndpoint::new("md-1", "10.0.0.11"));
        assert_eq!(found[0].model.as_deref(), Some("Aruba7210"));
        assert_eq!(found[0].firmware.as_ref().map(ToString::to_string).as_deref(), Some("8.10.0.7_89354"));
        assert!(found[0].up);
        assert!(!found[1].up);
    }

    #[test]
    fn convert_status_classification() {
        let body = json!({"AP Image Conversion Status": [
            {"AP Name": "a", "AP Mac": "AA:00", "Upgrade State": "Successful"},
            {"AP Name": "b", "AP Mac": "BB:00", "Upgrade State": "Image Downloading"},
            {"AP Name": "c", "AP Mac": "CC:00", "Upgrade State": "Failed", "Failure Reason": "No image"}
        ]});
        let states = parse_convert_status(&body);
        assert_eq!(states["aa:00"], DeviceState::ManagedByTarget);
        assert_eq!(states["b"], DeviceState::Converting);
        assert_eq!(states["cc:00"], DeviceState::ConversionFailed("No image".into()));
    }

    #[test]
    fn global_result_failure_surfaces_status_string() {
        let body = json!({"_global_result": {"status": 1, "status_str": "Invalid ap-group"}});
        assert_eq!(
            check_global_result(&body),
            Err(ApiError::CommandFailed("Invalid ap-group".into()))
        );
        assert!(check_global_result(&json!({})).is_ok());
    }
}
