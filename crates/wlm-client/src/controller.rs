//! Controller API adapter
//!
//! [`ControllerApi`] is the surface the migration engine consumes.
//! [`ControllerAdapter`] implements it over any [`ControllerTransport`]:
//! - One session per controller, opened lazily and re-opened on expiry
//! - Requests to the same controller are serialized through a per-controller lock
//! - Read-only requests retry transient failures under a [`RetryPolicy`]
//! - Mutating requests are sent once; the caller decides whether to try again
//! - Multi-step mutations go out as one sequence no other request can split

use crate::error::{ApiError, ApiResult};
use crate::parse;
use crate::retry::{retry, RetryPolicy};
use crate::session::{Credentials, Session};
use crate::transport::{ControllerRequest, ControllerTransport};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use wlm_model::{
    AccessPoint, ClusterRole, ControllerEndpoint, ControllerId, DeviceState, FirmwareVersion,
    GroupId, Serial,
};

/// Cluster facts reported by one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterMembership {
    /// Role within the cluster
    pub role: ClusterRole,
    /// Peer addresses
    pub peers: Vec<String>,
    /// Running firmware
    pub firmware: Option<FirmwareVersion>,
}

/// Outbound connectivity as seen from a controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connectivity {
    /// Name servers configured and answering
    pub dns_configured: bool,
    /// Activation/provisioning service reachable
    pub provisioning_reachable: bool,
}

/// Parameters of the cutover mutation for one AP group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachRequest {
    /// Group to hand over
    pub group: GroupId,
    /// Simultaneous image downloads allowed
    pub max_downloads: u32,
    /// Let the controller run its own pre-validation
    pub pre_validation: bool,
}

impl DetachRequest {
    /// Request with default download concurrency
    #[inline]
    #[must_use]
    pub fn new(group: GroupId) -> Self {
        Self {
            group,
            max_downloads: 20,
            pre_validation: false,
        }
    }
}

/// Managed controller as listed by a conductor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredController {
    /// Name and management address
    pub endpoint: ControllerEndpoint,
    /// Hardware model
    pub model: Option<String>,
    /// Reported firmware
    pub firmware: Option<FirmwareVersion>,
    /// Conductor sees the controller as up
    pub up: bool,
}

/// Controller operations used by the migration engine
#[async_trait]
pub trait ControllerApi: Send + Sync {
    /// Cluster role, peers and firmware
    async fn cluster_membership(&self, controller: &ControllerEndpoint) -> ApiResult<ClusterMembership>;

    /// AP groups configured on the controller
    async fn list_ap_groups(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<GroupId>>;

    /// Access points terminating on the controller
    async fn list_access_points(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<AccessPoint>>;

    /// DNS and provisioning-service reachability from the controller
    async fn connectivity(&self, controller: &ControllerEndpoint) -> ApiResult<Connectivity>;

    /// Detach a group from legacy management (the cutover trigger)
    async fn detach_group(&self, controller: &ControllerEndpoint, request: &DetachRequest) -> ApiResult<()>;

    /// Live state of the given access points
    async fn device_status(
        &self,
        controller: &ControllerEndpoint,
        access_points: &[AccessPoint],
    ) -> ApiResult<BTreeMap<Serial, DeviceState>>;

    /// Clear and cancel any pending conversion on the controller
    async fn cancel_conversion(&self, controller: &ControllerEndpoint) -> ApiResult<()>;

    /// Suspend AP load balancing and redundancy for a cluster and save
    async fn prepare_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()>;

    /// Re-enable AP load balancing and redundancy for a cluster and save
    async fn restore_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()>;

    /// Managed controllers known to a conductor
    async fn discover_controllers(
        &self,
        conductor: &ControllerEndpoint,
    ) -> ApiResult<Vec<DiscoveredController>>;
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Session-managing adapter over a transport
#[derive(Debug)]
pub struct ControllerAdapter<T> {
    transport: T,
    credentials: Credentials,
    retry_policy: RetryPolicy,
    sessions: DashMap<ControllerId, SessionSlot>,
}

impl<T: ControllerTransport> ControllerAdapter<T> {
    /// Create adapter
    #[inline]
    #[must_use]
    pub fn new(transport: T, credentials: Credentials, retry_policy: RetryPolicy) -> Self {
        Self {
            transport,
            credentials,
            retry_policy,
            sessions: DashMap::new(),
        }
    }

    /// Underlying transport
    #[inline]
    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn slot(&self, controller: &ControllerId) -> SessionSlot {
        self.sessions
            .entry(controller.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Send one request, holding the controller's lock for its duration
    async fn send(&self, endpoint: &ControllerEndpoint, request: &ControllerRequest) -> ApiResult<Value> {
        let mut results = self.send_all(endpoint, std::slice::from_ref(request)).await?;
        results.pop().ok_or_else(|| ApiError::Decode("no response".into()))
    }

    /// Send a sequence of requests under one hold of the controller's lock
    ///
    /// No other request to the same controller interleaves with the
    /// sequence. The first failure stops it. An expired session is replaced
    /// and the failed request re-sent once; the controller rejected the first
    /// send before acting on it, so this holds for mutating requests too.
    async fn send_all(
        &self,
        endpoint: &ControllerEndpoint,
        requests: &[ControllerRequest],
    ) -> ApiResult<Vec<Value>> {
        let slot = self.slot(&endpoint.id);
        let mut guard = slot.lock().await;
        let mut results = Vec::with_capacity(requests.len());

        for request in requests {
            if guard.is_none() {
                *guard = Some(self.login(endpoint).await?);
            }

            let first = match guard.as_ref() {
                Some(session) => self.transport.execute(endpoint, session, request).await,
                None => Err(ApiError::SessionExpired),
            };

            let result = match first {
                Err(ApiError::SessionExpired) => {
                    debug!(controller = %endpoint.id, "session expired, re-authenticating");
                    *guard = None;
                    let session = self.login(endpoint).await?;
                    let result = self.transport.execute(endpoint, &session, request).await;
                    *guard = Some(session);
                    result
                }
                other => other,
            };
            results.push(result?);
        }
        Ok(results)
    }

    async fn login(&self, endpoint: &ControllerEndpoint) -> ApiResult<Session> {
        let session = self.transport.login(endpoint, &self.credentials).await?;
        info!(controller = %endpoint.id, "controller session established");
        Ok(session)
    }

    /// Read-only request with bounded retry
    async fn query(&self, endpoint: &ControllerEndpoint, command: &str) -> ApiResult<Value> {
        let request = ControllerRequest::show(command);
        retry(&self.retry_policy, command, |_| self.send(endpoint, &request)).await
    }

    /// Mutating requests, each sent exactly once, as one uninterrupted sequence
    async fn mutate(
        &self,
        endpoint: &ControllerEndpoint,
        objects: &[(&str, Value)],
    ) -> ApiResult<Vec<Value>> {
        let requests: Vec<ControllerRequest> = objects
            .iter()
            .map(|(object, body)| ControllerRequest::Configure {
                object: (*object).to_string(),
                body: body.clone(),
            })
            .collect();
        self.send_all(endpoint, &requests).await.map_err(|e| {
            warn!(controller = %endpoint.id, error = %e, "controller mutation failed");
            e
        })
    }
}

fn cluster_profile(cluster: &str, enabled: bool) -> Value {
    json!({
        "profile-name": cluster,
        "active_ap_lb": enabled,
        "redundancy": enabled,
    })
}

#[async_trait]
impl<T: ControllerTransport> ControllerApi for ControllerAdapter<T> {
    async fn cluster_membership(&self, controller: &ControllerEndpoint) -> ApiResult<ClusterMembership> {
        let membership = self
            .query(controller, "show lc-cluster group-membership")
            .await?;
        let version = self.query(controller, "show version").await?;
        let mut parsed = parse::parse_cluster_membership(&membership);
        parsed.firmware = parse::parse_version(&version);
        Ok(parsed)
    }

    async fn list_ap_groups(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<GroupId>> {
        let body = self.query(controller, "show ap-group").await?;
        Ok(parse::parse_ap_groups(&body))
    }

    async fn list_access_points(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<AccessPoint>> {
        let body = self.query(controller, "show ap database long").await?;
        Ok(parse::parse_ap_database(&body, &controller.id))
    }

    async fn connectivity(&self, controller: &ControllerEndpoint) -> ApiResult<Connectivity> {
        let name_servers = self.query(controller, "show ip name-server").await?;
        let activate = self.query(controller, "show activate status").await?;
        Ok(parse::parse_connectivity(&name_servers, &activate))
    }

    async fn detach_group(&self, controller: &ControllerEndpoint, request: &DetachRequest) -> ApiResult<()> {
        info!(controller = %controller.id, group = %request.group, "issuing group cutover");
        self.mutate(
            controller,
            &[
                (
                    "ap_convert_add_group",
                    json!({ "ap_group": request.group.as_str() }),
                ),
                (
                    "ap_convert_activate",
                    json!({
                        "mode": "specific-aps",
                        "server": "activate",
                        "max_downloads": request.max_downloads,
                        "no_pre_validation": !request.pre_validation,
                    }),
                ),
            ],
        )
        .await?;
        Ok(())
    }

    async fn device_status(
        &self,
        controller: &ControllerEndpoint,
        access_points: &[AccessPoint],
    ) -> ApiResult<BTreeMap<Serial, DeviceState>> {
        let body = self.query(controller, "show ap convert-status").await?;
        let table = parse::parse_convert_status(&body);
        Ok(access_points
            .iter()
            .map(|ap| {
                let state = table
                    .get(&ap.mac.to_ascii_lowercase())
                    .or_else(|| table.get(&ap.name))
                    .cloned()
                    .unwrap_or(DeviceState::Legacy);
                (ap.serial.clone(), state)
            })
            .collect())
    }

    async fn cancel_conversion(&self, controller: &ControllerEndpoint) -> ApiResult<()> {
        warn!(controller = %controller.id, "cancelling pending conversion");
        self.mutate(
            controller,
            &[
                ("ap_convert_clear_all", json!({})),
                ("ap_convert_cancel", json!({})),
            ],
        )
        .await?;
        Ok(())
    }

    async fn prepare_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()> {
        info!(controller = %controller.id, cluster, "suspending AP load balancing and redundancy");
        self.mutate(
            controller,
            &[
                ("cluster_prof", cluster_profile(cluster, false)),
                ("write_memory", json!({})),
            ],
        )
        .await?;
        Ok(())
    }

    async fn restore_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()> {
        info!(controller = %controller.id, cluster, "restoring AP load balancing and redundancy");
        self.mutate(
            controller,
            &[
                ("cluster_prof", cluster_profile(cluster, true)),
                ("write_memory", json!({})),
            ],
        )
        .await?;
        Ok(())
    }

    async fn discover_controllers(
        &self,
        conductor: &ControllerEndpoint,
    ) -> ApiResult<Vec<DiscoveredController>> {
        let body = self.query(conductor, "show switches debug").await?;
        let found = parse::parse_switch_list(&body);
        debug!(conductor = %conductor.id, controllers = found.len(), "switch list read");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scripted::ScriptedTransport;
    use serde_json::json;

    /// Transport double that replays scripted results
    mod scripted {
        use super::*;
        use std::collections::VecDeque;
        use std::sync::Mutex as StdMutex;

        #[derive(Default)]
        pub(super) struct ScriptedTransport {
            pub(super) logins: StdMutex<u32>,
            pub(super) login_error: StdMutex<Option<ApiError>>,
            pub(super) responses: StdMutex<VecDeque<ApiResult<Value>>>,
            pub(super) requests: StdMutex<Vec<ControllerRequest>>,
            pub(super) yield_on_execute: bool,
        }

        impl ScriptedTransport {
            pub(super) fn push(&self, response: ApiResult<Value>) {
                self.responses.lock().unwrap().push_back(response);
            }
        }

        #[async_trait]
        impl ControllerTransport for ScriptedTransport {
            async fn login(&self, _: &ControllerEndpoint, _: &Credentials) -> ApiResult<Session> {
                *self.logins.lock().unwrap() += 1;
                if let Some(err) = self.login_error.lock().unwrap().clone() {
                    return Err(err);
                }
                Ok(Session::new("uid", None))
            }

            async fn execute(
                &self,
                _: &ControllerEndpoint,
                _: &Session,
                request: &ControllerRequest,
            ) -> ApiResult<Value> {
                self.requests.lock().unwrap().push(request.clone());
                if self.yield_on_execute {
                    tokio::task::yield_now().await;
                }
                self.responses
                    .lock()
                    .unwrap()
                    .pop_front()
                    .unwrap_or_else(|| Ok(json!({})))
            }
        }
    }

    fn adapter(transport: ScriptedTransport) -> ControllerAdapter<ScriptedTransport> {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff_ms: 10,
            max_backoff_ms: 10,
            multiplier: 1.0,
        };
        ControllerAdapter::new(transport, Credentials::new("admin", "pw"), policy)
    }

    fn endpoint() -> ControllerEndpoint {
        ControllerEndpoint::new("md-1", "10.0.0.1")
    }

    #[tokio::test]
    async fn session_is_reused_across_requests() {
        let adapter = adapter(ScriptedTransport::default());
        adapter.list_ap_groups(&endpoint()).await.unwrap();
        adapter.list_ap_groups(&endpoint()).await.unwrap();
        assert_eq!(*adapter.transport().logins.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn expired_session_triggers_single_relogin() {
        let transport = ScriptedTransport::default();
        transport.push(Err(ApiError::SessionExpired));
        transport.push(Ok(json!({"AP group List": [{"AP Group": "lobby"}]})));
        let adapter = adapter(transport);

        let groups = adapter.list_ap_groups(&endpoint()).await.unwrap();
        assert_eq!(groups, vec![GroupId::new("lobby")]);
        assert_eq!(*adapter.transport().logins.lock().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn reads_retry_transient_failures() {
        let transport = ScriptedTransport::default();
        transport.push(Err(ApiError::Transport("reset".into())));
        transport.push(Err(ApiError::Timeout("slow".into())));
        transport.push(Ok(json!({"AP group List": [{"AP Group": "lobby"}]})));
        let adapter = adapter(transport);

        let groups = adapter.list_ap_groups(&endpoint()).await.unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(adapter.transport().requests.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn mutations_are_never_retried() {
        let transport = ScriptedTransport::default();
        transport.push(Err(ApiError::Transport("reset".into())));
        let adapter = adapter(transport);

        let result = adapter
            .detach_group(&endpoint(), &DetachRequest::new(GroupId::new("lobby")))
            .await;
        assert!(matches!(result, Err(ApiError::Transport(_))));
        assert_eq!(adapter.transport().requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn detach_issues_add_then_activate() {
        let adapter = adapter(ScriptedTransport::default());
        adapter
            .detach_group(&endpoint(), &DetachRequest::new(GroupId::new("lobby")))
            .await
            .unwrap();
        let requests = adapter.transport().requests.lock().unwrap().clone();
        let objects: Vec<&str> = requests.iter().map(ControllerRequest::label).collect();
        assert_eq!(objects, vec!["ap_convert_add_group", "ap_convert_activate"]);
        assert!(requests.iter().all(ControllerRequest::is_mutating));
    }

    #[tokio::test]
    async fn concurrent_mutations_on_one_controller_do_not_interleave() {
        let adapter = adapter(ScriptedTransport {
            yield_on_execute: true,
            ..ScriptedTransport::default()
        });
        let lobby = DetachRequest::new(GroupId::new("lobby"));
        let annex = DetachRequest::new(GroupId::new("annex"));
        let (ep_a, ep_b, ep_c) = (endpoint(), endpoint(), endpoint());
        let (a, b, c) = tokio::join!(
            adapter.detach_group(&ep_a, &lobby),
            adapter.cancel_conversion(&ep_b),
            adapter.detach_group(&ep_c, &annex),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let requests = adapter.transport().requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 6);
        for pair in requests.chunks(2) {
            let labels = (pair[0].label(), pair[1].label());
            assert!(
                labels == ("ap_convert_add_group", "ap_convert_activate")
                    || labels == ("ap_convert_clear_all", "ap_convert_cancel"),
                "split sequence: {labels:?}"
            );
        }
        let added: Vec<&str> = requests
            .iter()
            .filter_map(|r| match r {
                ControllerRequest::Configure { object, body } if object == "ap_convert_add_group" => {
                    body["ap_group"].as_str()
                }
                _ => None,
            })
            .collect();
        assert_eq!(added.len(), 2);
        assert!(added.contains(&"lobby") && added.contains(&"annex"));
    }

    #[tokio::test]
    async fn cluster_prepare_and_restore_toggle_profile_then_save() {
        let adapter = adapter(ScriptedTransport::default());
        adapter.prepare_cluster(&endpoint(), "campus").await.unwrap();
        adapter.restore_cluster(&endpoint(), "campus").await.unwrap();

        let requests = adapter.transport().requests.lock().unwrap().clone();
        let labels: Vec<&str> = requests.iter().map(ControllerRequest::label).collect();
        assert_eq!(
            labels,
            vec!["cluster_prof", "write_memory", "cluster_prof", "write_memory"]
        );
        let ControllerRequest::Configure { body, .. } = &requests[0] else {
            panic!("expected a configuration write");
        };
        assert_eq!(body["profile-name"], "campus");
        assert_eq!(body["active_ap_lb"], false);
        assert_eq!(body["redundancy"], false);
        let ControllerRequest::Configure { body, .. } = &requests[2] else {
            panic!("expected a configuration write");
        };
        assert_eq!(body["redundancy"], true);
    }

    #[tokio::test]
    async fn failed_first_step_stops_the_sequence() {
        let transport = ScriptedTransport::default();
        transport.push(Err(ApiError::CommandFailed("no such group".into())));
        let adapter = adapter(transport);
        let result = adapter.cancel_conversion(&endpoint()).await;
        assert!(matches!(result, Err(ApiError::CommandFailed(_))));
        assert_eq!(adapter.transport().requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn discovery_reads_switch_list_from_conductor() {
        let transport = ScriptedTransport::default();
        transport.push(Ok(json!({"All Switches": [
            {"Name": "md-1", "IP Address": "10.0.0.11", "Type": "MD", "Status": "up"}
        ]})));
        let adapter = adapter(transport);
        let conductor = ControllerEndpoint::new("mm-1", "10.0.0.10");
        let found = adapter.discover_controllers(&conductor).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].endpoint.id, ControllerId::new("md-1"));
        let requests = adapter.transport().requests.lock().unwrap().clone();
        assert_eq!(requests[0].label(), "show switches debug");
    }

    #[tokio::test]
    async fn login_rejection_is_surfaced() {
        let transport = ScriptedTransport::default();
        *transport.login_error.lock().unwrap() = Some(ApiError::Unauthorized("bad".into()));
        let adapter = adapter(transport);
        let err = adapter.list_ap_groups(&endpoint()).await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[tokio::test]
    async fn device_status_matches_by_mac_then_name() {
        let transport = ScriptedTransport::default();
        transport.push(Ok(json!({"AP Image Conversion Status": [
            {"AP Name": "ap-b", "AP Mac": "bb:bb", "Upgrade State": "Success"}
        ]})));
        let adapter = adapter(transport);
        let aps = vec![
            AccessPoint::new("S1", "515", "g", "md-1").with_mac("AA:AA"),
            AccessPoint::new("S2", "515", "g", "md-1").with_name("ap-b"),
        ];
        let states = adapter.device_status(&endpoint(), &aps).await.unwrap();
        assert_eq!(states[&Serial::new("S1")], DeviceState::Legacy);
        assert_eq!(states[&Serial::new("S2")], DeviceState::ManagedByTarget);
    }
}
