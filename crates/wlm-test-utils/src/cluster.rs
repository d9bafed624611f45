use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use wlm_client::{
    ApiError, ApiResult, ClusterMembership, Connectivity, ControllerApi, DetachRequest,
    DiscoveredController,
};
use wlm_model::{
    AccessPoint, ClusterRole, ControllerEndpoint, ControllerId, DeviceState, FirmwareVersion,
    GroupId, Serial,
};

/// One simulated controller
#[derive(Debug, Clone)]
pub struct FakeController {
    pub endpoint: ControllerEndpoint,
    pub role: ClusterRole,
    pub firmware: Option<FirmwareVersion>,
    pub dns: bool,
    pub internet: bool,
    pub reachable: bool,
    pub rejects_credentials: bool,
    pub extra_groups: Vec<GroupId>,
}

impl FakeController {
    fn new(id: &str, role: ClusterRole) -> Self {
        Self {
            endpoint: crate::endpoint(id),
            role,
            firmware: Some(FirmwareVersion::new([8, 10, 0, 7])),
            dns: true,
            internet: true,
            reachable: true,
            rejects_credentials: false,
            extra_groups: Vec::new(),
        }
    }

    pub fn orchestrator(id: &str, cluster: &str) -> Self {
        Self::new(id, ClusterRole::Orchestrator { cluster: cluster.to_string() })
    }

    pub fn member(id: &str, cluster: &str) -> Self {
        Self::new(id, ClusterRole::Member { cluster: cluster.to_string() })
    }

    pub fn standalone(id: &str) -> Self {
        Self::new(id, ClusterRole::Standalone)
    }

    #[must_use]
    pub fn without_dns(mut self) -> Self {
        self.dns = false;
        self
    }

    #[must_use]
    pub fn without_internet(mut self) -> Self {
        self.internet = false;
        self
    }

    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    #[must_use]
    pub fn rejecting_credentials(mut self) -> Self {
        self.rejects_credentials = true;
        self
    }

    #[must_use]
    pub fn with_firmware(mut self, firmware: FirmwareVersion) -> Self {
        self.firmware = Some(firmware);
        self
    }

    #[must_use]
    pub fn with_empty_group(mut self, group: &str) -> Self {
        self.extra_groups.push(GroupId::new(group));
        self
    }
}

#[derive(Debug, Default)]
struct State {
    controllers: BTreeMap<ControllerId, FakeController>,
    access_points: BTreeMap<Serial, AccessPoint>,
    detached: BTreeSet<GroupId>,
    never_converts: BTreeSet<Serial>,
    conversion_failures: BTreeMap<Serial, String>,
    overrides: BTreeMap<Serial, DeviceState>,
    polls_since_detach: BTreeMap<Serial, u32>,
    transient_failures: BTreeMap<ControllerId, u32>,
    fail_detach: bool,
    fail_cluster_writes: bool,
    detach_requests: Vec<(ControllerId, DetachRequest)>,
    conductor: Option<ControllerEndpoint>,
    down_in_switch_list: BTreeSet<ControllerId>,
    suspended: BTreeSet<String>,
    prepared: Vec<(ControllerId, String)>,
    restored: Vec<(ControllerId, String)>,
}

/// In-memory controller cluster implementing [`ControllerApi`]
///
/// After a group is detached, each of its devices reports `Converting` on
/// the first status poll and `ManagedByTarget` from the second on, unless
/// marked with [`FakeCluster::never_converts`] or [`FakeCluster::fails_conversion`].
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<State>,
    status_queries: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_controller(self, controller: FakeController) -> Self {
        self.state
            .lock()
            .controllers
            .insert(controller.endpoint.id.clone(), controller);
        self
    }

    #[must_use]
    pub fn with_access_point(self, ap: AccessPoint) -> Self {
        self.state.lock().access_points.insert(ap.serial.clone(), ap);
        self
    }

    /// Conductor that lists every controller of this cluster
    #[must_use]
    pub fn with_conductor(self, conductor: ControllerEndpoint) -> Self {
        self.state.lock().conductor = Some(conductor);
        self
    }

    /// Conductor reports the controller as down
    pub fn down_in_switch_list(&self, id: &str) {
        self.state.lock().down_in_switch_list.insert(ControllerId::new(id));
    }

    pub fn endpoints(&self) -> Vec<ControllerEndpoint> {
        self.state
            .lock()
            .controllers
            .values()
            .map(|c| c.endpoint.clone())
            .collect()
    }

    pub fn serials(&self) -> Vec<String> {
        self.state
            .lock()
            .access_points
            .keys()
            .map(|s| s.as_str().to_string())
            .collect()
    }

    /// Change a controller in place
    pub fn update_controller(&self, id: &str, f: impl FnOnce(&mut FakeController)) {
        if let Some(controller) = self.state.lock().controllers.get_mut(&ControllerId::new(id)) {
            f(controller);
        }
    }

    /// Move an AP into another group
    pub fn move_access_point(&self, serial: &str, group: &str) {
        if let Some(ap) = self.state.lock().access_points.get_mut(&Serial::new(serial)) {
            ap.group = GroupId::new(group);
        }
    }

    pub fn add_access_point(&self, ap: AccessPoint) {
        self.state.lock().access_points.insert(ap.serial.clone(), ap);
    }

    /// Device keeps converting forever
    pub fn never_converts(&self, serial: &str) {
        self.state.lock().never_converts.insert(Serial::new(serial));
    }

    /// Device reports a conversion failure after detach
    pub fn fails_conversion(&self, serial: &str, reason: &str) {
        self.state
            .lock()
            .conversion_failures
            .insert(Serial::new(serial), reason.to_string());
    }

    /// Pin a device's reported state
    pub fn set_device_state(&self, serial: &str, state: DeviceState) {
        self.state.lock().overrides.insert(Serial::new(serial), state);
    }

    /// Next `count` calls to a controller fail with a transient error
    pub fn fail_transiently(&self, id: &str, count: u32) {
        self.state
            .lock()
            .transient_failures
            .insert(ControllerId::new(id), count);
    }

    /// Detach requests fail
    pub fn fail_detach(&self) {
        self.state.lock().fail_detach = true;
    }

    /// Cluster profile writes fail
    pub fn fail_cluster_writes(&self) {
        self.state.lock().fail_cluster_writes = true;
    }

    /// Load balancing and redundancy are currently suspended for the cluster
    pub fn is_suspended(&self, cluster: &str) -> bool {
        self.state.lock().suspended.contains(cluster)
    }

    pub fn prepared(&self) -> Vec<(ControllerId, String)> {
        self.state.lock().prepared.clone()
    }

    pub fn restored(&self) -> Vec<(ControllerId, String)> {
        self.state.lock().restored.clone()
    }

    pub fn detach_count(&self) -> usize {
        self.state.lock().detach_requests.len()
    }

    pub fn detach_requests(&self) -> Vec<(ControllerId, DetachRequest)> {
        self.state.lock().detach_requests.clone()
    }

    pub fn status_queries(&self) -> usize {
        self.status_queries.load(Ordering::SeqCst)
    }

    pub fn cancel_count(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// Reachability, credential and transient-fault checks shared by every call
    fn admit<'a>(state: &'a mut State, endpoint: &ControllerEndpoint) -> ApiResult<&'a FakeController> {
        if let Some(remaining) = state.transient_failures.get_mut(&endpoint.id) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ApiError::Transport("connection reset by peer".into()));
            }
        }
        let controller = state
            .controllers
            .get(&endpoint.id)
            .ok_or_else(|| ApiError::UnknownController(endpoint.id.clone()))?;
        if !controller.reachable {
            return Err(ApiError::Timeout(format!("{} did not answer", endpoint.address)));
        }
        if controller.rejects_credentials {
            return Err(ApiError::Unauthorized("invalid username or password".into()));
        }
        Ok(controller)
    }

    fn device_state(state: &mut State, serial: &Serial) -> DeviceState {
        if let Some(pinned) = state.overrides.get(serial) {
            return pinned.clone();
        }
        let Some(ap) = state.access_points.get(serial) else {
            return DeviceState::Unknown;
        };
        if !state.detached.contains(&ap.group) {
            return DeviceState::Legacy;
        }
        let polls = state.polls_since_detach.entry(serial.clone()).or_insert(0);
        *polls += 1;
        if let Some(reason) = state.conversion_failures.get(serial) {
            return DeviceState::ConversionFailed(reason.clone());
        }
        if state.never_converts.contains(serial) || *polls < 2 {
            DeviceState::Converting
        } else {
            DeviceState::ManagedByTarget
        }
    }
}

#[async_trait]
impl ControllerApi for FakeCluster {
    async fn cluster_membership(&self, controller: &ControllerEndpoint) -> ApiResult<ClusterMembership> {
        let mut state = self.state.lock();
        let fake = Self::admit(&mut state, controller)?.clone();
        let peers = fake
            .role
            .cluster()
            .map(|cluster| {
                state
                    .controllers
                    .values()
                    .filter(|c| c.endpoint.id != fake.endpoint.id && c.role.cluster() == Some(cluster))
                    .map(|c| c.endpoint.address.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ClusterMembership {
            role: fake.role,
            peers,
            firmware: fake.firmware,
        })
    }

    async fn list_ap_groups(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<GroupId>> {
        let mut state = self.state.lock();
        let extra = Self::admit(&mut state, controller)?.extra_groups.clone();
        let mut groups: BTreeSet<GroupId> = state
            .access_points
            .values()
            .map(|ap| ap.group.clone())
            .collect();
        groups.extend(extra);
        Ok(groups.into_iter().collect())
    }

    async fn list_access_points(&self, controller: &ControllerEndpoint) -> ApiResult<Vec<AccessPoint>> {
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        let state = &*state;
        Ok(state
            .access_points
            .values()
            .filter(|ap| ap.controller == controller.id)
            .map(|ap| {
                let mut ap = ap.clone();
                ap.state = match state.overrides.get(&ap.serial) {
                    Some(pinned) => pinned.clone(),
                    None if state.detached.contains(&ap.group) => DeviceState::Converting,
                    None => DeviceState::Legacy,
                };
                ap
            })
            .collect())
    }

    async fn connectivity(&self, controller: &ControllerEndpoint) -> ApiResult<Connectivity> {
        let mut state = self.state.lock();
        let fake = Self::admit(&mut state, controller)?;
        Ok(Connectivity {
            dns_configured: fake.dns,
            provisioning_reachable: fake.internet,
        })
    }

    async fn detach_group(&self, controller: &ControllerEndpoint, request: &DetachRequest) -> ApiResult<()> {
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        state
            .detach_requests
            .push((controller.id.clone(), request.clone()));
        if state.fail_detach {
            return Err(ApiError::CommandFailed("ap convert activate rejected".into()));
        }
        state.detached.insert(request.group.clone());
        Ok(())
    }

    async fn device_status(
        &self,
        controller: &ControllerEndpoint,
        access_points: &[AccessPoint],
    ) -> ApiResult<BTreeMap<Serial, DeviceState>> {
        self.status_queries.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        Ok(access_points
            .iter()
            .map(|ap| (ap.serial.clone(), Self::device_state(&mut state, &ap.serial)))
            .collect())
    }

    async fn cancel_conversion(&self, controller: &ControllerEndpoint) -> ApiResult<()> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        state.detached.clear();
        state.polls_since_detach.clear();
        Ok(())
    }

    async fn prepare_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        if state.fail_cluster_writes {
            return Err(ApiError::CommandFailed("lc-cluster group-profile rejected".into()));
        }
        state.prepared.push((controller.id.clone(), cluster.to_string()));
        state.suspended.insert(cluster.to_string());
        Ok(())
    }

    async fn restore_cluster(&self, controller: &ControllerEndpoint, cluster: &str) -> ApiResult<()> {
        let mut state = self.state.lock();
        Self::admit(&mut state, controller)?;
        if state.fail_cluster_writes {
            return Err(ApiError::CommandFailed("lc-cluster group-profile rejected".into()));
        }
        state.restored.push((controller.id.clone(), cluster.to_string()));
        state.suspended.remove(cluster);
        Ok(())
    }

    async fn discover_controllers(
        &self,
        conductor: &ControllerEndpoint,
    ) -> ApiResult<Vec<DiscoveredController>> {
        let state = self.state.lock();
        if state.conductor.as_ref() != Some(conductor) {
            return Err(ApiError::UnknownController(conductor.id.clone()));
        }
        Ok(state
            .controllers
            .values()
            .map(|c| DiscoveredController {
                endpoint: c.endpoint.clone(),
                model: Some("Aruba7210".to_string()),
                firmware: c.firmware.clone(),
                up: !state.down_in_switch_list.contains(&c.endpoint.id),
            })
            .collect())
    }
}
