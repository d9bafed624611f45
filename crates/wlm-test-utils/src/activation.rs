use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use wlm_client::{ActivationService, ApiError, ApiResult};
use wlm_model::{ActivationRecord, Serial};

#[derive(Debug, Default)]
struct State {
    enrolled: BTreeSet<Serial>,
    profiles: BTreeMap<Serial, String>,
    transient_failures: u32,
    unavailable: bool,
}

/// In-memory activation service implementing [`ActivationService`]
#[derive(Debug, Default)]
pub struct FakeActivation {
    state: Mutex<State>,
    assign_calls: AtomicUsize,
    revoke_calls: AtomicUsize,
}

impl FakeActivation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Service with the given devices enrolled
    pub fn enrolling<'a>(serials: impl IntoIterator<Item = &'a str>) -> Self {
        let activation = Self::new();
        for serial in serials {
            activation.enroll(serial);
        }
        activation
    }

    pub fn enroll(&self, serial: &str) {
        self.state.lock().enrolled.insert(Serial::new(serial));
    }

    pub fn unenroll(&self, serial: &str) {
        self.state.lock().enrolled.remove(&Serial::new(serial));
    }

    /// Next `count` calls fail with a transient error
    pub fn fail_transiently(&self, count: u32) {
        self.state.lock().transient_failures = count;
    }

    /// Every call fails with a transient error until cleared
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    pub fn profile(&self, serial: &str) -> Option<String> {
        self.state.lock().profiles.get(&Serial::new(serial)).cloned()
    }

    pub fn assigned_count(&self) -> usize {
        self.state.lock().profiles.len()
    }

    pub fn assign_calls(&self) -> usize {
        self.assign_calls.load(Ordering::SeqCst)
    }

    pub fn revoke_calls(&self) -> usize {
        self.revoke_calls.load(Ordering::SeqCst)
    }

    fn admit(state: &mut State) -> ApiResult<()> {
        if state.unavailable {
            return Err(ApiError::Transport("activation service unavailable".into()));
        }
        if state.transient_failures > 0 {
            state.transient_failures -= 1;
            return Err(ApiError::Rejected {
                status: 503,
                message: "service unavailable".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ActivationService for FakeActivation {
    async fn is_enrolled(&self, serial: &Serial) -> ApiResult<bool> {
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        Ok(state.enrolled.contains(serial))
    }

    async fn assign_profile(&self, serial: &Serial, profile: &str) -> ApiResult<ActivationRecord> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        if !state.enrolled.contains(serial) {
            return Err(ApiError::Rejected {
                status: 404,
                message: format!("{serial} is not enrolled"),
            });
        }
        state.profiles.insert(serial.clone(), profile.to_string());
        Ok(ActivationRecord::enrolled(serial.clone()).with_profile(profile))
    }

    async fn revoke_profile(&self, serial: &Serial) -> ApiResult<()> {
        self.revoke_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        Self::admit(&mut state)?;
        state.profiles.remove(serial);
        Ok(())
    }
}
