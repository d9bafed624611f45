//! Per-device management and activation state

use crate::ids::Serial;
use serde::{Deserialize, Serialize};

/// Live management state of an access point during cutover
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum DeviceState {
    /// Still managed by the legacy controller
    Legacy,
    /// Image conversion or handoff under way
    Converting,
    /// Reports management under the cloud architecture
    ManagedByTarget,
    /// Controller reported a conversion failure
    ConversionFailed(String),
    /// No status available for the device
    Unknown,
}

impl DeviceState {
    /// True once the device is managed by the target architecture
    #[inline]
    #[must_use]
    pub fn is_migrated(&self) -> bool {
        matches!(self, Self::ManagedByTarget)
    }

    /// True when the device is mid-handoff
    #[inline]
    #[must_use]
    pub fn is_in_transition(&self) -> bool {
        matches!(self, Self::Converting)
    }
}

/// Enrollment in the activation service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrollmentStatus {
    /// Device is known to the activation service
    Enrolled,
    /// Device is not known
    NotEnrolled,
}

/// Activation service view of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActivationRecord {
    /// Device serial
    pub serial: Serial,
    /// Enrollment status
    pub enrollment: EnrollmentStatus,
    /// Assigned management profile, if any
    pub profile: Option<String>,
}

impl ActivationRecord {
    /// Enrolled record without a profile
    #[inline]
    #[must_use]
    pub fn enrolled(serial: Serial) -> Self {
        Self {
            serial,
            enrollment: EnrollmentStatus::Enrolled,
            profile: None,
        }
    }

    /// With assigned profile
    #[inline]
    #[must_use]
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }
}
