//! WLM Model - read-only view of a clustered wireless deployment
//!
//! Provides the types every other crate speaks in:
//! - Identifiers for controllers, AP groups and access points
//! - Controllers with a tagged cluster role
//! - AP groups and access points with exclusive membership
//! - Immutable cluster snapshots and per-device state

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod controller;
pub mod device;
pub mod firmware;
pub mod ids;
pub mod snapshot;

pub use controller::{ClusterRole, Controller, ControllerEndpoint, Reachability};
pub use device::{ActivationRecord, DeviceState, EnrollmentStatus};
pub use firmware::{FirmwareParseError, FirmwareVersion};
pub use ids::{ControllerId, GroupId, Serial};
pub use snapshot::{AccessPoint, ApGroup, ClusterSnapshot, MembershipConflict, SnapshotBuilder};
