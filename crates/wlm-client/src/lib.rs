//! WLM Client - remote surfaces used by the migration engine
//!
//! Two services are consumed:
//! - Cluster controllers, through [`ControllerAdapter`]: authenticated sessions,
//!   per-controller request serialization, bounded retry for reads and
//!   translation of controller responses into [`ApiError`]
//! - The device activation service, through [`ActivationService`]
//!
//! Both are exposed as traits so the engine can run against in-memory fakes.

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod activation;
pub mod controller;
pub mod error;
pub mod parse;
pub mod retry;
pub mod session;
pub mod transport;

pub use activation::{ActivationService, HttpActivationClient};
pub use controller::{
    ClusterMembership, Connectivity, ControllerAdapter, ControllerApi, DetachRequest,
    DiscoveredController,
};
pub use error::{ApiError, ApiResult};
pub use retry::{retry, Retryable, RetryPolicy};
pub use session::{Credentials, Session};
pub use transport::{ControllerRequest, ControllerTransport, HttpTransport, HttpTransportConfig};
