//! WLM Core - migration engine
//!
//! Moves access point groups from a clustered controller deployment to
//! cloud management:
//! - Collects an immutable inventory snapshot of the cluster
//! - Validates controller readiness and proposes candidate groups
//! - Waits for explicit operator confirmation per group
//! - Runs one phase-ordered migration job per confirmed group, durably
//!   recorded in a job ledger and reconciled after restarts
//!
//! # Example
//!
//! ```rust,ignore
//! use wlm_core::prelude::*;
//!
//! # async fn example(api: Arc<dyn ControllerApi>, activation: Arc<dyn ActivationService>,
//! #                  config: MigrationConfig) -> Result<(), MigrationError> {
//! let inventory = InventoryCollector::new(api.clone()).collect(&config.controllers).await?;
//! let snapshot = inventory.into_snapshot();
//!
//! let store = Arc::new(FileLedgerStore::new(&config.ledger.path));
//! let orchestrator = MigrationOrchestrator::new(api, activation, store, &config)?;
//! let report = orchestrator.validator().validate(&snapshot).await;
//!
//! let mut gate = ConfirmationGate::new();
//! gate.propose(&report);
//! gate.confirm(&GroupId::new("lobby"));
//! let token = gate.take_confirmation(&GroupId::new("lobby")).expect("confirmed");
//! orchestrator.migrate(token, &snapshot).await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod config;
pub mod error;
pub mod gate;
pub mod inventory;
pub mod job;
pub mod ledger;
pub mod orchestrator;
pub mod planner;
pub mod readiness;
pub mod reporter;

pub use config::{
    ActivationConfig, CutoverConfig, HttpConfig, LedgerConfig, MigrationConfig, PlanningConfig,
    RollbackPolicy, VerifyConfig, activation_token_from_env, credentials_from_env,
};
pub use error::{MigrationError, ValidationFailure};
pub use gate::{Confirmation, ConfirmationGate, GateDecision};
pub use inventory::{Inventory, InventoryCollector};
pub use job::{
    allowed_transitions, validate_transition, ApBreakdown, ApStatus, FailureReport, JobId,
    JobPhase, MigrationJob, PhaseRecord,
};
pub use ledger::{FileLedgerStore, JobLedger, LedgerStore, MemoryLedgerStore};
pub use orchestrator::MigrationOrchestrator;
pub use planner::{MigrationPlan, Planner, TargetAssignment};
pub use readiness::{ControllerVerdict, ReadinessValidator, ValidationReport};
pub use reporter::{InventorySummary, JobSummary, ResultReporter, RunSummary};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for driving a migration run
    pub use crate::{
        ConfirmationGate, FileLedgerStore, GateDecision, Inventory, InventoryCollector,
        LedgerStore, MigrationConfig, MigrationError, MigrationOrchestrator, ReadinessValidator,
        ResultReporter, ValidationReport,
    };
    pub use std::sync::Arc;
    pub use wlm_client::{ActivationService, ControllerApi};
    pub use wlm_model::{ClusterSnapshot, GroupId};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
