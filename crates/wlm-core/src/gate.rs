//! Operator confirmation gate
//!
//! Validation proposes candidate groups; nothing migrates until the operator
//! explicitly confirms a group. A confirmed group yields exactly one
//! [`Confirmation`] token, which the orchestrator consumes when it starts a
//! job. Re-attempting a group needs a fresh confirmation.

use crate::readiness::ValidationReport;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;
use wlm_model::GroupId;

/// Operator decision for a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    /// Operator approved migration
    Confirmed,
    /// Operator declined
    Rejected,
    /// Proposed, awaiting a decision
    Pending,
}

/// Proof of an explicit operator confirmation for one group
///
/// Only the gate creates these, and they cannot be cloned.
#[derive(Debug)]
pub struct Confirmation {
    group: GroupId,
    confirmed_at: DateTime<Utc>,
}

impl Confirmation {
    /// Confirmed group
    #[must_use]
    pub fn group(&self) -> &GroupId {
        &self.group
    }

    /// When the operator confirmed
    #[must_use]
    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }
}

/// Tracks proposals and decisions
#[derive(Debug, Default)]
pub struct ConfirmationGate {
    decisions: BTreeMap<GroupId, (GateDecision, Option<DateTime<Utc>>)>,
}

impl ConfirmationGate {
    /// Empty gate
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Propose every candidate in a validation report
    ///
    /// Groups already decided keep their decision. Returns the newly proposed groups.
    pub fn propose(&mut self, report: &ValidationReport) -> Vec<GroupId> {
        let mut proposed = Vec::new();
        for group in report.candidates() {
            if !self.decisions.contains_key(group) {
                self.decisions
                    .insert(group.clone(), (GateDecision::Pending, None));
                proposed.push(group.clone());
            }
        }
        info!(proposed = proposed.len(), "groups proposed for migration");
        proposed
    }

    /// Decision for a group; unknown groups are pending
    #[must_use]
    pub fn decision(&self, group: &GroupId) -> GateDecision {
        self.decisions
            .get(group)
            .map_or(GateDecision::Pending, |(decision, _)| *decision)
    }

    /// Group has been proposed
    #[must_use]
    pub fn is_proposed(&self, group: &GroupId) -> bool {
        self.decisions.contains_key(group)
    }

    /// Confirm a proposed group; false if it was never proposed or was rejected
    pub fn confirm(&mut self, group: &GroupId) -> bool {
        match self.decisions.get_mut(group) {
            Some(entry) if entry.0 != GateDecision::Rejected => {
                *entry = (GateDecision::Confirmed, Some(Utc::now()));
                info!(%group, "group confirmed by operator");
                true
            }
            _ => false,
        }
    }

    /// Reject a proposed group; false if it was never proposed
    pub fn reject(&mut self, group: &GroupId) -> bool {
        match self.decisions.get_mut(group) {
            Some(entry) => {
                *entry = (GateDecision::Rejected, None);
                info!(%group, "group rejected by operator");
                true
            }
            None => false,
        }
    }

    /// Take the confirmation token for a confirmed group
    ///
    /// The group returns to pending, so a later attempt must be confirmed again.
    pub fn take_confirmation(&mut self, group: &GroupId) -> Option<Confirmation> {
        let entry = self.decisions.get_mut(group)?;
        match *entry {
            (GateDecision::Confirmed, Some(confirmed_at)) => {
                *entry = (GateDecision::Pending, None);
                Some(Confirmation {
                    group: group.clone(),
                    confirmed_at,
                })
            }
            _ => None,
        }
    }

    /// Take tokens for every confirmed group
    pub fn take_all_confirmed(&mut self) -> Vec<Confirmation> {
        let confirmed: Vec<GroupId> = self
            .decisions
            .iter()
            .filter(|(_, (decision, _))| *decision == GateDecision::Confirmed)
            .map(|(group, _)| group.clone())
            .collect();
        confirmed
            .iter()
            .filter_map(|group| self.take_confirmation(group))
            .collect()
    }

    /// Groups awaiting a decision
    #[must_use]
    pub fn pending(&self) -> Vec<&GroupId> {
        self.decisions
            .iter()
            .filter(|(_, (decision, _))| *decision == GateDecision::Pending)
            .map(|(group, _)| group)
            .collect()
    }
}
