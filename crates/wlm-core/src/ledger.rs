//! Durable job ledger
//!
//! The ledger holds active jobs (at most one per group), archived jobs and
//! the set of migrated groups. It is loaded once at startup and flushed after
//! every phase change, so a restart always sees the last accepted phase and
//! whether a cutover may be in flight.

use crate::error::MigrationError;
use crate::job::{JobPhase, MigrationJob};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use wlm_model::GroupId;

/// Jobs and migrated groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobLedger {
    active: BTreeMap<GroupId, MigrationJob>,
    archive: Vec<MigrationJob>,
    migrated: BTreeSet<GroupId>,
}

impl JobLedger {
    /// Active job for a group
    #[must_use]
    pub fn active(&self, group: &GroupId) -> Option<&MigrationJob> {
        self.active.get(group)
    }

    /// Mutable active job for a group
    pub fn active_mut(&mut self, group: &GroupId) -> Option<&mut MigrationJob> {
        self.active.get_mut(group)
    }

    /// All active jobs
    pub fn active_jobs(&self) -> impl Iterator<Item = &MigrationJob> {
        self.active.values()
    }

    /// Archived jobs, oldest first
    #[must_use]
    pub fn archived(&self) -> &[MigrationJob] {
        &self.archive
    }

    /// Active job, or the most recent archived one
    #[must_use]
    pub fn latest(&self, group: &GroupId) -> Option<&MigrationJob> {
        self.active(group)
            .or_else(|| self.archive.iter().rev().find(|job| &job.group == group))
    }

    /// Epoch for the next job on a group
    #[must_use]
    pub fn next_epoch(&self, group: &GroupId) -> u32 {
        self.active
            .get(group)
            .into_iter()
            .chain(self.archive.iter().filter(|job| &job.group == group))
            .map(|job| job.epoch)
            .max()
            .map_or(1, |epoch| epoch + 1)
    }

    /// Register a new active job
    ///
    /// # Errors
    /// - `JobAlreadyActive` if the group already has one
    pub fn insert(&mut self, job: MigrationJob) -> Result<(), MigrationError> {
        if self.active.contains_key(&job.group) {
            return Err(MigrationError::JobAlreadyActive { group: job.group });
        }
        self.active.insert(job.group.clone(), job);
        Ok(())
    }

    /// Move a terminal job to the archive
    ///
    /// Finished jobs mark their group as migrated.
    pub fn archive(&mut self, group: &GroupId) -> Option<&MigrationJob> {
        let job = self.active.remove(group)?;
        if job.phase == JobPhase::Finalize && job.is_terminal() {
            self.migrated.insert(job.group.clone());
        }
        self.archive.push(job);
        self.archive.last()
    }

    /// Group has completed migration
    #[must_use]
    pub fn is_migrated(&self, group: &GroupId) -> bool {
        self.migrated.contains(group)
    }

    /// Migrated groups
    #[must_use]
    pub fn migrated(&self) -> &BTreeSet<GroupId> {
        &self.migrated
    }
}

/// Ledger persistence boundary
pub trait LedgerStore: Send + Sync {
    /// Load the ledger; a missing ledger is empty
    ///
    /// # Errors
    /// - `Ledger` if stored data cannot be read
    fn load(&self) -> Result<JobLedger, MigrationError>;

    /// Durably replace the stored ledger
    ///
    /// # Errors
    /// - `Ledger` if the write fails
    fn flush(&self, ledger: &JobLedger) -> Result<(), MigrationError>;
}

/// JSON file store with atomic replace
#[derive(Debug, Clone)]
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    /// Store at `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<JobLedger, MigrationError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| MigrationError::Ledger(format!("{}: {e}", self.path.display()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(JobLedger::default()),
            Err(e) => Err(MigrationError::Ledger(format!("{}: {e}", self.path.display()))),
        }
    }

    fn flush(&self, ledger: &JobLedger) -> Result<(), MigrationError> {
        let to_ledger_error = |e: std::io::Error| {
            MigrationError::Ledger(format!("{}: {e}", self.path.display()))
        };
        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let bytes =
            serde_json::to_vec_pretty(ledger).map_err(|e| MigrationError::Ledger(e.to_string()))?;

        let mut file = tempfile::NamedTempFile::new_in(dir).map_err(to_ledger_error)?;
        file.write_all(&bytes).map_err(to_ledger_error)?;
        file.as_file().sync_all().map_err(to_ledger_error)?;
        file.persist(&self.path)
            .map_err(|e| to_ledger_error(e.error))?;
        debug!(path = %self.path.display(), bytes = bytes.len(), "ledger flushed");
        Ok(())
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    stored: Mutex<Option<JobLedger>>,
    flushes: AtomicUsize,
}

impl MemoryLedgerStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with a ledger
    #[must_use]
    pub fn with_ledger(ledger: JobLedger) -> Self {
        Self {
            stored: Mutex::new(Some(ledger)),
            flushes: AtomicUsize::new(0),
        }
    }

    /// Number of flushes so far
    #[must_use]
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Last flushed ledger
    #[must_use]
    pub fn snapshot(&self) -> Option<JobLedger> {
        self.stored.lock().clone()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<JobLedger, MigrationError> {
        Ok(self.stored.lock().clone().unwrap_or_default())
    }

    fn flush(&self, ledger: &JobLedger) -> Result<(), MigrationError> {
        *self.stored.lock() = Some(ledger.clone());
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wlm_model::ControllerEndpoint;

    fn job(group: &str, epoch: u32) -> MigrationJob {
        MigrationJob::new(
            GroupId::new(group),
            epoch,
            ControllerEndpoint::new("md-1", "10.0.0.1"),
        )
    }

    #[test]
    fn one_active_job_per_group() {
        let mut ledger = JobLedger::default();
        ledger.insert(job("lobby", 1)).unwrap();
        let err = ledger.insert(job("lobby", 2)).unwrap_err();
        assert!(matches!(err, MigrationError::JobAlreadyActive { .. }));
        ledger.insert(job("annex", 1)).unwrap();
        assert_eq!(ledger.active_jobs().count(), 2);
    }

    #[test]
    fn epochs_increase_across_archive() {
        let mut ledger = JobLedger::default();
        let group = GroupId::new("lobby");
        assert_eq!(ledger.next_epoch(&group), 1);
        ledger.insert(job("lobby", 1)).unwrap();
        ledger
            .active_mut(&group)
            .unwrap()
            .advance(JobPhase::RolledBack)
            .unwrap();
        ledger.archive(&group);
        assert_eq!(ledger.next_epoch(&group), 2);
        assert!(!ledger.is_migrated(&group));
        assert_eq!(ledger.latest(&group).unwrap().phase, JobPhase::RolledBack);
    }

    #[test]
    fn finished_jobs_mark_group_migrated() {
        let mut ledger = JobLedger::default();
        let group = GroupId::new("lobby");
        ledger.insert(job("lobby", 1)).unwrap();
        let active = ledger.active_mut(&group).unwrap();
        for phase in &JobPhase::SUCCESS_PATH[1..] {
            active.advance(*phase).unwrap();
        }
        active.finish().unwrap();
        ledger.archive(&group);
        assert!(ledger.is_migrated(&group));
    }

    #[test]
    fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileLedgerStore::new(dir.path().join("ledger.json"));
        assert_eq!(store.load().unwrap().active_jobs().count(), 0);

        let mut ledger = JobLedger::default();
        let mut in_flight = job("lobby", 3);
        in_flight.in_flight = true;
        ledger.insert(in_flight).unwrap();
        store.flush(&ledger).unwrap();

        let loaded = store.load().unwrap();
        let job = loaded.active(&GroupId::new("lobby")).unwrap();
        assert!(job.in_flight);
        assert_eq!(job.epoch, 3);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(
            FileLedgerStore::new(path).load(),
            Err(MigrationError::Ledger(_))
        ));
    }
}
