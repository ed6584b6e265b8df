//! Thread-safe holder of the run's progress.
//!
//! Every mutation and every snapshot goes through one read/write lock, so
//! a checkpoint taken from a signal handler thread never observes a
//! half-applied update from the pipeline or the investigator.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;

use super::schema::{FailedRecord, FailedRecordAction, MigrationProgress};
use crate::algorithms::ResolutionStrategy;
use crate::data::RecordId;
use crate::error::{MigrationError, Result};
use crate::fault::RecordRef;

/// Receives a snapshot on every checkpoint.
pub type PersistenceCallback = Arc<dyn Fn(&MigrationProgress) -> Result<()> + Send + Sync>;

/// Handle returned when registering a persistence callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackId(u64);

/// Shared, lock-protected [`MigrationProgress`].
pub struct MigrationProgressManager {
    progress: RwLock<MigrationProgress>,
    callbacks: RwLock<Vec<(CallbackId, PersistenceCallback)>>,
    next_callback_id: AtomicU64,
}

impl Default for MigrationProgressManager {
    fn default() -> Self {
        Self::new(MigrationProgress::new())
    }
}

impl MigrationProgressManager {
    /// Wrap a progress value, fresh or restored.
    pub fn new(mut progress: MigrationProgress) -> Self {
        progress.normalize();
        Self {
            progress: RwLock::new(progress),
            callbacks: RwLock::new(Vec::new()),
            next_callback_id: AtomicU64::new(1),
        }
    }

    /// Replace the held progress, e.g. with one loaded from a previous run.
    pub fn restore(&self, mut progress: MigrationProgress) {
        progress.normalize();
        *self.progress.write() = progress;
    }

    /// A consistent copy, stamped with the current time.
    pub fn snapshot(&self) -> MigrationProgress {
        let mut snapshot = self.progress.read().clone();
        snapshot.metadata.timestamp = Utc::now();
        snapshot
    }

    /// Mark a migration as running.
    pub fn start_migration(&self, migration_id: &str) {
        let mut progress = self.progress.write();
        progress.migration_mut(migration_id);
        progress
            .metadata
            .in_progress_migration_ids
            .insert(migration_id.to_string());
    }

    /// Mark a migration as no longer running.
    pub fn finish_migration(&self, migration_id: &str, completed: bool) {
        let mut progress = self.progress.write();
        progress
            .metadata
            .in_progress_migration_ids
            .remove(migration_id);
        if completed {
            progress
                .metadata
                .completed_migration_ids
                .insert(migration_id.to_string());
        } else {
            progress
                .metadata
                .completed_migration_ids
                .remove(migration_id);
        }
    }

    /// Whether a previous run completed this migration.
    pub fn is_migration_completed(&self, migration_id: &str) -> bool {
        self.progress
            .read()
            .metadata
            .completed_migration_ids
            .contains(migration_id)
    }

    /// Remove ids already saved by this migration.
    pub fn exclude_successfully_migrated_ids(&self, migration_id: &str, ids: &mut BTreeSet<RecordId>) {
        let progress = self.progress.read();
        if let Some(migration) = progress.migration(migration_id) {
            ids.retain(|id| !migration.migrated_record_ids.contains(id));
        }
    }

    /// Remove ids whose failure an operator marked `IGNORE`.
    pub fn exclude_ignored_ids(&self, migration_id: &str, ids: &mut BTreeSet<RecordId>) {
        let progress = self.progress.read();
        if let Some(migration) = progress.migration(migration_id) {
            ids.retain(|id| {
                migration
                    .failed_record(id)
                    .map(|r| r.action != FailedRecordAction::Ignore)
                    .unwrap_or(true)
            });
        }
    }

    /// Record saved ids; their earlier failures are dropped.
    pub fn report_successful_records(
        &self,
        migration_id: &str,
        ids: impl IntoIterator<Item = RecordId>,
    ) {
        let mut progress = self.progress.write();
        let migration = progress.migration_mut(migration_id);
        for id in ids {
            migration.remove_failed_record(&id);
            migration.migrated_record_ids.insert(id);
        }
    }

    /// Upsert failures for records that failed together.
    ///
    /// New entries get `RETRY`; existing entries keep their action.
    pub fn report_failed_records(
        &self,
        migration_id: &str,
        records: &[RecordRef],
        error: &MigrationError,
        strategy: ResolutionStrategy,
    ) {
        let cause = error.root_cause().to_string();
        let effect = strategy.to_string();
        let now = Utc::now();

        let mut progress = self.progress.write();
        let migration = progress.migration_mut(migration_id);
        for record in records {
            migration.upsert_failed_record(FailedRecord {
                id: record.id.clone(),
                description: record.description.clone(),
                cause: cause.clone(),
                effect: effect.clone(),
                action: FailedRecordAction::Retry,
                timestamp: now,
            });
        }
    }

    /// Record a failure that halted a migration as a whole.
    pub fn report_fatal_error(&self, message: impl Into<String>) {
        self.progress.write().fatal_errors.push(message.into());
    }

    /// Failed ids to run again: everything not marked `IGNORE`.
    pub fn retryable_failed_ids(&self, migration_id: &str) -> BTreeSet<RecordId> {
        self.progress
            .read()
            .migration(migration_id)
            .map(|m| m.outstanding_failures().map(|r| r.id.clone()).collect())
            .unwrap_or_default()
    }

    /// The TAKE selection an operator set for a failed record.
    pub fn take_action(&self, migration_id: &str, id: &RecordId) -> Option<FailedRecordAction> {
        self.progress
            .read()
            .migration(migration_id)?
            .failed_record(id)
            .map(|r| r.action)
            .filter(|action| action.is_take())
    }

    /// Ids saved by a migration.
    pub fn migrated_ids(&self, migration_id: &str) -> BTreeSet<RecordId> {
        self.progress
            .read()
            .migration(migration_id)
            .map(|m| m.migrated_record_ids.clone())
            .unwrap_or_default()
    }

    /// Failures recorded for a migration.
    pub fn failed_records(&self, migration_id: &str) -> Vec<FailedRecord> {
        self.progress
            .read()
            .migration(migration_id)
            .map(|m| m.failed_records.clone())
            .unwrap_or_default()
    }

    /// Number of failures not marked `IGNORE`.
    pub fn outstanding_failure_count(&self, migration_id: &str) -> usize {
        self.progress
            .read()
            .migration(migration_id)
            .map(|m| m.outstanding_failures().count())
            .unwrap_or(0)
    }

    /// Fatal errors recorded so far.
    pub fn fatal_errors(&self) -> Vec<String> {
        self.progress.read().fatal_errors.clone()
    }

    /// Register a persistence callback.
    pub fn add_persistence_callback(&self, callback: PersistenceCallback) -> CallbackId {
        let id = CallbackId(self.next_callback_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.write().push((id, callback));
        id
    }

    /// Unregister a persistence callback.
    pub fn remove_persistence_callback(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(existing, _)| *existing != id);
        callbacks.len() != before
    }

    /// Hand a snapshot to every persistence callback.
    ///
    /// Callback failures are logged; returns how many callbacks succeeded.
    pub fn checkpoint(&self) -> usize {
        let callbacks: Vec<PersistenceCallback> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        if callbacks.is_empty() {
            return 0;
        }

        let snapshot = self.snapshot();
        let mut persisted = 0;
        for callback in callbacks {
            match callback(&snapshot) {
                Ok(()) => persisted += 1,
                Err(e) => tracing::error!(error = %e, "Failed to persist migration progress"),
            }
        }
        tracing::debug!(callbacks = persisted, "Checkpointed migration progress");
        persisted
    }
}
