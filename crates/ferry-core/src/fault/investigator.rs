//! Background bisection of failed record groups.
//!
//! A fixed pool of scoped worker threads consumes a queue of
//! [`FailedRecordGroup`]s. A group of one record is a culprit; larger groups
//! are split in half and each half is re-run through the pipeline, which
//! re-queues whatever still fails. Workers poll the queue with a timeout so
//! a stop request is observed promptly.

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::{self, Scope};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::FailedRecordGroup;
use crate::algorithms::ResolutionStrategy;
use crate::data::RecordId;
use crate::error::{MigrationError, Result};
use crate::progress::MigrationProgressManager;

/// Re-drives the pipeline for a subset of source records.
pub trait RecordRerun: Sync {
    /// Migration being investigated.
    fn migration_id(&self) -> &str;

    /// Run the pipeline for `ids`, reporting new failures to `investigator`.
    ///
    /// An error means the migration cannot make progress at all.
    fn rerun_records(
        &self,
        ids: &BTreeSet<RecordId>,
        investigator: &MigrationErrorInvestigator,
    ) -> Result<()>;
}

/// Counters collected while investigating one migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvestigationSummary {
    /// Records isolated as individually failing.
    pub unresolved_failures: usize,
    /// Isolated records whose policy halts the plan after this migration.
    pub halting_failures: usize,
    /// Pipeline re-runs issued while bisecting.
    pub reruns: usize,
}

struct QueueState {
    groups: VecDeque<FailedRecordGroup>,
    in_flight: usize,
}

/// Worker pool isolating failing records of one migration.
pub struct MigrationErrorInvestigator {
    migration_id: String,
    state: Mutex<QueueState>,
    /// Signalled when a group is queued.
    available: Condvar,
    /// Signalled when the queue drains.
    idle: Condvar,
    stopped: AtomicBool,
    shutdown: AtomicBool,
    unresolved: AtomicUsize,
    halting: AtomicUsize,
    reruns: AtomicUsize,
    fatal: Mutex<Option<MigrationError>>,
    workers: usize,
    poll_interval: Duration,
}

impl MigrationErrorInvestigator {
    /// Create an idle investigator.
    pub fn new(migration_id: impl Into<String>, workers: usize, poll_interval: Duration) -> Self {
        Self {
            migration_id: migration_id.into(),
            state: Mutex::new(QueueState {
                groups: VecDeque::new(),
                in_flight: 0,
            }),
            available: Condvar::new(),
            idle: Condvar::new(),
            stopped: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            unresolved: AtomicUsize::new(0),
            halting: AtomicUsize::new(0),
            reruns: AtomicUsize::new(0),
            fatal: Mutex::new(None),
            workers: workers.max(1),
            poll_interval,
        }
    }

    /// Start the worker pool inside `scope`.
    pub fn spawn_workers<'scope, 'env>(
        &'env self,
        scope: &'scope Scope<'scope, 'env>,
        rerun: &'env dyn RecordRerun,
    ) {
        for worker in 0..self.workers {
            let spawned = thread::Builder::new()
                .name(format!("ferry-investigator-{}", worker))
                .spawn_scoped(scope, move || self.worker_loop(rerun));
            if let Err(e) = spawned {
                tracing::error!(
                    migration = %self.migration_id,
                    worker,
                    error = %e,
                    "Failed to start investigator worker"
                );
                if worker == 0 {
                    self.halt(MigrationError::Io(e));
                }
                break;
            }
        }
        tracing::debug!(
            migration = %self.migration_id,
            workers = self.workers,
            "Started error investigator"
        );
    }

    /// Re-run records that failed in a previous run, before fresh data.
    ///
    /// Returns the ids that were given another chance.
    pub fn retry_previously_failed_records(
        &self,
        progress: &MigrationProgressManager,
        rerun: &dyn RecordRerun,
    ) -> Result<BTreeSet<RecordId>> {
        let ids = progress.retryable_failed_ids(rerun.migration_id());
        if ids.is_empty() {
            return Ok(ids);
        }

        tracing::info!(
            migration = %self.migration_id,
            records = ids.len(),
            "Retrying previously failed records"
        );
        rerun.rerun_records(&ids, self)?;
        Ok(ids)
    }

    /// Queue a failed group for isolation.
    pub fn submit(&self, group: FailedRecordGroup) {
        if self.is_stopped() {
            tracing::debug!(
                migration = %self.migration_id,
                records = group.len(),
                "Investigator stopped, dropping failed group"
            );
            return;
        }
        self.state.lock().groups.push_back(group);
        self.available.notify_one();
    }

    /// Block until the queue is empty and no group is being investigated.
    ///
    /// Returns early if the investigator is stopped.
    pub fn join(&self) {
        let mut state = self.state.lock();
        while !self.is_stopped() && !(state.groups.is_empty() && state.in_flight == 0) {
            self.idle.wait_for(&mut state, self.poll_interval);
        }
    }

    /// Cancel outstanding work. Queued groups are dropped.
    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let dropped = {
            let mut state = self.state.lock();
            let dropped = state.groups.len();
            state.groups.clear();
            dropped
        };
        self.available.notify_all();
        self.idle.notify_all();
        if dropped > 0 {
            tracing::warn!(
                migration = %self.migration_id,
                groups = dropped,
                "Investigator stopped with pending groups"
            );
        }
    }

    /// Record a fatal error (the first one wins) and stop.
    pub fn halt(&self, error: MigrationError) {
        {
            let mut fatal = self.fatal.lock();
            if fatal.is_none() {
                tracing::error!(migration = %self.migration_id, error = %error, "Halting migration");
                *fatal = Some(error);
            }
        }
        self.stop();
    }

    /// Let idle workers exit once the work is done.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.available.notify_all();
        self.idle.notify_all();
    }

    /// Whether [`stop`](Self::stop) or [`halt`](Self::halt) was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// The fatal error that halted the migration, if any.
    pub fn take_fatal(&self) -> Option<MigrationError> {
        self.fatal.lock().take()
    }

    /// Counters so far.
    pub fn summary(&self) -> InvestigationSummary {
        InvestigationSummary {
            unresolved_failures: self.unresolved.load(Ordering::SeqCst),
            halting_failures: self.halting.load(Ordering::SeqCst),
            reruns: self.reruns.load(Ordering::SeqCst),
        }
    }

    fn worker_loop(&self, rerun: &dyn RecordRerun) {
        while let Some(group) = self.next_group() {
            self.investigate(group, rerun);

            let mut state = self.state.lock();
            state.in_flight -= 1;
            if state.groups.is_empty() && state.in_flight == 0 {
                self.idle.notify_all();
            }
        }
    }

    fn next_group(&self) -> Option<FailedRecordGroup> {
        let mut state = self.state.lock();
        loop {
            if self.is_stopped() || self.shutdown.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(group) = state.groups.pop_front() {
                state.in_flight += 1;
                return Some(group);
            }
            self.available.wait_for(&mut state, self.poll_interval);
        }
    }

    fn investigate(&self, group: FailedRecordGroup, rerun: &dyn RecordRerun) {
        match group.len() {
            0 => {}
            1 => {
                self.unresolved.fetch_add(1, Ordering::SeqCst);
                if group.resolution.strategy == ResolutionStrategy::FinishMigrationThenStop {
                    self.halting.fetch_add(1, Ordering::SeqCst);
                }
                if let Some(id) = group.ids.first() {
                    tracing::warn!(
                        migration = %self.migration_id,
                        record = %id,
                        cause = %group.cause,
                        "Isolated failing record"
                    );
                }
            }
            size => {
                tracing::debug!(migration = %self.migration_id, size, "Bisecting failed group");
                let (lower, upper) = group.split();
                for half in [lower, upper] {
                    if self.is_stopped() {
                        break;
                    }
                    self.reruns.fetch_add(1, Ordering::SeqCst);
                    if let Err(e) = rerun.rerun_records(&half.ids, self) {
                        if !self.is_stopped() {
                            self.halt(e);
                        }
                    }
                }
            }
        }
    }
}
