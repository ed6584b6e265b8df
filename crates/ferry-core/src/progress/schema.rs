//! Persisted progress format.
//!
//! ```json
//! {
//!   "metadata": {"timestamp": "...", "completedMigrationIds": [], "inProgressMigrationIds": []},
//!   "migrationProgress": {"<id>": {"migratedRecordIds": [], "failedRecords": []}},
//!   "fatalErrors": []
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::RecordId;
use crate::error::{ParseActionError, Result};

/// Everything needed to resume a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationProgress {
    /// Run-level bookkeeping.
    #[serde(default)]
    pub metadata: ProgressMetadata,
    /// Per-migration record state.
    #[serde(default)]
    pub migration_progress: BTreeMap<String, MigrationClassProgress>,
    /// Failures that halted a migration as a whole.
    #[serde(default)]
    pub fatal_errors: Vec<String>,
}

/// Run-level bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMetadata {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Migrations that finished without outstanding failures.
    #[serde(default)]
    pub completed_migration_ids: BTreeSet<String>,
    /// Migrations that were running when the snapshot was taken.
    #[serde(default)]
    pub in_progress_migration_ids: BTreeSet<String>,
}

impl Default for ProgressMetadata {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            completed_migration_ids: BTreeSet::new(),
            in_progress_migration_ids: BTreeSet::new(),
        }
    }
}

/// Record state of one migration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationClassProgress {
    /// Records confirmed saved to the destination.
    #[serde(default)]
    pub migrated_record_ids: BTreeSet<RecordId>,
    /// Known failures, sorted by id, one entry per id.
    #[serde(default)]
    pub failed_records: Vec<FailedRecord>,
}

impl MigrationClassProgress {
    /// The failure recorded for `id`.
    pub fn failed_record(&self, id: &RecordId) -> Option<&FailedRecord> {
        self.failed_records
            .binary_search_by(|r| r.id.cmp(id))
            .ok()
            .map(|i| &self.failed_records[i])
    }

    /// Insert or update a failure, keeping any existing action.
    pub fn upsert_failed_record(&mut self, record: FailedRecord) {
        match self.failed_records.binary_search_by(|r| r.id.cmp(&record.id)) {
            Ok(i) => {
                let existing = &mut self.failed_records[i];
                existing.description = record.description;
                existing.cause = record.cause;
                existing.effect = record.effect;
                existing.timestamp = record.timestamp;
            }
            Err(i) => self.failed_records.insert(i, record),
        }
    }

    /// Drop the failure recorded for `id`.
    pub fn remove_failed_record(&mut self, id: &RecordId) -> Option<FailedRecord> {
        self.failed_records
            .binary_search_by(|r| r.id.cmp(id))
            .ok()
            .map(|i| self.failed_records.remove(i))
    }

    /// Failures an operator has not told the engine to ignore.
    pub fn outstanding_failures(&self) -> impl Iterator<Item = &FailedRecord> {
        self.failed_records
            .iter()
            .filter(|r| r.action != FailedRecordAction::Ignore)
    }

    /// Restore the sorted, unique order of `failed_records` after a hand edit.
    pub fn normalize(&mut self) {
        self.failed_records.sort_by(|a, b| a.id.cmp(&b.id));
        self.failed_records.dedup_by(|a, b| a.id == b.id);
    }
}

/// A record that could not be migrated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRecord {
    /// Source record id.
    pub id: RecordId,
    /// Source record description.
    pub description: String,
    /// Root-cause message.
    pub cause: String,
    /// Name of the resolution strategy that applied.
    pub effect: String,
    /// Operator-editable disposition.
    #[serde(default)]
    pub action: FailedRecordAction,
    /// When the failure was last observed.
    pub timestamp: DateTime<Utc>,
}

/// What the next run does with a failed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FailedRecordAction {
    /// Reprocess on the next run.
    #[default]
    Retry,
    /// Skip permanently.
    Ignore,
    /// `TAKE(k)`: keep the candidate at zero-based index `k`.
    Take(usize),
    /// `TAKE(N-k)`: keep the candidate at index `N - k`.
    TakeFromEnd(usize),
}

impl FailedRecordAction {
    /// Whether this is one of the TAKE selections.
    pub fn is_take(self) -> bool {
        matches!(self, FailedRecordAction::Take(_) | FailedRecordAction::TakeFromEnd(_))
    }

    /// Index picked among `candidates` results, if in range.
    pub fn select_index(self, candidates: usize) -> Option<usize> {
        let index = match self {
            FailedRecordAction::Take(k) => k,
            FailedRecordAction::TakeFromEnd(k) => candidates.checked_sub(k)?,
            FailedRecordAction::Retry | FailedRecordAction::Ignore => return None,
        };
        (index < candidates).then_some(index)
    }
}

impl fmt::Display for FailedRecordAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailedRecordAction::Retry => write!(f, "RETRY"),
            FailedRecordAction::Ignore => write!(f, "IGNORE"),
            FailedRecordAction::Take(k) => write!(f, "TAKE({})", k),
            FailedRecordAction::TakeFromEnd(k) => write!(f, "TAKE(N-{})", k),
        }
    }
}

impl FromStr for FailedRecordAction {
    type Err = ParseActionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let invalid = || ParseActionError {
            input: s.to_string(),
        };
        let trimmed = s.trim();

        match trimmed {
            "RETRY" => return Ok(FailedRecordAction::Retry),
            "IGNORE" => return Ok(FailedRecordAction::Ignore),
            _ => {}
        }

        let inner = trimmed
            .strip_prefix("TAKE(")
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (from_end, digits) = match inner.strip_prefix("N-") {
            Some(digits) => (true, digits),
            None => (false, inner),
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let k: usize = digits.parse().map_err(|_| invalid())?;

        Ok(if from_end {
            FailedRecordAction::TakeFromEnd(k)
        } else {
            FailedRecordAction::Take(k)
        })
    }
}

impl TryFrom<String> for FailedRecordAction {
    type Error = ParseActionError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<FailedRecordAction> for String {
    fn from(action: FailedRecordAction) -> Self {
        action.to_string()
    }
}

impl MigrationProgress {
    /// A fresh, empty progress value.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record state of a migration, if any was recorded.
    pub fn migration(&self, migration_id: &str) -> Option<&MigrationClassProgress> {
        self.migration_progress.get(migration_id)
    }

    /// Record state of a migration, created on first use.
    pub fn migration_mut(&mut self, migration_id: &str) -> &mut MigrationClassProgress {
        self.migration_progress
            .entry(migration_id.to_string())
            .or_default()
    }

    /// Whether any migration has failures or fatal errors outstanding.
    pub fn needs_another_run(&self) -> bool {
        !self.fatal_errors.is_empty()
            || self
                .migration_progress
                .values()
                .any(|p| p.outstanding_failures().next().is_some())
    }

    /// Sort and dedup failed records of every migration.
    pub fn normalize(&mut self) {
        for progress in self.migration_progress.values_mut() {
            progress.normalize();
        }
    }

    /// Encode as indented JSON.
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Decode from JSON, tolerating hand-edited ordering.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut progress: MigrationProgress = serde_json::from_str(json)?;
        progress.normalize();
        Ok(progress)
    }

    /// Read a progress file.
    pub fn load_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}
