//! Records that failed together.

use std::collections::BTreeSet;

use crate::algorithms::ErrorResolution;
use crate::data::{MigratableEntity, RecordId};

/// Identifier and description of a source record, as written to reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    /// Source record id.
    pub id: RecordId,
    /// Source record description.
    pub description: String,
}

impl RecordRef {
    /// Create a reference.
    pub fn new(id: RecordId, description: impl Into<String>) -> Self {
        Self {
            id,
            description: description.into(),
        }
    }

    /// Reference an entity.
    pub fn of<E: MigratableEntity>(entity: &E) -> Self {
        Self::new(entity.migratable_id(), entity.migratable_description())
    }
}

/// A set of records that failed as a unit, pending isolation.
#[derive(Debug, Clone)]
pub struct FailedRecordGroup {
    /// Ids of the records.
    pub ids: BTreeSet<RecordId>,
    /// Policy of the step that failed.
    pub resolution: ErrorResolution,
    /// Root-cause message of the failure.
    pub cause: String,
}

impl FailedRecordGroup {
    /// Create a group.
    pub fn new(
        ids: impl IntoIterator<Item = RecordId>,
        resolution: ErrorResolution,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            ids: ids.into_iter().collect(),
            resolution,
            cause: cause.into(),
        }
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether the group is empty.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Split into two halves by id order; the first half gets the smaller share.
    pub fn split(mut self) -> (FailedRecordGroup, FailedRecordGroup) {
        let pivot = self.ids.iter().nth(self.ids.len() / 2).cloned();
        let upper = match pivot {
            Some(pivot) => self.ids.split_off(&pivot),
            None => BTreeSet::new(),
        };
        let lower = FailedRecordGroup {
            ids: self.ids,
            resolution: self.resolution,
            cause: self.cause.clone(),
        };
        let upper = FailedRecordGroup {
            ids: upper,
            resolution: self.resolution,
            cause: self.cause,
        };
        (lower, upper)
    }
}
