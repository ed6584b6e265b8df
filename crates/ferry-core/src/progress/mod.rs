//! Resumable progress state.
//!
//! The [`MigrationProgressManager`] owns the live [`MigrationProgress`];
//! sinks in [`persist`] turn its checkpoints into files or state-store
//! entries that a later run can resume from.

mod manager;
pub mod persist;
mod schema;
#[cfg(feature = "signal")]
pub mod signal;

pub use manager::{CallbackId, MigrationProgressManager, PersistenceCallback};
pub use persist::{JsonFileProgressSink, ProgressStateStore};
pub use schema::{
    FailedRecord, FailedRecordAction, MigrationClassProgress, MigrationProgress, ProgressMetadata,
};
