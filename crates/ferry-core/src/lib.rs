//! Ferry core: a dependency-ordered, resumable data migration engine.
//!
//! A migration reads pages of records from a source store, matches each
//! record against auxiliary stores, reduces the matches into per-record
//! aggregates, transforms the record and saves the result to a destination
//! store. Migrations are ordered by the stores they read and write, failures
//! are isolated by bisection in the background, and progress is checkpointed
//! so that a later run resumes where this one stopped.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ferry_core::{EngineConfig, MigrationService};
//!
//! let mut service = MigrationService::new(EngineConfig::default());
//! service.register_store(Arc::new(legacy_stations));
//! service.register_store(Arc::new(stations));
//! service.register_migration(StationMigration)?;
//! let report = service.run_without_previous_progress()?;
//! assert!(report.is_complete());
//! ```

pub mod algorithms;
pub mod config;
pub mod data;
pub mod error;
pub mod fault;
pub mod migration;
pub mod progress;
pub mod service;

pub use algorithms::{Cardinality, ErrorResolution, ResolutionStrategy, RetryLogic};
pub use config::EngineConfig;
pub use data::{DataPage, DataStore, MemoryFilter, MemoryStore, MigratableEntity, RecordId};
pub use error::{MigrationError, PlanError, Result, StoreError};
pub use migration::{
    Aggregates, DestinationOptions, DuplicateContext, MatchOptions, Matcher, Migration,
    MigrationDefinition, MigrationOutcome, SourceOptions,
};
pub use progress::{
    FailedRecord, FailedRecordAction, JsonFileProgressSink, MigrationProgress,
    MigrationProgressManager, ProgressStateStore,
};
pub use service::{MigrationService, RunReport};
