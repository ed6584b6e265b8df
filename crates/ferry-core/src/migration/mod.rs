//! Migration definitions and the per-migration pipeline.

mod context;
mod definition;
mod match_reduce;
pub mod plan;
mod runner;
mod transform_save;

pub use context::{Aggregates, RecordProcessingContext};
pub use definition::{
    DestinationEntity, DestinationOptions, DuplicateContext, MatchOptions, Matcher, Migration,
    MigrationDefinition, SourceEntity, SourceOptions, DEFAULT_BATCH_SIZE,
};
pub use plan::execution_order;
pub use runner::{MigrationOutcome, MigrationRunner, PlannedMigration};
