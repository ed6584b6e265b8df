//! Migration definitions: the capability traits a migration implements and
//! the declarative description of its stores.

use crate::algorithms::{Cardinality, ErrorResolution, SuperEdge};
use crate::data::{DataStore, DataStoreRegistry};
use crate::error::{PlanError, Result, StoreError};

use super::context::Aggregates;
use super::match_reduce::{resolve_match_stage, MatchAndReduce};

/// Batch size used when a definition does not set one.
pub const DEFAULT_BATCH_SIZE: usize = 512;

/// Entity type read from a migration's source store.
pub type SourceEntity<M> = <<M as Migration>::Source as DataStore>::Entity;

/// Entity type written to a migration's destination store.
pub type DestinationEntity<M> = <<M as Migration>::Destination as DataStore>::Entity;

/// A migration from one source store to one destination store.
///
/// The engine calls these methods directly; stores are resolved once when
/// the migration is registered.
pub trait Migration: Send + Sync + Sized + 'static {
    /// Store the records are read from.
    type Source: DataStore;
    /// Store the transformed records are written to.
    type Destination: DataStore;

    /// Stores, cardinalities, batch sizes and error policies.
    fn definition(&self) -> MigrationDefinition<Self>;

    /// Seed the aggregates of a record before any matching.
    fn start_reduction(&self, _record: &SourceEntity<Self>, _aggregates: &mut Aggregates) -> Result<()> {
        Ok(())
    }

    /// Build the destination records for one source record.
    fn transform(
        &self,
        record: &SourceEntity<Self>,
        aggregates: &Aggregates,
    ) -> Result<Vec<DestinationEntity<Self>>>;

    /// Decide what to save after the destination rejected `outputs` as duplicates.
    ///
    /// `Some(records)` saves the replacement instead (an empty list saves
    /// nothing and counts as success); `None` records a failure.
    fn handle_duplicate(
        &self,
        _duplicate: DuplicateContext<'_, Self>,
    ) -> Result<Option<Vec<DestinationEntity<Self>>>> {
        Ok(None)
    }
}

/// Matching against an auxiliary store `S`.
///
/// Implement once per store type the migration matches with and declare it
/// with [`MigrationDefinition::match_with`].
pub trait Matcher<S: DataStore>: Migration {
    /// Filter selecting the matches for `record`, or `None` to skip this
    /// store for the record.
    fn match_with(
        &self,
        record: &SourceEntity<Self>,
        aggregates: &Aggregates,
        store: &S,
    ) -> Result<Option<S::Filter>>;

    /// Fold one page of matches into the record's aggregates.
    fn reduce_from(&self, aggregates: &mut Aggregates, matches: &[S::Entity]) -> Result<()>;
}

/// Everything `handle_duplicate` gets to look at.
pub struct DuplicateContext<'a, M: Migration> {
    /// The source record.
    pub input: &'a SourceEntity<M>,
    /// Its aggregates.
    pub aggregates: &'a Aggregates,
    /// The rejected records.
    pub outputs: &'a [DestinationEntity<M>],
    /// The source store.
    pub source: &'a M::Source,
    /// The destination store.
    pub destination: &'a M::Destination,
    /// Every registered store.
    pub registry: &'a DataStoreRegistry,
    /// The duplicate-key failure.
    pub error: &'a StoreError,
}

/// Source store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceOptions {
    /// Records per source page.
    pub batch_size: usize,
    /// Policy for source reads and `start_reduction`.
    pub resolution: ErrorResolution,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            resolution: ErrorResolution::default(),
        }
    }
}

impl SourceOptions {
    /// Set the page size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the error policy.
    pub fn with_resolution(mut self, resolution: ErrorResolution) -> Self {
        self.resolution = resolution;
        self
    }
}

/// Settings of one match declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchOptions {
    /// Allowed number of matches per record.
    pub cardinality: Cardinality,
    /// Records per page of the matched store.
    pub batch_size: usize,
    /// Policy for matching and reducing.
    pub resolution: ErrorResolution,
    /// Lower orders run first.
    pub order: i32,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::ZeroOrMore,
            batch_size: DEFAULT_BATCH_SIZE,
            resolution: ErrorResolution::default(),
            order: 0,
        }
    }
}

impl MatchOptions {
    /// Set the cardinality constraint.
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Set the page size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the error policy.
    pub fn with_resolution(mut self, resolution: ErrorResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the relative order.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }
}

/// Destination store settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestinationOptions {
    /// Allowed number of transform outputs per record.
    pub cardinality: Cardinality,
    /// Maximum records per save call.
    pub batch_size: usize,
    /// Policy for transform and save.
    pub resolution: ErrorResolution,
}

impl Default for DestinationOptions {
    fn default() -> Self {
        Self {
            cardinality: Cardinality::ZeroOrMore,
            batch_size: DEFAULT_BATCH_SIZE,
            resolution: ErrorResolution::default(),
        }
    }
}

impl DestinationOptions {
    /// Set the cardinality constraint.
    pub fn with_cardinality(mut self, cardinality: Cardinality) -> Self {
        self.cardinality = cardinality;
        self
    }

    /// Set the save batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the error policy.
    pub fn with_resolution(mut self, resolution: ErrorResolution) -> Self {
        self.resolution = resolution;
        self
    }
}

pub(crate) type ResolveMatchStage<M> =
    fn(&DataStoreRegistry, &str, MatchOptions) -> std::result::Result<Box<dyn MatchAndReduce<M>>, PlanError>;

pub(crate) struct MatchDefinition<M: Migration> {
    pub(crate) store_id: String,
    pub(crate) options: MatchOptions,
    pub(crate) resolve: ResolveMatchStage<M>,
}

/// Declarative description of a migration.
///
/// ```ignore
/// MigrationDefinition::new("stations", "legacy_stations", "stations")
///     .with_source(SourceOptions::default().with_batch_size(100))
///     .match_with::<MemoryStore<Region>>(
///         "regions",
///         MatchOptions::default().with_cardinality(Cardinality::ExactlyOne),
///     )
///     .with_destination(DestinationOptions::default())
/// ```
pub struct MigrationDefinition<M: Migration> {
    pub(crate) id: String,
    pub(crate) order: i32,
    pub(crate) source_store: String,
    pub(crate) source: SourceOptions,
    pub(crate) matches: Vec<MatchDefinition<M>>,
    pub(crate) destination_store: String,
    pub(crate) destination: DestinationOptions,
}

impl<M: Migration> MigrationDefinition<M> {
    /// Describe a migration from `source_store` to `destination_store`.
    pub fn new(
        id: impl Into<String>,
        source_store: impl Into<String>,
        destination_store: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            order: 0,
            source_store: source_store.into(),
            source: SourceOptions::default(),
            matches: Vec::new(),
            destination_store: destination_store.into(),
            destination: DestinationOptions::default(),
        }
    }

    /// Coarse priority group; lower orders run first.
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    /// Source store settings.
    pub fn with_source(mut self, options: SourceOptions) -> Self {
        self.source = options;
        self
    }

    /// Destination store settings.
    pub fn with_destination(mut self, options: DestinationOptions) -> Self {
        self.destination = options;
        self
    }

    /// Match every record against the store registered as `store_id`.
    pub fn match_with<S: DataStore>(mut self, store_id: impl Into<String>, options: MatchOptions) -> Self
    where
        M: Matcher<S>,
    {
        self.matches.push(MatchDefinition {
            store_id: store_id.into(),
            options,
            resolve: resolve_match_stage::<M, S>,
        });
        self
    }

    /// Migration identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Priority group.
    pub fn order(&self) -> i32 {
        self.order
    }

    /// Source store identifier.
    pub fn source_store(&self) -> &str {
        &self.source_store
    }

    /// Destination store identifier.
    pub fn destination_store(&self) -> &str {
        &self.destination_store
    }

    /// Matched store identifiers, in declaration order.
    pub fn match_stores(&self) -> Vec<&str> {
        self.matches.iter().map(|m| m.store_id.as_str()).collect()
    }

    /// Dependency edge `{source} ∪ {matched stores} -> {destination}`.
    pub fn edge(&self) -> SuperEdge<String> {
        SuperEdge::new(
            std::iter::once(self.source_store.clone())
                .chain(self.matches.iter().map(|m| m.store_id.clone())),
            [self.destination_store.clone()],
        )
    }
}
