//! Runs one migration: page the source, match and reduce, transform, save.
//!
//! Failures are recorded as they happen and handed to a
//! [`MigrationErrorInvestigator`] whose workers bisect failed groups by
//! re-running the pipeline for subsets of records while the main scan
//! continues.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;

use super::context::RecordProcessingContext;
use super::definition::{DestinationOptions, Migration, SourceEntity, SourceOptions};
use super::match_reduce::MatchAndReduce;
use super::transform_save::TransformAndSave;
use crate::algorithms::{Cardinality, ErrorResolution, ResolutionStrategy, SuperEdge};
use crate::config::EngineConfig;
use crate::data::{DataStore, DataStoreRegistry, MigratableEntity, RecordId, StorePage};
use crate::error::{MigrationError, PlanError, Result};
use crate::fault::{FailedRecordGroup, MigrationErrorInvestigator, RecordRef, RecordRerun};
use crate::progress::{FailedRecordAction, MigrationProgressManager};

type Context<M> = RecordProcessingContext<SourceEntity<M>>;

/// What the pipeline steps share while processing one page.
pub(crate) struct PipelineContext<'a> {
    pub(crate) migration_id: &'a str,
    pub(crate) progress: &'a MigrationProgressManager,
    pub(crate) investigator: &'a MigrationErrorInvestigator,
}

impl PipelineContext<'_> {
    /// Record records that failed together and apply the step's strategy.
    pub(crate) fn report(
        &self,
        records: Vec<RecordRef>,
        error: &MigrationError,
        resolution: &ErrorResolution,
    ) {
        if records.is_empty() {
            return;
        }

        self.progress
            .report_failed_records(self.migration_id, &records, error, resolution.strategy);
        tracing::warn!(
            migration = %self.migration_id,
            records = records.len(),
            strategy = %resolution.strategy,
            error = %error,
            "Records failed"
        );

        let cause = error.root_cause().to_string();
        match resolution.strategy {
            ResolutionStrategy::StopImmediately => {
                let first = &records[0].id;
                self.investigator.halt(MigrationError::Fatal {
                    migration: self.migration_id.to_string(),
                    message: format!("record {} failed: {}", first, cause),
                });
            }
            ResolutionStrategy::FinishMigrationThenStop | ResolutionStrategy::ReportAndProceed => {
                self.investigator.submit(FailedRecordGroup::new(
                    records.into_iter().map(|r| r.id),
                    *resolution,
                    cause,
                ));
            }
        }
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.investigator.is_stopped()
    }

    /// The operator's `TAKE` selection for a record, if any.
    pub(crate) fn take_action(&self, id: &RecordId) -> Option<FailedRecordAction> {
        self.progress.take_action(self.migration_id, id)
    }

    pub(crate) fn cardinality_violation(
        &self,
        step: String,
        required: Cardinality,
        found: usize,
    ) -> MigrationError {
        MigrationError::CardinalityViolation {
            migration: self.migration_id.to_string(),
            step,
            required,
            found,
        }
    }
}

/// Result of running one migration to the end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationOutcome {
    /// The migration.
    pub migration_id: String,
    /// Records saved so far, including earlier runs.
    pub migrated_records: usize,
    /// Records isolated as failing during this run.
    pub unresolved_failures: usize,
    /// Isolated records whose policy halts the plan.
    pub halting_failures: usize,
    /// Recorded failures not marked `IGNORE`.
    pub outstanding_failures: usize,
}

impl MigrationOutcome {
    /// Whether every source record is accounted for.
    pub fn is_complete(&self) -> bool {
        self.outstanding_failures == 0
    }

    /// Whether the plan must stop after this migration.
    pub fn halts_plan(&self) -> bool {
        self.halting_failures > 0
    }
}

/// A registered migration, erased over its store types.
pub trait PlannedMigration: Send + Sync {
    /// Migration identifier.
    fn id(&self) -> &str;

    /// Priority group.
    fn order(&self) -> i32;

    /// Store dependency edge.
    fn edge(&self) -> &SuperEdge<String>;

    /// Retry earlier failures, then migrate every source record not yet migrated.
    fn run(&self) -> Result<MigrationOutcome>;

    /// Migrate only the given source records.
    fn run_with_record_id_in(&self, ids: &BTreeSet<RecordId>) -> Result<MigrationOutcome>;
}

/// Executes one migration against its resolved stores.
pub struct MigrationRunner<M: Migration> {
    id: String,
    order: i32,
    edge: SuperEdge<String>,
    migration: M,
    source: Arc<M::Source>,
    source_options: SourceOptions,
    match_stages: Vec<Box<dyn MatchAndReduce<M>>>,
    destination: Arc<M::Destination>,
    destination_options: DestinationOptions,
    registry: Arc<DataStoreRegistry>,
    progress: Arc<MigrationProgressManager>,
    config: EngineConfig,
}

impl<M: Migration> MigrationRunner<M> {
    /// Resolve the stores of `migration`'s definition.
    ///
    /// Match declarations run by ascending order; within an order, those that
    /// require a match run first.
    pub fn new(
        migration: M,
        registry: Arc<DataStoreRegistry>,
        progress: Arc<MigrationProgressManager>,
        config: EngineConfig,
    ) -> std::result::Result<Self, PlanError> {
        let definition = migration.definition();
        let id = definition.id.clone();
        let edge = definition.edge();

        let source = registry
            .get::<M::Source>(&definition.source_store)
            .map_err(|e| e.in_migration(&id))?;
        let destination = registry
            .get::<M::Destination>(&definition.destination_store)
            .map_err(|e| e.in_migration(&id))?;

        let mut matches = definition.matches;
        matches.sort_by_key(|m| (m.options.order, !m.options.cardinality.fails_on_missing()));
        let match_stages = matches
            .into_iter()
            .map(|m| (m.resolve)(&registry, &m.store_id, m.options).map_err(|e| e.in_migration(&id)))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            id,
            order: definition.order,
            edge,
            migration,
            source,
            source_options: definition.source,
            match_stages,
            destination,
            destination_options: definition.destination,
            registry,
            progress,
            config,
        })
    }

    /// The migration callbacks.
    pub fn migration(&self) -> &M {
        &self.migration
    }

    fn execute(
        &self,
        scan: impl FnOnce(&MigrationErrorInvestigator) -> Result<()>,
    ) -> Result<MigrationOutcome> {
        tracing::info!(migration = %self.id, edge = %self.edge, "Starting migration");
        let investigator = MigrationErrorInvestigator::new(
            self.id.as_str(),
            self.config.investigator_workers,
            self.config.investigator_poll_interval,
        );

        thread::scope(|scope| {
            investigator.spawn_workers(scope, self);
            if let Err(e) = scan(&investigator) {
                investigator.halt(e);
            }
            investigator.join();
            investigator.shutdown();
        });

        if let Some(fatal) = investigator.take_fatal() {
            let fatal = match fatal {
                e @ MigrationError::Fatal { .. } => e,
                other => MigrationError::Fatal {
                    migration: self.id.clone(),
                    message: other.to_string(),
                },
            };
            self.progress.report_fatal_error(fatal.to_string());
            return Err(fatal);
        }

        let summary = investigator.summary();
        let outcome = MigrationOutcome {
            migration_id: self.id.clone(),
            migrated_records: self.progress.migrated_ids(&self.id).len(),
            unresolved_failures: summary.unresolved_failures,
            halting_failures: summary.halting_failures,
            outstanding_failures: self.progress.outstanding_failure_count(&self.id),
        };
        tracing::info!(
            migration = %self.id,
            migrated = outcome.migrated_records,
            failed = outcome.outstanding_failures,
            reruns = summary.reruns,
            "Finished migration"
        );
        Ok(outcome)
    }

    /// Page through `filter` and push every page through the pipeline.
    ///
    /// Source read failures are returned: without source data the migration
    /// cannot progress.
    fn run_internal(
        &self,
        filter: &<M::Source as DataStore>::Filter,
        skip: &BTreeSet<RecordId>,
        investigator: &MigrationErrorInvestigator,
    ) -> Result<()> {
        let pipeline = PipelineContext {
            migration_id: &self.id,
            progress: &self.progress,
            investigator,
        };
        let resolution = &self.source_options.resolution;
        let batch_size = self.source_options.batch_size.max(1);

        let first_page = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, filter: &<M::Source as DataStore>::Filter| {
                tracing::error!(
                    migration = %self.id,
                    store = %self.source.store_id(),
                    filter = ?filter,
                    error = %e,
                    "Failed to read first source page"
                );
            })
            .debug_context(format!("{}: first page of {}", self.id, self.source.store_id()));
        let next_page = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, page: &StorePage<M::Source>| {
                tracing::error!(
                    migration = %self.id,
                    store = %self.source.store_id(),
                    page = page.page_number() + 1,
                    error = %e,
                    "Failed to read source page"
                );
            })
            .debug_context(format!("{}: next page of {}", self.id, self.source.store_id()));

        let mut page = first_page.apply(filter, |f| Ok(self.source.first_page(f, batch_size)?))?;
        while !page.is_empty() {
            if investigator.is_stopped() {
                return Err(MigrationError::Stopped);
            }
            self.process_page(page.records(), skip, &pipeline);
            page = next_page.apply(&page, |p| Ok(self.source.next_page(p)?))?;
        }
        Ok(())
    }

    fn process_page(
        &self,
        records: &[SourceEntity<M>],
        skip: &BTreeSet<RecordId>,
        pipeline: &PipelineContext<'_>,
    ) {
        let mut ids: BTreeSet<RecordId> = records.iter().map(|r| r.migratable_id()).collect();
        self.progress.exclude_successfully_migrated_ids(&self.id, &mut ids);
        self.progress.exclude_ignored_ids(&self.id, &mut ids);
        ids.retain(|id| !skip.contains(id));
        if ids.is_empty() {
            return;
        }

        let mut contexts: Vec<Context<M>> = records
            .iter()
            .filter(|r| ids.remove(&r.migratable_id()))
            .cloned()
            .map(RecordProcessingContext::new)
            .collect();
        tracing::trace!(migration = %self.id, records = contexts.len(), "Processing page");

        let resolution = &self.source_options.resolution;
        let start = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, context: &Context<M>| {
                tracing::warn!(
                    migration = %self.id,
                    record = %context.record.migratable_id(),
                    error = %e,
                    "Failed to start reduction"
                );
            })
            .debug_context(format!("{}: start reduction", self.id));
        contexts.retain_mut(|context| {
            let started = start.apply_mut(context, |c| {
                self.migration.start_reduction(&c.record, &mut c.aggregates)
            });
            match started {
                Ok(()) => true,
                Err(e) => {
                    pipeline.report(vec![RecordRef::of(&context.record)], &e, resolution);
                    false
                }
            }
        });

        for stage in &self.match_stages {
            if contexts.is_empty() || pipeline.is_stopped() {
                return;
            }
            tracing::trace!(
                migration = %self.id,
                store = %stage.store_id(),
                cardinality = %stage.options().cardinality,
                records = contexts.len(),
                "Matching"
            );
            contexts = stage.match_and_reduce(&self.migration, contexts, pipeline);
        }

        if contexts.is_empty() || pipeline.is_stopped() {
            return;
        }
        TransformAndSave {
            migration: &self.migration,
            source: &*self.source,
            destination: &*self.destination,
            options: &self.destination_options,
            registry: &self.registry,
        }
        .run(contexts, pipeline);
    }
}

impl<M: Migration> RecordRerun for MigrationRunner<M> {
    fn migration_id(&self) -> &str {
        &self.id
    }

    fn rerun_records(
        &self,
        ids: &BTreeSet<RecordId>,
        investigator: &MigrationErrorInvestigator,
    ) -> Result<()> {
        self.run_internal(&self.source.match_by_id_in(ids), &BTreeSet::new(), investigator)
    }
}

impl<M: Migration> PlannedMigration for MigrationRunner<M> {
    fn id(&self) -> &str {
        &self.id
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn edge(&self) -> &SuperEdge<String> {
        &self.edge
    }

    fn run(&self) -> Result<MigrationOutcome> {
        self.execute(|investigator| {
            let retried = investigator.retry_previously_failed_records(&self.progress, self)?;
            self.run_internal(&self.source.match_all(), &retried, investigator)
        })
    }

    fn run_with_record_id_in(&self, ids: &BTreeSet<RecordId>) -> Result<MigrationOutcome> {
        self.execute(|investigator| {
            self.run_internal(&self.source.match_by_id_in(ids), &BTreeSet::new(), investigator)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemoryStore;
    use crate::migration::{Aggregates, MigrationDefinition};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    struct Row {
        id: i64,
    }

    impl MigratableEntity for Row {
        fn migratable_id(&self) -> RecordId {
            RecordId::Int(self.id)
        }
    }

    struct CopyRows;

    impl Migration for CopyRows {
        type Source = MemoryStore<Row>;
        type Destination = MemoryStore<Row>;

        fn definition(&self) -> MigrationDefinition<Self> {
            MigrationDefinition::new("copy", "input", "output")
        }

        fn transform(&self, record: &Row, _aggregates: &Aggregates) -> Result<Vec<Row>> {
            Ok(vec![record.clone()])
        }
    }

    fn config() -> EngineConfig {
        EngineConfig::new()
            .with_investigator_workers(2)
            .with_investigator_poll_interval(Duration::from_millis(5))
    }

    #[test]
    fn test_unknown_store_names_the_migration() {
        let registry = Arc::new(DataStoreRegistry::new());
        registry.register(Arc::new(MemoryStore::<Row>::new("input")));

        let result = MigrationRunner::new(
            CopyRows,
            registry,
            Arc::new(MigrationProgressManager::default()),
            config(),
        );
        match result {
            Err(PlanError::UnknownStore { migration, store }) => {
                assert_eq!(migration, "copy");
                assert_eq!(store, "output");
            }
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("expected an unknown store"),
        }
    }

    #[test]
    fn test_run_and_rerun_subset() {
        let registry = Arc::new(DataStoreRegistry::new());
        let input = Arc::new(MemoryStore::new("input").with_records((1..=7).map(|id| Row { id })));
        let output = Arc::new(MemoryStore::<Row>::new("output"));
        registry.register(Arc::clone(&input));
        registry.register(Arc::clone(&output));
        let progress = Arc::new(MigrationProgressManager::default());

        let runner = MigrationRunner::new(CopyRows, registry, Arc::clone(&progress), config()).unwrap();
        assert_eq!(runner.edge().to_string(), SuperEdge::new(["input".to_string()], ["output".to_string()]).to_string());

        let ids: BTreeSet<RecordId> = [2, 4].into_iter().map(RecordId::Int).collect();
        let outcome = runner.run_with_record_id_in(&ids).unwrap();
        assert_eq!(outcome.migrated_records, 2);
        assert_eq!(output.ids(), ids);

        let outcome = runner.run().unwrap();
        assert_eq!(outcome.migrated_records, 7);
        assert!(outcome.is_complete());
        assert!(!outcome.halts_plan());
        assert_eq!(output.len(), 7);
    }
}
