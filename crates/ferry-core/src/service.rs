//! Entry point: register stores and migrations, then run the plan.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::data::{DataStore, DataStoreRegistry, RecordId};
use crate::error::{MigrationError, PlanError, Result};
use crate::migration::{execution_order, Migration, MigrationOutcome, MigrationRunner, PlannedMigration};
use crate::progress::{CallbackId, MigrationProgress, MigrationProgressManager, PersistenceCallback};

/// What a run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Outcomes of the migrations that ran, in execution order.
    pub executed: Vec<MigrationOutcome>,
    /// Migration after which the plan was halted by its failure policy.
    pub halted_after: Option<String>,
}

impl RunReport {
    /// Whether the whole plan ran and every record is accounted for.
    pub fn is_complete(&self) -> bool {
        self.halted_after.is_none() && self.executed.iter().all(MigrationOutcome::is_complete)
    }

    /// Outcome of one migration, if it ran.
    pub fn outcome(&self, migration_id: &str) -> Option<&MigrationOutcome> {
        self.executed.iter().find(|o| o.migration_id == migration_id)
    }
}

/// Owns the stores, the migrations and the progress of a run.
///
/// # Example
///
/// ```ignore
/// let mut service = MigrationService::new(EngineConfig::default());
/// service.register_store(Arc::new(legacy_stations));
/// service.register_store(Arc::new(regions));
/// service.register_store(Arc::new(stations));
/// service.register_migration(StationMigration)?;
///
/// let sink = JsonFileProgressSink::new("progress.json");
/// let previous = sink.read()?;
/// service.add_persistence_callback(sink.into_callback());
/// let report = service.run(previous)?;
/// ```
pub struct MigrationService {
    config: EngineConfig,
    registry: Arc<DataStoreRegistry>,
    progress: Arc<MigrationProgressManager>,
    migrations: Vec<Box<dyn PlannedMigration>>,
}

impl Default for MigrationService {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl MigrationService {
    /// Create a service with no stores or migrations.
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: Arc::new(DataStoreRegistry::new()),
            progress: Arc::new(MigrationProgressManager::default()),
            migrations: Vec::new(),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered stores.
    pub fn registry(&self) -> &Arc<DataStoreRegistry> {
        &self.registry
    }

    /// Live progress of the current or last run.
    pub fn progress(&self) -> &Arc<MigrationProgressManager> {
        &self.progress
    }

    /// Register a store under its identifier.
    ///
    /// Stores must be registered before the migrations that use them.
    pub fn register_store<S: DataStore>(&self, store: Arc<S>) {
        self.registry.register(store);
    }

    /// Register a migration, resolving its stores.
    pub fn register_migration<M: Migration>(&mut self, migration: M) -> std::result::Result<(), PlanError> {
        let runner = MigrationRunner::new(
            migration,
            Arc::clone(&self.registry),
            Arc::clone(&self.progress),
            self.config.clone(),
        )?;
        if self.migrations.iter().any(|m| m.id() == runner.id()) {
            return Err(PlanError::DuplicateMigration {
                migration: runner.id().to_string(),
            });
        }

        tracing::debug!(migration = %runner.id(), edge = %runner.edge(), "Registered migration");
        self.migrations.push(Box::new(runner));
        Ok(())
    }

    /// Registered migration identifiers, in registration order.
    pub fn migration_ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }

    /// Migration identifiers in execution order.
    pub fn plan(&self) -> std::result::Result<Vec<String>, PlanError> {
        Ok(execution_order(&self.migrations)?
            .into_iter()
            .map(|i| self.migrations[i].id().to_string())
            .collect())
    }

    /// Persist every checkpoint through `callback`.
    pub fn add_persistence_callback(&self, callback: PersistenceCallback) -> CallbackId {
        self.progress.add_persistence_callback(callback)
    }

    /// Run every migration in plan order, resuming from `previous` if given.
    ///
    /// A fatal error stops the run and is returned after the progress has
    /// been checkpointed.
    pub fn run(&self, previous: Option<MigrationProgress>) -> Result<RunReport> {
        let plan = execution_order(&self.migrations)?;
        match previous {
            Some(progress) => {
                tracing::info!(
                    completed = progress.metadata.completed_migration_ids.len(),
                    "Resuming from previous progress"
                );
                self.progress.restore(progress);
            }
            None => self.progress.restore(MigrationProgress::new()),
        }

        tracing::info!(migrations = plan.len(), "Starting migration run");
        let mut report = RunReport::default();
        for index in plan {
            let migration = &self.migrations[index];
            let id = migration.id();

            self.progress.start_migration(id);
            let outcome = match migration.run() {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.progress.finish_migration(id, false);
                    self.progress.checkpoint();
                    tracing::error!(migration = %id, error = %e, "Migration run aborted");
                    return Err(e);
                }
            };
            self.progress.finish_migration(id, outcome.is_complete());
            if self.config.checkpoint_after_each_migration {
                self.progress.checkpoint();
            }

            let halts = outcome.halts_plan();
            report.executed.push(outcome);
            if halts {
                tracing::warn!(migration = %id, "Halting plan after migration failures");
                report.halted_after = Some(id.to_string());
                break;
            }
        }

        self.progress.checkpoint();
        tracing::info!(
            executed = report.executed.len(),
            complete = report.is_complete(),
            "Finished migration run"
        );
        Ok(report)
    }

    /// Resume from a previous run's progress.
    pub fn run_with_previous_progress(&self, previous: MigrationProgress) -> Result<RunReport> {
        self.run(Some(previous))
    }

    /// Start from scratch.
    pub fn run_without_previous_progress(&self) -> Result<RunReport> {
        self.run(None)
    }

    /// Run one migration for the given source records only.
    ///
    /// Progress is kept from earlier runs of this service.
    pub fn run_with_record_id_in(
        &self,
        migration_id: &str,
        ids: &BTreeSet<RecordId>,
    ) -> Result<MigrationOutcome> {
        let migration = self
            .migrations
            .iter()
            .find(|m| m.id() == migration_id)
            .ok_or_else(|| {
                MigrationError::from(PlanError::UnknownMigration {
                    migration: migration_id.to_string(),
                })
            })?;

        let outcome = migration.run_with_record_id_in(ids);
        self.progress.checkpoint();
        outcome
    }
}
