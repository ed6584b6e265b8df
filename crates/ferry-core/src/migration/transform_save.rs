//! Transform and save, one input record at a time.

use super::context::RecordProcessingContext;
use super::definition::{DestinationEntity, DestinationOptions, DuplicateContext, Migration, SourceEntity};
use super::runner::PipelineContext;
use crate::algorithms::RetryLogic;
use crate::data::{DataStore, DataStoreRegistry, MigratableEntity, RecordId};
use crate::error::{MigrationError, Result, StoreError};
use crate::fault::RecordRef;

type Context<M> = RecordProcessingContext<SourceEntity<M>>;

/// Borrowed view of what the last two pipeline steps need.
pub(crate) struct TransformAndSave<'a, M: Migration> {
    pub(crate) migration: &'a M,
    pub(crate) source: &'a M::Source,
    pub(crate) destination: &'a M::Destination,
    pub(crate) options: &'a DestinationOptions,
    pub(crate) registry: &'a DataStoreRegistry,
}

impl<'a, M: Migration> TransformAndSave<'a, M> {
    /// Transform, check and save every record; saved records are reported
    /// once the batch is done.
    pub(crate) fn run(&self, contexts: Vec<Context<M>>, pipeline: &PipelineContext<'_>) {
        let resolution = &self.options.resolution;
        let transform_retry = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, context: &Context<M>| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    record = %context.record.migratable_id(),
                    error = %e,
                    "Failed to transform record"
                );
            })
            .debug_context(format!("{}: transform", pipeline.migration_id));
        let save_retry = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, chunk: &[DestinationEntity<M>]| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    store = %self.destination.store_id(),
                    records = chunk.len(),
                    error = %e,
                    "Failed to save records"
                );
            })
            .debug_context(format!(
                "{}: save to {}",
                pipeline.migration_id,
                self.destination.store_id()
            ));

        let mut migrated = Vec::with_capacity(contexts.len());
        for context in contexts {
            if pipeline.is_stopped() {
                break;
            }

            let record = RecordRef::of(&context.record);
            let outcome = transform_retry
                .apply(&context, |c| self.migration.transform(&c.record, &c.aggregates))
                .and_then(|outputs| self.select_outputs(&record.id, outputs, pipeline))
                .and_then(|outputs| self.save_outputs(&context, outputs, &save_retry, pipeline));

            match outcome {
                Ok(()) => migrated.push(record.id),
                Err(e) => pipeline.report(vec![record], &e, resolution),
            }
        }

        if !migrated.is_empty() {
            tracing::debug!(
                migration = %pipeline.migration_id,
                records = migrated.len(),
                "Saved records"
            );
            pipeline
                .progress
                .report_successful_records(pipeline.migration_id, migrated);
        }
    }

    /// Enforce the destination cardinality, honouring an operator `TAKE`.
    fn select_outputs(
        &self,
        id: &RecordId,
        outputs: Vec<DestinationEntity<M>>,
        pipeline: &PipelineContext<'_>,
    ) -> Result<Vec<DestinationEntity<M>>> {
        let cardinality = self.options.cardinality;
        let found = outputs.len();
        if cardinality.is_satisfied_by(found) {
            return Ok(outputs);
        }

        if let Some(index) = pipeline
            .take_action(id)
            .and_then(|action| action.select_index(found))
        {
            tracing::debug!(
                migration = %pipeline.migration_id,
                record = %id,
                index,
                outputs = found,
                "Selected transform output from operator action"
            );
            return Ok(outputs.into_iter().nth(index).into_iter().collect());
        }

        Err(pipeline.cardinality_violation("transform".to_string(), cardinality, found))
    }

    /// Save outputs in chunks of the destination batch size.
    fn save_outputs<R>(
        &self,
        context: &Context<M>,
        outputs: Vec<DestinationEntity<M>>,
        retry: &RetryLogic<[DestinationEntity<M>], R>,
        pipeline: &PipelineContext<'_>,
    ) -> Result<()>
    where
        R: Fn(&MigrationError, &[DestinationEntity<M>]),
    {
        let batch_size = self.options.batch_size.max(1);
        for chunk in outputs.chunks(batch_size) {
            match retry.apply(chunk, |c| Ok(self.destination.save_all(c)?)) {
                Ok(()) => {}
                Err(MigrationError::Store(error @ StoreError::Duplicate { .. })) => {
                    self.resolve_duplicate(context, chunk, error, retry, pipeline)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn resolve_duplicate<R>(
        &self,
        context: &Context<M>,
        chunk: &[DestinationEntity<M>],
        error: StoreError,
        retry: &RetryLogic<[DestinationEntity<M>], R>,
        pipeline: &PipelineContext<'_>,
    ) -> Result<()>
    where
        R: Fn(&MigrationError, &[DestinationEntity<M>]),
    {
        let record = context.record.migratable_id();
        let replacement = self.migration.handle_duplicate(DuplicateContext {
            input: &context.record,
            aggregates: &context.aggregates,
            outputs: chunk,
            source: self.source,
            destination: self.destination,
            registry: self.registry,
            error: &error,
        })?;

        let Some(replacement) = replacement else {
            return Err(MigrationError::UnresolvedDuplicate {
                migration: pipeline.migration_id.to_string(),
                record,
                cause: error,
            });
        };

        tracing::info!(
            migration = %pipeline.migration_id,
            record = %record,
            replacements = replacement.len(),
            "Resolved duplicate"
        );
        if replacement.is_empty() {
            return Ok(());
        }

        match retry.apply(&replacement[..], |c| Ok(self.destination.save_all(c)?)) {
            Ok(()) => Ok(()),
            Err(MigrationError::Store(cause @ StoreError::Duplicate { .. })) => {
                Err(MigrationError::UnresolvedDuplicate {
                    migration: pipeline.migration_id.to_string(),
                    record,
                    cause,
                })
            }
            Err(e) => Err(e),
        }
    }
}
