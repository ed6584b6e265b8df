//! Match-and-reduce against one auxiliary store.
//!
//! Records are grouped by the filter their `match_with` returns, each
//! distinct filter is paged once, and every page is folded into all
//! records of the group before the next page is read. Single-valued
//! cardinalities buffer their candidates and reduce once at the end so an
//! operator `TAKE` can pick among them.

use std::collections::HashMap;
use std::sync::Arc;

use super::context::RecordProcessingContext;
use super::definition::{MatchOptions, Matcher, Migration, SourceEntity};
use super::runner::PipelineContext;
use crate::algorithms::Cardinality;
use crate::data::{DataStore, DataStoreRegistry, MigratableEntity, StorePage};
use crate::error::{MigrationError, PlanError};
use crate::fault::RecordRef;

type Context<M> = RecordProcessingContext<SourceEntity<M>>;

/// A resolved match declaration, erased over the matched store type.
pub(crate) trait MatchAndReduce<M: Migration>: Send + Sync {
    /// Identifier of the matched store.
    fn store_id(&self) -> &str;

    /// Settings of the declaration.
    fn options(&self) -> &MatchOptions;

    /// Match and reduce every record; returns the records that may proceed.
    fn match_and_reduce(
        &self,
        migration: &M,
        contexts: Vec<Context<M>>,
        pipeline: &PipelineContext<'_>,
    ) -> Vec<Context<M>>;
}

/// Look up the store of a match declaration and build its stage.
pub(crate) fn resolve_match_stage<M, S>(
    registry: &DataStoreRegistry,
    store_id: &str,
    options: MatchOptions,
) -> Result<Box<dyn MatchAndReduce<M>>, PlanError>
where
    M: Matcher<S>,
    S: DataStore,
{
    let store = registry.get::<S>(store_id)?;
    Ok(Box::new(MatchStage { store, options }))
}

struct MatchStage<S: DataStore> {
    store: Arc<S>,
    options: MatchOptions,
}

impl<M, S> MatchAndReduce<M> for MatchStage<S>
where
    M: Matcher<S>,
    S: DataStore,
{
    fn store_id(&self) -> &str {
        self.store.store_id()
    }

    fn options(&self) -> &MatchOptions {
        &self.options
    }

    fn match_and_reduce(
        &self,
        migration: &M,
        contexts: Vec<Context<M>>,
        pipeline: &PipelineContext<'_>,
    ) -> Vec<Context<M>> {
        let resolution = &self.options.resolution;
        let retry = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, context: &Context<M>| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    store = %self.store.store_id(),
                    record = %context.record.migratable_id(),
                    error = %e,
                    "Failed to build match filter"
                );
            })
            .debug_context(format!(
                "{}: match with {}",
                pipeline.migration_id,
                self.store.store_id()
            ));

        let mut survivors = Vec::with_capacity(contexts.len());
        let mut groups: Vec<(S::Filter, Vec<Context<M>>)> = Vec::new();
        let mut group_index: HashMap<S::Filter, usize> = HashMap::new();

        for context in contexts {
            let filter = retry.apply(&context, |c| {
                <M as Matcher<S>>::match_with(migration, &c.record, &c.aggregates, &self.store)
            });
            match filter {
                Ok(Some(filter)) => match group_index.get(&filter) {
                    Some(&index) => groups[index].1.push(context),
                    None => {
                        group_index.insert(filter.clone(), groups.len());
                        groups.push((filter, vec![context]));
                    }
                },
                Ok(None) => survivors.push(context),
                Err(e) => pipeline.report(vec![RecordRef::of(&context.record)], &e, resolution),
            }
        }

        for (filter, members) in groups {
            if pipeline.is_stopped() {
                break;
            }
            survivors.extend(self.reduce_group(migration, &filter, members, pipeline));
        }
        survivors
    }
}

impl<S: DataStore> MatchStage<S> {
    fn step(&self) -> String {
        format!("match with {}", self.store.store_id())
    }

    fn reduce_group<M: Matcher<S>>(
        &self,
        migration: &M,
        filter: &S::Filter,
        mut members: Vec<Context<M>>,
        pipeline: &PipelineContext<'_>,
    ) -> Vec<Context<M>> {
        let resolution = &self.options.resolution;
        let cardinality = self.options.cardinality;
        let batch_size = self.options.batch_size.max(1);

        let first_page = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, filter: &S::Filter| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    store = %self.store.store_id(),
                    filter = ?filter,
                    error = %e,
                    "Failed to read first page of matches"
                );
            })
            .debug_context(format!("{}: first page of {}", pipeline.migration_id, self.store.store_id()));
        let next_page = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, page: &StorePage<S>| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    store = %self.store.store_id(),
                    page = page.page_number() + 1,
                    error = %e,
                    "Failed to read page of matches"
                );
            })
            .debug_context(format!("{}: next page of {}", pipeline.migration_id, self.store.store_id()));

        let mut page = match first_page.apply(filter, |f| Ok(self.store.first_page(f, batch_size)?)) {
            Ok(page) => page,
            Err(e) => {
                pipeline.report(refs(&members), &e, resolution);
                return Vec::new();
            }
        };

        let single = cardinality.is_single_valued();
        let may_take = single
            && members
                .iter()
                .any(|m| pipeline.take_action(&m.record.migratable_id()).is_some());
        let mut found = 0usize;
        let mut candidates: Vec<S::Entity> = Vec::new();

        while !page.is_empty() {
            found += page.size();
            if single {
                if !cardinality.is_satisfied_in_progress(found) && !may_take {
                    self.report_violations(&members, cardinality, found, pipeline);
                    return Vec::new();
                }
                candidates.extend(page.records().iter().cloned());
            } else {
                members = self.reduce_page(migration, members, page.records(), pipeline);
                if members.is_empty() {
                    return members;
                }
            }

            page = match next_page.apply(&page, |p| Ok(self.store.next_page(p)?)) {
                Ok(page) => page,
                Err(e) => {
                    pipeline.report(refs(&members), &e, resolution);
                    return Vec::new();
                }
            };
        }

        if single {
            self.reduce_selected(migration, members, &candidates, pipeline)
        } else if !cardinality.is_satisfied_by(found) {
            self.report_violations(&members, cardinality, found, pipeline);
            Vec::new()
        } else {
            members
        }
    }

    fn reduce_page<M: Matcher<S>>(
        &self,
        migration: &M,
        members: Vec<Context<M>>,
        matches: &[S::Entity],
        pipeline: &PipelineContext<'_>,
    ) -> Vec<Context<M>> {
        let resolution = &self.options.resolution;
        let retry = resolution
            .retry_logic()
            .exception_reporter(|e: &MigrationError, context: &Context<M>| {
                tracing::warn!(
                    migration = %pipeline.migration_id,
                    store = %self.store.store_id(),
                    record = %context.record.migratable_id(),
                    error = %e,
                    "Failed to reduce matches"
                );
            })
            .debug_context(format!("{}: reduce from {}", pipeline.migration_id, self.store.store_id()));

        members
            .into_iter()
            .filter_map(|mut member| {
                let reduced = retry.apply_mut(&mut member, |c| {
                    <M as Matcher<S>>::reduce_from(migration, &mut c.aggregates, matches)
                });
                match reduced {
                    Ok(()) => Some(member),
                    Err(e) => {
                        pipeline.report(vec![RecordRef::of(&member.record)], &e, resolution);
                        None
                    }
                }
            })
            .collect()
    }

    /// Reduce the single candidate (or the operator's pick) into each member.
    fn reduce_selected<M: Matcher<S>>(
        &self,
        migration: &M,
        members: Vec<Context<M>>,
        candidates: &[S::Entity],
        pipeline: &PipelineContext<'_>,
    ) -> Vec<Context<M>> {
        let cardinality = self.options.cardinality;
        let found = candidates.len();
        let mut survivors = Vec::with_capacity(members.len());
        let mut selected_members = Vec::new();

        for member in members {
            let id = member.record.migratable_id();
            let selected: &[S::Entity] = match found {
                0 if cardinality.fails_on_missing() => {
                    self.report_violations(std::slice::from_ref(&member), cardinality, found, pipeline);
                    continue;
                }
                0 => &[],
                1 => candidates,
                _ => match pipeline.take_action(&id).and_then(|a| a.select_index(found)) {
                    Some(index) => {
                        tracing::debug!(
                            migration = %pipeline.migration_id,
                            record = %id,
                            index,
                            candidates = found,
                            "Selected match from operator action"
                        );
                        std::slice::from_ref(&candidates[index])
                    }
                    None => {
                        self.report_violations(std::slice::from_ref(&member), cardinality, found, pipeline);
                        continue;
                    }
                },
            };

            if selected.is_empty() {
                survivors.push(member);
            } else {
                selected_members.push((member, selected));
            }
        }

        for (member, selected) in selected_members {
            survivors.extend(self.reduce_page(migration, vec![member], selected, pipeline));
        }
        survivors
    }

    fn report_violations<E: MigratableEntity>(
        &self,
        members: &[RecordProcessingContext<E>],
        cardinality: Cardinality,
        found: usize,
        pipeline: &PipelineContext<'_>,
    ) {
        for member in members {
            let violation = pipeline.cardinality_violation(self.step(), cardinality, found);
            pipeline.report(vec![RecordRef::of(&member.record)], &violation, &self.options.resolution);
        }
    }
}

fn refs<E: MigratableEntity>(members: &[RecordProcessingContext<E>]) -> Vec<RecordRef> {
    members.iter().map(|m| RecordRef::of(&m.record)).collect()
}
