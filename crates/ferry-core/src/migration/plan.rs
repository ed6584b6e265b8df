//! Execution order of registered migrations.

use std::collections::BTreeMap;

use super::runner::PlannedMigration;
use crate::algorithms::{SuperEdge, SuperTopoSort};
use crate::error::PlanError;

/// Indices of `migrations` in execution order.
///
/// Migrations are grouped by ascending `order`; each group is sorted by its
/// store dependency edges so that a store is written before anything reads it.
pub fn execution_order(migrations: &[Box<dyn PlannedMigration>]) -> Result<Vec<usize>, PlanError> {
    let mut groups: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (index, migration) in migrations.iter().enumerate() {
        groups.entry(migration.order()).or_default().push(index);
    }

    let mut plan = Vec::with_capacity(migrations.len());
    for (order, members) in groups {
        let edges: Vec<SuperEdge<String>> = members
            .iter()
            .map(|&index| migrations[index].edge().clone())
            .collect();
        let sorted = SuperTopoSort::new(edges).sort()?;
        tracing::debug!(
            order,
            migrations = ?sorted.iter().map(|&i| migrations[members[i]].id()).collect::<Vec<_>>(),
            "Planned migration group"
        );
        plan.extend(sorted.into_iter().map(|i| members[i]));
    }
    Ok(plan)
}
