//! Topological sort over super-edges (hyperedges).
//!
//! Each edge maps a set of source nodes to a set of target nodes. Sorting
//! is a fixed-point iteration: nodes that no edge targets start out
//! resolved, and an edge resolves once all of its sources are resolved. An
//! edge whose target was already resolved by another edge is a conflict
//! (a cycle, or two edges writing the same node).
//!
//! Quadratic in the number of edges, which is fine for hand-written plans.

use std::collections::BTreeSet;
use std::fmt::{self, Debug};

use crate::error::PlanError;

/// A hyperedge `{sources} -> {targets}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperEdge<N> {
    sources: BTreeSet<N>,
    targets: BTreeSet<N>,
}

impl<N: Ord> SuperEdge<N> {
    /// Create an edge.
    pub fn new(
        sources: impl IntoIterator<Item = N>,
        targets: impl IntoIterator<Item = N>,
    ) -> Self {
        Self {
            sources: sources.into_iter().collect(),
            targets: targets.into_iter().collect(),
        }
    }

    /// Source nodes.
    pub fn sources(&self) -> &BTreeSet<N> {
        &self.sources
    }

    /// Target nodes.
    pub fn targets(&self) -> &BTreeSet<N> {
        &self.targets
    }
}

impl<N: Debug> fmt::Display for SuperEdge<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} -> {:?}", self.sources, self.targets)
    }
}

/// Sorter over a fixed list of super-edges.
#[derive(Debug, Clone)]
pub struct SuperTopoSort<N> {
    edges: Vec<SuperEdge<N>>,
}

impl<N: Ord + Clone + Debug> SuperTopoSort<N> {
    /// Create a sorter.
    pub fn new(edges: Vec<SuperEdge<N>>) -> Self {
        Self { edges }
    }

    /// The input edges.
    pub fn edges(&self) -> &[SuperEdge<N>] {
        &self.edges
    }

    /// Sort the edges, returning the resolved edges in order.
    pub fn sorted_edges(&self) -> Result<Vec<&SuperEdge<N>>, PlanError> {
        Ok(self.sort()?.into_iter().map(|i| &self.edges[i]).collect())
    }

    /// Sort the edges, returning indices into [`edges`](Self::edges).
    pub fn sort(&self) -> Result<Vec<usize>, PlanError> {
        for edge in &self.edges {
            if !edge.sources.is_disjoint(&edge.targets) {
                return Err(PlanError::SelfLoop {
                    edge: edge.to_string(),
                });
            }
        }

        let all_targets: BTreeSet<&N> = self.edges.iter().flat_map(|e| e.targets.iter()).collect();
        let mut resolved: BTreeSet<N> = self
            .edges
            .iter()
            .flat_map(|e| e.sources.iter())
            .filter(|node| !all_targets.contains(node))
            .cloned()
            .collect();

        let mut done = vec![false; self.edges.len()];
        let mut sorted = Vec::with_capacity(self.edges.len());

        // A converging sort resolves at least one edge per pass.
        for _pass in 0..=self.edges.len() {
            if sorted.len() == self.edges.len() {
                break;
            }

            let before = sorted.len();
            for (index, edge) in self.edges.iter().enumerate() {
                if done[index] || !edge.sources.is_subset(&resolved) {
                    continue;
                }
                if !edge.targets.is_disjoint(&resolved) {
                    return Err(self.conflict(edge, &resolved, &sorted));
                }
                resolved.extend(edge.targets.iter().cloned());
                done[index] = true;
                sorted.push(index);
            }

            if sorted.len() == before {
                break;
            }
        }

        if sorted.len() != self.edges.len() {
            let unresolved = self
                .edges
                .iter()
                .zip(&done)
                .filter(|(_, done)| !**done)
                .map(|(edge, _)| edge.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(PlanError::NoConvergence { unresolved });
        }

        Ok(sorted)
    }

    fn conflict(&self, edge: &SuperEdge<N>, resolved: &BTreeSet<N>, sorted: &[usize]) -> PlanError {
        PlanError::Conflict {
            edge: edge.to_string(),
            resolved: format!("{:?}", resolved),
            sorted: describe(sorted.iter().map(|&i| &self.edges[i])),
            all: describe(self.edges.iter()),
        }
    }
}

fn describe<'a, N: Debug + 'a>(edges: impl Iterator<Item = &'a SuperEdge<N>>) -> String {
    edges.map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(sources: &[&'static str], targets: &[&'static str]) -> SuperEdge<&'static str> {
        SuperEdge::new(sources.iter().copied(), targets.iter().copied())
    }

    fn position(order: &[usize], index: usize) -> usize {
        order.iter().position(|&i| i == index).unwrap()
    }

    #[test]
    fn test_chain_sorted_in_dependency_order() {
        // Declared out of order on purpose.
        let edges = vec![
            edge(&["c"], &["d"]),
            edge(&["a"], &["b"]),
            edge(&["b"], &["c"]),
        ];
        let order = SuperTopoSort::new(edges).sort().unwrap();
        assert_eq!(order, vec![1, 2, 0]);
    }

    #[test]
    fn test_hyperedge_waits_for_every_source() {
        let edges = vec![
            edge(&["stations", "indicators"], &["station_indicators"]),
            edge(&["legacy_stations", "regions"], &["stations"]),
            edge(&["legacy_indicators"], &["indicators"]),
            edge(&["station_indicators", "legacy_results"], &["results"]),
        ];
        let sorter = SuperTopoSort::new(edges);
        let order = sorter.sort().unwrap();

        assert_eq!(order.len(), 4);
        assert!(position(&order, 1) < position(&order, 0));
        assert!(position(&order, 2) < position(&order, 0));
        assert!(position(&order, 0) < position(&order, 3));

        let sorted = sorter.sorted_edges().unwrap();
        assert!(sorted[3].targets().contains("results"));
    }

    #[test]
    fn test_every_acyclic_order_respects_sources() {
        let edges = vec![
            edge(&["a", "b"], &["c", "d"]),
            edge(&["d"], &["e"]),
            edge(&["c", "e"], &["f"]),
            edge(&["x"], &["y"]),
            edge(&["y", "f"], &["z"]),
        ];
        let sorter = SuperTopoSort::new(edges.clone());
        let order = sorter.sort().unwrap();

        let mut resolved: BTreeSet<&str> = ["a", "b", "x"].into();
        for index in order {
            assert!(edges[index].sources().is_subset(&resolved));
            resolved.extend(edges[index].targets().iter().copied());
        }
    }

    #[test]
    fn test_self_loop_rejected() {
        let err = SuperTopoSort::new(vec![edge(&["a", "b"], &["b"])]).sort().unwrap_err();
        assert!(matches!(err, PlanError::SelfLoop { .. }));
    }

    #[test]
    fn test_shared_target_is_a_conflict() {
        let edges = vec![edge(&["a"], &["c"]), edge(&["b"], &["c"])];
        let err = SuperTopoSort::new(edges).sort().unwrap_err();
        match err {
            PlanError::Conflict { edge, sorted, .. } => {
                assert!(edge.contains("\"b\""));
                assert!(sorted.contains("\"a\""));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_pure_cycle_does_not_converge() {
        let edges = vec![edge(&["a"], &["b"]), edge(&["b"], &["a"])];
        let err = SuperTopoSort::new(edges).sort().unwrap_err();
        assert!(matches!(err, PlanError::NoConvergence { .. }));
    }

    #[test]
    fn test_cycle_fed_from_outside_is_a_conflict() {
        let edges = vec![
            edge(&["x"], &["a"]),
            edge(&["a"], &["b"]),
            edge(&["b"], &["a"]),
        ];
        let err = SuperTopoSort::new(edges).sort().unwrap_err();
        assert!(matches!(err, PlanError::Conflict { .. }));
    }

    #[test]
    fn test_empty_input() {
        let sorter: SuperTopoSort<&str> = SuperTopoSort::new(Vec::new());
        assert!(sorter.sort().unwrap().is_empty());
    }
}
