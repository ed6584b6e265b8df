//! Building blocks shared by the planner and the runner.

pub mod cardinality;
pub mod retry;
pub mod super_topo_sort;

pub use cardinality::Cardinality;
pub use retry::{ErrorResolution, ResolutionStrategy, RetryLogic};
pub use super_topo_sort::{SuperEdge, SuperTopoSort};
