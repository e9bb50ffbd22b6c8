//! Search-tree engine for symbolic path exploration.
//!
//! An instrumented program reports each branch on a symbolic value to a
//! [`StateSpace`], which records it in a persistent [`SearchTree`]. Running
//! the program repeatedly through an [`Explorer`] samples the tree's paths
//! and aggregates their verdicts bottom-up.

pub mod error;
pub mod explorer;
pub mod heap;
pub mod merge;
pub mod node;
pub mod space;
pub mod stats;
pub mod verdict;

#[cfg(test)]
mod testing;

pub use error::{ExplorationError, ExplorationResult, PathError};
pub use explorer::{path_analysis, ExplorationReport, ExploreConfig, Explorer};
pub use heap::{HeapEntry, HeapHandle, SnapshotRef, SymbolicHeap, TypeTag};
pub use merge::{merge_analyses, merge_node_results};
pub use node::{
    Node, NodeArena, NodeId, DEFAULT_FALSE_PROBABILITY, WORST_RESULT_FALSE_PROBABILITY,
};
pub use space::{
    Assumption, SearchTree, SessionGuard, StateSpace, DEFAULT_SEARCH_SEED, DETACH_GRACE,
};
pub use stats::StatsCounter;
pub use verdict::{AnalysisMessage, CallAnalysis, MessageKind, Precondition, VerificationStatus};

pub use pathspace_solver::{Concrete, ConstraintSolver, SatResult};
#[cfg(feature = "z3")]
pub use pathspace_solver::Z3Backend;
