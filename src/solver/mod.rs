pub mod dimacs;
pub mod dispatcher;

pub use dispatcher::SolverDispatcher;

use crate::flowgraph::{FlowGraph, GraphChange};
use crate::{NodeId, Result};

/// Solver output: `(task node, PU node)` pairs in the solver's order.
/// Multi-valued over the PU when `max_tasks_per_pu > 1`.
pub type TaskMapping = Vec<(NodeId, NodeId)>;

pub struct SolverOutput {
    pub task_mappings: TaskMapping,
    /// Algorithm-only runtime, when the solver reports one.
    pub algorithm_runtime_us: Option<u64>,
}

/// External min-cost max-flow solver. The dispatcher hands over the current
/// graph snapshot together with the change records accumulated since the
/// previous run; incremental solvers consume the changes, others re-read
/// the snapshot (or its DIMACS rendering).
pub trait FlowSolver {
    fn solve(&mut self, graph: &FlowGraph, changes: &[GraphChange]) -> Result<SolverOutput>;
}
