use std::time::Instant;

use crate::flowgraph::FlowGraphManager;
use crate::model::{CostModel, ModelCtx};
use crate::scheduler::SchedulerStats;
use crate::solver::{FlowSolver, TaskMapping};
use crate::topology::ResourceKind;
use crate::{Cost, FlowError, ResourceId, Result, TaskId};

/// Ferries the graph (or its change batch) to the external solver, enforces
/// the per-round runtime ceiling and counts runs.
pub struct SolverDispatcher {
    solver: Box<dyn FlowSolver>,
    max_solver_runtime_us: u64,
    run_count: u64,
}

impl SolverDispatcher {
    pub fn new(solver: Box<dyn FlowSolver>, max_solver_runtime_us: u64) -> Self {
        SolverDispatcher {
            solver,
            max_solver_runtime_us,
            run_count: 0,
        }
    }

    /// Number of completed solver invocations.
    #[inline]
    pub fn run_count(&self) -> u64 {
        self.run_count
    }

    /// Batch mode: solve over the whole graph and return the task-node to
    /// PU-node mapping.
    pub fn run(
        &mut self,
        manager: &mut FlowGraphManager,
        stats: &mut SchedulerStats,
    ) -> Result<TaskMapping> {
        let changes = manager.drain_changes();
        log::debug!(
            "Dispatching solver run {} with {} change records",
            self.run_count + 1,
            changes.len()
        );
        let start = Instant::now();
        let output = self.solver.solve(manager.graph(), &changes)?;
        let took_us = start.elapsed().as_micros() as u64;
        self.run_count += 1;

        stats.solver_runtime_us = took_us;
        stats.algorithm_runtime_us = output.algorithm_runtime_us.unwrap_or(took_us);
        if stats.solver_runtime_us > self.max_solver_runtime_us {
            return Err(FlowError::SolverTimeout {
                took_us: stats.solver_runtime_us,
                limit_us: self.max_solver_runtime_us,
            });
        }
        Ok(output.task_mappings)
    }

    /// One-at-a-time mode used for affinity/anti-affinity placement: score
    /// the candidate PUs with the cost model and pick the cheapest, ties
    /// broken by resource id. Returns `None` when no PU can take the task.
    pub fn run_simple_solver_for_single_task(
        &mut self,
        stats: &mut SchedulerStats,
        task_id: TaskId,
        candidate_pus: &[ResourceId],
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<Option<(TaskId, ResourceId)>> {
        let start = Instant::now();
        let task_ecs = model.task_equiv_classes(ctx, task_id);
        let mut best: Option<(Cost, ResourceId)> = None;
        for &pu in candidate_pus {
            let Some(node) = ctx.topology.find(pu) else {
                continue;
            };
            if node.descriptor.kind != ResourceKind::Pu {
                continue;
            }
            let mut cost = 0;
            if let Some(machine) = ctx.topology.machine_of(pu) {
                for &ec in &task_ecs {
                    cost += model.equiv_class_to_resource(ctx, ec, machine);
                }
            }
            let candidate = (cost, pu);
            best = match best {
                Some(current) if current <= candidate => Some(current),
                _ => Some(candidate),
            };
        }
        let took_us = start.elapsed().as_micros() as u64;
        self.run_count += 1;
        stats.solver_runtime_us = took_us;
        stats.algorithm_runtime_us = took_us;
        if stats.solver_runtime_us > self.max_solver_runtime_us {
            return Err(FlowError::SolverTimeout {
                took_us: stats.solver_runtime_us,
                limit_us: self.max_solver_runtime_us,
            });
        }
        Ok(best.map(|(_, pu)| (task_id, pu)))
    }
}
