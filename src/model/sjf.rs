use std::hash::{Hash, Hasher};

use fxhash::FxHasher;
use smallvec::{smallvec, SmallVec};

use crate::model::{time_since_submit_cost, CostModel, ModelCtx, TopologyVisitor};
use crate::{Cost, EquivClassId, Map, Set, TaskId};

/// Shortest-job-first: tasks with a short expected runtime are cheaper to
/// place anywhere in the cluster.
#[derive(Default)]
pub struct SjfCostModel {
    task_aggs: Set<EquivClassId>,
    task_ec_to_tasks: Map<EquivClassId, Set<TaskId>>,
    task_to_ec: Map<TaskId, EquivClassId>,
}

impl SjfCostModel {
    fn task_ec_of(&self, ctx: &ModelCtx, task: TaskId) -> EquivClassId {
        let job_id = ctx.tasks.get_task(task).job_id;
        let mut hasher = FxHasher::default();
        job_id.hash(&mut hasher);
        EquivClassId::new(hasher.finish())
    }
}

impl TopologyVisitor for SjfCostModel {}

impl CostModel for SjfCostModel {
    fn task_to_unscheduled_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        time_since_submit_cost(ctx, task)
    }

    fn task_to_cluster_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        let ec = self.task_ec_of(ctx, task);
        ctx.knowledge
            .avg_runtime_ms_for_ec(ec)
            .map(|ms| (ms / 100) as Cost)
            .unwrap_or(0)
    }

    fn task_equiv_classes(&mut self, ctx: &ModelCtx, task: TaskId) -> SmallVec<[EquivClassId; 2]> {
        let ec = self.task_ec_of(ctx, task);
        self.task_aggs.insert(ec);
        self.task_ec_to_tasks.entry(ec).or_default().insert(task);
        self.task_to_ec.insert(task, ec);
        smallvec![ec]
    }

    fn remove_task(&mut self, task: TaskId) {
        if let Some(ec) = self.task_to_ec.remove(&task) {
            if let Some(tasks) = self.task_ec_to_tasks.get_mut(&ec) {
                tasks.remove(&task);
                if tasks.is_empty() {
                    self.task_ec_to_tasks.remove(&ec);
                    self.task_aggs.remove(&ec);
                }
            }
        }
    }
}
