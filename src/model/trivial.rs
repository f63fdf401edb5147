use std::hash::{Hash, Hasher};

use fxhash::FxHasher;
use smallvec::{smallvec, SmallVec};

use crate::model::{CostModel, ModelCtx, TopologyVisitor};
use crate::{Cost, EquivClassId, Map, Set, TaskId};

const UNSCHEDULED_COST: Cost = 5;
const CLUSTER_COST: Cost = 2;

/// Fixed-cost model: every placement is equally good, leaving a task
/// unscheduled is always worse.
#[derive(Default)]
pub struct TrivialCostModel {
    task_aggs: Set<EquivClassId>,
    task_ec_to_tasks: Map<EquivClassId, Set<TaskId>>,
    task_to_ec: Map<TaskId, EquivClassId>,
}

impl TopologyVisitor for TrivialCostModel {}

impl CostModel for TrivialCostModel {
    fn task_to_unscheduled_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        UNSCHEDULED_COST
    }

    fn task_to_cluster_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        CLUSTER_COST
    }

    fn task_equiv_classes(&mut self, ctx: &ModelCtx, task: TaskId) -> SmallVec<[EquivClassId; 2]> {
        let job_id = ctx.tasks.get_task(task).job_id;
        let mut hasher = FxHasher::default();
        job_id.hash(&mut hasher);
        let ec = EquivClassId::new(hasher.finish());
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
