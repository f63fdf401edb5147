use crate::model::{CostModel, ModelCtx, TopologyVisitor};
use crate::{Cost, TaskId};

/// All-zero cost model; useful as a baseline and in tests.
#[derive(Default)]
pub struct VoidCostModel;

impl TopologyVisitor for VoidCostModel {}

impl CostModel for VoidCostModel {
    fn task_to_unscheduled_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        0
    }

    fn task_to_cluster_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        0
    }
}
