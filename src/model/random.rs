use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::{time_since_submit_cost, CostModel, ModelCtx, TopologyVisitor};
use crate::{Cost, ResourceId, TaskId};

const MAX_RANDOM_COST: Cost = 1000;

/// Scores placements randomly. The unscheduled cost stays time-based so
/// that starvation still resolves.
pub struct RandomCostModel {
    rng: StdRng,
}

impl RandomCostModel {
    pub fn new() -> Self {
        RandomCostModel {
            rng: StdRng::from_entropy(),
        }
    }
}

impl Default for RandomCostModel {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyVisitor for RandomCostModel {}

impl CostModel for RandomCostModel {
    fn task_to_unscheduled_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        time_since_submit_cost(ctx, task)
    }

    fn task_to_cluster_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        self.rng.gen_range(0..MAX_RANDOM_COST)
    }

    fn resource_to_resource(&mut self, _ctx: &ModelCtx, _src: ResourceId, _dst: ResourceId) -> Cost {
        self.rng.gen_range(0..MAX_RANDOM_COST)
    }
}
