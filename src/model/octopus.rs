use crate::flowgraph::{FlowGraph, NodeKind};
use crate::model::{time_since_submit_cost, CostModel, ModelCtx, StatsContext, TopologyVisitor};
use crate::{Cost, Map, NodeId, ResourceId, TaskId};

/// Load-balancing model: topology arcs are priced by the number of tasks
/// running in the subtree below them, computed by the statistics pass.
#[derive(Default)]
pub struct OctopusCostModel {
    running_tasks: Map<ResourceId, u64>,
}

impl TopologyVisitor for OctopusCostModel {
    fn prepare(&mut self, _ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId) {
        if let Some(res_id) = graph.node(acc).resource_id() {
            self.running_tasks.insert(res_id, 0);
        }
    }

    fn gather(&mut self, ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId, other: NodeId) {
        let acc_node = graph.node(acc);
        if acc_node.skips_stats_accumulation() {
            return;
        }
        let other_node = graph.node(other);
        if other_node.kind == NodeKind::Sink {
            if let NodeKind::Pu(res_id) = acc_node.kind {
                if ctx
                    .topology
                    .get(res_id)
                    .descriptor
                    .current_running_task
                    .is_some()
                {
                    *self.running_tasks.entry(res_id).or_insert(0) += 1;
                }
            }
            return;
        }
        if let (Some(acc_res), Some(other_res)) = (acc_node.resource_id(), other_node.resource_id())
        {
            let below = self.running_tasks.get(&other_res).copied().unwrap_or(0);
            *self.running_tasks.entry(acc_res).or_insert(0) += below;
        }
    }

    fn update(
        &mut self,
        _ctx: &mut StatsContext,
        graph: &FlowGraph,
        acc: NodeId,
        other: NodeId,
    ) -> Option<Cost> {
        if graph.node(acc).skips_stats_accumulation() {
            return None;
        }
        let other_res = graph.node(other).resource_id()?;
        Some(self.running_tasks.get(&other_res).copied().unwrap_or(0) as Cost)
    }
}

impl CostModel for OctopusCostModel {
    fn task_to_unscheduled_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        time_since_submit_cost(ctx, task)
    }

    fn task_to_cluster_agg(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        0
    }

    fn resource_to_resource(&mut self, _ctx: &ModelCtx, _src: ResourceId, dst: ResourceId) -> Cost {
        self.running_tasks.get(&dst).copied().unwrap_or(0) as Cost
    }
}
