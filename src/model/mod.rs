pub mod octopus;
pub mod random;
pub mod sjf;
pub mod trivial;
pub mod void;
pub mod wharemap;

use bitflags::bitflags;
use smallvec::SmallVec;

use crate::config::{CostModelKind, SchedulerConfig};
use crate::flowgraph::FlowGraph;
use crate::knowledge::KnowledgeBase;
use crate::registry::{JobMap, TaskMap};
use crate::topology::ResourceTopology;
use crate::{Cost, EquivClassId, FlowError, JobId, NodeId, ResourceId, Result, TaskId};

bitflags! {
    /// Optional arc classes a cost model can support. The graph manager
    /// only materializes an arc class when the model declares it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CostModelCapabilities: u32 {
        const TASK_TO_RESOURCE  = 0b001;
        const TASK_CONTINUATION = 0b010;
        const TASK_PREEMPTION   = 0b100;
    }
}

/// Shared read-only views a cost model computes over.
pub struct ModelCtx<'a> {
    pub tasks: &'a TaskMap,
    pub jobs: &'a JobMap,
    pub topology: &'a ResourceTopology,
    pub knowledge: &'a KnowledgeBase,
    pub now_us: u64,
}

/// Mutable context of the two-pass topology statistics walk.
pub struct StatsContext<'a> {
    pub tasks: &'a TaskMap,
    pub topology: &'a mut ResourceTopology,
}

/// The prepare/gather/update trio driven by
/// `FlowGraphManager::compute_topology_statistics`.
///
/// `prepare` is invoked once per accumulator before any gathering;
/// `gather` folds `other` (the node nearer the sink) into `acc`; `update`
/// runs after the gather phase and may return a recomputed cost for the
/// arc `acc -> other`, which the graph manager writes and records.
pub trait TopologyVisitor {
    fn prepare(&mut self, ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId) {
        let _ = (ctx, graph, acc);
    }

    fn gather(&mut self, ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId, other: NodeId) {
        let _ = (ctx, graph, acc, other);
    }

    fn update(
        &mut self,
        ctx: &mut StatsContext,
        graph: &FlowGraph,
        acc: NodeId,
        other: NodeId,
    ) -> Option<Cost> {
        let _ = (ctx, graph, acc, other);
        None
    }
}

/// Plug-in contract producing arc costs and the structural arc sets that
/// depend on domain semantics.
///
/// Models keep internal equivalence-class tables; `task_equiv_classes` and
/// `resource_equiv_classes` register memberships as a side effect, which is
/// why the cost operations take `&mut self`.
pub trait CostModel: TopologyVisitor {
    fn capabilities(&self) -> CostModelCapabilities {
        CostModelCapabilities::empty()
    }

    /// Cost of leaving the task unscheduled. Must be monotone
    /// non-decreasing in time-since-submit so starvation eventually
    /// resolves.
    fn task_to_unscheduled_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost;

    /// Carried uniformly at 0; starvation pressure lives on the
    /// task -> aggregator arc.
    fn unscheduled_agg_to_sink(&mut self, _ctx: &ModelCtx, _job: JobId) -> Cost {
        0
    }

    /// Proxy for the expected cluster-wide runtime of the task.
    fn task_to_cluster_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost;

    /// Only consulted when `TASK_TO_RESOURCE` is declared.
    fn task_to_resource(&mut self, _ctx: &ModelCtx, _task: TaskId, _res: ResourceId) -> Cost {
        0
    }

    fn resource_to_resource(&mut self, _ctx: &ModelCtx, _src: ResourceId, _dst: ResourceId) -> Cost {
        0
    }

    fn leaf_to_sink(&mut self, _ctx: &ModelCtx, _res: ResourceId) -> Cost {
        0
    }

    /// Only consulted when `TASK_CONTINUATION` is declared.
    fn task_continuation(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        0
    }

    /// Only consulted when `TASK_PREEMPTION` is declared.
    fn task_preemption(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Cost {
        0
    }

    fn task_to_equiv_class(&mut self, _ctx: &ModelCtx, _task: TaskId, _ec: EquivClassId) -> Cost {
        0
    }

    fn equiv_class_to_resource(&mut self, _ctx: &ModelCtx, _ec: EquivClassId, _res: ResourceId) -> Cost {
        0
    }

    fn equiv_class_to_equiv_class(
        &mut self,
        _ctx: &ModelCtx,
        _ec1: EquivClassId,
        _ec2: EquivClassId,
    ) -> Cost {
        0
    }

    /// Equivalence classes of the task; registers the membership.
    fn task_equiv_classes(&mut self, _ctx: &ModelCtx, _task: TaskId) -> SmallVec<[EquivClassId; 2]> {
        SmallVec::new()
    }

    /// Equivalence classes of the resource; registers the membership.
    fn resource_equiv_classes(
        &mut self,
        _ctx: &ModelCtx,
        _res: ResourceId,
    ) -> SmallVec<[EquivClassId; 2]> {
        SmallVec::new()
    }

    /// For a task EC: the cheapest machines by `equiv_class_to_resource`,
    /// bounded by the configured fanout, ordered by increasing cost with
    /// ties broken by resource id. For a machine EC: all machines of the
    /// class.
    fn outgoing_ec_pref_arcs(&mut self, _ctx: &ModelCtx, _ec: EquivClassId) -> Vec<ResourceId> {
        Vec::new()
    }

    fn incoming_ec_pref_arcs(&mut self, _ctx: &ModelCtx, _ec: EquivClassId) -> Vec<TaskId> {
        Vec::new()
    }

    fn task_preference_arcs(&mut self, _ctx: &ModelCtx, _task: TaskId) -> Vec<ResourceId> {
        Vec::new()
    }

    /// (incoming ECs, outgoing ECs) of `ec`.
    fn ec_to_ec_arcs(
        &mut self,
        _ctx: &ModelCtx,
        _ec: EquivClassId,
    ) -> (Vec<EquivClassId>, Vec<EquivClassId>) {
        (Vec::new(), Vec::new())
    }

    fn add_machine(&mut self, _ctx: &ModelCtx, _machine: ResourceId) {}

    fn remove_machine(&mut self, _machine: ResourceId) {}

    fn remove_task(&mut self, _task: TaskId) {}

    fn debug_info_csv(&self, _ctx: &ModelCtx) -> String {
        String::new()
    }

    // Affinity-symmetry bookkeeping; all idempotent.

    fn clear_unscheduled_tasks_data(&mut self) {}

    fn remove_task_from_symmetry_map(&mut self, _task: TaskId) {}

    fn update_resource_to_task_symmetry_map(&mut self, _res: ResourceId, _task: TaskId) {}
}

/// Instantiate the configured cost model. Unknown or unavailable models are
/// fatal at startup.
pub fn create_cost_model(config: &SchedulerConfig) -> Result<Box<dyn CostModel>> {
    log::debug!("Using the {:?} cost model", config.cost_model);
    Ok(match config.cost_model {
        CostModelKind::Trivial => Box::new(trivial::TrivialCostModel::default()),
        CostModelKind::Random => Box::new(random::RandomCostModel::new()),
        CostModelKind::Sjf => Box::new(sjf::SjfCostModel::default()),
        CostModelKind::WhareMap => Box::new(wharemap::WhareMapCostModel::new(
            config.num_pref_arcs_agg_to_res,
        )),
        CostModelKind::Octopus => Box::new(octopus::OctopusCostModel::default()),
        CostModelKind::Void => Box::new(void::VoidCostModel::default()),
        kind => {
            return Err(FlowError::Config(format!(
                "Cost model {kind:?} is not available in this build"
            )))
        }
    })
}

/// Tenths of a second since the task was submitted. The shared shape of
/// `task_to_unscheduled_agg` across models.
pub(crate) fn time_since_submit_cost(ctx: &ModelCtx, task: TaskId) -> Cost {
    let task = ctx.tasks.get_task(task);
    let waited_us = ctx.now_us.saturating_sub(task.submit_time_us);
    (waited_us / 100_000) as Cost
}
