use std::hash::{Hash, Hasher};

use fxhash::FxHasher;
use smallvec::{smallvec, SmallVec};

use crate::flowgraph::{FlowGraph, NodeKind};
use crate::model::{time_since_submit_cost, CostModel, ModelCtx, StatsContext, TopologyVisitor};
use crate::registry::TaskType;
use crate::topology::InterferenceCounts;
use crate::{Cost, EquivClassId, Map, NodeId, ResourceId, Set, TaskId};

// Relative penalties of co-locating with each interference class.
const DEVIL_PENALTY: u64 = 10;
const RABBIT_PENALTY: u64 = 4;
const SHEEP_PENALTY: u64 = 2;
const TURTLE_PENALTY: u64 = 1;

/// Topology-aware cost model in the WhareMap style: tasks aggregate per job,
/// machines aggregate per type signature, and machine costs penalize
/// co-location with antagonistic workload classes.
pub struct WhareMapCostModel {
    num_pref_arcs: usize,
    task_aggs: Set<EquivClassId>,
    machine_aggs: Set<EquivClassId>,
    machine_to_ec: Map<ResourceId, EquivClassId>,
    machine_ec_to_machines: Map<EquivClassId, Vec<ResourceId>>,
    task_ec_to_tasks: Map<EquivClassId, Set<TaskId>>,
    task_to_ec: Map<TaskId, EquivClassId>,
    // Affinity symmetry: which affinity tasks occupy a resource.
    resource_to_tasks: Map<ResourceId, Set<TaskId>>,
    unscheduled_tasks: Set<TaskId>,
}

impl WhareMapCostModel {
    pub fn new(num_pref_arcs: usize) -> Self {
        WhareMapCostModel {
            num_pref_arcs,
            task_aggs: Default::default(),
            machine_aggs: Default::default(),
            machine_to_ec: Default::default(),
            machine_ec_to_machines: Default::default(),
            task_ec_to_tasks: Default::default(),
            task_to_ec: Default::default(),
            resource_to_tasks: Default::default(),
            unscheduled_tasks: Default::default(),
        }
    }

    /// One task aggregator per job; its id is a hash of the job id.
    fn task_ec_of(&self, ctx: &ModelCtx, task: TaskId) -> EquivClassId {
        let job_id = ctx.tasks.get_task(task).job_id;
        let mut hasher = FxHasher::default();
        job_id.hash(&mut hasher);
        EquivClassId::new(hasher.finish())
    }

    /// Machines aggregate by the shape of their subtree.
    fn machine_type_hash(&self, ctx: &ModelCtx, machine: ResourceId) -> EquivClassId {
        let mut hasher = FxHasher::default();
        42u64.hash(&mut hasher);
        for res_id in ctx.topology.post_order(machine) {
            ctx.topology.get(res_id).descriptor.kind.hash(&mut hasher);
        }
        EquivClassId::new(hasher.finish())
    }

    fn interference_penalty(counts: &InterferenceCounts) -> Cost {
        (counts.num_devils * DEVIL_PENALTY
            + counts.num_rabbits * RABBIT_PENALTY
            + counts.num_sheep * SHEEP_PENALTY
            + counts.num_turtles * TURTLE_PENALTY) as Cost
    }

    #[cfg(test)]
    pub(crate) fn task_aggs(&self) -> &Set<EquivClassId> {
        &self.task_aggs
    }

    #[cfg(test)]
    pub(crate) fn machine_aggs(&self) -> &Set<EquivClassId> {
        &self.machine_aggs
    }

    #[cfg(test)]
    pub(crate) fn tasks_of_ec(&self, ec: EquivClassId) -> Option<&Set<TaskId>> {
        self.task_ec_to_tasks.get(&ec)
    }
}

impl TopologyVisitor for WhareMapCostModel {
    fn prepare(&mut self, ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId) {
        let node = graph.node(acc);
        if let Some(res_id) = node.resource_id() {
            ctx.topology.get_mut(res_id).descriptor.interference.clear();
        }
    }

    fn gather(&mut self, ctx: &mut StatsContext, graph: &FlowGraph, acc: NodeId, other: NodeId) {
        let acc_node = graph.node(acc);
        if acc_node.skips_stats_accumulation() {
            // Task -> EC and task -> resource arcs carry no topology state.
            return;
        }
        let other_node = graph.node(other);
        if other_node.kind == NodeKind::Sink {
            // Base case (PU -> sink): inspect the running task.
            if let NodeKind::Pu(res_id) = acc_node.kind {
                let Some(task_id) = ctx.topology.get(res_id).descriptor.current_running_task else {
                    return;
                };
                let Some(task) = ctx.tasks.find_task(task_id) else {
                    return;
                };
                let counts = &mut ctx.topology.get_mut(res_id).descriptor.interference;
                match task.task_type {
                    Some(TaskType::Devil) => counts.num_devils += 1,
                    Some(TaskType::Rabbit) => counts.num_rabbits += 1,
                    Some(TaskType::Sheep) => counts.num_sheep += 1,
                    Some(TaskType::Turtle) => counts.num_turtles += 1,
                    None => log::warn!("Task {task_id} does not have a type"),
                }
            }
            return;
        }
        if matches!(acc_node.kind, NodeKind::EquivClass(_)) {
            // EC -> machine and EC -> EC preference arcs: nothing to gather.
            return;
        }
        // Resource -> resource: fold the subtree nearer the sink upwards.
        if let (Some(acc_res), Some(other_res)) = (acc_node.resource_id(), other_node.resource_id())
        {
            let other_counts = ctx.topology.get(other_res).descriptor.interference;
            ctx.topology
                .get_mut(acc_res)
                .descriptor
                .interference
                .accumulate(&other_counts);
        }
    }

    fn update(
        &mut self,
        ctx: &mut StatsContext,
        graph: &FlowGraph,
        acc: NodeId,
        other: NodeId,
    ) -> Option<Cost> {
        let acc_node = graph.node(acc);
        if acc_node.skips_stats_accumulation() {
            return None;
        }
        let other_node = graph.node(other);
        if other_node.kind == NodeKind::Sink || matches!(acc_node.kind, NodeKind::EquivClass(_)) {
            return None;
        }
        // Resource -> resource: steer flow away from loaded subtrees.
        let other_res = other_node.resource_id()?;
        let counts = ctx.topology.get(other_res).descriptor.interference;
        Some(Self::interference_penalty(&counts))
    }
}

impl CostModel for WhareMapCostModel {
    fn task_to_unscheduled_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        self.unscheduled_tasks.insert(task);
        time_since_submit_cost(ctx, task)
    }

    fn task_to_cluster_agg(&mut self, ctx: &ModelCtx, task: TaskId) -> Cost {
        let ec = self.task_ec_of(ctx, task);
        // Tenths of a second of expected runtime.
        ctx.knowledge
            .avg_runtime_ms_for_ec(ec)
            .map(|ms| (ms / 100) as Cost)
            .unwrap_or(0)
    }

    fn equiv_class_to_resource(&mut self, ctx: &ModelCtx, _ec: EquivClassId, res: ResourceId) -> Cost {
        match ctx.topology.find(res) {
            Some(node) => Self::interference_penalty(&node.descriptor.interference),
            None => 0,
        }
    }

    fn task_equiv_classes(&mut self, ctx: &ModelCtx, task: TaskId) -> SmallVec<[EquivClassId; 2]> {
        let ec = self.task_ec_of(ctx, task);
        self.task_aggs.insert(ec);
        self.task_ec_to_tasks.entry(ec).or_default().insert(task);
        self.task_to_ec.insert(task, ec);
        smallvec![ec]
    }

    fn resource_equiv_classes(
        &mut self,
        _ctx: &ModelCtx,
        res: ResourceId,
    ) -> SmallVec<[EquivClassId; 2]> {
        match self.machine_to_ec.get(&res) {
            Some(&ec) => smallvec![ec],
            None => SmallVec::new(),
        }
    }

    fn outgoing_ec_pref_arcs(&mut self, ctx: &ModelCtx, ec: EquivClassId) -> Vec<ResourceId> {
        if self.task_aggs.contains(&ec) {
            // Bounded min-cost set over all machines: replace the worst
            // member when a cheaper candidate arrives.
            let mut best: Vec<(Cost, ResourceId)> = Vec::with_capacity(self.num_pref_arcs + 1);
            let mut machines: Vec<ResourceId> = self.machine_to_ec.keys().copied().collect();
            machines.sort_unstable();
            for res in machines {
                let cost = self.equiv_class_to_resource(ctx, ec, res);
                if best.len() < self.num_pref_arcs {
                    best.push((cost, res));
                    best.sort_unstable();
                } else if let Some(&(worst_cost, _)) = best.last() {
                    if cost < worst_cost {
                        best.pop();
                        best.push((cost, res));
                        best.sort_unstable();
                    }
                }
            }
            best.into_iter().map(|(_, res)| res).collect()
        } else if self.machine_aggs.contains(&ec) {
            self.machine_ec_to_machines
                .get(&ec)
                .cloned()
                .unwrap_or_default()
        } else {
            panic!("Unexpected type of equivalence aggregator {ec}");
        }
    }

    fn incoming_ec_pref_arcs(&mut self, _ctx: &ModelCtx, ec: EquivClassId) -> Vec<TaskId> {
        if self.task_aggs.contains(&ec) {
            let mut tasks: Vec<TaskId> = self
                .task_ec_to_tasks
                .get(&ec)
                .map(|set| set.iter().copied().collect())
                .unwrap_or_default();
            tasks.sort_unstable();
            tasks
        } else if self.machine_aggs.contains(&ec) {
            // No task -> machine-aggregator arcs in this model.
            Vec::new()
        } else {
            panic!("Unexpected type of equivalence aggregator {ec}");
        }
    }

    fn ec_to_ec_arcs(
        &mut self,
        _ctx: &ModelCtx,
        ec: EquivClassId,
    ) -> (Vec<EquivClassId>, Vec<EquivClassId>) {
        if self.task_aggs.contains(&ec) {
            let mut outgoing: Vec<EquivClassId> = self.machine_aggs.iter().copied().collect();
            outgoing.sort_unstable();
            (Vec::new(), outgoing)
        } else if self.machine_aggs.contains(&ec) {
            let mut incoming: Vec<EquivClassId> = self.task_aggs.iter().copied().collect();
            incoming.sort_unstable();
            (incoming, Vec::new())
        } else {
            panic!("Unexpected type of equivalence aggregator {ec}");
        }
    }

    fn add_machine(&mut self, ctx: &ModelCtx, machine: ResourceId) {
        let ec = self.machine_type_hash(ctx, machine);
        self.machine_ec_to_machines
            .entry(ec)
            .or_default()
            .push(machine);
        self.machine_to_ec.insert(machine, ec);
        self.machine_aggs.insert(ec);
    }

    fn remove_machine(&mut self, machine: ResourceId) {
        let Some(ec) = self.machine_to_ec.remove(&machine) else {
            panic!("Could not find machine {machine}");
        };
        let machines = self
            .machine_ec_to_machines
            .get_mut(&ec)
            .expect("Machine EC without machines");
        machines.retain(|&m| m != machine);
        if machines.is_empty() {
            self.machine_ec_to_machines.remove(&ec);
            self.machine_aggs.remove(&ec);
        }
    }

    fn remove_task(&mut self, task: TaskId) {
        self.unscheduled_tasks.remove(&task);
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

    fn debug_info_csv(&self, _ctx: &ModelCtx) -> String {
        let mut out = String::new();
        let mut task_aggs: Vec<EquivClassId> = self.task_aggs.iter().copied().collect();
        task_aggs.sort_unstable();
        for ec in task_aggs {
            let num_tasks = self.task_ec_to_tasks.get(&ec).map_or(0, |s| s.len());
            out.push_str(&format!("task_ec,{ec},{num_tasks}\n"));
        }
        let mut machine_aggs: Vec<EquivClassId> = self.machine_aggs.iter().copied().collect();
        machine_aggs.sort_unstable();
        for ec in machine_aggs {
            let num_machines = self.machine_ec_to_machines.get(&ec).map_or(0, |m| m.len());
            out.push_str(&format!("machine_ec,{ec},{num_machines}\n"));
        }
        out
    }

    fn clear_unscheduled_tasks_data(&mut self) {
        self.unscheduled_tasks.clear();
    }

    fn remove_task_from_symmetry_map(&mut self, task: TaskId) {
        for tasks in self.resource_to_tasks.values_mut() {
            tasks.remove(&task);
        }
        self.resource_to_tasks.retain(|_, tasks| !tasks.is_empty());
    }

    fn update_resource_to_task_symmetry_map(&mut self, res: ResourceId, task: TaskId) {
        self.resource_to_tasks.entry(res).or_default().insert(task);
    }
}

#[cfg(test)]
mod tests {
    use super::WhareMapCostModel;
    use crate::knowledge::KnowledgeBase;
    use crate::model::{CostModel, ModelCtx};
    use crate::registry::{Job, JobMap, ResourceRequest, Task, TaskMap};
    use crate::topology::{
        InterferenceCounts, ResourceDescriptor, ResourceKind, ResourceTopology, ResourceTreeSpec,
    };
    use crate::{EquivClassId, ResourceId, TaskId};

    struct Fixture {
        tasks: TaskMap,
        jobs: JobMap,
        topology: ResourceTopology,
        knowledge: KnowledgeBase,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                tasks: Default::default(),
                jobs: Default::default(),
                topology: Default::default(),
                knowledge: Default::default(),
            }
        }

        fn ctx(&self, now_us: u64) -> ModelCtx {
            ModelCtx {
                tasks: &self.tasks,
                jobs: &self.jobs,
                topology: &self.topology,
                knowledge: &self.knowledge,
                now_us,
            }
        }

        fn add_task(&mut self, task_id: u64, job_id: u64, submit_time_us: u64) {
            let task = Task::new(
                task_id.into(),
                job_id.into(),
                submit_time_us,
                ResourceRequest::default(),
            );
            if self.jobs.find_job(job_id.into()).is_none() {
                self.jobs.insert(Job::new(job_id.into()));
            }
            self.jobs
                .get_job_mut(job_id.into())
                .tasks
                .push(task_id.into());
            self.tasks.insert(task);
        }

        fn add_machine(&mut self, base: u64, pus: u64) -> ResourceId {
            let children = (1..=pus)
                .map(|i| {
                    ResourceTreeSpec::new(ResourceDescriptor::new(
                        (base + i).into(),
                        ResourceKind::Pu,
                    ))
                })
                .collect();
            self.topology.add_subtree(
                ResourceTreeSpec::with_children(
                    ResourceDescriptor::new(base.into(), ResourceKind::Machine),
                    children,
                ),
                None,
            );
            base.into()
        }
    }

    #[test]
    fn unscheduled_cost_grows_with_wait_time() {
        let mut fixture = Fixture::new();
        fixture.add_task(1, 1, 0);
        let mut model = WhareMapCostModel::new(2);
        let c1 = model.task_to_unscheduled_agg(&fixture.ctx(1_000_000), 1.into());
        let c2 = model.task_to_unscheduled_agg(&fixture.ctx(5_000_000), 1.into());
        assert_eq!(c1, 10);
        assert_eq!(c2, 50);
        assert!(c2 >= c1);
    }

    #[test]
    fn task_and_machine_ec_sets_are_disjoint() {
        let mut fixture = Fixture::new();
        fixture.add_task(1, 1, 0);
        let m = fixture.add_machine(100, 2);
        let mut model = WhareMapCostModel::new(2);
        let ctx = fixture.ctx(0);
        let task_ecs = model.task_equiv_classes(&ctx, 1.into());
        model.add_machine(&ctx, m);
        let machine_ecs = model.resource_equiv_classes(&ctx, m);
        assert_eq!(task_ecs.len(), 1);
        assert_eq!(machine_ecs.len(), 1);
        assert!(model.task_aggs().is_disjoint(model.machine_aggs()));
    }

    #[test]
    fn same_shape_machines_share_an_ec() {
        let mut fixture = Fixture::new();
        let m1 = fixture.add_machine(100, 2);
        let m2 = fixture.add_machine(200, 2);
        let m3 = fixture.add_machine(300, 4);
        let mut model = WhareMapCostModel::new(2);
        let ctx = fixture.ctx(0);
        model.add_machine(&ctx, m1);
        model.add_machine(&ctx, m2);
        model.add_machine(&ctx, m3);
        let ec1 = model.resource_equiv_classes(&ctx, m1)[0];
        let ec2 = model.resource_equiv_classes(&ctx, m2)[0];
        let ec3 = model.resource_equiv_classes(&ctx, m3)[0];
        assert_eq!(ec1, ec2);
        assert_ne!(ec1, ec3);
        assert_eq!(model.outgoing_ec_pref_arcs(&ctx, ec1), vec![m1, m2]);
    }

    #[test]
    fn remove_machine_drops_empty_ec() {
        let mut fixture = Fixture::new();
        let m1 = fixture.add_machine(100, 2);
        let m2 = fixture.add_machine(200, 2);
        let mut model = WhareMapCostModel::new(2);
        let ctx = fixture.ctx(0);
        model.add_machine(&ctx, m1);
        model.add_machine(&ctx, m2);
        let ec = model.resource_equiv_classes(&ctx, m1)[0];

        model.remove_machine(m1);
        assert!(model.machine_aggs().contains(&ec));
        assert_eq!(model.outgoing_ec_pref_arcs(&ctx, ec), vec![m2]);

        model.remove_machine(m2);
        assert!(!model.machine_aggs().contains(&ec));
    }

    #[test]
    fn remove_task_drops_empty_ec() {
        let mut fixture = Fixture::new();
        fixture.add_task(1, 1, 0);
        fixture.add_task(2, 1, 0);
        let mut model = WhareMapCostModel::new(2);
        let ctx = fixture.ctx(0);
        let ec = model.task_equiv_classes(&ctx, 1.into())[0];
        model.task_equiv_classes(&ctx, 2.into());

        model.remove_task(1.into());
        assert!(model.task_aggs().contains(&ec));
        assert_eq!(
            model.tasks_of_ec(ec).unwrap().iter().copied().collect::<Vec<TaskId>>(),
            vec![TaskId::new(2)]
        );

        model.remove_task(2.into());
        assert!(!model.task_aggs().contains(&ec));
        assert!(model.tasks_of_ec(ec).is_none());
    }

    #[test]
    fn pref_arcs_pick_cheapest_machines_with_stable_ties() {
        let mut fixture = Fixture::new();
        fixture.add_task(1, 1, 0);
        // Five machines with penalties 10, 5, 20, 5, 30: sheep weigh 2,
        // turtles 1.
        let penalties = [10u64, 5, 20, 5, 30];
        let mut machines = Vec::new();
        for (i, &penalty) in penalties.iter().enumerate() {
            let m = fixture.add_machine(100 * (i as u64 + 1), 1);
            fixture.topology.get_mut(m).descriptor.interference = InterferenceCounts {
                num_turtles: penalty,
                ..Default::default()
            };
            machines.push(m);
        }
        let mut model = WhareMapCostModel::new(2);
        let ctx = fixture.ctx(0);
        for &m in &machines {
            model.add_machine(&ctx, m);
        }
        let ec = model.task_equiv_classes(&ctx, 1.into())[0];
        // Two cheapest machines (cost 5 each), tie broken by resource id.
        assert_eq!(model.outgoing_ec_pref_arcs(&ctx, ec), vec![machines[1], machines[3]]);
    }

    #[test]
    #[should_panic(expected = "Unexpected type of equivalence aggregator")]
    fn unknown_ec_panics() {
        let fixture = Fixture::new();
        let mut model = WhareMapCostModel::new(2);
        model.outgoing_ec_pref_arcs(&fixture.ctx(0), EquivClassId::new(12345));
    }
}
