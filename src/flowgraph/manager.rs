use std::collections::VecDeque;

use crate::flowgraph::changes::{ChangeLog, ChangeStats, GraphChange};
use crate::flowgraph::graph::FlowGraph;
use crate::flowgraph::node::{FlowGraphNode, NodeKind};
use crate::model::{CostModel, CostModelCapabilities, ModelCtx, StatsContext, TopologyVisitor};
use crate::registry::TaskState;
use crate::scheduler::delta::{DeltaKind, SchedulingDelta};
use crate::solver::TaskMapping;
use crate::topology::{ResourceKind, ResourceTopology};
use crate::{
    invariant_violation, Capacity, Cost, EquivClassId, JobId, Map, NodeId, ResourceId, Result,
    Set, TaskId,
};

/// Exclusive owner of the flow graph.
///
/// Every mutation is idempotent and records the change records an
/// incremental solver needs to catch up with the graph.
pub struct FlowGraphManager {
    graph: FlowGraph,
    changes: ChangeLog,
    sink: NodeId,
    max_tasks_per_pu: u64,
    task_nodes: Map<TaskId, NodeId>,
    resource_nodes: Map<ResourceId, NodeId>,
    ec_nodes: Map<EquivClassId, NodeId>,
    job_aggregators: Map<JobId, NodeId>,
    leaf_resources: Set<ResourceId>,
}

impl FlowGraphManager {
    pub fn new(max_tasks_per_pu: u64) -> Self {
        let mut graph = FlowGraph::default();
        let sink = graph.add_node(NodeKind::Sink);
        let mut changes = ChangeLog::default();
        changes.add(GraphChange::AddNode {
            node: sink,
            comment: "AddSink",
        });
        FlowGraphManager {
            graph,
            changes,
            sink,
            max_tasks_per_pu,
            task_nodes: Default::default(),
            resource_nodes: Default::default(),
            ec_nodes: Default::default(),
            job_aggregators: Default::default(),
            leaf_resources: Default::default(),
        }
    }

    #[inline]
    pub fn sink_node(&self) -> NodeId {
        self.sink
    }

    #[inline]
    pub fn graph(&self) -> &FlowGraph {
        &self.graph
    }

    #[inline]
    pub fn node_for_node_id(&self, id: NodeId) -> &FlowGraphNode {
        self.graph.node(id)
    }

    #[inline]
    pub fn task_node(&self, task_id: TaskId) -> Option<NodeId> {
        self.task_nodes.get(&task_id).copied()
    }

    #[inline]
    pub fn resource_node(&self, res_id: ResourceId) -> Option<NodeId> {
        self.resource_nodes.get(&res_id).copied()
    }

    #[inline]
    pub fn ec_node(&self, ec: EquivClassId) -> Option<NodeId> {
        self.ec_nodes.get(&ec).copied()
    }

    pub fn drain_changes(&mut self) -> Vec<GraphChange> {
        self.changes.drain()
    }

    pub fn change_stats(&self) -> &ChangeStats {
        self.changes.stats()
    }

    pub fn reset_change_stats(&mut self) {
        self.changes.reset_stats();
    }

    // ---- low-level helpers -------------------------------------------------

    fn add_node_logged(&mut self, kind: NodeKind, comment: &'static str) -> NodeId {
        let id = self.graph.add_node(kind);
        self.changes.add(GraphChange::AddNode { node: id, comment });
        id
    }

    fn remove_node_logged(&mut self, id: NodeId, comment: &'static str) {
        self.graph.remove_node(id);
        self.changes.add(GraphChange::RemoveNode { node: id, comment });
    }

    fn add_arc_logged(
        &mut self,
        src: NodeId,
        dst: NodeId,
        cost: Cost,
        capacity: Capacity,
        comment: &'static str,
    ) {
        self.graph.add_arc(src, dst, cost, capacity);
        self.changes.add(GraphChange::NewArc {
            src,
            dst,
            cost,
            capacity,
            comment,
        });
    }

    /// Creates the arc or updates its cost/capacity, recording a change
    /// only when something actually changed.
    fn upsert_arc(
        &mut self,
        src: NodeId,
        dst: NodeId,
        cost: Cost,
        capacity: Capacity,
        comment: &'static str,
    ) {
        match self.graph.find_arc(src, dst) {
            Some(arc_id) => {
                let arc = self.graph.arc_mut(arc_id);
                if arc.cost != cost || arc.capacity != capacity {
                    arc.cost = cost;
                    arc.capacity = capacity;
                    self.changes.add(GraphChange::ChangeArc {
                        src,
                        dst,
                        cost,
                        capacity,
                        comment,
                    });
                }
            }
            None => self.add_arc_logged(src, dst, cost, capacity, comment),
        }
    }

    /// Creates the arc only if it does not exist yet. Used for
    /// time-dependent costs, which are re-priced exclusively by
    /// `update_time_dependent_costs`.
    fn ensure_arc(
        &mut self,
        src: NodeId,
        dst: NodeId,
        cost: Cost,
        capacity: Capacity,
        comment: &'static str,
    ) {
        if self.graph.find_arc(src, dst).is_none() {
            self.add_arc_logged(src, dst, cost, capacity, comment);
        }
    }

    /// Arc removal is a capacity-0 change record.
    fn remove_arc_between(&mut self, src: NodeId, dst: NodeId, comment: &'static str) {
        if let Some(arc_id) = self.graph.find_arc(src, dst) {
            let arc = self.graph.remove_arc(arc_id);
            self.changes.add(GraphChange::ChangeArc {
                src,
                dst,
                cost: arc.cost,
                capacity: 0,
                comment,
            });
        }
    }

    fn ensure_ec_node(&mut self, ec: EquivClassId) -> NodeId {
        match self.ec_nodes.get(&ec) {
            Some(&node) => node,
            None => {
                let node = self.add_node_logged(NodeKind::EquivClass(ec), "AddEquivClassNode");
                self.ec_nodes.insert(ec, node);
                node
            }
        }
    }

    fn ensure_job_aggregator(&mut self, job_id: JobId) -> NodeId {
        match self.job_aggregators.get(&job_id) {
            Some(&node) => node,
            None => {
                let node =
                    self.add_node_logged(NodeKind::JobAggregator(job_id), "AddJobAggregator");
                self.job_aggregators.insert(job_id, node);
                node
            }
        }
    }

    /// Number of task slots available in the subtree rooted at `res`.
    fn pu_slots_under(&self, topology: &ResourceTopology, res: ResourceId) -> Capacity {
        topology.pus_under(res).len() as Capacity * self.max_tasks_per_pu
    }

    fn total_pu_slots(&self) -> Capacity {
        self.leaf_resources.len() as Capacity * self.max_tasks_per_pu
    }

    // ---- resource topology -------------------------------------------------

    /// Mirrors the subtree rooted at `root` into the graph. The subtree must
    /// already be registered in the topology store.
    pub fn add_resource_topology(
        &mut self,
        root: ResourceId,
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) {
        let order = ctx.topology.post_order(root);
        // Parents before children so that upward arcs can attach.
        for &res_id in order.iter().rev() {
            if self.resource_nodes.contains_key(&res_id) {
                continue;
            }
            let rnode = ctx.topology.get(res_id);
            let kind = match rnode.descriptor.kind {
                ResourceKind::Machine => NodeKind::Machine(res_id),
                ResourceKind::Pu => NodeKind::Pu(res_id),
                _ => NodeKind::InteriorResource(res_id),
            };
            let node_id = self.add_node_logged(kind, "AddResourceNode");
            self.resource_nodes.insert(res_id, node_id);

            if let Some(parent) = rnode.parent {
                if let Some(&parent_node) = self.resource_nodes.get(&parent) {
                    let cost = model.resource_to_resource(ctx, parent, res_id);
                    let capacity = self.pu_slots_under(ctx.topology, res_id);
                    self.add_arc_logged(parent_node, node_id, cost, capacity, "ResourceToResource");
                }
            }

            match rnode.descriptor.kind {
                ResourceKind::Pu => {
                    let cost = model.leaf_to_sink(ctx, res_id);
                    self.add_arc_logged(node_id, self.sink, cost, self.max_tasks_per_pu, "LeafToSink");
                    self.leaf_resources.insert(res_id);
                }
                ResourceKind::Machine => {
                    model.add_machine(ctx, res_id);
                    for ec in model.resource_equiv_classes(ctx, res_id) {
                        let ec_node = self.ensure_ec_node(ec);
                        let cost = model.equiv_class_to_resource(ctx, ec, res_id);
                        let capacity = self.pu_slots_under(ctx.topology, res_id);
                        self.upsert_arc(ec_node, node_id, cost, capacity, "EquivClassToResource");
                    }
                }
                _ => {}
            }
        }
    }

    /// Drops the graph nodes of an already deregistered subtree.
    /// `removed` is the post-order id list returned by the topology store;
    /// node ids of removed PUs are collected into `pus_removed` so that a
    /// concurrently computed solver mapping can be filtered.
    pub fn remove_resource_topology(
        &mut self,
        removed: &[ResourceId],
        model: &mut dyn CostModel,
        pus_removed: &mut Set<NodeId>,
    ) {
        for &res_id in removed {
            if let Some(node_id) = self.resource_nodes.remove(&res_id) {
                match self.graph.node(node_id).kind {
                    NodeKind::Pu(_) => {
                        pus_removed.insert(node_id);
                        self.leaf_resources.remove(&res_id);
                    }
                    NodeKind::Machine(_) => model.remove_machine(res_id),
                    _ => {}
                }
                self.remove_node_logged(node_id, "RemoveResourceNode");
            }
        }
    }

    /// Refreshes the capacities of all topology arcs under `root`.
    pub fn update_resource_topology(&mut self, root: ResourceId, topology: &ResourceTopology) {
        for res_id in topology.post_order(root) {
            let Some(&node_id) = self.resource_nodes.get(&res_id) else {
                continue;
            };
            let rnode = topology.get(res_id);
            if rnode.descriptor.kind == ResourceKind::Pu {
                if let Some(arc_id) = self.graph.find_arc(node_id, self.sink) {
                    let cost = self.graph.arc(arc_id).cost;
                    self.upsert_arc(node_id, self.sink, cost, self.max_tasks_per_pu, "UpdateCapacities");
                }
            }
            if let Some(parent) = rnode.parent {
                if let Some(&parent_node) = self.resource_nodes.get(&parent) {
                    if let Some(arc_id) = self.graph.find_arc(parent_node, node_id) {
                        let cost = self.graph.arc(arc_id).cost;
                        let capacity = self.pu_slots_under(topology, res_id);
                        self.upsert_arc(parent_node, node_id, cost, capacity, "UpdateCapacities");
                    }
                }
            }
        }
    }

    // ---- job and task nodes ------------------------------------------------

    /// Creates or refreshes the nodes and arcs of the given jobs and their
    /// runnable tasks.
    pub fn add_or_update_job_nodes(
        &mut self,
        jobs: &[JobId],
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<()> {
        for &job_id in jobs {
            let job = ctx.jobs.get_job(job_id);
            let agg = self.ensure_job_aggregator(job_id);
            let mut tasks_in_graph: Capacity = 0;
            let root_task = job.root_task();
            for &task_id in &job.tasks {
                let task = ctx.tasks.get_task(task_id);
                if task.delegated {
                    continue;
                }
                match task.state {
                    TaskState::Runnable => {
                        self.add_or_update_task_node(task_id, task_id == root_task, agg, ctx, model);
                        tasks_in_graph += 1;
                    }
                    TaskState::Scheduled | TaskState::Running => {
                        if self.task_nodes.contains_key(&task_id) {
                            tasks_in_graph += 1;
                        }
                    }
                    _ => {}
                }
            }
            // One unit of unscheduled capacity per task node of the job.
            let cost = model.unscheduled_agg_to_sink(ctx, job_id);
            self.upsert_arc(agg, self.sink, cost, tasks_in_graph, "UnscheduledAggToSink");
        }
        Ok(())
    }

    fn add_or_update_task_node(
        &mut self,
        task_id: TaskId,
        is_root: bool,
        agg: NodeId,
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) {
        let node = match self.task_nodes.get(&task_id) {
            Some(&node) => node,
            None => {
                let kind = if is_root {
                    NodeKind::RootTask(task_id)
                } else {
                    NodeKind::UnscheduledTask(task_id)
                };
                let node = self.add_node_logged(kind, "AddTaskNode");
                self.task_nodes.insert(task_id, node);
                node
            }
        };

        let cost = model.task_to_unscheduled_agg(ctx, task_id);
        self.ensure_arc(node, agg, cost, 1, "TaskToUnscheduledAgg");

        let cluster_cost = model.task_to_cluster_agg(ctx, task_id);
        for root in ctx.topology.roots() {
            if let Some(&root_node) = self.resource_nodes.get(&root) {
                self.upsert_arc(node, root_node, cluster_cost, 1, "TaskToClusterAgg");
            }
        }

        if model.capabilities().contains(CostModelCapabilities::TASK_TO_RESOURCE) {
            for res in model.task_preference_arcs(ctx, task_id) {
                if let Some(&res_node) = self.resource_nodes.get(&res) {
                    let cost = model.task_to_resource(ctx, task_id, res);
                    self.upsert_arc(node, res_node, cost, 1, "TaskPreferenceArc");
                }
            }
        }

        for ec in model.task_equiv_classes(ctx, task_id) {
            let ec_node = self.ensure_ec_node(ec);
            let cost = model.task_to_equiv_class(ctx, task_id, ec);
            self.upsert_arc(node, ec_node, cost, 1, "TaskToEquivClass");
            self.update_ec_arcs(ec, ctx, model);
        }
    }

    /// Preference and EC-to-EC arcs of a single equivalence class node.
    fn update_ec_arcs(&mut self, ec: EquivClassId, ctx: &ModelCtx, model: &mut dyn CostModel) {
        self.update_ec_pref_arcs(ec, ctx, model);
        let ec_node = self.ensure_ec_node(ec);
        // Unscheduled tasks already in the graph that prefer this
        // aggregator. Scheduled tasks keep only their running arcs.
        for task_id in model.incoming_ec_pref_arcs(ctx, ec) {
            if let Some(&task_node) = self.task_nodes.get(&task_id) {
                if matches!(self.graph.node(task_node).kind, NodeKind::ScheduledTask(_)) {
                    continue;
                }
                let cost = model.task_to_equiv_class(ctx, task_id, ec);
                self.upsert_arc(task_node, ec_node, cost, 1, "TaskToEquivClass");
            }
        }
        let (incoming, outgoing) = model.ec_to_ec_arcs(ctx, ec);
        for dst_ec in outgoing {
            let dst_node = self.ensure_ec_node(dst_ec);
            let cost = model.equiv_class_to_equiv_class(ctx, ec, dst_ec);
            self.upsert_arc(ec_node, dst_node, cost, self.total_pu_slots(), "EquivClassToEquivClass");
            self.update_ec_pref_arcs(dst_ec, ctx, model);
        }
        for src_ec in incoming {
            let src_node = self.ensure_ec_node(src_ec);
            let cost = model.equiv_class_to_equiv_class(ctx, src_ec, ec);
            self.upsert_arc(src_node, ec_node, cost, self.total_pu_slots(), "EquivClassToEquivClass");
        }
    }

    fn update_ec_pref_arcs(&mut self, ec: EquivClassId, ctx: &ModelCtx, model: &mut dyn CostModel) {
        let ec_node = self.ensure_ec_node(ec);
        for res in model.outgoing_ec_pref_arcs(ctx, ec) {
            if let Some(&res_node) = self.resource_nodes.get(&res) {
                let cost = model.equiv_class_to_resource(ctx, ec, res);
                let capacity = self.pu_slots_under(ctx.topology, res);
                self.upsert_arc(ec_node, res_node, cost, capacity, "EquivClassToResource");
            }
        }
    }

    /// Re-scores the task -> aggregator arcs of all active jobs.
    pub fn update_time_dependent_costs(
        &mut self,
        jobs: &[JobId],
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<()> {
        for &job_id in jobs {
            let job = ctx.jobs.get_job(job_id);
            if !job.is_active() {
                continue;
            }
            let Some(&agg) = self.job_aggregators.get(&job_id) else {
                continue;
            };
            for &task_id in &job.tasks {
                let Some(&node) = self.task_nodes.get(&task_id) else {
                    continue;
                };
                if matches!(self.graph.node(node).kind, NodeKind::ScheduledTask(_)) {
                    // Its unscheduled arc is priced at the preemption cost.
                    continue;
                }
                let cost = model.task_to_unscheduled_agg(ctx, task_id);
                self.upsert_arc(node, agg, cost, 1, "UpdateTimeDependentCosts");
            }
        }
        Ok(())
    }

    /// Drops EC nodes without incoming arcs.
    pub fn purge_unconnected_ec_nodes(&mut self) {
        let unconnected: Vec<(EquivClassId, NodeId)> = self
            .ec_nodes
            .iter()
            .filter(|(_, &node)| self.graph.node(node).incoming.is_empty())
            .map(|(&ec, &node)| (ec, node))
            .collect();
        for (ec, node) in unconnected {
            log::debug!("Purging unconnected EC {ec}");
            self.ec_nodes.remove(&ec);
            self.remove_node_logged(node, "PurgeUnconnectedEquivClass");
        }
    }

    // ---- task lifecycle ----------------------------------------------------

    /// Removes the node of a completed task and reports its id so that a
    /// mapping computed by an in-flight solver run can be filtered.
    pub fn task_completed(&mut self, task_id: TaskId) -> Result<NodeId> {
        let Some(node) = self.task_nodes.remove(&task_id) else {
            invariant_violation!("Completed task {task_id} has no graph node");
        };
        self.remove_node_logged(node, "TaskCompleted");
        Ok(node)
    }

    /// The task keeps its node but returns to the unscheduled shape.
    pub fn task_evicted(
        &mut self,
        task_id: TaskId,
        res_id: ResourceId,
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<()> {
        let Some(&node) = self.task_nodes.get(&task_id) else {
            invariant_violation!("Evicted task {task_id} has no graph node");
        };
        if let Some(&pu_node) = self.resource_nodes.get(&res_id) {
            self.remove_arc_between(node, pu_node, "TaskEvicted");
        }
        self.graph.node_mut(node).kind = NodeKind::UnscheduledTask(task_id);
        let agg = self.ensure_job_aggregator(ctx.tasks.get_task(task_id).job_id);
        let cost = model.task_to_unscheduled_agg(ctx, task_id);
        self.upsert_arc(node, agg, cost, 1, "TaskEvicted");
        Ok(())
    }

    pub fn task_failed(&mut self, task_id: TaskId) -> Result<()> {
        let Some(node) = self.task_nodes.remove(&task_id) else {
            invariant_violation!("Failed task {task_id} has no graph node");
        };
        self.remove_node_logged(node, "TaskFailed");
        Ok(())
    }

    /// Tolerates tasks that already left the graph.
    pub fn task_removed(&mut self, task_id: TaskId) {
        if let Some(node) = self.task_nodes.remove(&task_id) {
            self.remove_node_logged(node, "TaskRemoved");
        }
    }

    pub fn task_killed(&mut self, task_id: TaskId) {
        if let Some(node) = self.task_nodes.remove(&task_id) {
            self.remove_node_logged(node, "TaskKilled");
        }
    }

    /// Rewires the task node into the scheduled shape: a capacity-1 running
    /// arc into its PU plus, when the model supports preemption, a parallel
    /// unscheduled arc priced at the preemption cost. Without preemption
    /// support the task is pinned.
    pub fn task_scheduled(
        &mut self,
        task_id: TaskId,
        res_id: ResourceId,
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<()> {
        let Some(&node) = self.task_nodes.get(&task_id) else {
            invariant_violation!("Scheduled task {task_id} has no graph node");
        };
        let Some(&pu_node) = self.resource_nodes.get(&res_id) else {
            invariant_violation!("Task {task_id} scheduled on unknown resource {res_id}");
        };

        let outgoing: Vec<NodeId> = self
            .graph
            .outgoing_arcs(node)
            .map(|arc| arc.dst)
            .collect();
        for dst in outgoing {
            self.remove_arc_between(node, dst, "TaskScheduled");
        }
        self.graph.node_mut(node).kind = NodeKind::ScheduledTask(task_id);

        let caps = model.capabilities();
        let running_cost = if caps.contains(CostModelCapabilities::TASK_CONTINUATION) {
            model.task_continuation(ctx, task_id)
        } else {
            0
        };
        self.add_arc_logged(node, pu_node, running_cost, 1, "TaskScheduled");

        if caps.contains(CostModelCapabilities::TASK_PREEMPTION) {
            let agg = self.ensure_job_aggregator(ctx.tasks.get_task(task_id).job_id);
            let cost = model.task_preemption(ctx, task_id);
            self.add_arc_logged(node, agg, cost, 1, "TaskPreemption");
        }
        Ok(())
    }

    pub fn task_migrated(
        &mut self,
        task_id: TaskId,
        old_res: ResourceId,
        new_res: ResourceId,
        ctx: &ModelCtx,
        model: &mut dyn CostModel,
    ) -> Result<()> {
        let Some(&node) = self.task_nodes.get(&task_id) else {
            invariant_violation!("Migrated task {task_id} has no graph node");
        };
        if let Some(&old_pu) = self.resource_nodes.get(&old_res) {
            self.remove_arc_between(node, old_pu, "TaskMigrated");
        }
        let Some(&new_pu) = self.resource_nodes.get(&new_res) else {
            invariant_violation!("Task {task_id} migrated to unknown resource {new_res}");
        };
        let cost = if model
            .capabilities()
            .contains(CostModelCapabilities::TASK_CONTINUATION)
        {
            model.task_continuation(ctx, task_id)
        } else {
            0
        };
        self.upsert_arc(node, new_pu, cost, 1, "TaskMigrated");
        Ok(())
    }

    pub fn job_completed(&mut self, job_id: JobId) {
        if let Some(agg) = self.job_aggregators.remove(&job_id) {
            self.remove_node_logged(agg, "JobCompleted");
        }
    }

    pub fn job_removed(&mut self, job_id: JobId) {
        if let Some(agg) = self.job_aggregators.remove(&job_id) {
            self.remove_node_logged(agg, "JobRemoved");
        }
    }

    // ---- statistics --------------------------------------------------------

    /// Two-pass walk from the sink along incoming arcs. The first pass
    /// prepares each accumulator once and gathers the node nearer the sink
    /// into it; the second pass lets the visitor re-price each visited arc.
    pub fn compute_topology_statistics(
        &mut self,
        visitor: &mut dyn TopologyVisitor,
        ctx: &mut StatsContext,
    ) {
        let mut queue: VecDeque<NodeId> = VecDeque::new();
        let mut visited: Set<NodeId> = Default::default();
        let mut prepared: Set<NodeId> = Default::default();
        let mut visit_order: Vec<(NodeId, NodeId)> = Vec::new();

        queue.push_back(self.sink);
        visited.insert(self.sink);
        while let Some(node_id) = queue.pop_front() {
            let sources: Vec<NodeId> = self.graph.incoming_arcs(node_id).map(|a| a.src).collect();
            for src in sources {
                if prepared.insert(src) {
                    visitor.prepare(ctx, &self.graph, src);
                }
                visitor.gather(ctx, &self.graph, src, node_id);
                visit_order.push((src, node_id));
                if visited.insert(src) {
                    queue.push_back(src);
                }
            }
        }

        for (src, dst) in visit_order {
            if let Some(cost) = visitor.update(ctx, &self.graph, src, dst) {
                if let Some(arc_id) = self.graph.find_arc(src, dst) {
                    if self.graph.arc(arc_id).cost != cost {
                        let capacity = self.graph.arc(arc_id).capacity;
                        self.graph.arc_mut(arc_id).cost = cost;
                        self.changes.add(GraphChange::ChangeArc {
                            src,
                            dst,
                            cost,
                            capacity,
                            comment: "UpdateStats",
                        });
                    }
                }
            }
        }
    }

    // ---- mapping interpretation --------------------------------------------

    /// Translates one `(task node, PU node)` binding into a Place, Migrate
    /// or NoOp delta against the current bindings.
    pub fn node_binding_to_scheduling_deltas(
        &self,
        task_node_id: NodeId,
        res_node_id: NodeId,
        task_bindings: &Map<TaskId, ResourceId>,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<()> {
        let Some(task_node) = self.graph.find_node(task_node_id) else {
            invariant_violation!("Mapping references unknown node {task_node_id}");
        };
        let Some(task_id) = task_node.task_id() else {
            invariant_violation!("Mapping source {task_node_id} is not a task node");
        };
        let Some(res_node) = self.graph.find_node(res_node_id) else {
            invariant_violation!("Mapping references unknown node {res_node_id}");
        };
        let Some(res_id) = res_node.resource_id() else {
            invariant_violation!("Mapping target {res_node_id} is not a resource node");
        };
        let kind = match task_bindings.get(&task_id) {
            Some(&bound) if bound == res_id => DeltaKind::NoOp,
            Some(_) => DeltaKind::Migrate,
            None => DeltaKind::Place,
        };
        deltas.push(SchedulingDelta::new(kind, task_id, res_id));
        Ok(())
    }

    /// Bound tasks whose node the solver did not route to any PU were
    /// preempted. Emitted before the per-mapping deltas, ordered by task id.
    pub fn scheduling_deltas_for_preempted_tasks(
        &self,
        mapping: &TaskMapping,
        task_bindings: &Map<TaskId, ResourceId>,
        deltas: &mut Vec<SchedulingDelta>,
    ) {
        let mapped: Set<NodeId> = mapping.iter().map(|&(task_node, _)| task_node).collect();
        let mut preempted: Vec<(TaskId, ResourceId)> = task_bindings
            .iter()
            .filter(|(task_id, _)| {
                self.task_nodes
                    .get(*task_id)
                    .is_some_and(|node| !mapped.contains(node))
            })
            .map(|(&task_id, &res_id)| (task_id, res_id))
            .collect();
        preempted.sort_by_key(|&(task_id, _)| task_id);
        for (task_id, res_id) in preempted {
            deltas.push(SchedulingDelta::new(DeltaKind::Preempt, task_id, res_id));
        }
    }

    /// Mapping entries for the tasks that are already bound, ordered by
    /// task id.
    pub fn task_mappings_for_bindings(
        &self,
        task_bindings: &Map<TaskId, ResourceId>,
    ) -> TaskMapping {
        let mut bound: Vec<(TaskId, ResourceId)> = task_bindings
            .iter()
            .map(|(&task_id, &res_id)| (task_id, res_id))
            .collect();
        bound.sort_unstable();
        let mut mapping = TaskMapping::new();
        for (task_id, res_id) in bound {
            if let (Some(&task_node), Some(&res_node)) = (
                self.task_nodes.get(&task_id),
                self.resource_nodes.get(&res_id),
            ) {
                mapping.push((task_node, res_node));
            }
        }
        mapping
    }

    /// Lifts the simple solver's single decision into the mapping shape of
    /// the batch solver. Existing bindings are carried over so that they do
    /// not read as preemptions.
    pub fn populate_task_mappings_for_simple_solver(
        &self,
        task_bindings: &Map<TaskId, ResourceId>,
        single_delta: (TaskId, ResourceId),
    ) -> Result<TaskMapping> {
        let mut mapping = self.task_mappings_for_bindings(task_bindings);
        let (task_id, res_id) = single_delta;
        let Some(&task_node) = self.task_nodes.get(&task_id) else {
            invariant_violation!("Task {task_id} has no graph node");
        };
        let Some(&res_node) = self.resource_nodes.get(&res_id) else {
            invariant_violation!("Resource {res_id} has no graph node");
        };
        mapping.push((task_node, res_node));
        Ok(mapping)
    }
}
