use std::rc::Rc;
use std::time::Instant;

use serde_json::json;

use crate::common::time::TimeSource;
use crate::common::WrappedRcRefCell;
use crate::config::SchedulerConfig;
use crate::flowgraph::FlowGraphManager;
use crate::knowledge::{KnowledgeBase, TaskFinalReport};
use crate::model::{create_cost_model, CostModel, ModelCtx, StatsContext, TopologyVisitor};
use crate::registry::{Job, JobMap, JobState, Task, TaskMap, TaskState};
use crate::scheduler::delta::{DeltaKind, SchedulingDelta};
use crate::scheduler::{SchedulerStats, SchedulingEventNotifier};
use crate::solver::{FlowSolver, SolverDispatcher, TaskMapping};
use crate::topology::{ResourceKind, ResourceTopology, ResourceTreeSpec};
use crate::{invariant_violation, FlowError, JobId, Map, NodeId, ResourceId, Result, Set, TaskId};

/// Direction of a reservation-based stats adjustment.
#[derive(Copy, Clone, Eq, PartialEq)]
enum Reservation {
    Claim,
    Release,
}

/// Borrow split used whenever the graph manager, the dispatcher or the cost
/// model need the registry views at the same time.
struct GraphSplit<'a> {
    ctx: ModelCtx<'a>,
    graph: &'a mut FlowGraphManager,
    model: &'a mut dyn CostModel,
    dispatcher: &'a mut SolverDispatcher,
}

/// The flow-based scheduling loop: owns the cluster state, drives the graph
/// manager and the cost model, invokes the solver and materializes the
/// returned mapping as scheduling deltas.
pub struct FlowScheduler {
    config: Rc<SchedulerConfig>,
    clock: Rc<dyn TimeSource>,
    tasks: TaskMap,
    jobs: JobMap,
    topology: ResourceTopology,
    knowledge: KnowledgeBase,
    cost_model: Box<dyn CostModel>,
    graph_manager: FlowGraphManager,
    dispatcher: SolverDispatcher,
    notifier: Option<Box<dyn SchedulingEventNotifier>>,

    task_bindings: Map<TaskId, ResourceId>,
    affinity_antiaffinity_tasks: Vec<TaskId>,
    affinity_job_deltas: Map<JobId, Vec<SchedulingDelta>>,
    affinity_delta_tasks: Set<TaskId>,
    gang_rollback_jobs: Set<JobId>,

    last_updated_time_dependent_costs_us: u64,
    pus_removed_during_solver_run: Set<NodeId>,
    tasks_completed_during_solver_run: Set<NodeId>,
    queue_based_schedule: bool,
}

pub type FlowSchedulerRef = WrappedRcRefCell<FlowScheduler>;

/// The scheduling loop treats invariant violations as fatal: a misbehaving
/// graph would produce unsafe placements.
fn fatal_on_invariant<T>(result: Result<T>) -> Result<T> {
    if let Err(FlowError::InvariantViolation(msg)) = &result {
        log::error!("State invariant violation: {msg}");
        std::process::abort();
    }
    result
}

impl FlowSchedulerRef {
    pub fn new(
        config: SchedulerConfig,
        clock: Rc<dyn TimeSource>,
        solver: Box<dyn FlowSolver>,
        notifier: Option<Box<dyn SchedulingEventNotifier>>,
    ) -> Result<FlowSchedulerRef> {
        Ok(WrappedRcRefCell::wrap(FlowScheduler::new(
            config, clock, solver, notifier,
        )?))
    }

    // Entry points below serialize on the inner borrow, which plays the
    // role of the scheduling lock: event handlers and rounds never overlap.

    pub fn schedule_all_jobs(
        &self,
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        fatal_on_invariant(self.get_mut().schedule_all_jobs(stats, deltas))
    }

    pub fn schedule_all_queue_jobs(
        &self,
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        fatal_on_invariant(self.get_mut().schedule_all_queue_jobs(stats, deltas))
    }

    pub fn register_resource(&self, spec: ResourceTreeSpec) {
        self.get_mut().register_resource(spec);
    }

    pub fn deregister_resource(&self, root: ResourceId) -> Result<()> {
        fatal_on_invariant(self.get_mut().deregister_resource(root))
    }

    pub fn task_completion(&self, task_id: TaskId, report: TaskFinalReport) -> Result<()> {
        fatal_on_invariant(self.get_mut().handle_task_completion(task_id, report))
    }

    pub fn task_eviction(&self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        fatal_on_invariant(self.get_mut().handle_task_eviction(task_id, res_id))
    }

    pub fn task_failure(&self, task_id: TaskId) -> Result<()> {
        fatal_on_invariant(self.get_mut().handle_task_failure(task_id))
    }

    pub fn task_placement(&self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        fatal_on_invariant(self.get_mut().handle_task_placement(task_id, res_id))
    }

    pub fn task_migration(&self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        fatal_on_invariant(self.get_mut().handle_task_migration(task_id, res_id))
    }

    pub fn task_removal(&self, task_id: TaskId) {
        self.get_mut().handle_task_removal(task_id);
    }

    pub fn kill_running_task(&self, task_id: TaskId) {
        self.get_mut().kill_running_task(task_id);
    }

    pub fn job_completion(&self, job_id: JobId) {
        self.get_mut().handle_job_completion(job_id);
    }

    pub fn job_removal(&self, job_id: JobId) {
        self.get_mut().handle_job_removal(job_id);
    }
}

impl FlowScheduler {
    pub fn new(
        config: SchedulerConfig,
        clock: Rc<dyn TimeSource>,
        solver: Box<dyn FlowSolver>,
        notifier: Option<Box<dyn SchedulingEventNotifier>>,
    ) -> Result<Self> {
        let cost_model = create_cost_model(&config)?;
        let graph_manager = FlowGraphManager::new(config.max_tasks_per_pu);
        let dispatcher = SolverDispatcher::new(solver, config.max_solver_runtime_us);
        Ok(FlowScheduler {
            config: Rc::new(config),
            clock,
            tasks: Default::default(),
            jobs: Default::default(),
            topology: Default::default(),
            knowledge: Default::default(),
            cost_model,
            graph_manager,
            dispatcher,
            notifier,
            task_bindings: Default::default(),
            affinity_antiaffinity_tasks: Default::default(),
            affinity_job_deltas: Default::default(),
            affinity_delta_tasks: Default::default(),
            gang_rollback_jobs: Default::default(),
            last_updated_time_dependent_costs_us: 0,
            pus_removed_during_solver_run: Default::default(),
            tasks_completed_during_solver_run: Default::default(),
            queue_based_schedule: false,
        })
    }

    fn split(&mut self) -> GraphSplit<'_> {
        GraphSplit {
            ctx: ModelCtx {
                tasks: &self.tasks,
                jobs: &self.jobs,
                topology: &self.topology,
                knowledge: &self.knowledge,
                now_us: self.clock.now_us(),
            },
            graph: &mut self.graph_manager,
            model: &mut *self.cost_model,
            dispatcher: &mut self.dispatcher,
        }
    }

    // ---- accessors ---------------------------------------------------------

    #[inline]
    pub fn tasks(&self) -> &TaskMap {
        &self.tasks
    }

    #[inline]
    pub fn jobs(&self) -> &JobMap {
        &self.jobs
    }

    #[inline]
    pub fn topology(&self) -> &ResourceTopology {
        &self.topology
    }

    #[inline]
    pub fn knowledge(&self) -> &KnowledgeBase {
        &self.knowledge
    }

    #[inline]
    pub fn knowledge_mut(&mut self) -> &mut KnowledgeBase {
        &mut self.knowledge
    }

    #[inline]
    pub fn graph_manager(&self) -> &FlowGraphManager {
        &self.graph_manager
    }

    #[inline]
    pub fn task_bindings(&self) -> &Map<TaskId, ResourceId> {
        &self.task_bindings
    }

    #[inline]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ---- admission ---------------------------------------------------------

    /// Registers a job together with its tasks (root task first) and makes
    /// the tasks runnable.
    pub fn submit_job(&mut self, mut job: Job, tasks: Vec<Task>) {
        assert!(job.tasks.is_empty(), "Job must be submitted with its tasks");
        for mut task in tasks {
            assert_eq!(task.job_id, job.id);
            job.tasks.push(task.id);
            if task.has_affinity_requirement() {
                self.affinity_antiaffinity_tasks.push(task.id);
            }
            task.set_state(TaskState::Runnable);
            self.tasks.insert(task);
        }
        self.jobs.insert(job);
    }

    // ---- event handlers ----------------------------------------------------

    pub fn register_resource(&mut self, spec: ResourceTreeSpec) {
        let root = spec.descriptor.id;
        self.topology.add_subtree(spec, None);
        let GraphSplit { ctx, graph, model, .. } = self.split();
        graph.add_resource_topology(root, &ctx, model);
    }

    /// Evicts (or fails, per configuration) every task bound in the subtree,
    /// then drops the subtree from the topology and the graph. PU node ids
    /// removed here are remembered so that a mapping computed by an
    /// in-flight solver run can be filtered.
    pub fn deregister_resource(&mut self, root: ResourceId) -> Result<()> {
        for res_id in self.topology.post_order(root) {
            let mut bound: Vec<TaskId> = self
                .task_bindings
                .iter()
                .filter(|(_, &r)| r == res_id)
                .map(|(&t, _)| t)
                .collect();
            bound.sort_unstable();
            for task_id in bound {
                if self.config.reschedule_tasks_upon_node_failure {
                    self.handle_task_eviction(task_id, res_id)?;
                } else {
                    self.handle_task_failure(task_id)?;
                }
            }
        }
        let removed = self.topology.remove_subtree(root);
        for &res_id in &removed {
            self.knowledge.drop_machine(res_id);
        }
        self.graph_manager.remove_resource_topology(
            &removed,
            &mut *self.cost_model,
            &mut self.pus_removed_during_solver_run,
        );
        Ok(())
    }

    pub fn handle_job_completion(&mut self, job_id: JobId) {
        self.graph_manager.job_completed(job_id);
        self.affinity_job_deltas.remove(&job_id);
        if let Some(job) = self.jobs.find_job_mut(job_id) {
            job.set_state(JobState::Completed);
        }
    }

    pub fn handle_job_removal(&mut self, job_id: JobId) {
        self.graph_manager.job_removed(job_id);
        self.affinity_job_deltas.remove(&job_id);
        if let Some(job) = self.jobs.remove(job_id) {
            for task_id in job.tasks {
                self.handle_task_removal(task_id);
                self.tasks.remove(task_id);
            }
        }
    }

    pub fn handle_task_completion(&mut self, task_id: TaskId, report: TaskFinalReport) -> Result<()> {
        let Some(task) = self.tasks.find_task(task_id) else {
            invariant_violation!("Completed task {task_id} is not in the registry");
        };
        // Failed/aborted tasks have already left the flow graph.
        let task_in_graph = !task.is_terminated();
        let delegated = task.delegated;
        if self.config.pod_affinity_antiaffinity_symmetry {
            self.cost_model.remove_task_from_symmetry_map(task_id);
        }
        self.unbind_task(task_id);
        self.tasks.get_task_mut(task_id).set_state(TaskState::Completed);
        // The report is consumed before the task leaves the cost model's
        // tables; the model's equivalence classes key the knowledge base.
        self.handle_task_final_report(&report)?;
        if !delegated && task_in_graph {
            let node = self.graph_manager.task_completed(task_id)?;
            self.tasks_completed_during_solver_run.insert(node);
        }
        Ok(())
    }

    fn handle_task_final_report(&mut self, report: &TaskFinalReport) -> Result<()> {
        let task_id = report.task_id;
        let equiv_classes = {
            let GraphSplit { ctx, model, .. } = self.split();
            model.task_equiv_classes(&ctx, task_id)
        };
        if equiv_classes.is_empty() {
            invariant_violation!("Task {task_id} has no equivalence classes");
        }
        self.knowledge
            .process_task_final_report(&equiv_classes, report);
        self.cost_model.remove_task(task_id);
        Ok(())
    }

    pub fn handle_task_eviction(&mut self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        {
            let GraphSplit { ctx, graph, model, .. } = self.split();
            graph.task_evicted(task_id, res_id, &ctx, model)?;
        }
        // Evicted tasks are reconsidered by the affinity queue when absent
        // from its list.
        if !self.affinity_antiaffinity_tasks.contains(&task_id) {
            self.affinity_antiaffinity_tasks.push(task_id);
        }
        if self.config.pod_affinity_antiaffinity_symmetry {
            self.cost_model.remove_task_from_symmetry_map(task_id);
        }
        self.unbind_task(task_id);
        let task = self.tasks.get_task_mut(task_id);
        task.scheduled_to = None;
        task.set_state(TaskState::Evicted);
        task.set_state(TaskState::Runnable);
        Ok(())
    }

    pub fn handle_task_failure(&mut self, task_id: TaskId) -> Result<()> {
        self.graph_manager.task_failed(task_id)?;
        if self.config.pod_affinity_antiaffinity_symmetry {
            self.cost_model.remove_task_from_symmetry_map(task_id);
        }
        self.unbind_task(task_id);
        let task = self.tasks.get_task_mut(task_id);
        task.scheduled_to = None;
        task.set_state(TaskState::Failed);
        Ok(())
    }

    pub fn handle_task_migration(&mut self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        let Some(&old_res) = self.task_bindings.get(&task_id) else {
            invariant_violation!("Migrated task {task_id} has no binding");
        };
        // The graph update needs the destination recorded up front.
        self.tasks.get_task_mut(task_id).scheduled_to = Some(res_id);
        {
            let GraphSplit { ctx, graph, model, .. } = self.split();
            graph.task_migrated(task_id, old_res, res_id, &ctx, model)?;
        }
        self.clear_running_task(old_res, task_id);
        self.set_running_task(res_id, task_id);
        self.task_bindings.insert(task_id, res_id);
        Ok(())
    }

    pub fn handle_task_placement(&mut self, task_id: TaskId, res_id: ResourceId) -> Result<()> {
        self.tasks.get_task_mut(task_id).scheduled_to = Some(res_id);
        {
            let GraphSplit { ctx, graph, model, .. } = self.split();
            graph.task_scheduled(task_id, res_id, &ctx, model)?;
        }
        self.task_bindings.insert(task_id, res_id);
        self.set_running_task(res_id, task_id);
        let task = self.tasks.get_task_mut(task_id);
        task.set_state(TaskState::Running);
        if task.has_affinity_requirement() {
            self.affinity_antiaffinity_tasks.retain(|&t| t != task_id);
            if self.config.pod_affinity_antiaffinity_symmetry {
                self.cost_model
                    .update_resource_to_task_symmetry_map(res_id, task_id);
            }
        }
        Ok(())
    }

    pub fn handle_task_removal(&mut self, task_id: TaskId) {
        self.graph_manager.task_removed(task_id);
        if self.config.pod_affinity_antiaffinity_symmetry {
            self.cost_model.remove_task_from_symmetry_map(task_id);
        }
        self.cost_model.remove_task(task_id);
        self.unbind_task(task_id);
        self.affinity_antiaffinity_tasks.retain(|&t| t != task_id);
    }

    pub fn kill_running_task(&mut self, task_id: TaskId) {
        self.graph_manager.task_killed(task_id);
        self.unbind_task(task_id);
        if let Some(task) = self.tasks.find_task_mut(task_id) {
            task.scheduled_to = None;
            task.set_state(TaskState::Aborted);
        }
    }

    fn unbind_task(&mut self, task_id: TaskId) {
        if let Some(res_id) = self.task_bindings.remove(&task_id) {
            self.clear_running_task(res_id, task_id);
        }
    }

    fn set_running_task(&mut self, res_id: ResourceId, task_id: TaskId) {
        if let Some(node) = self.topology.find_mut(res_id) {
            node.descriptor.current_running_task = Some(task_id);
        }
    }

    fn clear_running_task(&mut self, res_id: ResourceId, task_id: TaskId) {
        if let Some(node) = self.topology.find_mut(res_id) {
            if node.descriptor.current_running_task == Some(task_id) {
                node.descriptor.current_running_task = None;
            }
        }
    }

    // ---- scheduling rounds -------------------------------------------------

    /// Batch round over all non-affinity jobs with runnable tasks.
    pub fn schedule_all_jobs(
        &mut self,
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        self.queue_based_schedule = false;
        self.schedule_filtered_jobs(stats, deltas)
    }

    /// Queue round over affinity/anti-affinity jobs; places at most one
    /// task per solver call.
    pub fn schedule_all_queue_jobs(
        &mut self,
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        self.queue_based_schedule = true;
        let scheduled = self.schedule_filtered_jobs(stats, deltas);
        self.queue_based_schedule = false;
        scheduled
    }

    fn schedule_filtered_jobs(
        &mut self,
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        let mut job_ids: Vec<JobId> = self
            .jobs
            .jobs()
            .filter(|job| {
                let is_affinity_job = self
                    .tasks
                    .get_task(job.root_task())
                    .has_affinity_requirement();
                is_affinity_job == self.queue_based_schedule
            })
            .filter(|job| !job.runnable_tasks(&self.tasks).is_empty())
            .map(|job| job.id)
            .collect();
        job_ids.sort_unstable();
        self.schedule_jobs(&job_ids, stats, deltas)
    }

    pub fn schedule_jobs(
        &mut self,
        job_ids: &[JobId],
        stats: &mut SchedulerStats,
        deltas: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        let round_timer = Instant::now();
        let jobs_with_runnables: Vec<JobId> = job_ids
            .iter()
            .copied()
            .filter(|&job_id| {
                !self
                    .jobs
                    .get_job(job_id)
                    .runnable_tasks(&self.tasks)
                    .is_empty()
            })
            .collect();
        if jobs_with_runnables.is_empty() {
            return Ok(0);
        }

        // Machine load feeds arc costs, so the statistics must be fresh
        // before any job arcs are added.
        self.update_cost_model_resource_stats();
        if self.config.gather_unscheduled_tasks {
            self.cost_model.clear_unscheduled_tasks_data();
        }
        {
            let GraphSplit { ctx, graph, model, .. } = self.split();
            graph.add_or_update_job_nodes(&jobs_with_runnables, &ctx, model)?;
        }
        let num_scheduled =
            self.run_scheduling_iteration(&jobs_with_runnables, round_timer, stats, deltas)?;
        log::info!("STOP SCHEDULING, placed {num_scheduled} tasks");
        if self.config.debug_cost_model {
            self.log_debug_cost_model()?;
        }
        // Graph changes from here on belong to the next solver run.
        self.graph_manager.reset_change_stats();
        stats.total_runtime_us = round_timer.elapsed().as_micros() as u64;
        Ok(num_scheduled)
    }

    fn update_cost_model_resource_stats(&mut self) {
        let mut ctx = StatsContext {
            tasks: &self.tasks,
            topology: &mut self.topology,
        };
        let visitor: &mut dyn TopologyVisitor = &mut *self.cost_model;
        self.graph_manager
            .compute_topology_statistics(visitor, &mut ctx);
    }

    fn run_scheduling_iteration(
        &mut self,
        job_ids: &[JobId],
        round_timer: Instant,
        stats: &mut SchedulerStats,
        deltas_output: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        let now_us = self.clock.now_us();
        if now_us.saturating_sub(self.last_updated_time_dependent_costs_us)
            >= self.config.time_dependent_cost_update_frequency_us
        {
            log::debug!("Updating time-dependent costs");
            let active_jobs: Vec<JobId> = job_ids
                .iter()
                .copied()
                .filter(|&job_id| self.jobs.get_job(job_id).is_active())
                .collect();
            if self.config.gather_unscheduled_tasks {
                self.cost_model.clear_unscheduled_tasks_data();
            }
            {
                let GraphSplit { ctx, graph, model, .. } = self.split();
                graph.update_time_dependent_costs(&active_jobs, &ctx, model)?;
            }
            self.last_updated_time_dependent_costs_us = now_us;
        }

        if self.dispatcher.run_count() % self.config.purge_unconnected_ec_frequency == 0 {
            self.graph_manager.purge_unconnected_ec_nodes();
        }

        self.pus_removed_during_solver_run.clear();
        self.tasks_completed_during_solver_run.clear();
        let round_start_us = self.clock.now_us();

        let mapping: TaskMapping = if !self.queue_based_schedule {
            self.dispatcher.run(&mut self.graph_manager, stats)?
        } else {
            self.run_simple_solver(job_ids, stats)?
        };

        stats.total_runtime_us = round_timer.elapsed().as_micros() as u64;
        self.notify_round_completion(round_start_us, stats);

        let num_scheduled = self.process_mapping(&mapping, deltas_output)?;

        if self.config.update_resource_topology_capacities {
            let roots: Vec<ResourceId> = self.topology.roots().collect();
            for root in roots {
                self.graph_manager.update_resource_topology(root, &self.topology);
            }
        }
        Ok(num_scheduled)
    }

    /// One-at-a-time placement for the affinity queue round.
    fn run_simple_solver(
        &mut self,
        job_ids: &[JobId],
        stats: &mut SchedulerStats,
    ) -> Result<TaskMapping> {
        let job = self.jobs.get_job(job_ids[0]);
        let mut runnable = job.runnable_tasks(&self.tasks);
        runnable.sort_unstable();
        let Some(&task_id) = runnable.first() else {
            return Ok(Vec::new());
        };
        let candidates = self.free_pus();
        let single = {
            let GraphSplit {
                ctx,
                model,
                dispatcher,
                ..
            } = self.split();
            dispatcher.run_simple_solver_for_single_task(stats, task_id, &candidates, &ctx, model)?
        };
        match single {
            Some(delta) => self
                .graph_manager
                .populate_task_mappings_for_simple_solver(&self.task_bindings, delta),
            // Nothing placed: carry the current bindings through so they do
            // not read as preemptions.
            None => Ok(self
                .graph_manager
                .task_mappings_for_bindings(&self.task_bindings)),
        }
    }

    /// PUs that still have a free task slot.
    fn free_pus(&self) -> Vec<ResourceId> {
        let mut bound_counts: Map<ResourceId, u64> = Map::default();
        for &res_id in self.task_bindings.values() {
            *bound_counts.entry(res_id).or_insert(0) += 1;
        }
        let mut pus: Vec<ResourceId> = self
            .topology
            .resource_ids()
            .filter(|&id| self.topology.get(id).descriptor.kind == ResourceKind::Pu)
            .filter(|id| {
                bound_counts.get(id).copied().unwrap_or(0) < self.config.max_tasks_per_pu
            })
            .collect();
        pus.sort_unstable();
        pus
    }

    fn notify_round_completion(&mut self, round_start_us: u64, stats: &SchedulerStats) {
        let Some(notifier) = &mut self.notifier else {
            return;
        };
        if self.dispatcher.run_count() == 1 {
            // The first run sets up the whole cluster state; report zero so
            // the warm-up does not skew downstream accounting.
            notifier.on_scheduling_decisions_completion(round_start_us, 0);
        } else {
            let runtime = stats.accounted_runtime(self.config.effective_accounting());
            notifier.on_scheduling_decisions_completion(round_start_us, runtime);
        }
    }

    /// Turns the solver mapping into deltas and applies them: preemptions
    /// first, then the mapping entries in solver order. Entries referencing
    /// tasks completed or PUs removed since the solver input was frozen are
    /// skipped.
    pub(crate) fn process_mapping(
        &mut self,
        mapping: &TaskMapping,
        deltas_output: &mut Vec<SchedulingDelta>,
    ) -> Result<u64> {
        let mut deltas: Vec<SchedulingDelta> = Vec::new();
        self.graph_manager
            .scheduling_deltas_for_preempted_tasks(mapping, &self.task_bindings, &mut deltas);

        for &(task_node, pu_node) in mapping {
            if self.tasks_completed_during_solver_run.contains(&task_node) {
                log::debug!("Task node {task_node} completed while the solver was running");
                continue;
            }
            if self.pus_removed_during_solver_run.contains(&pu_node) {
                log::debug!("PU node {pu_node} was removed while the solver was running");
                continue;
            }
            self.graph_manager.node_binding_to_scheduling_deltas(
                task_node,
                pu_node,
                &self.task_bindings,
                &mut deltas,
            )?;
            let Some(task_id) = self.graph_manager.node_for_node_id(task_node).task_id() else {
                invariant_violation!("Mapping source {task_node} is not a task node");
            };
            let job_id = self.tasks.get_task(task_id).job_id;
            let job = self.jobs.get_job_mut(job_id);
            if job.is_gang() && !self.affinity_delta_tasks.contains(&task_id) {
                job.scheduled_tasks_count += 1;
            }
        }

        let num_scheduled = self.apply_scheduling_deltas(&mut deltas)?;
        for delta in deltas {
            if delta.kind != DeltaKind::NoOp {
                deltas_output.push(delta);
            }
        }
        Ok(num_scheduled)
    }

    fn apply_scheduling_deltas(&mut self, deltas: &mut [SchedulingDelta]) -> Result<u64> {
        let mut num_scheduled = 0;
        log::debug!("Applying {} scheduling deltas", deltas.len());
        for i in 0..deltas.len() {
            let delta = deltas[i];
            let Some(task) = self.tasks.find_task(delta.task_id) else {
                invariant_violation!("Delta references unknown task {}", delta.task_id);
            };
            let job_id = task.job_id;
            let has_affinity = task.has_affinity_requirement();
            let Some(job) = self.jobs.find_job(job_id) else {
                invariant_violation!("Delta references unknown job {job_id}");
            };
            let gang_min_tasks = job.gang_min_tasks;
            let scheduled_tasks_count = job.scheduled_tasks_count;

            // Misclassified affinity tasks wait for the queue round.
            if delta.kind == DeltaKind::Place && has_affinity && !self.queue_based_schedule {
                log::debug!("Affinity task {} skipped in the batch round", delta.task_id);
                if gang_min_tasks.is_some() {
                    let job = self.jobs.get_job_mut(job_id);
                    job.scheduled_tasks_count = job.scheduled_tasks_count.saturating_sub(1);
                }
                deltas[i].kind = DeltaKind::NoOp;
                continue;
            }
            if let Some(min_tasks) = gang_min_tasks {
                if has_affinity {
                    if self.queue_based_schedule
                        && !self.affinity_delta_tasks.contains(&delta.task_id)
                    {
                        self.affinity_job_deltas
                            .entry(job_id)
                            .or_default()
                            .push(delta);
                        self.affinity_delta_tasks.insert(delta.task_id);
                    }
                } else if scheduled_tasks_count < min_tasks {
                    // Under threshold: roll the counter back one step per
                    // delta and withhold the placement.
                    let job = self.jobs.get_job_mut(job_id);
                    job.scheduled_tasks_count = job.scheduled_tasks_count.saturating_sub(1);
                    deltas[i].kind = DeltaKind::NoOp;
                    self.gang_rollback_jobs.insert(job_id);
                    continue;
                }
            }
            match delta.kind {
                DeltaKind::NoOp => continue,
                DeltaKind::Place => {
                    self.add_reservation_sample(delta.task_id, delta.resource_id, Reservation::Claim);
                    let job = self.jobs.get_job_mut(job_id);
                    if job.state != JobState::Running {
                        job.set_state(JobState::Running);
                    }
                    self.handle_task_placement(delta.task_id, delta.resource_id)?;
                    num_scheduled += 1;
                }
                DeltaKind::Preempt => {
                    self.add_reservation_sample(
                        delta.task_id,
                        delta.resource_id,
                        Reservation::Release,
                    );
                    self.handle_task_eviction(delta.task_id, delta.resource_id)?;
                }
                DeltaKind::Migrate => {
                    self.handle_task_migration(delta.task_id, delta.resource_id)?;
                }
            }
        }
        Ok(num_scheduled)
    }

    /// Synthesizes a machine stat sample from a placement decision so the
    /// next round's cost model sees the reservation before real telemetry
    /// confirms it.
    fn add_reservation_sample(&mut self, task_id: TaskId, res_id: ResourceId, dir: Reservation) {
        if !self.config.resource_stats_update_based_on_resource_reservation {
            return;
        }
        let Some(machine) = self.topology.machine_of(res_id) else {
            return;
        };
        let Some(mut sample) = self.knowledge.latest_machine_sample(machine) else {
            return;
        };
        let request = self.tasks.get_task(task_id).request;
        match dir {
            Reservation::Claim => {
                sample.cpu_allocatable -= request.cpu_cores;
                sample.mem_allocatable_mb = sample.mem_allocatable_mb.saturating_sub(request.ram_mb);
                sample.ephemeral_storage_allocatable_mb = sample
                    .ephemeral_storage_allocatable_mb
                    .saturating_sub(request.ephemeral_storage_mb);
            }
            Reservation::Release => {
                sample.cpu_allocatable += request.cpu_cores;
                sample.mem_allocatable_mb += request.ram_mb;
                sample.ephemeral_storage_allocatable_mb += request.ephemeral_storage_mb;
            }
        }
        if sample.cpu_capacity > 0.0 {
            sample.cpu_utilization =
                (sample.cpu_capacity - sample.cpu_allocatable) / sample.cpu_capacity;
        }
        if sample.mem_capacity_mb > 0 {
            sample.mem_utilization = (sample.mem_capacity_mb - sample.mem_allocatable_mb) as f64
                / sample.mem_capacity_mb as f64;
        }
        if sample.ephemeral_storage_capacity_mb > 0 {
            sample.ephemeral_storage_utilization = (sample.ephemeral_storage_capacity_mb
                - sample.ephemeral_storage_allocatable_mb)
                as f64
                / sample.ephemeral_storage_capacity_mb as f64;
        }
        self.knowledge.add_machine_sample(machine, sample);
    }

    /// Rolls back affinity gang jobs that did not reach their threshold
    /// across the queue rounds: tentative placements are evicted, tasks
    /// return to Created, and the counter resets. Called by the driver once
    /// its queue rounds for this cycle are done.
    pub fn update_gang_scheduling_deltas(
        &mut self,
        deltas_output: &mut Vec<SchedulingDelta>,
    ) -> Result<()> {
        self.gang_rollback_jobs.clear();
        let pending: Vec<(JobId, Vec<SchedulingDelta>)> =
            std::mem::take(&mut self.affinity_job_deltas).into_iter().collect();
        for (job_id, job_deltas) in pending {
            let job = self.jobs.get_job(job_id);
            let min_tasks = job.gang_min_tasks.unwrap_or(0);
            if job.scheduled_tasks_count < min_tasks {
                for delta in &job_deltas {
                    self.add_reservation_sample(
                        delta.task_id,
                        delta.resource_id,
                        Reservation::Release,
                    );
                    self.handle_task_eviction(delta.task_id, delta.resource_id)?;
                    let task = self.tasks.get_task_mut(delta.task_id);
                    task.scheduled_to = None;
                    task.set_state(TaskState::Created);
                    deltas_output.retain(|d| d.task_id != delta.task_id);
                }
            }
            self.jobs.get_job_mut(job_id).scheduled_tasks_count = 0;
        }
        self.affinity_delta_tasks.clear();
        Ok(())
    }

    fn log_debug_cost_model(&mut self) -> Result<()> {
        let path = self.config.debug_output_dir.join(format!(
            "cost_model_{}.csv",
            self.dispatcher.run_count()
        ));
        let debug_info = {
            let GraphSplit { ctx, model, .. } = self.split();
            model.debug_info_csv(&ctx)
        };
        std::fs::write(path, debug_info)?;
        Ok(())
    }

    /// JSON snapshot of the scheduler state, for debugging.
    pub fn dump(&self) -> serde_json::Value {
        let mut jobs: Vec<_> = self.jobs.jobs().collect();
        jobs.sort_by_key(|job| job.id);
        let mut tasks: Vec<_> = self.tasks.tasks().collect();
        tasks.sort_by_key(|task| task.id);
        let mut bindings: Vec<(TaskId, ResourceId)> = self
            .task_bindings
            .iter()
            .map(|(&task_id, &res_id)| (task_id, res_id))
            .collect();
        bindings.sort_unstable();
        json!({
            "jobs": jobs.iter().map(|job| json!({
                "id": job.id,
                "state": job.state,
                "scheduled_tasks_count": job.scheduled_tasks_count,
            })).collect::<Vec<_>>(),
            "tasks": tasks.iter().map(|task| json!({
                "id": task.id,
                "job": task.job_id,
                "state": task.state,
                "scheduled_to": task.scheduled_to,
            })).collect::<Vec<_>>(),
            "bindings": bindings.iter().map(|(task_id, res_id)| json!({
                "task": task_id,
                "resource": res_id,
            })).collect::<Vec<_>>(),
            "graph": json!({
                "nodes": self.graph_manager.graph().num_nodes(),
                "arcs": self.graph_manager.graph().num_arcs(),
            }),
        })
    }
}
