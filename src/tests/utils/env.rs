use std::rc::Rc;

use crate::common::time::SimClock;
use crate::config::{CostModelKind, SchedulerConfig};
use crate::knowledge::MachineStatsSample;
use crate::registry::{Affinity, Job, ResourceRequest, Task};
use crate::scheduler::{FlowSchedulerRef, SchedulerStats, SchedulingDelta};
use crate::solver::FlowSolver;
use crate::tests::utils::solver::GreedySolver;
use crate::topology::{
    ResourceCapacity, ResourceDescriptor, ResourceKind, ResourceTreeSpec,
};
use crate::{JobId, ResourceId, TaskId};

pub fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        cost_model: CostModelKind::WhareMap,
        num_pref_arcs_agg_to_res: 2,
        ..Default::default()
    }
}

/// A scheduler wired to a simulated clock and a test solver.
pub struct TestEnv {
    pub clock: Rc<SimClock>,
    pub scheduler: FlowSchedulerRef,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with(test_config(), Box::new(GreedySolver))
    }

    pub fn with(config: SchedulerConfig, solver: Box<dyn FlowSolver>) -> Self {
        let clock = SimClock::new(0);
        let scheduler = FlowSchedulerRef::new(config, clock.clone(), solver, None).unwrap();
        TestEnv { clock, scheduler }
    }

    /// Machine `base` with PUs `base+1 ..= base+pus`, registered as a root.
    pub fn add_machine(&self, base: u64, pus: u64) -> ResourceId {
        let children = (1..=pus)
            .map(|i| {
                ResourceTreeSpec::new(ResourceDescriptor::new(
                    (base + i).into(),
                    ResourceKind::Pu,
                ))
            })
            .collect();
        let mut descriptor = ResourceDescriptor::new(base.into(), ResourceKind::Machine);
        descriptor.capacity = ResourceCapacity {
            cpu_cores: pus as f64,
            ram_mb: 1024 * pus,
            ephemeral_storage_mb: 10 * 1024,
        };
        self.scheduler
            .register_resource(ResourceTreeSpec::with_children(descriptor, children));
        base.into()
    }

    pub fn seed_machine_sample(&self, machine: ResourceId, cpu: f64, ram_mb: u64) {
        self.scheduler.get_mut().knowledge_mut().add_machine_sample(
            machine,
            MachineStatsSample {
                cpu_capacity: cpu,
                cpu_allocatable: cpu,
                mem_capacity_mb: ram_mb,
                mem_allocatable_mb: ram_mb,
                ephemeral_storage_capacity_mb: 10 * 1024,
                ephemeral_storage_allocatable_mb: 10 * 1024,
                ..Default::default()
            },
        );
    }

    pub fn submit_job(&self, job_id: u64, task_ids: &[u64], submit_time_us: u64) {
        self.submit_job_inner(job_id, task_ids, submit_time_us, None, false);
    }

    /// Job whose tasks carry individual submit timestamps.
    pub fn submit_job_with_times(&self, job_id: u64, tasks: &[(u64, u64)]) {
        let job_id = JobId::new(job_id);
        let job = Job::new(job_id);
        let tasks = tasks
            .iter()
            .map(|&(task_id, submit_time_us)| {
                Task::new(
                    task_id.into(),
                    job_id,
                    submit_time_us,
                    ResourceRequest {
                        cpu_cores: 1.0,
                        ram_mb: 512,
                        ephemeral_storage_mb: 128,
                    },
                )
            })
            .collect();
        self.scheduler.get_mut().submit_job(job, tasks);
    }

    pub fn submit_gang_job(&self, job_id: u64, task_ids: &[u64], min_tasks: u64) {
        self.submit_job_inner(job_id, task_ids, 0, Some(min_tasks), false);
    }

    pub fn submit_affinity_job(&self, job_id: u64, task_ids: &[u64]) {
        self.submit_job_inner(job_id, task_ids, 0, None, true);
    }

    pub fn submit_affinity_gang_job(&self, job_id: u64, task_ids: &[u64], min_tasks: u64) {
        self.submit_job_inner(job_id, task_ids, 0, Some(min_tasks), true);
    }

    fn submit_job_inner(
        &self,
        job_id: u64,
        task_ids: &[u64],
        submit_time_us: u64,
        gang_min_tasks: Option<u64>,
        affinity: bool,
    ) {
        let job_id = JobId::new(job_id);
        let mut job = Job::new(job_id);
        job.gang_min_tasks = gang_min_tasks;
        let tasks = task_ids
            .iter()
            .map(|&task_id| {
                let mut task = Task::new(
                    task_id.into(),
                    job_id,
                    submit_time_us,
                    ResourceRequest {
                        cpu_cores: 1.0,
                        ram_mb: 512,
                        ephemeral_storage_mb: 128,
                    },
                );
                if affinity {
                    task.affinity = Some(Affinity {
                        pod_affinity: Some(vec![("app".to_string(), "db".to_string())]),
                        pod_anti_affinity: None,
                    });
                }
                task
            })
            .collect();
        self.scheduler.get_mut().submit_job(job, tasks);
    }

    /// One batch round; panics on round errors.
    pub fn round(&self) -> (SchedulerStats, Vec<SchedulingDelta>, u64) {
        let mut stats = SchedulerStats::default();
        let mut deltas = Vec::new();
        let scheduled = self.scheduler.schedule_all_jobs(&mut stats, &mut deltas).unwrap();
        (stats, deltas, scheduled)
    }

    /// One queue-based (affinity) round.
    pub fn queue_round(&self) -> (SchedulerStats, Vec<SchedulingDelta>, u64) {
        let mut stats = SchedulerStats::default();
        let mut deltas = Vec::new();
        let scheduled = self
            .scheduler
            .schedule_all_queue_jobs(&mut stats, &mut deltas)
            .unwrap();
        (stats, deltas, scheduled)
    }

    pub fn bound_resource(&self, task_id: u64) -> Option<ResourceId> {
        self.scheduler
            .get()
            .task_bindings()
            .get(&TaskId::new(task_id))
            .copied()
    }
}
