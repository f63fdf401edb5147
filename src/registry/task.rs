use serde::{Deserialize, Serialize};

use crate::{JobId, ResourceId, TaskId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskState {
    Created,
    Runnable,
    Scheduled,
    Running,
    Completed,
    Failed,
    Aborted,
    Evicted,
}

/// Workload-interference class used by interference-aware cost models.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TaskType {
    Devil,
    Rabbit,
    Sheep,
    Turtle,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub cpu_cores: f64,
    pub ram_mb: u64,
    pub ephemeral_storage_mb: u64,
}

/// Pod affinity / anti-affinity requirements. Tasks carrying either are
/// scheduled one at a time in the queue-based round.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Affinity {
    pub pod_affinity: Option<Vec<(String, String)>>,
    pub pod_anti_affinity: Option<Vec<(String, String)>>,
}

impl Affinity {
    pub fn is_empty(&self) -> bool {
        self.pod_affinity.is_none() && self.pod_anti_affinity.is_none()
    }
}

#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub job_id: JobId,
    pub submit_time_us: u64,
    pub state: TaskState,
    pub request: ResourceRequest,
    pub task_type: Option<TaskType>,
    pub affinity: Option<Affinity>,
    /// Delegated tasks are executed on behalf of another coordinator and
    /// are not represented in the flow graph.
    pub delegated: bool,
    pub scheduled_to: Option<ResourceId>,
}

impl Task {
    pub fn new(id: TaskId, job_id: JobId, submit_time_us: u64, request: ResourceRequest) -> Self {
        Task {
            id,
            job_id,
            submit_time_us,
            state: TaskState::Created,
            request,
            task_type: None,
            affinity: None,
            delegated: false,
            scheduled_to: None,
        }
    }

    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.state == TaskState::Runnable
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    /// True when the task has left the flow graph for good.
    #[inline]
    pub fn is_terminated(&self) -> bool {
        matches!(
            self.state,
            TaskState::Completed | TaskState::Failed | TaskState::Aborted
        )
    }

    #[inline]
    pub fn has_affinity_requirement(&self) -> bool {
        self.affinity.as_ref().is_some_and(|a| !a.is_empty())
    }

    pub fn set_state(&mut self, state: TaskState) {
        log::debug!("Task {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}
