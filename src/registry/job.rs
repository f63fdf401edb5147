use serde::{Deserialize, Serialize};

use crate::registry::taskmap::TaskMap;
use crate::{JobId, TaskId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Aborted,
}

#[derive(Clone, Debug)]
pub struct Job {
    pub id: JobId,
    pub state: JobState,
    /// Root task first, spawned tasks after it.
    pub tasks: Vec<TaskId>,
    /// `Some(n)` marks a gang job whose placements only materialize once
    /// at least `n` of its tasks were placed in a round.
    pub gang_min_tasks: Option<u64>,
    pub scheduled_tasks_count: u64,
}

impl Job {
    pub fn new(id: JobId) -> Self {
        Job {
            id,
            state: JobState::Pending,
            tasks: Vec::new(),
            gang_min_tasks: None,
            scheduled_tasks_count: 0,
        }
    }

    #[inline]
    pub fn root_task(&self) -> TaskId {
        *self.tasks.first().expect("Job has no root task")
    }

    #[inline]
    pub fn is_gang(&self) -> bool {
        self.gang_min_tasks.is_some()
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(
            self.state,
            JobState::Completed | JobState::Failed | JobState::Aborted
        )
    }

    pub fn runnable_tasks(&self, tasks: &TaskMap) -> Vec<TaskId> {
        self.tasks
            .iter()
            .copied()
            .filter(|&task_id| tasks.get_task(task_id).is_runnable())
            .collect()
    }

    pub fn set_state(&mut self, state: JobState) {
        log::debug!("Job {}: {:?} -> {:?}", self.id, self.state, state);
        self.state = state;
    }
}
