use serde::{Deserialize, Serialize};

use crate::{ResourceId, TaskId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum DeltaKind {
    Place,
    Preempt,
    Migrate,
    NoOp,
}

/// One placement decision produced by a scheduling round. NoOp deltas are
/// filtered before emission.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SchedulingDelta {
    pub kind: DeltaKind,
    pub task_id: TaskId,
    pub resource_id: ResourceId,
}

impl SchedulingDelta {
    pub fn new(kind: DeltaKind, task_id: TaskId, resource_id: ResourceId) -> Self {
        SchedulingDelta {
            kind,
            task_id,
            resource_id,
        }
    }
}
