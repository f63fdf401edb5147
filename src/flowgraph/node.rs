use smallvec::SmallVec;

use crate::{ArcId, EquivClassId, JobId, NodeId, ResourceId, TaskId};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeKind {
    /// The root task of a job, while unscheduled.
    RootTask(TaskId),
    ScheduledTask(TaskId),
    UnscheduledTask(TaskId),
    /// Per-job unscheduled aggregator.
    JobAggregator(JobId),
    EquivClass(EquivClassId),
    Machine(ResourceId),
    /// Cluster, socket and core nodes.
    InteriorResource(ResourceId),
    Pu(ResourceId),
    Sink,
}

#[derive(Debug)]
pub struct FlowGraphNode {
    pub id: NodeId,
    pub kind: NodeKind,
    pub outgoing: SmallVec<[ArcId; 4]>,
    pub incoming: SmallVec<[ArcId; 4]>,
}

impl FlowGraphNode {
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        FlowGraphNode {
            id,
            kind,
            outgoing: SmallVec::new(),
            incoming: SmallVec::new(),
        }
    }

    #[inline]
    pub fn task_id(&self) -> Option<TaskId> {
        match self.kind {
            NodeKind::RootTask(id) | NodeKind::ScheduledTask(id) | NodeKind::UnscheduledTask(id) => {
                Some(id)
            }
            _ => None,
        }
    }

    #[inline]
    pub fn resource_id(&self) -> Option<ResourceId> {
        match self.kind {
            NodeKind::Machine(id) | NodeKind::InteriorResource(id) | NodeKind::Pu(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn equiv_class_id(&self) -> Option<EquivClassId> {
        match self.kind {
            NodeKind::EquivClass(id) => Some(id),
            _ => None,
        }
    }

    #[inline]
    pub fn is_task_node(&self) -> bool {
        self.task_id().is_some()
    }

    #[inline]
    pub fn is_topology_node(&self) -> bool {
        self.resource_id().is_some()
    }

    #[inline]
    pub fn is_pu(&self) -> bool {
        matches!(self.kind, NodeKind::Pu(_))
    }

    /// Nodes that never accumulate topology statistics.
    #[inline]
    pub fn skips_stats_accumulation(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::RootTask(_)
                | NodeKind::ScheduledTask(_)
                | NodeKind::UnscheduledTask(_)
                | NodeKind::JobAggregator(_)
                | NodeKind::Sink
        )
    }
}
