use serde::{Deserialize, Serialize};

use crate::{Map, ResourceId, Set, TaskId};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Cluster,
    Machine,
    Socket,
    Core,
    Pu,
}

/// Per-task-type co-location counts rolled up the topology by the
/// statistics pass of the cost model.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct InterferenceCounts {
    pub num_devils: u64,
    pub num_rabbits: u64,
    pub num_sheep: u64,
    pub num_turtles: u64,
}

impl InterferenceCounts {
    pub fn accumulate(&mut self, other: &InterferenceCounts) {
        self.num_devils += other.num_devils;
        self.num_rabbits += other.num_rabbits;
        self.num_sheep += other.num_sheep;
        self.num_turtles += other.num_turtles;
    }

    pub fn clear(&mut self) {
        *self = Default::default();
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceCapacity {
    pub cpu_cores: f64,
    pub ram_mb: u64,
    pub ephemeral_storage_mb: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub id: ResourceId,
    pub kind: ResourceKind,
    pub capacity: ResourceCapacity,
    /// Only meaningful for PUs.
    pub current_running_task: Option<TaskId>,
    pub interference: InterferenceCounts,
}

impl ResourceDescriptor {
    pub fn new(id: ResourceId, kind: ResourceKind) -> Self {
        ResourceDescriptor {
            id,
            kind,
            capacity: Default::default(),
            current_running_task: None,
            interference: Default::default(),
        }
    }
}

/// Owned subtree handed over at registration time.
#[derive(Clone, Debug)]
pub struct ResourceTreeSpec {
    pub descriptor: ResourceDescriptor,
    pub children: Vec<ResourceTreeSpec>,
}

impl ResourceTreeSpec {
    pub fn new(descriptor: ResourceDescriptor) -> Self {
        ResourceTreeSpec {
            descriptor,
            children: Vec::new(),
        }
    }

    pub fn with_children(descriptor: ResourceDescriptor, children: Vec<ResourceTreeSpec>) -> Self {
        ResourceTreeSpec {
            descriptor,
            children,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ResourceNode {
    pub descriptor: ResourceDescriptor,
    pub parent: Option<ResourceId>,
    pub children: Vec<ResourceId>,
}

/// Id-indexed store of the hierarchical resource topology.
///
/// Nodes never own each other; the tree structure is expressed through
/// parent/child ids only.
#[derive(Default, Debug)]
pub struct ResourceTopology {
    nodes: Map<ResourceId, ResourceNode>,
    roots: Set<ResourceId>,
}

impl ResourceTopology {
    /// Flattens `spec` into the store. Roots (typically clusters or
    /// free-standing machines) are registered with `parent = None`.
    pub fn add_subtree(&mut self, spec: ResourceTreeSpec, parent: Option<ResourceId>) {
        let id = spec.descriptor.id;
        log::debug!("Registering resource {} ({:?})", id, spec.descriptor.kind);
        let children: Vec<ResourceId> = spec.children.iter().map(|c| c.descriptor.id).collect();
        assert!(
            self.nodes
                .insert(
                    id,
                    ResourceNode {
                        descriptor: spec.descriptor,
                        parent,
                        children,
                    },
                )
                .is_none(),
            "Duplicate resource registration id={id}"
        );
        if parent.is_none() {
            self.roots.insert(id);
        }
        for child in spec.children {
            self.add_subtree(child, Some(id));
        }
    }

    /// Removes the subtree rooted at `root_id` and returns all removed ids
    /// in post-order (PUs before their parents).
    pub fn remove_subtree(&mut self, root_id: ResourceId) -> Vec<ResourceId> {
        let order = self.post_order(root_id);
        let parent = self.nodes.get(&root_id).and_then(|node| node.parent);
        if let Some(parent) = parent {
            if let Some(parent_node) = self.nodes.get_mut(&parent) {
                parent_node.children.retain(|&c| c != root_id);
            }
        }
        for &id in &order {
            self.nodes.remove(&id);
        }
        self.roots.remove(&root_id);
        order
    }

    /// Post-order traversal of the subtree rooted at `root_id`.
    pub fn post_order(&self, root_id: ResourceId) -> Vec<ResourceId> {
        let mut order = Vec::new();
        self.post_order_inner(root_id, &mut order);
        order
    }

    fn post_order_inner(&self, id: ResourceId, order: &mut Vec<ResourceId>) {
        if let Some(node) = self.nodes.get(&id) {
            for &child in &node.children {
                self.post_order_inner(child, order);
            }
            order.push(id);
        }
    }

    #[inline]
    pub fn get(&self, id: ResourceId) -> &ResourceNode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("Asking for invalid resource id={id}"))
    }

    #[inline]
    pub fn get_mut(&mut self, id: ResourceId) -> &mut ResourceNode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Asking for invalid resource id={id}"))
    }

    #[inline]
    pub fn find(&self, id: ResourceId) -> Option<&ResourceNode> {
        self.nodes.get(&id)
    }

    #[inline]
    pub fn find_mut(&mut self, id: ResourceId) -> Option<&mut ResourceNode> {
        self.nodes.get_mut(&id)
    }

    #[inline]
    pub fn contains(&self, id: ResourceId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn roots(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.roots.iter().copied()
    }

    pub fn resource_ids(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn machines(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.nodes
            .iter()
            .filter(|(_, n)| n.descriptor.kind == ResourceKind::Machine)
            .map(|(&id, _)| id)
    }

    /// PUs in the subtree rooted at `root_id`.
    pub fn pus_under(&self, root_id: ResourceId) -> Vec<ResourceId> {
        self.post_order(root_id)
            .into_iter()
            .filter(|&id| self.get(id).descriptor.kind == ResourceKind::Pu)
            .collect()
    }

    /// Nearest enclosing machine of `id`, including `id` itself.
    pub fn machine_of(&self, id: ResourceId) -> Option<ResourceId> {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let node = self.find(current)?;
            if node.descriptor.kind == ResourceKind::Machine {
                return Some(current);
            }
            cursor = node.parent;
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{ResourceDescriptor, ResourceKind, ResourceTopology, ResourceTreeSpec};
    use crate::ResourceId;

    fn machine_spec(base: u64, pus: u64) -> ResourceTreeSpec {
        let children = (1..=pus)
            .map(|i| {
                ResourceTreeSpec::new(ResourceDescriptor::new(
                    ResourceId::new(base + i),
                    ResourceKind::Pu,
                ))
            })
            .collect();
        ResourceTreeSpec::with_children(
            ResourceDescriptor::new(ResourceId::new(base), ResourceKind::Machine),
            children,
        )
    }

    #[test]
    fn add_and_remove_subtree() {
        let mut topo = ResourceTopology::default();
        topo.add_subtree(machine_spec(10, 2), None);
        assert_eq!(topo.len(), 3);
        assert_eq!(topo.pus_under(10.into()).len(), 2);
        assert_eq!(topo.machine_of(11.into()), Some(10.into()));

        let removed = topo.remove_subtree(10.into());
        assert_eq!(removed.len(), 3);
        // Post-order: PUs first, machine last.
        assert_eq!(*removed.last().unwrap(), ResourceId::new(10));
        assert!(topo.is_empty());
    }

    #[test]
    fn remove_subtree_detaches_from_parent() {
        let mut topo = ResourceTopology::default();
        let cluster = ResourceTreeSpec::with_children(
            ResourceDescriptor::new(ResourceId::new(1), ResourceKind::Cluster),
            vec![machine_spec(10, 1), machine_spec(20, 1)],
        );
        topo.add_subtree(cluster, None);
        topo.remove_subtree(10.into());
        assert_eq!(topo.get(1.into()).children, vec![ResourceId::new(20)]);
        assert!(!topo.contains(11.into()));
    }
}
