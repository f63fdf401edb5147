use crate::flowgraph::node::{FlowGraphNode, NodeKind};
use crate::{ArcId, Capacity, Cost, Map, NodeId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FlowGraphArc {
    pub id: ArcId,
    pub src: NodeId,
    pub dst: NodeId,
    pub cost: Cost,
    pub capacity: Capacity,
}

/// Arena of flow-graph nodes and arcs.
///
/// Nodes and arcs reference each other through ids only, so removing a node
/// is a detach-and-drop without dangling references. Ids are never reused;
/// change records may mention ids of nodes that are already gone.
#[derive(Default, Debug)]
pub struct FlowGraph {
    nodes: Map<NodeId, FlowGraphNode>,
    arcs: Map<ArcId, FlowGraphArc>,
    next_node_id: u64,
    next_arc_id: u64,
}

impl FlowGraph {
    pub fn add_node(&mut self, kind: NodeKind) -> NodeId {
        self.next_node_id += 1;
        let id = NodeId::new(self.next_node_id);
        self.nodes.insert(id, FlowGraphNode::new(id, kind));
        id
    }

    /// Removes a node together with all adjacent arcs.
    pub fn remove_node(&mut self, id: NodeId) -> FlowGraphNode {
        let node = self
            .nodes
            .remove(&id)
            .unwrap_or_else(|| panic!("Removing invalid node id={id}"));
        for arc_id in node.outgoing.iter().chain(node.incoming.iter()) {
            if let Some(arc) = self.arcs.remove(arc_id) {
                let other = if arc.src == id { arc.dst } else { arc.src };
                if let Some(other_node) = self.nodes.get_mut(&other) {
                    other_node.outgoing.retain(|a| a != arc_id);
                    other_node.incoming.retain(|a| a != arc_id);
                }
            }
        }
        node
    }

    pub fn add_arc(&mut self, src: NodeId, dst: NodeId, cost: Cost, capacity: Capacity) -> ArcId {
        self.next_arc_id += 1;
        let id = ArcId::new(self.next_arc_id);
        self.arcs.insert(
            id,
            FlowGraphArc {
                id,
                src,
                dst,
                cost,
                capacity,
            },
        );
        self.node_mut(src).outgoing.push(id);
        self.node_mut(dst).incoming.push(id);
        id
    }

    pub fn remove_arc(&mut self, id: ArcId) -> FlowGraphArc {
        let arc = self
            .arcs
            .remove(&id)
            .unwrap_or_else(|| panic!("Removing invalid arc id={id}"));
        self.node_mut(arc.src).outgoing.retain(|a| *a != id);
        self.node_mut(arc.dst).incoming.retain(|a| *a != id);
        arc
    }

    /// First arc `src -> dst`, if any. Adjacency lists are short, so a scan
    /// is fine.
    pub fn find_arc(&self, src: NodeId, dst: NodeId) -> Option<ArcId> {
        let node = self.find_node(src)?;
        node.outgoing
            .iter()
            .copied()
            .find(|arc_id| self.arc(*arc_id).dst == dst)
    }

    #[inline]
    pub fn arc(&self, id: ArcId) -> &FlowGraphArc {
        self.arcs
            .get(&id)
            .unwrap_or_else(|| panic!("Asking for invalid arc id={id}"))
    }

    #[inline]
    pub fn arc_mut(&mut self, id: ArcId) -> &mut FlowGraphArc {
        self.arcs
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Asking for invalid arc id={id}"))
    }

    #[inline]
    pub fn node(&self, id: NodeId) -> &FlowGraphNode {
        self.nodes
            .get(&id)
            .unwrap_or_else(|| panic!("Asking for invalid node id={id}"))
    }

    #[inline]
    pub fn node_mut(&mut self, id: NodeId) -> &mut FlowGraphNode {
        self.nodes
            .get_mut(&id)
            .unwrap_or_else(|| panic!("Asking for invalid node id={id}"))
    }

    #[inline]
    pub fn find_node(&self, id: NodeId) -> Option<&FlowGraphNode> {
        self.nodes.get(&id)
    }

    pub fn outgoing_arcs(&self, id: NodeId) -> impl Iterator<Item = &FlowGraphArc> + '_ {
        self.node(id).outgoing.iter().map(move |arc_id| self.arc(*arc_id))
    }

    pub fn incoming_arcs(&self, id: NodeId) -> impl Iterator<Item = &FlowGraphArc> + '_ {
        self.node(id).incoming.iter().map(move |arc_id| self.arc(*arc_id))
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &FlowGraphNode> {
        self.nodes.values()
    }

    pub fn arcs(&self) -> impl Iterator<Item = &FlowGraphArc> {
        self.arcs.values()
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    pub fn num_arcs(&self) -> usize {
        self.arcs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::FlowGraph;
    use crate::flowgraph::node::NodeKind;

    #[test]
    fn arc_adjacency() {
        let mut g = FlowGraph::default();
        let a = g.add_node(NodeKind::Sink);
        let b = g.add_node(NodeKind::Sink);
        let arc = g.add_arc(a, b, 5, 1);
        assert_eq!(g.find_arc(a, b), Some(arc));
        assert_eq!(g.find_arc(b, a), None);
        assert_eq!(g.outgoing_arcs(a).count(), 1);
        assert_eq!(g.incoming_arcs(b).count(), 1);

        g.remove_arc(arc);
        assert_eq!(g.find_arc(a, b), None);
        assert_eq!(g.num_arcs(), 0);
    }

    #[test]
    fn remove_node_detaches_arcs() {
        let mut g = FlowGraph::default();
        let a = g.add_node(NodeKind::Sink);
        let b = g.add_node(NodeKind::Sink);
        let c = g.add_node(NodeKind::Sink);
        g.add_arc(a, b, 0, 1);
        g.add_arc(b, c, 0, 1);

        g.remove_node(b);
        assert_eq!(g.num_arcs(), 0);
        assert!(g.node(a).outgoing.is_empty());
        assert!(g.node(c).incoming.is_empty());
    }

    #[test]
    fn node_ids_are_not_reused() {
        let mut g = FlowGraph::default();
        let a = g.add_node(NodeKind::Sink);
        g.remove_node(a);
        let b = g.add_node(NodeKind::Sink);
        assert_ne!(a, b);
    }
}
