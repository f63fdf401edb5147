use std::fmt::Write;

use crate::flowgraph::{FlowGraph, GraphChange};
use crate::NodeId;

/// Full-graph rendering in the DIMACS min-cost-flow form: every task node
/// supplies one unit, the sink demands all of them.
pub fn graph_to_dimacs(graph: &FlowGraph, sink: NodeId) -> String {
    let mut out = String::new();
    writeln!(out, "p min {} {}", graph.num_nodes(), graph.num_arcs()).unwrap();

    let mut task_nodes: Vec<NodeId> = graph
        .nodes()
        .filter(|n| n.is_task_node())
        .map(|n| n.id)
        .collect();
    task_nodes.sort_unstable();
    for node in &task_nodes {
        writeln!(out, "n {node} 1").unwrap();
    }
    writeln!(out, "n {} -{}", sink, task_nodes.len()).unwrap();

    let mut arcs: Vec<_> = graph.arcs().collect();
    arcs.sort_unstable_by_key(|arc| arc.id);
    for arc in arcs {
        writeln!(out, "a {} {} 0 {} {}", arc.src, arc.dst, arc.capacity, arc.cost).unwrap();
    }
    out
}

/// Incremental rendering of a change batch.
pub fn changes_to_dimacs(changes: &[GraphChange]) -> String {
    changes.iter().map(|change| change.to_dimacs()).collect()
}
