use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use crate::flowgraph::{FlowGraph, GraphChange, NodeKind};
use crate::solver::{FlowSolver, SolverOutput, TaskMapping};
use crate::{ArcId, Cost, Map, NodeId, Result};

/// Deterministic stand-in for the external min-cost-flow solver.
///
/// Tasks are considered in decreasing order of their unscheduled-arc cost
/// (already running tasks first, since they cannot be preempted when the
/// model declares no preemption arcs) and each is routed along its cheapest
/// capacity-respecting path to the sink, or left unscheduled when staying
/// unscheduled is cheaper.
#[derive(Default)]
pub struct GreedySolver;

struct PathSearch<'a> {
    graph: &'a FlowGraph,
    remaining: &'a Map<ArcId, u64>,
}

impl<'a> PathSearch<'a> {
    /// Cheapest path from `start` to the sink that does not run through a
    /// job aggregator. Returns (cost, PU node, arcs of the path).
    fn cheapest_pu_path(&self, start: NodeId, sink: NodeId) -> Option<(Cost, NodeId, Vec<ArcId>)> {
        let mut dist: Map<NodeId, (Cost, Option<ArcId>)> = Map::default();
        dist.insert(start, (0, None));
        let mut heap: Vec<(Cost, NodeId)> = vec![(0, start)];
        while let Some(pos) = heap
            .iter()
            .enumerate()
            .min_by_key(|(_, &(cost, node))| (cost, node))
            .map(|(i, _)| i)
        {
            let (cost, node) = heap.swap_remove(pos);
            if cost > dist[&node].0 {
                continue;
            }
            if node == sink {
                break;
            }
            for arc in self.graph.outgoing_arcs(node) {
                if self.remaining.get(&arc.id).copied().unwrap_or(0) == 0 {
                    continue;
                }
                if matches!(self.graph.node(arc.dst).kind, NodeKind::JobAggregator(_)) {
                    continue;
                }
                let next_cost = cost + arc.cost;
                let better = dist
                    .get(&arc.dst)
                    .map_or(true, |&(existing, _)| next_cost < existing);
                if better {
                    dist.insert(arc.dst, (next_cost, Some(arc.id)));
                    heap.push((next_cost, arc.dst));
                }
            }
        }

        let &(cost, _) = dist.get(&sink)?;
        // Walk the path backwards to find the PU and the used arcs.
        let mut arcs = Vec::new();
        let mut pu = None;
        let mut cursor = sink;
        while let Some(&(_, Some(arc_id))) = dist.get(&cursor) {
            let arc = self.graph.arc(arc_id);
            arcs.push(arc_id);
            if self.graph.node(arc.src).is_pu() {
                pu = Some(arc.src);
            }
            cursor = arc.src;
        }
        pu.map(|pu| (cost, pu, arcs))
    }
}

impl FlowSolver for GreedySolver {
    fn solve(&mut self, graph: &FlowGraph, _changes: &[GraphChange]) -> Result<SolverOutput> {
        let sink = graph
            .nodes()
            .find(|n| n.kind == NodeKind::Sink)
            .expect("Graph has no sink")
            .id;
        let mut remaining: Map<ArcId, u64> =
            graph.arcs().map(|arc| (arc.id, arc.capacity)).collect();

        let mut tasks: Vec<(bool, Cost, NodeId)> = graph
            .nodes()
            .filter(|n| n.is_task_node())
            .map(|n| {
                let unscheduled_cost = graph
                    .outgoing_arcs(n.id)
                    .find(|arc| matches!(graph.node(arc.dst).kind, NodeKind::JobAggregator(_)))
                    .map(|arc| arc.cost)
                    .unwrap_or(0);
                let pinned = matches!(n.kind, NodeKind::ScheduledTask(_));
                (pinned, unscheduled_cost, n.id)
            })
            .collect();
        tasks.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });

        let mut task_mappings: TaskMapping = Vec::new();
        for (_, unscheduled_cost, task_node) in tasks {
            let search = PathSearch {
                graph,
                remaining: &remaining,
            };
            if let Some((cost, pu, arcs)) = search.cheapest_pu_path(task_node, sink) {
                if cost <= unscheduled_cost {
                    for arc_id in arcs {
                        if let Some(cap) = remaining.get_mut(&arc_id) {
                            *cap -= 1;
                        }
                    }
                    task_mappings.push((task_node, pu));
                }
            }
        }
        Ok(SolverOutput {
            task_mappings,
            algorithm_runtime_us: None,
        })
    }
}

/// Burns wall-clock time to trip the solver runtime ceiling.
pub struct SleepySolver {
    pub sleep: Duration,
}

impl FlowSolver for SleepySolver {
    fn solve(&mut self, _graph: &FlowGraph, _changes: &[GraphChange]) -> Result<SolverOutput> {
        std::thread::sleep(self.sleep);
        Ok(SolverOutput {
            task_mappings: Vec::new(),
            algorithm_runtime_us: None,
        })
    }
}

/// Wraps another solver and records the change batches it receives.
pub struct RecordingSolver<S> {
    inner: S,
    pub batches: Rc<RefCell<Vec<Vec<GraphChange>>>>,
}

impl<S> RecordingSolver<S> {
    pub fn new(inner: S) -> (Self, Rc<RefCell<Vec<Vec<GraphChange>>>>) {
        let batches = Rc::new(RefCell::new(Vec::new()));
        (
            RecordingSolver {
                inner,
                batches: batches.clone(),
            },
            batches,
        )
    }
}

impl<S: FlowSolver> FlowSolver for RecordingSolver<S> {
    fn solve(&mut self, graph: &FlowGraph, changes: &[GraphChange]) -> Result<SolverOutput> {
        self.batches.borrow_mut().push(changes.to_vec());
        self.inner.solve(graph, changes)
    }
}
