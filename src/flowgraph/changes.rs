use std::fmt::Write;

use crate::{Capacity, Cost, Map, NodeId};

/// Append-only description of a graph mutation, suitable for incremental
/// min-cost-flow solvers. Arc removal is expressed as a capacity-0 change.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum GraphChange {
    AddNode {
        node: NodeId,
        comment: &'static str,
    },
    RemoveNode {
        node: NodeId,
        comment: &'static str,
    },
    NewArc {
        src: NodeId,
        dst: NodeId,
        cost: Cost,
        capacity: Capacity,
        comment: &'static str,
    },
    ChangeArc {
        src: NodeId,
        dst: NodeId,
        cost: Cost,
        capacity: Capacity,
        comment: &'static str,
    },
}

impl GraphChange {
    pub fn comment(&self) -> &'static str {
        match self {
            GraphChange::AddNode { comment, .. }
            | GraphChange::RemoveNode { comment, .. }
            | GraphChange::NewArc { comment, .. }
            | GraphChange::ChangeArc { comment, .. } => comment,
        }
    }

    /// Reference textual rendering; the exact wire form is solver-specific.
    pub fn to_dimacs(&self) -> String {
        let mut out = String::new();
        let comment = self.comment();
        if !comment.is_empty() {
            writeln!(out, "c {comment}").unwrap();
        }
        match self {
            GraphChange::AddNode { node, .. } => writeln!(out, "n {node}").unwrap(),
            GraphChange::RemoveNode { node, .. } => writeln!(out, "r {node}").unwrap(),
            GraphChange::NewArc {
                src,
                dst,
                cost,
                capacity,
                ..
            } => writeln!(out, "a {src} {dst} {capacity} {cost}").unwrap(),
            GraphChange::ChangeArc {
                src,
                dst,
                cost,
                capacity,
                ..
            } => writeln!(out, "x {src} {dst} {capacity} {cost}").unwrap(),
        }
        out
    }
}

/// Per-round counts of emitted change records.
#[derive(Default, Debug, Clone)]
pub struct ChangeStats {
    pub nodes_added: u64,
    pub nodes_removed: u64,
    pub arcs_added: u64,
    pub arcs_changed: u64,
    pub per_comment: Map<&'static str, u64>,
}

impl ChangeStats {
    fn record(&mut self, change: &GraphChange) {
        match change {
            GraphChange::AddNode { .. } => self.nodes_added += 1,
            GraphChange::RemoveNode { .. } => self.nodes_removed += 1,
            GraphChange::NewArc { .. } => self.arcs_added += 1,
            GraphChange::ChangeArc { .. } => self.arcs_changed += 1,
        }
        *self.per_comment.entry(change.comment()).or_insert(0) += 1;
    }

    pub fn reset(&mut self) {
        *self = Default::default();
    }

    pub fn total(&self) -> u64 {
        self.nodes_added + self.nodes_removed + self.arcs_added + self.arcs_changed
    }
}

/// Change records accumulated between solver runs. The log is drained and
/// handed to the solver as a unit; the stats survive until explicitly reset
/// at the round boundary.
#[derive(Default, Debug)]
pub struct ChangeLog {
    changes: Vec<GraphChange>,
    stats: ChangeStats,
}

impl ChangeLog {
    pub fn add(&mut self, change: GraphChange) {
        self.stats.record(&change);
        self.changes.push(change);
    }

    pub fn drain(&mut self) -> Vec<GraphChange> {
        std::mem::take(&mut self.changes)
    }

    pub fn changes(&self) -> &[GraphChange] {
        &self.changes
    }

    pub fn stats(&self) -> &ChangeStats {
        &self.stats
    }

    pub fn reset_stats(&mut self) {
        self.stats.reset();
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}
