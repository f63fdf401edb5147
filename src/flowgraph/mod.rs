pub mod changes;
pub mod graph;
pub mod manager;
pub mod node;

pub use changes::{ChangeLog, ChangeStats, GraphChange};
pub use graph::{FlowGraph, FlowGraphArc};
pub use manager::FlowGraphManager;
pub use node::{FlowGraphNode, NodeKind};
