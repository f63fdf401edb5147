#[macro_use]
pub mod common;
pub mod config;
pub mod flowgraph;
pub mod knowledge;
pub mod model;
pub mod registry;
pub mod scheduler;
pub mod solver;
pub mod topology;

#[cfg(test)]
pub(crate) mod tests;

pub use common::error::FlowError;
pub use common::ids::{ArcId, EquivClassId, JobId, NodeId, ResourceId, TaskId};
pub use common::{Map, Set};

/// Arc cost. Signed so that cost models may express discounts.
pub type Cost = i64;
/// Arc capacity.
pub type Capacity = u64;

pub type Result<T> = std::result::Result<T, FlowError>;
