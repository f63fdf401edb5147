pub mod delta;
pub mod flow;

pub use delta::{DeltaKind, SchedulingDelta};
pub use flow::{FlowScheduler, FlowSchedulerRef};

use serde::{Deserialize, Serialize};

use crate::config::RuntimeAccounting;

/// Timings of one scheduling round, in microseconds.
#[derive(Copy, Clone, Debug, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Total runtime of the solver call.
    pub solver_runtime_us: u64,
    /// Algorithm-only runtime reported by the solver, when available.
    pub algorithm_runtime_us: u64,
    /// Total runtime of the round.
    pub total_runtime_us: u64,
}

impl SchedulerStats {
    pub fn accounted_runtime(&self, mode: RuntimeAccounting) -> u64 {
        match mode {
            RuntimeAccounting::Algorithm => self.algorithm_runtime_us,
            RuntimeAccounting::Solver => self.solver_runtime_us,
            RuntimeAccounting::Firmament => self.total_runtime_us,
        }
    }
}

/// Downstream observer of completed scheduling rounds.
pub trait SchedulingEventNotifier {
    fn on_scheduling_decisions_completion(&mut self, round_start_us: u64, runtime_us: u64);
}
