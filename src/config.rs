use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{FlowError, Result};

/// Cost model selected by `SchedulerConfig::cost_model`.
///
/// The numeric values are part of the external configuration surface.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CostModelKind {
    Trivial = 0,
    Random = 1,
    Sjf = 2,
    Quincy = 3,
    WhareMap = 4,
    Coco = 5,
    Octopus = 6,
    Void = 7,
    Net = 8,
    Cpu = 9,
    QuincyInterference = 10,
}

impl TryFrom<u32> for CostModelKind {
    type Error = FlowError;

    fn try_from(value: u32) -> Result<Self> {
        Ok(match value {
            0 => CostModelKind::Trivial,
            1 => CostModelKind::Random,
            2 => CostModelKind::Sjf,
            3 => CostModelKind::Quincy,
            4 => CostModelKind::WhareMap,
            5 => CostModelKind::Coco,
            6 => CostModelKind::Octopus,
            7 => CostModelKind::Void,
            8 => CostModelKind::Net,
            9 => CostModelKind::Cpu,
            10 => CostModelKind::QuincyInterference,
            _ => {
                return Err(FlowError::Config(format!(
                    "Unknown flow scheduling cost model ({value})"
                )))
            }
        })
    }
}

/// How the duration of a scheduling round is reported to the event notifier.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum RuntimeAccounting {
    /// Algorithm-only runtime of the solver.
    Algorithm,
    /// Total runtime of the solver call.
    Solver,
    /// Total runtime of the scheduling round.
    Firmament,
}

impl FromStr for RuntimeAccounting {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "algorithm" => Ok(RuntimeAccounting::Algorithm),
            "solver" => Ok(RuntimeAccounting::Solver),
            "firmament" => Ok(RuntimeAccounting::Firmament),
            _ => Err(FlowError::Config(format!(
                "Unexpected accounting mode: {s}"
            ))),
        }
    }
}

/// Immutable scheduler configuration, read once at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub cost_model: CostModelKind,
    /// Per-round ceiling on the solver runtime, in microseconds.
    pub max_solver_runtime_us: u64,
    /// Minimal interval between re-scorings of time-dependent arc costs.
    pub time_dependent_cost_update_frequency_us: u64,
    /// Whether cost models should track unscheduled-task telemetry.
    pub gather_unscheduled_tasks: bool,
    /// Dump per-round cost model CSVs into `debug_output_dir`.
    pub debug_cost_model: bool,
    pub debug_output_dir: PathBuf,
    /// EC garbage collection cadence, in solver runs.
    pub purge_unconnected_ec_frequency: u64,
    /// Refresh topology arc capacities after every round.
    pub update_resource_topology_capacities: bool,
    /// Capacity of each PU -> sink arc.
    pub max_tasks_per_pu: u64,
    pub runtime_accounting: RuntimeAccounting,
    pub reschedule_tasks_upon_node_failure: bool,
    /// Synthesize machine stat samples from Place/Preempt decisions. Set to
    /// false when an external machine stats provider feeds the knowledge
    /// base.
    pub resource_stats_update_based_on_resource_reservation: bool,
    pub pod_affinity_antiaffinity_symmetry: bool,
    /// Fanout of preference arcs from a task aggregator to machines.
    pub num_pref_arcs_agg_to_res: usize,
    /// Identifier of the external solver binary. "cs2" does not report an
    /// algorithm-only runtime and falls back to solver accounting.
    pub solver: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig {
            cost_model: CostModelKind::Trivial,
            max_solver_runtime_us: 100_000_000,
            time_dependent_cost_update_frequency_us: 10_000_000,
            gather_unscheduled_tasks: true,
            debug_cost_model: false,
            debug_output_dir: PathBuf::from("."),
            purge_unconnected_ec_frequency: 10,
            update_resource_topology_capacities: false,
            max_tasks_per_pu: 1,
            runtime_accounting: RuntimeAccounting::Algorithm,
            reschedule_tasks_upon_node_failure: true,
            resource_stats_update_based_on_resource_reservation: true,
            pod_affinity_antiaffinity_symmetry: false,
            num_pref_arcs_agg_to_res: 2,
            solver: "flowlessly".to_string(),
        }
    }
}

impl SchedulerConfig {
    /// The effective accounting mode for solver runtime reports.
    pub fn effective_accounting(&self) -> RuntimeAccounting {
        if self.runtime_accounting == RuntimeAccounting::Algorithm && self.solver == "cs2" {
            // CS2 does not export an algorithm runtime.
            RuntimeAccounting::Solver
        } else {
            self.runtime_accounting
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{CostModelKind, RuntimeAccounting, SchedulerConfig};

    #[test]
    fn cost_model_from_id() {
        assert_eq!(CostModelKind::try_from(0).unwrap(), CostModelKind::Trivial);
        assert_eq!(CostModelKind::try_from(4).unwrap(), CostModelKind::WhareMap);
        assert_eq!(
            CostModelKind::try_from(10).unwrap(),
            CostModelKind::QuincyInterference
        );
        assert!(CostModelKind::try_from(11).is_err());
    }

    #[test]
    fn accounting_mode_from_str() {
        assert_eq!(
            "algorithm".parse::<RuntimeAccounting>().unwrap(),
            RuntimeAccounting::Algorithm
        );
        assert!("wallclock".parse::<RuntimeAccounting>().is_err());
    }

    #[test]
    fn cs2_falls_back_to_solver_accounting() {
        let config = SchedulerConfig {
            solver: "cs2".to_string(),
            ..Default::default()
        };
        assert_eq!(config.effective_accounting(), RuntimeAccounting::Solver);

        let config = SchedulerConfig {
            solver: "cs2".to_string(),
            runtime_accounting: RuntimeAccounting::Firmament,
            ..Default::default()
        };
        assert_eq!(config.effective_accounting(), RuntimeAccounting::Firmament);
    }
}
