use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::{EquivClassId, Map, ResourceId, TaskId};

/// How many samples are retained per machine / per equivalence class.
const MAX_SAMPLES: usize = 100;

/// Machine-level resource observation. Either reported by real telemetry
/// or synthesized from placement decisions (resource reservation feedback).
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MachineStatsSample {
    pub cpu_capacity: f64,
    pub cpu_allocatable: f64,
    pub cpu_utilization: f64,
    pub mem_capacity_mb: u64,
    pub mem_allocatable_mb: u64,
    pub mem_utilization: f64,
    pub ephemeral_storage_capacity_mb: u64,
    pub ephemeral_storage_allocatable_mb: u64,
    pub ephemeral_storage_utilization: f64,
}

#[derive(Copy, Clone, Debug, Serialize, Deserialize)]
pub struct TaskFinalReport {
    pub task_id: TaskId,
    pub runtime_us: u64,
}

/// Collector of observed per-equivalence-class and per-machine statistics.
/// Mutated by final-report ingestion and stat samples; consumed by cost
/// models.
#[derive(Default, Debug)]
pub struct KnowledgeBase {
    machine_samples: Map<ResourceId, VecDeque<MachineStatsSample>>,
    ec_runtimes_us: Map<EquivClassId, VecDeque<u64>>,
}

impl KnowledgeBase {
    pub fn add_machine_sample(&mut self, machine: ResourceId, sample: MachineStatsSample) {
        let samples = self.machine_samples.entry(machine).or_default();
        if samples.len() == MAX_SAMPLES {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn latest_machine_sample(&self, machine: ResourceId) -> Option<MachineStatsSample> {
        self.machine_samples
            .get(&machine)
            .and_then(|samples| samples.back().copied())
    }

    pub fn drop_machine(&mut self, machine: ResourceId) {
        self.machine_samples.remove(&machine);
    }

    /// Records the task runtime under every equivalence class the task
    /// belonged to.
    pub fn process_task_final_report(
        &mut self,
        equiv_classes: &[EquivClassId],
        report: &TaskFinalReport,
    ) {
        for &ec in equiv_classes {
            let runtimes = self.ec_runtimes_us.entry(ec).or_default();
            if runtimes.len() == MAX_SAMPLES {
                runtimes.pop_front();
            }
            runtimes.push_back(report.runtime_us);
        }
    }

    /// Average observed runtime for a task equivalence class, in
    /// milliseconds.
    pub fn avg_runtime_ms_for_ec(&self, ec: EquivClassId) -> Option<u64> {
        let runtimes = self.ec_runtimes_us.get(&ec)?;
        if runtimes.is_empty() {
            return None;
        }
        let sum: u64 = runtimes.iter().sum();
        Some(sum / runtimes.len() as u64 / 1000)
    }
}
