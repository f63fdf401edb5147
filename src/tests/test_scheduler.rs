use crate::knowledge::TaskFinalReport;
use crate::registry::{JobState, TaskState};
use crate::scheduler::DeltaKind;
use crate::tests::utils::env::{test_config, TestEnv};
use crate::tests::utils::solver::{GreedySolver, RecordingSolver};
use crate::{ResourceId, TaskId};

#[test]
fn single_task_single_machine() {
    let env = TestEnv::new();
    env.add_machine(10, 1);
    env.submit_job(1, &[1], 0);

    env.clock.set(1_000_000);
    let (_, deltas, scheduled) = env.round();

    assert_eq!(scheduled, 1);
    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].kind, DeltaKind::Place);
    assert_eq!(deltas[0].task_id, TaskId::new(1));
    assert_eq!(deltas[0].resource_id, ResourceId::new(11));

    let scheduler = env.scheduler.get();
    assert_eq!(scheduler.jobs().get_job(1.into()).state, JobState::Running);
    assert_eq!(scheduler.tasks().get_task(1.into()).state, TaskState::Running);
    assert_eq!(
        scheduler.topology().get(11.into()).descriptor.current_running_task,
        Some(TaskId::new(1))
    );
}

#[test]
fn starvation_resolves_oldest_task_first() {
    let env = TestEnv::new();
    env.add_machine(10, 1);
    // Same job, so both tasks share a task equivalence class.
    env.submit_job_with_times(1, &[(1, 0), (2, 5_000_000)]);

    env.clock.set(10_000_000);
    let (_, deltas, scheduled) = env.round();
    assert_eq!(scheduled, 1);
    assert_eq!(deltas.len(), 1);
    // T1 waited longer, so its unscheduled cost is the higher one.
    assert_eq!(deltas[0].task_id, TaskId::new(1));
    assert_eq!(env.bound_resource(2), None);

    env.clock.set(12_000_000);
    env.scheduler
        .task_completion(
            1.into(),
            TaskFinalReport {
                task_id: 1.into(),
                runtime_us: 2_000_000,
            },
        )
        .unwrap();

    let (_, deltas, scheduled) = env.round();
    assert_eq!(scheduled, 1);
    assert_eq!(deltas[0].task_id, TaskId::new(2));
    assert_eq!(env.bound_resource(2), Some(ResourceId::new(11)));
}

#[test]
fn mapping_to_removed_pu_is_discarded() {
    let env = TestEnv::new();
    env.add_machine(10, 1);
    env.submit_job(1, &[1], 0);
    env.clock.set(1_000_000);
    env.round();
    assert_eq!(env.bound_resource(1), Some(ResourceId::new(11)));

    // A second task whose stale mapping will reference the removed PU.
    env.submit_job(2, &[2], 1_000_000);
    env.clock.set(2_000_000);
    env.round();
    let (t2_node, pu_node) = {
        let scheduler = env.scheduler.get();
        (
            scheduler.graph_manager().task_node(2.into()).unwrap(),
            scheduler.graph_manager().resource_node(11.into()).unwrap(),
        )
    };

    // The machine goes away while the solver is (conceptually) running.
    env.scheduler.deregister_resource(10.into()).unwrap();
    // T1 was rescheduled rather than failed.
    assert_eq!(
        env.scheduler.get().tasks().get_task(1.into()).state,
        TaskState::Runnable
    );
    assert_eq!(env.bound_resource(1), None);

    // The solver hands back a mapping onto the removed PU; it is skipped.
    let mut deltas = Vec::new();
    let scheduled = env
        .scheduler
        .get_mut()
        .process_mapping(&vec![(t2_node, pu_node)], &mut deltas)
        .unwrap();
    assert_eq!(scheduled, 0);
    assert!(deltas.is_empty());
    assert_eq!(env.bound_resource(2), None);
}

#[test]
fn mapping_to_completed_task_is_discarded() {
    let env = TestEnv::new();
    env.add_machine(10, 2);
    env.submit_job(1, &[1], 0);
    env.clock.set(1_000_000);
    env.round();
    let t1_node = env
        .scheduler
        .get()
        .graph_manager()
        .task_node(1.into())
        .unwrap();
    let pu_node = env
        .scheduler
        .get()
        .graph_manager()
        .resource_node(12.into())
        .unwrap();

    // Completion arrives while the solver output is in flight.
    env.scheduler
        .task_completion(
            1.into(),
            TaskFinalReport {
                task_id: 1.into(),
                runtime_us: 1_000_000,
            },
        )
        .unwrap();

    let mut deltas = Vec::new();
    let scheduled = env
        .scheduler
        .get_mut()
        .process_mapping(&vec![(t1_node, pu_node)], &mut deltas)
        .unwrap();
    assert_eq!(scheduled, 0);
    assert!(deltas.is_empty());
}

#[test]
fn gang_job_under_threshold_rolls_back() {
    let env = TestEnv::new();
    env.add_machine(10, 2);
    env.submit_gang_job(1, &[1, 2, 3], 3);

    env.clock.set(1_000_000);
    let (_, deltas, scheduled) = env.round();

    // Two tentative placements were possible, but the gang threshold of 3
    // was not met: everything becomes a NoOp and the counter rolls back.
    assert_eq!(scheduled, 0);
    assert!(deltas.is_empty());
    let scheduler = env.scheduler.get();
    assert_eq!(scheduler.jobs().get_job(1.into()).scheduled_tasks_count, 0);
    assert_eq!(scheduler.jobs().get_job(1.into()).state, JobState::Pending);
    assert!(scheduler.task_bindings().is_empty());
}

#[test]
fn gang_job_at_threshold_places_all() {
    let env = TestEnv::new();
    env.add_machine(10, 3);
    env.submit_gang_job(1, &[1, 2, 3], 3);

    env.clock.set(1_000_000);
    let (_, deltas, scheduled) = env.round();
    assert_eq!(scheduled, 3);
    assert_eq!(deltas.len(), 3);
    assert!(deltas.iter().all(|d| d.kind == DeltaKind::Place));
    assert_eq!(env.scheduler.get().jobs().get_job(1.into()).state, JobState::Running);
}

#[test]
fn time_dependent_costs_refresh_on_schedule() {
    let (solver, batches) = RecordingSolver::new(GreedySolver);
    let env = TestEnv::with(test_config(), Box::new(solver));
    // No machines: the task stays unscheduled across rounds.
    env.submit_job(1, &[1], 0);

    env.clock.set(3_000_000);
    env.round();
    env.clock.set(8_000_000);
    env.round();
    env.clock.set(14_000_000);
    env.round();

    let batches = batches.borrow();
    assert_eq!(batches.len(), 3);
    let has_refresh = |round: usize| {
        batches[round]
            .iter()
            .any(|change| change.comment() == "UpdateTimeDependentCosts")
    };
    // Below the update frequency of 10s nothing is re-priced.
    assert!(!has_refresh(0));
    assert!(!has_refresh(1));
    assert!(has_refresh(2));
}

#[test]
fn preempted_binding_is_released_first() {
    let env = TestEnv::new();
    env.add_machine(10, 2);
    env.submit_job(1, &[1], 0);
    env.submit_job(2, &[2], 0);
    env.clock.set(1_000_000);
    env.round();
    assert_eq!(env.bound_resource(1), Some(ResourceId::new(11)));
    assert_eq!(env.bound_resource(2), Some(ResourceId::new(12)));

    // The next mapping keeps T1 but no longer routes T2 anywhere: the
    // solver decided to preempt it.
    let t1_node = env
        .scheduler
        .get()
        .graph_manager()
        .task_node(1.into())
        .unwrap();
    let pu1_node = env
        .scheduler
        .get()
        .graph_manager()
        .resource_node(11.into())
        .unwrap();
    let mut deltas = Vec::new();
    env.scheduler
        .get_mut()
        .process_mapping(&vec![(t1_node, pu1_node)], &mut deltas)
        .unwrap();

    assert_eq!(deltas.len(), 1);
    assert_eq!(deltas[0].kind, DeltaKind::Preempt);
    assert_eq!(deltas[0].task_id, TaskId::new(2));
    assert_eq!(deltas[0].resource_id, ResourceId::new(12));
    assert_eq!(env.bound_resource(2), None);
    assert_eq!(
        env.scheduler.get().tasks().get_task(2.into()).state,
        TaskState::Runnable
    );
    // T1 kept its slot.
    assert_eq!(env.bound_resource(1), Some(ResourceId::new(11)));
}
