use std::sync::Arc;

use osmo_engine::{
    api::{engine_dto::EngineConfigDto, workflow_dto::workflow_dto::WorkflowSpecDto},
    domain::engine::backend::RecordingBackend,
    domain::engine::engine::WorkflowEngine,
    domain::engine::event::RecordingListener,
    domain::lifecycle::status::{TaskStatus, WorkflowStatus},
    domain::simulator::simulator_mock::MockSimulator,
    domain::utils::id::{NodeName, TaskKey, TaskName, WorkflowId},
    loader::parser::{parse_json_file, parse_yaml_str},
};

fn engine() -> (WorkflowEngine, MockSimulator, RecordingBackend) {
    let config: EngineConfigDto = parse_json_file("src/data/test/engine_config.json").unwrap();
    let clock = MockSimulator::new(0);
    let backend = RecordingBackend::new();
    let engine = WorkflowEngine::from_dto(&config, Arc::new(clock.clone())).unwrap().with_backend(Arc::new(backend.clone()));
    (engine, clock, backend)
}

fn submit(engine: &mut WorkflowEngine, yaml: &str) -> WorkflowId {
    engine.submit(&parse_yaml_str::<WorkflowSpecDto>(yaml).unwrap()).unwrap()
}

fn status(engine: &WorkflowEngine, id: &WorkflowId, task: &str) -> TaskStatus {
    engine.task(id, task).unwrap().status
}

fn run_all(engine: &mut WorkflowEngine, id: &WorkflowId, tasks: &[&str]) {
    engine.schedule().unwrap();
    for task in tasks {
        engine.task_started(id, task).unwrap();
    }
}

const FILLER: &str = r#"
name: filler
resources:
  default:
    gpu: 8
    platform: dgx
tasks:
  - name: hog
"#;

const TRIO: &str = r#"
name: trio
resources:
  default:
    gpu: 4
    platform: dgx
groups:
  - name: trio
    tasks:
      - name: a
        lead: true
      - name: b
      - name: c
"#;

#[test]
fn test_barrier_group_is_reserved_all_or_nothing() {
    let (mut engine, _, _) = engine();
    let filler = submit(&mut engine, FILLER);
    run_all(&mut engine, &filler, &["hog"]);

    let trio = submit(&mut engine, TRIO);
    let report = engine.schedule().unwrap();
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].tasks.len(), 3);
    for task in ["a", "b", "c"] {
        assert_eq!(status(&engine, &trio, task), TaskStatus::Pending);
    }
    assert_eq!(engine.ledger().free_capacity().gpu, 8);
    assert_eq!(engine.reservations().len(), 1);

    engine.task_exited(&filler, "hog", &[0]).unwrap();
    let report = engine.schedule().unwrap();
    assert_eq!(report.admitted.len(), 1);
    let nodes: Vec<NodeName> = report.admitted[0].placements.iter().map(|p| p.node.clone()).collect();
    assert_eq!(nodes, vec![NodeName::new("dgx-0"), NodeName::new("dgx-0"), NodeName::new("dgx-1")]);
    assert_eq!(engine.reservations().len(), 1);

    // Nobody runs until every member's container is up.
    engine.task_started(&trio, "a").unwrap();
    engine.task_started(&trio, "b").unwrap();
    for task in ["a", "b", "c"] {
        assert_eq!(status(&engine, &trio, task), TaskStatus::Ready);
    }
    assert_eq!(engine.status(&trio).unwrap(), WorkflowStatus::Running);
    engine.task_started(&trio, "c").unwrap();
    for task in ["a", "b", "c"] {
        assert_eq!(status(&engine, &trio, task), TaskStatus::Running);
    }
}

#[test]
fn test_start_timeout_resets_the_whole_reservation() {
    let (mut engine, clock, _) = engine();
    let trio = submit(&mut engine, TRIO);
    engine.schedule().unwrap();
    engine.task_started(&trio, "a").unwrap();

    clock.advance(engine.settings().start_timeout);
    engine.check_timeouts().unwrap();
    for task in ["a", "b", "c"] {
        let lifecycle = engine.task(&trio, task).unwrap();
        assert_eq!((lifecycle.status, lifecycle.container_started), (TaskStatus::Pending, false));
    }
    assert_eq!(engine.ledger().free_capacity().gpu, 16);
    assert!(engine.reservations().is_empty());
}

#[test]
fn test_highest_exit_code_wins() {
    let (mut engine, _, _) = engine();
    let id = submit(&mut engine, "name: codes\ntasks:\n  - name: a\n");
    run_all(&mut engine, &id, &["a"]);
    engine.task_exited(&id, "a", &[0, 2, 1]).unwrap();

    let task = engine.task(&id, "a").unwrap();
    assert_eq!((task.status, task.exit_code), (TaskStatus::Failed, Some(2)));
}

#[test]
fn test_infra_codes_bypass_exit_actions() {
    let (mut engine, _, _) = engine();
    let id = submit(&mut engine, "name: infra\ntasks:\n  - name: a\n    exitActions:\n      COMPLETE: \"0-4000\"\n");

    run_all(&mut engine, &id, &["a"]);
    engine.task_exited(&id, "a", &[1, 3004]).unwrap();
    let task = engine.task(&id, "a").unwrap();
    assert_eq!((task.status, task.retry_count, task.exit_code), (TaskStatus::Pending, 1, Some(3004)));

    // Preemption reported by the pod is not charged against the budget.
    run_all(&mut engine, &id, &["a"]);
    engine.task_exited(&id, "a", &[0, 3006]).unwrap();
    let task = engine.task(&id, "a").unwrap();
    assert_eq!((task.status, task.retry_count), (TaskStatus::Pending, 1));

    run_all(&mut engine, &id, &["a"]);
    engine.task_exited(&id, "a", &[3999]).unwrap();
    assert_eq!(engine.task(&id, "a").unwrap().retry_count, 2);

    run_all(&mut engine, &id, &["a"]);
    engine.task_exited(&id, "a", &[255]).unwrap();
    assert_eq!(status(&engine, &id, "a"), TaskStatus::Completed);
}

#[test]
fn test_eviction_requeues_and_stale_reports_are_ignored() {
    let (mut engine, _, backend) = engine();
    let id = submit(&mut engine, "name: evict\ntasks:\n  - name: a\n");
    run_all(&mut engine, &id, &["a"]);

    engine.task_evicted(&id, "a").unwrap();
    let task = engine.task(&id, "a").unwrap();
    assert_eq!((task.status, task.retry_count, task.exit_code), (TaskStatus::Pending, 1, Some(3004)));
    assert_eq!(engine.ledger().free_capacity(), engine.ledger().read(|s| s.cluster_capacity()));

    // Late reports of the evicted pod change nothing.
    engine.task_exited(&id, "a", &[1]).unwrap();
    engine.task_evicted(&id, "a").unwrap();
    engine.task_started(&id, "a").unwrap();
    assert_eq!(status(&engine, &id, "a"), TaskStatus::Pending);
    assert_eq!(engine.task(&id, "a").unwrap().retry_count, 1);
    assert!(backend.terminated().is_empty());
}

#[test]
fn test_group_status_does_not_depend_on_report_order() {
    let orders: [[&str; 3]; 6] =
        [["a", "b", "c"], ["a", "c", "b"], ["b", "a", "c"], ["b", "c", "a"], ["c", "a", "b"], ["c", "b", "a"]];
    let yaml = r#"
name: strict
groups:
  - name: strict
    ignoreNonleadStatus: false
    tasks:
      - name: a
        lead: true
      - name: b
      - name: c
"#;

    for order in orders {
        let (mut engine, _, _) = engine();
        let id = submit(&mut engine, yaml);
        run_all(&mut engine, &id, &["a", "b", "c"]);
        for task in order {
            let code = if task == "c" { 1 } else { 0 };
            engine.task_exited(&id, task, &[code]).unwrap();
        }
        assert_eq!(engine.group_status(&id, "strict").unwrap(), TaskStatus::Failed, "order {:?}", order);
        assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::Failed, "order {:?}", order);
        assert_eq!(status(&engine, &id, "c"), TaskStatus::Failed);
        assert_eq!(engine.ledger().free_capacity(), engine.ledger().read(|s| s.cluster_capacity()));
    }
}

#[test]
fn test_lead_failure_cancels_remaining_members() {
    let (mut engine, _, backend) = engine();
    let id = submit(
        &mut engine,
        r#"
name: lead
groups:
  - name: pair
    tasks:
      - name: lead
        lead: true
      - name: side
  - name: later
    tasks:
      - name: x
        lead: true
        inputs:
          - task: lead
      - name: y
"#,
    );
    run_all(&mut engine, &id, &["lead", "side"]);
    engine.task_exited(&id, "lead", &[7]).unwrap();

    assert_eq!(status(&engine, &id, "lead"), TaskStatus::Failed);
    assert_eq!(status(&engine, &id, "side"), TaskStatus::FailedCanceled);
    assert_eq!(status(&engine, &id, "x"), TaskStatus::FailedUpstream);
    assert_eq!(status(&engine, &id, "y"), TaskStatus::FailedUpstream);
    assert!(backend.terminated().contains(&TaskKey::new(id.clone(), TaskName::new("side"))));
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::Failed);
}

const CHAIN: &str = r#"
name: chain
tasks:
  - name: first
  - name: second
    inputs:
      - task: first
"#;

#[test]
fn test_cancel_waits_for_exit_acknowledgement() {
    let (mut engine, _, backend) = engine();
    let id = submit(&mut engine, CHAIN);
    run_all(&mut engine, &id, &["first"]);

    engine.cancel(&id).unwrap();
    assert!(engine.workflow(&id).unwrap().is_canceling());
    assert_eq!(status(&engine, &id, "second"), TaskStatus::FailedCanceled);
    assert_eq!(status(&engine, &id, "first"), TaskStatus::Running);
    assert_eq!(backend.terminated(), vec![TaskKey::new(id.clone(), TaskName::new("first"))]);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::Running);
    assert!(engine.schedule().unwrap().admitted.is_empty());

    engine.task_exited(&id, "first", &[137]).unwrap();
    let task = engine.task(&id, "first").unwrap();
    assert_eq!((task.status, task.exit_code), (TaskStatus::FailedCanceled, Some(137)));
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedCanceled);
    assert_eq!(engine.ledger().free_capacity(), engine.ledger().read(|s| s.cluster_capacity()));

    // A second cancel is a no-op.
    engine.cancel(&id).unwrap();
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedCanceled);
}

#[test]
fn test_cancel_forces_cleanup_after_delay() {
    let (mut engine, clock, _) = engine();
    let id = submit(&mut engine, CHAIN);
    run_all(&mut engine, &id, &["first"]);
    engine.cancel(&id).unwrap();

    clock.advance(engine.settings().force_cleanup_delay - 1);
    engine.check_timeouts().unwrap();
    assert_eq!(status(&engine, &id, "first"), TaskStatus::Running);

    clock.advance(1);
    engine.check_timeouts().unwrap();
    assert_eq!(status(&engine, &id, "first"), TaskStatus::FailedCanceled);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedCanceled);
    assert_eq!(engine.ledger().free_capacity(), engine.ledger().read(|s| s.cluster_capacity()));
}

#[test]
fn test_cancel_releases_reserved_tasks_at_once() {
    let (mut engine, _, backend) = engine();
    let id = submit(&mut engine, CHAIN);
    engine.schedule().unwrap();
    assert_eq!(status(&engine, &id, "first"), TaskStatus::Ready);

    engine.cancel(&id).unwrap();
    assert_eq!(status(&engine, &id, "first"), TaskStatus::FailedCanceled);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedCanceled);
    assert!(engine.reservations().is_empty());
    // The container never came up, so there is no pod to stop.
    assert!(backend.terminated().is_empty());
}

const SIDE_CONSUMER: &str = r#"
name: consumer
groups:
  - name: prep
    tasks:
      - name: lead
        lead: true
      - name: side
  - name: use
    tasks:
      - name: x
        lead: true
        inputs:
          - task: side
      - name: y
"#;

#[test]
fn test_failed_non_lead_fails_its_consumers() {
    let (mut engine, clock, _) = engine();
    let id = submit(&mut engine, SIDE_CONSUMER);
    run_all(&mut engine, &id, &["lead", "side"]);

    engine.task_exited(&id, "side", &[1]).unwrap();
    assert_eq!(status(&engine, &id, "side"), TaskStatus::Failed);
    assert_eq!(status(&engine, &id, "x"), TaskStatus::FailedUpstream);
    assert_eq!(status(&engine, &id, "y"), TaskStatus::FailedUpstream);
    // The group mirrors its lead, which keeps running.
    assert_eq!(status(&engine, &id, "lead"), TaskStatus::Running);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::Running);

    engine.task_exited(&id, "lead", &[0]).unwrap();
    assert_eq!(engine.group_status(&id, "prep").unwrap(), TaskStatus::Completed);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedUpstream);
    assert!(engine.workflow(&id).unwrap().finished_at.is_some());

    clock.advance(5 * 24 * 3600);
    assert!(engine.tick().unwrap().admitted.is_empty());
    assert_eq!(engine.ledger().free_capacity(), engine.ledger().read(|s| s.cluster_capacity()));
}

#[test]
fn test_sibling_canceled_by_its_lead_fails_its_consumers() {
    let (mut engine, _, backend) = engine();
    let id = submit(&mut engine, SIDE_CONSUMER);
    run_all(&mut engine, &id, &["lead", "side"]);

    engine.task_exited(&id, "lead", &[0]).unwrap();
    assert_eq!(status(&engine, &id, "side"), TaskStatus::FailedCanceled);
    assert!(backend.terminated().contains(&TaskKey::new(id.clone(), TaskName::new("side"))));
    assert_eq!(status(&engine, &id, "x"), TaskStatus::FailedUpstream);
    assert_eq!(status(&engine, &id, "y"), TaskStatus::FailedUpstream);
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedUpstream);
}

#[test]
fn test_eviction_while_canceling_ends_the_task() {
    let (mut engine, _, _) = engine();
    let id = submit(&mut engine, CHAIN);
    run_all(&mut engine, &id, &["first"]);
    engine.cancel(&id).unwrap();
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::Running);

    engine.task_evicted(&id, "first").unwrap();
    let task = engine.task(&id, "first").unwrap();
    assert_eq!((task.status, task.exit_code), (TaskStatus::FailedCanceled, Some(3004)));
    assert_eq!(engine.status(&id).unwrap(), WorkflowStatus::FailedCanceled);
    assert!(engine.reservations().is_empty());
}

#[test]
fn test_reported_eviction_code_is_recorded_as_eviction() {
    let (mut engine, _, _) = engine();
    let listener = RecordingListener::new();
    engine.add_listener(Arc::new(listener.clone()));
    let id = submit(&mut engine, "name: evicted\ntasks:\n  - name: a\n");
    run_all(&mut engine, &id, &["a"]);

    engine.task_exited(&id, "a", &[3004]).unwrap();
    let task = engine.task(&id, "a").unwrap();
    assert_eq!((task.status, task.retry_count, task.exit_code), (TaskStatus::Pending, 1, Some(3004)));
    assert_eq!(listener.task_history(&id, "a"), vec![TaskStatus::Ready, TaskStatus::Running, TaskStatus::Evicted, TaskStatus::Pending]);
}
