// tests/scheduler_steps.rs

//! Drives the pure scheduler by hand, one event at a time.

use std::sync::Arc;
use std::time::Duration;

use pipedag::dag::{Edge, GraphBuilder, Scheduler, Task, TaskRunState};
use pipedag::engine::AttemptOutcome;
use pipedag::record::{AttemptStatus, RunStatus};
use pipedag::types::{SkipPolicy, TriggerRule};
use pipedag_test_utils::fake_tasks::CallCounter;

fn task(id: &str) -> Task {
    CallCounter::default().task(id)
}

fn ok() -> AttemptOutcome {
    AttemptOutcome::Success(None)
}

fn failed() -> AttemptOutcome {
    AttemptOutcome::Failed("boom".to_string())
}

fn ids(step: &pipedag::dag::SchedulerStep) -> Vec<String> {
    let mut ids: Vec<String> = step
        .newly_scheduled
        .iter()
        .map(|t| t.task_id.clone())
        .collect();
    ids.sort();
    ids
}

/// A -> [B, C] -> D
fn diamond(b: Task, c: Task, d: Task, limit: usize) -> Scheduler {
    let graph = GraphBuilder::new()
        .task(task("A"))
        .task(b)
        .task(c)
        .task(d)
        .fan_out("A", ["B", "C"])
        .fan_in(["B", "C"], "D")
        .build()
        .expect("valid graph");
    Scheduler::new(Arc::new(graph), "p", "run-1", limit)
}

#[test]
fn roots_are_dispatched_on_start() {
    let mut s = diamond(task("B"), task("C"), task("D"), 5);
    let step = s.start();
    assert_eq!(ids(&step), vec!["A"]);
    assert_eq!(s.run_state_of("A"), Some(TaskRunState::Running));
    assert_eq!(s.run_state_of("B"), Some(TaskRunState::Waiting));
    assert_eq!(s.record().status, RunStatus::Running);
    assert_eq!(step.newly_scheduled[0].attempt, 1);
}

#[test]
fn fan_in_waits_for_both_branches_in_either_order() {
    for order in [["B", "C"], ["C", "B"]] {
        let mut s = diamond(task("B"), task("C"), task("D"), 5);
        s.start();
        let step = s.step_completion("A", 1, ok());
        assert_eq!(ids(&step), vec!["B", "C"]);

        let step = s.step_completion(order[0], 1, ok());
        assert!(step.newly_scheduled.is_empty(), "D must wait for {}", order[1]);
        assert_eq!(s.run_state_of("D"), Some(TaskRunState::Waiting));

        let step = s.step_completion(order[1], 1, ok());
        assert_eq!(ids(&step), vec!["D"]);

        let step = s.step_completion("D", 1, ok());
        assert!(step.run_just_finished);
        assert_eq!(s.record().status, RunStatus::Succeeded);
    }
}

#[test]
fn failed_branch_skips_join_and_fails_run() {
    let mut s = diamond(task("B"), task("C"), task("D"), 5);
    s.start();
    s.step_completion("A", 1, ok());
    let step = s.step_completion("B", 1, failed());
    assert_eq!(step.newly_failed, vec!["B".to_string()]);
    assert_eq!(step.newly_skipped, vec!["D".to_string()]);
    assert!(!s.is_finished(), "C is still running");

    let step = s.step_completion("C", 1, ok());
    assert!(step.run_just_finished);

    let record = s.record();
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.task_status("B"), Some(AttemptStatus::Failed));
    assert_eq!(record.task_status("C"), Some(AttemptStatus::Succeeded));
    assert_eq!(record.task_status("D"), Some(AttemptStatus::Skipped));
    assert!(record.attempts_of("D")[0].started_at.is_none());
}

#[test]
fn all_done_join_runs_after_failure() {
    let mut s = diamond(
        task("B"),
        task("C"),
        task("D").with_trigger_rule(TriggerRule::AllDone),
        5,
    );
    s.start();
    s.step_completion("A", 1, ok());
    s.step_completion("B", 1, failed());
    let step = s.step_completion("C", 1, ok());
    assert_eq!(ids(&step), vec!["D"]);
    s.step_completion("D", 1, ok());

    assert!(s.is_finished());
    assert_eq!(s.record().status, RunStatus::Failed, "B still failed");
}

#[test]
fn skip_propagates_unless_edge_is_satisfied() {
    // A fails; B is skipped; C depends on B (propagate), E on B (satisfied).
    let graph = GraphBuilder::new()
        .task(task("A"))
        .task(task("B"))
        .task(task("C"))
        .task(task("E"))
        .edge("A", "B")
        .edge("B", "C")
        .edge_with(Edge::new("B", "E").on_skip(SkipPolicy::Satisfied))
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 5);
    s.start();

    let step = s.step_completion("A", 1, failed());
    assert_eq!(step.newly_skipped, vec!["B".to_string(), "C".to_string()]);
    assert_eq!(ids(&step), vec!["E"]);

    s.step_completion("E", 1, ok());
    assert!(s.is_finished());
    assert_eq!(s.record().status, RunStatus::Failed);
}

#[test]
fn retry_with_delay_releases_the_slot() {
    let graph = GraphBuilder::new()
        .task(task("A").with_retries(2, Duration::from_secs(30)))
        .task(task("B"))
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 1);

    let step = s.start();
    assert_eq!(ids(&step), vec!["A"]);

    let step = s.step_completion("A", 1, failed());
    assert_eq!(step.retries.len(), 1);
    assert_eq!(step.retries[0].task, "A");
    assert_eq!(step.retries[0].delay, Duration::from_secs(30));
    assert_eq!(s.run_state_of("A"), Some(TaskRunState::AwaitingRetry));
    assert_eq!(ids(&step), vec!["B"], "B takes the free slot during the delay");

    s.step_completion("B", 1, ok());
    let step = s.step_retry_due("A");
    assert_eq!(ids(&step), vec!["A"]);
    assert_eq!(step.newly_scheduled[0].attempt, 2);

    s.step_completion("A", 2, ok());
    assert!(s.is_finished());
    assert_eq!(s.record().status, RunStatus::Succeeded);
    assert_eq!(s.record().attempts_of("A").len(), 2);
    assert_eq!(s.record().attempts_of("A")[0].status, AttemptStatus::Failed);
}

#[test]
fn zero_delay_retry_is_dispatched_immediately_and_bounded() {
    let graph = GraphBuilder::new()
        .task(task("A").with_retries(2, Duration::ZERO))
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 5);
    s.start();

    for attempt in 1..=2 {
        let step = s.step_completion("A", attempt, failed());
        assert!(step.retries.is_empty());
        assert_eq!(step.newly_scheduled[0].attempt, attempt + 1);
    }
    let step = s.step_completion("A", 3, failed());
    assert_eq!(step.newly_failed, vec!["A".to_string()]);
    assert!(step.run_just_finished);
    assert_eq!(s.record().attempts_of("A").len(), 3);
}

#[test]
fn stale_completion_is_ignored() {
    let graph = GraphBuilder::new()
        .task(task("A").with_retries(1, Duration::ZERO))
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 5);
    s.start();
    s.step_completion("A", 1, failed());

    // A late duplicate report for attempt 1 changes nothing.
    let step = s.step_completion("A", 1, ok());
    assert!(step.newly_scheduled.is_empty());
    assert_eq!(s.run_state_of("A"), Some(TaskRunState::Running));
    assert_eq!(s.record().attempts_of("A")[0].status, AttemptStatus::Failed);
}

#[test]
fn concurrency_limit_caps_dispatch() {
    let graph = GraphBuilder::new()
        .task(task("root"))
        .fan_out("root", ["a", "b", "c", "d"])
        .task(task("a"))
        .task(task("b"))
        .task(task("c"))
        .task(task("d"))
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 2);
    s.start();

    let step = s.step_completion("root", 1, ok());
    assert_eq!(step.newly_scheduled.len(), 2);
    assert_eq!(s.running_count(), 2);

    let first = step.newly_scheduled[0].task_id.clone();
    let step = s.step_completion(&first, 1, ok());
    assert_eq!(step.newly_scheduled.len(), 1);
    assert_eq!(s.running_count(), 2);
}

#[test]
fn cancel_skips_outstanding_and_lets_running_finish() {
    let graph = GraphBuilder::new()
        .task(task("A").with_retries(3, Duration::ZERO))
        .task(task("B").with_retries(1, Duration::from_secs(60)))
        .task(task("C"))
        .edge("A", "C")
        .build()
        .expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 5);
    s.start();
    s.step_completion("B", 1, failed());
    assert_eq!(s.run_state_of("B"), Some(TaskRunState::AwaitingRetry));

    let step = s.step_cancel();
    assert_eq!(step.newly_skipped, vec!["C".to_string()]);
    assert_eq!(step.newly_failed, vec!["B".to_string()]);
    assert!(!s.is_finished(), "A is still running");

    // The running attempt fails but is not retried after a cancel.
    let step = s.step_completion("A", 1, failed());
    assert!(step.newly_scheduled.is_empty());
    assert!(step.run_just_finished);

    // A retry timer firing late does nothing.
    assert!(s.step_retry_due("B").newly_scheduled.is_empty());

    let record = s.record();
    assert!(record.cancelled);
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.task_status("C"), Some(AttemptStatus::Skipped));
    assert_eq!(
        record.latest_attempt("C").and_then(|a| a.error.as_deref()),
        Some("cancelled")
    );
    assert_eq!(record.attempts_of("B").len(), 1);
    assert_eq!(record.attempts_of("A").len(), 1);
}

#[test]
fn cancel_after_finish_is_a_no_op() {
    let graph = GraphBuilder::new().task(task("A")).build().expect("valid graph");
    let mut s = Scheduler::new(Arc::new(graph), "p", "run-1", 5);
    s.start();
    s.step_completion("A", 1, ok());
    assert!(s.is_finished());

    let step = s.step_cancel();
    assert!(!step.run_just_finished);
    assert!(!s.record().cancelled);
    assert_eq!(s.record().status, RunStatus::Succeeded);
}
