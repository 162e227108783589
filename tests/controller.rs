// tests/controller.rs

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use pipedag::dag::GraphBuilder;
use pipedag::engine::RunController;
use pipedag::errors::PipedagError;
use pipedag::fs::FileSystem;
use pipedag::fs::mock::MockFileSystem;
use pipedag::pipeline::Pipeline;
use pipedag::record::{AttemptStatus, RunStatus};
use pipedag::store::RunStore;
use pipedag_test_utils::fake_tasks::{Probe, gated, ok, slow};
use pipedag_test_utils::{init_tracing, with_timeout};

/// gate -> after, with `gate` blocked until the test opens it.
fn gated_pipeline(probe: &Probe, gate: &Arc<Notify>) -> Pipeline {
    let graph = GraphBuilder::new()
        .task(gated(probe, "gate", gate))
        .task(ok(probe, "after"))
        .edge("gate", "after")
        .build()
        .expect("valid graph");
    Pipeline::new("nightly", graph)
}

/// Wait until the probe saw `task` start.
async fn started(probe: &Probe, task: &str) {
    while probe.start_index(task).is_none() {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn second_start_is_rejected_and_first_run_unaffected() {
    init_tracing();
    let probe = Probe::new();
    let gate = Arc::new(Notify::new());
    let mut controller = RunController::new();
    controller.register(gated_pipeline(&probe, &gate));

    let first = controller.spawn("nightly").expect("first run admitted");
    with_timeout(started(&probe, "gate")).await;
    assert!(controller.is_running("nightly"));

    let err = controller.start("nightly").await.unwrap_err();
    assert!(matches!(err, PipedagError::AlreadyRunning(ref id) if id == "nightly"));
    assert_eq!(err.exit_code(), 3);

    gate.notify_one();
    let record = with_timeout(first.wait()).await.expect("first run finished");
    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(probe.attempts_of("gate"), 1);
    assert!(!controller.is_running("nightly"));

    // The guard is released: a new run is admitted.
    let gate_again = Arc::clone(&gate);
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        gate_again.notify_one();
    });
    let again = with_timeout(controller.start("nightly")).await.expect("admitted");
    assert_ne!(again.run_id, record.run_id);
}

#[tokio::test]
async fn unknown_pipeline_is_rejected() {
    let controller = RunController::new();
    let err = controller.start("missing").await.unwrap_err();
    assert!(matches!(err, PipedagError::PipelineNotFound(ref id) if id == "missing"));
}

#[tokio::test]
async fn current_snapshot_tracks_live_run() {
    init_tracing();
    let probe = Probe::new();
    let gate = Arc::new(Notify::new());
    let mut controller = RunController::new();
    controller.register(gated_pipeline(&probe, &gate));

    let handle = controller.spawn("nightly").expect("admitted");
    with_timeout(started(&probe, "gate")).await;

    let live = controller.current("nightly").expect("active run");
    assert_eq!(live.run_id, handle.run_id);
    assert_eq!(live.status, RunStatus::Running);
    assert_eq!(live.task_status("gate"), Some(AttemptStatus::Running));
    assert_eq!(live.task_status("after"), None);
    assert_eq!(
        controller.record(&handle.run_id).expect("live record").run_id,
        handle.run_id
    );

    gate.notify_one();
    let run_id = handle.run_id.clone();
    with_timeout(handle.wait()).await.expect("finished");

    assert!(controller.current("nightly").is_none());
    let finished = controller.record(&run_id).expect("finished record");
    assert_eq!(finished.status, RunStatus::Succeeded);
    assert!(matches!(
        controller.record("no-such-run"),
        Err(PipedagError::RunNotFound(_))
    ));
}

#[tokio::test]
async fn cancel_skips_waiting_tasks_and_fails_run() {
    init_tracing();
    let probe = Probe::new();
    let gate = Arc::new(Notify::new());
    let mut controller = RunController::new();
    controller.register(gated_pipeline(&probe, &gate));

    let handle = controller.spawn("nightly").expect("admitted");
    with_timeout(started(&probe, "gate")).await;

    assert!(controller.cancel("nightly").await);
    // Give the event loop a moment, then let the running attempt finish.
    tokio::time::sleep(Duration::from_millis(10)).await;
    gate.notify_one();

    let record = with_timeout(handle.wait()).await.expect("finished");
    assert!(record.cancelled);
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.task_status("gate"), Some(AttemptStatus::Succeeded));
    assert_eq!(record.task_status("after"), Some(AttemptStatus::Skipped));
    assert_eq!(probe.attempts_of("after"), 0);

    let err = record.ensure_succeeded().unwrap_err();
    assert_eq!(err.exit_code(), 130);
    assert!(!controller.cancel("nightly").await, "nothing left to cancel");
}

#[tokio::test]
async fn store_persists_records_and_holds_lock_while_running() {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    let store = RunStore::new(fs.clone(), "/state");
    let probe = Probe::new();
    let graph = GraphBuilder::new()
        .task(slow(&probe, "only", Duration::from_millis(20)))
        .build()
        .expect("valid graph");

    let mut controller = RunController::new().with_store(store.clone());
    controller.register(Pipeline::new("nightly", graph));

    let handle = controller.spawn("nightly").expect("admitted");
    assert!(fs.exists(Path::new("/state/locks/nightly.lock")));
    assert!(
        store.load(&handle.run_id).is_ok(),
        "initial record is written on admission"
    );

    let run_id = handle.run_id.clone();
    let record = with_timeout(handle.wait()).await.expect("finished");

    assert!(!fs.exists(Path::new("/state/locks/nightly.lock")));
    let persisted = store.load(&run_id).expect("persisted");
    assert_eq!(persisted, record);
    assert_eq!(store.list().expect("list"), vec![run_id]);
}

#[tokio::test]
async fn foreign_lock_file_blocks_admission() {
    init_tracing();
    let fs = Arc::new(MockFileSystem::new());
    fs.add_file("/state/locks/nightly.lock", "other-process-run");
    let store = RunStore::new(fs.clone(), "/state");
    let probe = Probe::new();
    let graph = GraphBuilder::new()
        .task(ok(&probe, "only"))
        .build()
        .expect("valid graph");

    let mut controller = RunController::new().with_store(store);
    controller.register(Pipeline::new("nightly", graph));

    let err = controller.start("nightly").await.unwrap_err();
    match &err {
        PipedagError::RunLocked { pipeline, holder, path } => {
            assert_eq!(pipeline, "nightly");
            assert_eq!(holder, "other-process-run");
            assert_eq!(path, &std::path::PathBuf::from("/state/locks/nightly.lock"));
        }
        other => panic!("expected RunLocked, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 3);
    let msg = err.to_string();
    assert!(msg.contains("other-process-run") && msg.contains("nightly.lock"), "{msg}");
    assert!(!controller.is_running("nightly"));
    assert_eq!(probe.started().len(), 0);
}
