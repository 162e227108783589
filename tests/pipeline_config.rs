// tests/pipeline_config.rs

//! Config files turned into pipelines, and whole pipelines run against the
//! in-memory and local backends.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use clap::Parser;

use pipedag::cli::{CliArgs, Command};
use pipedag::config::{
    ConfigFile, default_config_path, load_and_validate, load_from_path, load_with_fs,
};
use pipedag::connectors::memory::Op;
use pipedag::connectors::{Connectors, MemoryWarehouse, TableRef};
use pipedag::engine::RunController;
use pipedag::errors::PipedagError;
use pipedag::fs::RealFileSystem;
use pipedag::fs::mock::MockFileSystem;
use pipedag::pipeline::Pipeline;
use pipedag::record::{AttemptStatus, RunStatus};
use pipedag::types::{BackendKind, SkipPolicy, TriggerRule};
use pipedag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};
use pipedag_test_utils::{init_tracing, with_timeout};

const SCHEMA: &str = r#"[{"name": "country"}, {"name": "points", "type": "INTEGER", "mode": "REQUIRED"}]"#;

const WINES_TOML: &str = r#"
[pipeline]
id = "wines-review-dag"
description = "Load, check and archive the daily wine reviews"
concurrency = 3
flow = ["start", "load", ["check", "example"], "archive", "standardise", "analyse", "finish"]

[default]
retries = 1
retry_delay = "1s"

[connectors]
backend = "memory"

[task.start]
kind = "noop"

[task.load]
kind = "load"
source = "ingress/reviews_*.csv"
table = "Wines_Demo.1_WINE_REVIEWS_RAW"
schema = '[{"name": "country"}, {"name": "points", "type": "INTEGER", "mode": "REQUIRED"}]'
skip_leading_rows = 1

[task.check]
kind = "check"
sql = "SELECT COUNT(*) FROM Wines_Demo.1_WINE_REVIEWS_RAW"
retry_delay = "10ms"

[task.example]
kind = "noop"

[task.archive]
kind = "archive"
source = "ingress/reviews_*.csv"
destination = "archive/{run_id}/reviews_"

[task.standardise]
kind = "query"
sql = """
SELECT DISTINCT country, points, CURRENT_DATE() AS ingestion_date
FROM Wines_Demo.1_WINE_REVIEWS_RAW
WHERE country IS NOT NULL
"""
table = "Wines_Demo.2_CLEANED_REVIEWS"
write_mode = "append"

[task.analyse]
kind = "query"
sql = """
SELECT DISTINCT country, AVG(points) OVER (PARTITION BY country) AS avg_country_points
FROM Wines_Demo.2_CLEANED_REVIEWS
WHERE ingestion_date = '{date}'
"""
table = "Wines_Demo.3_WINE_REVIEW_STATS"
write_mode = "append"

[task.finish]
kind = "noop"
trigger_rule = "all_done"
"#;

fn write_config(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("Pipedag.toml");
    std::fs::write(&path, contents).expect("write config");
    path
}

fn config_error(cfg: ConfigFileBuilder) -> String {
    match ConfigFile::try_from(cfg.raw()) {
        Err(PipedagError::ConfigError(msg)) => msg,
        other => panic!("expected a configuration error, got {other:?}"),
    }
}

async fn run_pipeline(pipeline: Pipeline) -> pipedag::record::RunRecord {
    let id = pipeline.id.clone();
    let mut controller = RunController::new();
    controller.register(pipeline);
    with_timeout(controller.start(&id)).await.expect("run admitted")
}

#[test]
fn toml_file_is_parsed_with_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, WINES_TOML);

    let raw = load_from_path(&path).expect("parses");
    assert_eq!(raw.pipeline.id, "wines-review-dag");
    assert_eq!(raw.pipeline.flow.len(), 7);
    assert_eq!(raw.task.len(), 8);

    let cfg = load_and_validate(&path).expect("valid");
    let defaults = cfg.defaults();
    let check = &cfg.tasks()["check"];
    assert_eq!(check.effective_retries(defaults), 1);
    assert_eq!(
        check.effective_retry_delay(defaults),
        Ok(Duration::from_millis(10))
    );
    assert_eq!(cfg.tasks()["load"].effective_retries(defaults), 1);
    assert_eq!(
        cfg.tasks()["load"].effective_retry_delay(defaults),
        Ok(Duration::from_secs(1))
    );
    assert_eq!(cfg.tasks()["finish"].trigger_rule, TriggerRule::AllDone);
    assert_eq!(cfg.connectors().backend, BackendKind::Memory);
}

#[test]
fn missing_sections_fall_back_to_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(
        &dir,
        "[pipeline]\nid = \"tiny\"\n\n[task.only]\nkind = \"noop\"\n",
    );

    let cfg = load_and_validate(&path).expect("valid");
    assert_eq!(cfg.pipeline().concurrency, 5);
    assert_eq!(cfg.defaults().retries, 0);
    assert_eq!(cfg.defaults().retry_delay, "0s");
    assert_eq!(cfg.connectors().backend, BackendKind::Local);
}

#[test]
fn config_is_read_through_the_file_system_abstraction() {
    let fs = MockFileSystem::new();
    fs.add_file("/etc/pipedag/Pipedag.toml", WINES_TOML);

    let cfg = load_with_fs(&fs, "/etc/pipedag/Pipedag.toml").expect("valid");
    assert_eq!(cfg.pipeline().id, "wines-review-dag");
    assert!(matches!(
        load_with_fs(&fs, "/etc/pipedag/other.toml"),
        Err(PipedagError::Other(_))
    ));
}

#[test]
fn cli_defaults_to_the_standard_config_path() {
    let args = CliArgs::try_parse_from(["pipedag", "validate"]).expect("parses");
    assert_eq!(args.config, default_config_path());
    assert!(matches!(args.command, Command::Validate));

    let args = CliArgs::try_parse_from(["pipedag", "run", "--config", "conf/p.toml", "--dry-run"])
        .expect("parses");
    assert_eq!(args.config, std::path::PathBuf::from("conf/p.toml"));
    assert!(matches!(args.command, Command::Run { dry_run: true, pipeline_id: None }));
}

#[test]
fn malformed_toml_is_reported() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = write_config(&dir, "[pipeline\nid = ");
    assert!(matches!(
        load_and_validate(&path),
        Err(PipedagError::TomlError(_))
    ));
    assert!(matches!(
        load_and_validate(dir.path().join("missing.toml")),
        Err(PipedagError::Other(_))
    ));
}

#[test]
fn flow_and_after_both_produce_edges() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = load_and_validate(write_config(&dir, WINES_TOML)).expect("valid");
    let connectors = Connectors::memory(Arc::new(MemoryWarehouse::new()));

    let pipeline = Pipeline::from_config(&cfg, &connectors, dir.path()).expect("builds");

    assert_eq!(pipeline.id, "wines-review-dag");
    assert_eq!(pipeline.concurrency, 3);
    assert_eq!(
        pipeline.description.as_deref(),
        Some("Load, check and archive the daily wine reviews")
    );
    let graph = &pipeline.graph;
    assert_eq!(graph.roots(), vec!["start"]);
    let into_archive: Vec<&str> = graph.upstream_of("archive").iter().map(String::as_str).collect();
    assert_eq!(into_archive, vec!["check", "example"]);
    let order: Vec<&str> = graph.topological_order().iter().map(String::as_str).collect();
    let position = |id: &str| order.iter().position(|t| *t == id).unwrap();
    assert!(position("archive") < position("standardise"));
    assert!(position("standardise") < position("analyse"));
    assert!(position("analyse") < position("finish"));
    assert_eq!(graph.task("check").unwrap().retry.retry_delay, Duration::from_millis(10));
    assert_eq!(graph.task("archive").unwrap().retry.retries, 1);
    assert_eq!(graph.task("archive").unwrap().retry.retry_delay, Duration::from_secs(1));
}

#[test]
fn skip_satisfied_marks_the_edge() {
    let cfg = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::noop().build())
        .with_task(
            "b",
            TaskConfigBuilder::noop().after("a").skip_satisfied("a").build(),
        )
        .build();
    let connectors = Connectors::memory(Arc::new(MemoryWarehouse::new()));

    let pipeline = Pipeline::from_config(&cfg, &connectors, std::path::Path::new(".")).unwrap();

    assert_eq!(pipeline.graph.skip_policy("a", "b"), SkipPolicy::Satisfied);
}

#[test]
fn cycle_is_rejected() {
    let cfg = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::noop().after("b").build())
        .with_task("b", TaskConfigBuilder::noop().after("a").build());

    let err = ConfigFile::try_from(cfg.raw()).unwrap_err();
    assert!(matches!(err, PipedagError::DagCycle(ref id) if id == "a" || id == "b"));
}

#[test]
fn cycle_through_flow_is_rejected() {
    let cfg = ConfigFileBuilder::new("p")
        .with_task("a", TaskConfigBuilder::noop().build())
        .with_task("b", TaskConfigBuilder::noop().build())
        .with_task("c", TaskConfigBuilder::noop().after("b").build())
        .stage(&["c"])
        .stage(&["a"])
        .stage(&["b"]);

    assert!(matches!(
        ConfigFile::try_from(cfg.raw()),
        Err(PipedagError::DagCycle(_))
    ));
}

#[test]
fn invalid_configs_name_the_problem() {
    let msg = config_error(ConfigFileBuilder::new("p"));
    assert!(msg.contains("at least one"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p").with_task("a", TaskConfigBuilder::noop().after("ghost").build()),
    );
    assert!(msg.contains("unknown dependency 'ghost'"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .with_task("a", TaskConfigBuilder::noop().build())
            .stage(&["a", "ghost"]),
    );
    assert!(msg.contains("unknown task 'ghost'"), "{msg}");

    let mut load = TaskConfigBuilder::load("in/*.csv", "ds.t", SCHEMA).build();
    load.schema = None;
    let msg = config_error(ConfigFileBuilder::new("p").with_task("load", load));
    assert!(msg.contains("requires `schema`"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .with_task("load", TaskConfigBuilder::load("in/*.csv", "no_dataset", SCHEMA).build()),
    );
    assert!(msg.contains("dataset.table"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .with_task("a", TaskConfigBuilder::noop().retries(1, "5 parsecs").build()),
    );
    assert!(msg.contains("retry_delay"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .concurrency(0)
            .with_task("a", TaskConfigBuilder::noop().build()),
    );
    assert!(msg.contains("concurrency"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .with_task("a", TaskConfigBuilder::noop().build())
            .with_task("b", TaskConfigBuilder::noop().skip_satisfied("a").build()),
    );
    assert!(msg.contains("skip_satisfied"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("p")
            .backend(BackendKind::Local)
            .with_task("c", TaskConfigBuilder::check("SELECT 1").build()),
    );
    assert!(msg.contains("query_command"), "{msg}");

    let msg = config_error(
        ConfigFileBuilder::new("bad id").with_task("a", TaskConfigBuilder::noop().build()),
    );
    assert!(msg.contains("invalid pipeline id"), "{msg}");
}

#[tokio::test]
async fn wine_reviews_pipeline_runs_end_to_end() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = load_and_validate(write_config(&dir, WINES_TOML)).expect("valid");
    let warehouse = Arc::new(MemoryWarehouse::new());
    warehouse.put_object(
        "ingress/reviews_1.csv",
        "country,points\nItaly,87\nPortugal,87\n",
    );
    warehouse.put_object("ingress/reviews_2.csv", "country,points\nChile,90\n");
    let connectors = Connectors::memory(warehouse.clone());
    let pipeline = Pipeline::from_config(&cfg, &connectors, dir.path()).expect("builds");

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Succeeded, "{record}");
    let raw = TableRef::new("Wines_Demo", "1_WINE_REVIEWS_RAW");
    let clean = TableRef::new("Wines_Demo", "2_CLEANED_REVIEWS");
    let stats = TableRef::new("Wines_Demo", "3_WINE_REVIEW_STATS");
    assert_eq!(warehouse.row_count(&raw), Some(3));
    assert_eq!(warehouse.row_count(&clean), Some(3));
    assert_eq!(warehouse.row_count(&stats), Some(3));
    let queries = warehouse.queries();
    let destinations: Vec<String> = queries.iter().map(|q| q.destination.to_string()).collect();
    assert_eq!(
        destinations,
        vec!["Wines_Demo.2_CLEANED_REVIEWS", "Wines_Demo.3_WINE_REVIEW_STATS"]
    );
    assert!(!queries[1].sql.contains("{date}"), "{}", queries[1].sql);
    assert_eq!(record.task_status("finish"), Some(AttemptStatus::Succeeded));
    assert_eq!(
        record.latest_attempt("load").and_then(|a| a.output.clone()),
        Some(json!({
            "table": "Wines_Demo.1_WINE_REVIEWS_RAW",
            "provisioned": true,
            "rows_loaded": 3,
        }))
    );
    assert_eq!(
        record.latest_attempt("check").and_then(|a| a.output.clone()),
        Some(json!(3))
    );
    assert_eq!(
        warehouse.object_names(),
        vec![
            format!("archive/{}/reviews_1.csv", record.run_id),
            format!("archive/{}/reviews_2.csv", record.run_id),
        ]
    );
    assert_eq!(warehouse.calls(Op::CreateTable), 1);
}

#[tokio::test]
async fn failed_check_keeps_objects_in_place() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = load_and_validate(write_config(&dir, WINES_TOML)).expect("valid");
    let warehouse = Arc::new(MemoryWarehouse::new());
    warehouse.put_object("ingress/reviews_1.csv", "country,points\nItaly,87\n");
    warehouse.set_check_result("COUNT(*)", Some(json!(0)));
    let connectors = Connectors::memory(warehouse.clone());
    let pipeline = Pipeline::from_config(&cfg, &connectors, dir.path()).expect("builds");

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.attempts_of("check").len(), 2);
    let check = record.latest_attempt("check").expect("check ran");
    assert_eq!(check.status, AttemptStatus::Failed);
    assert!(check.error.as_deref().is_some_and(|e| e.contains("returned 0")));
    assert_eq!(record.task_status("example"), Some(AttemptStatus::Succeeded));
    for skipped in ["archive", "standardise", "analyse"] {
        assert_eq!(record.task_status(skipped), Some(AttemptStatus::Skipped), "{skipped}");
    }
    // `finish` is all_done: it still runs after the skips.
    assert_eq!(record.task_status("finish"), Some(AttemptStatus::Succeeded));
    assert_eq!(warehouse.calls(Op::MoveObject), 0);
    assert!(warehouse.queries().is_empty());
    assert_eq!(warehouse.object_names(), vec!["ingress/reviews_1.csv"]);
}

#[tokio::test]
async fn existing_table_is_loaded_without_reprovisioning() {
    init_tracing();
    let warehouse = Arc::new(MemoryWarehouse::new());
    let table = TableRef::new("ds", "t");
    warehouse.add_table(table.clone(), SCHEMA, vec![vec!["Spain".into(), "80".into()]]);
    warehouse.put_object("in/a.csv", "Italy,87\n");
    let cfg = ConfigFileBuilder::new("p")
        .with_task("load", TaskConfigBuilder::load("in/*.csv", "ds.t", SCHEMA).build())
        .build();
    let connectors = Connectors::memory(warehouse.clone());
    let pipeline = Pipeline::from_config(&cfg, &connectors, std::path::Path::new(".")).unwrap();

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(warehouse.calls(Op::CreateTable), 0);
    assert_eq!(warehouse.row_count(&table), Some(2));
    let output = record.latest_attempt("load").and_then(|a| a.output.clone()).unwrap();
    assert_eq!(output["provisioned"], json!(false));
}

#[tokio::test]
async fn archive_runs_once_while_downstream_check_retries() {
    init_tracing();
    let warehouse = Arc::new(MemoryWarehouse::new());
    warehouse.put_object("ingress/a.csv", "1");
    warehouse.set_check_result("audit_marker", Some(json!(false)));
    let cfg = ConfigFileBuilder::new("p")
        .with_task(
            "archive",
            TaskConfigBuilder::archive("ingress/*.csv", "archive/").build(),
        )
        .with_task(
            "verify",
            TaskConfigBuilder::check("SELECT ok FROM audit_marker")
                .after("archive")
                .retries(2, "0s")
                .build(),
        )
        .build();
    let connectors = Connectors::memory(warehouse.clone());
    let pipeline = Pipeline::from_config(&cfg, &connectors, std::path::Path::new(".")).unwrap();

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(record.attempts_of("verify").len(), 3);
    assert_eq!(record.attempts_of("archive").len(), 1);
    assert_eq!(warehouse.calls(Op::MoveObject), 1);
    assert_eq!(warehouse.object_names(), vec!["archive/a.csv"]);
}

#[tokio::test]
async fn transient_load_failure_is_retried() {
    init_tracing();
    let warehouse = Arc::new(MemoryWarehouse::new());
    warehouse.put_object("in/a.csv", "Italy,87\n");
    warehouse.fail_next(Op::Load, 1);
    let cfg = ConfigFileBuilder::new("p")
        .default_retries(1, "10ms")
        .with_task("load", TaskConfigBuilder::load("in/a.csv", "ds.t", SCHEMA).build())
        .build();
    let connectors = Connectors::memory(warehouse.clone());
    let pipeline = Pipeline::from_config(&cfg, &connectors, std::path::Path::new(".")).unwrap();

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Succeeded);
    assert_eq!(record.attempts_of("load").len(), 2);
    // The second attempt finds the table created by the first.
    assert_eq!(warehouse.calls(Op::CreateTable), 1);
    assert_eq!(warehouse.row_count(&TableRef::new("ds", "t")), Some(1));
}

#[cfg(unix)]
#[tokio::test]
async fn local_backend_pipeline_on_disk() {
    init_tracing();
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    std::fs::create_dir_all(root.join("data/ingress")).unwrap();
    std::fs::write(root.join("data/ingress/reviews_1.csv"), "country,points\nItaly,87\n").unwrap();
    let path = write_config(
        &dir,
        r#"
[pipeline]
id = "local"

[connectors]
backend = "local"
object_root = "data"
warehouse_root = "wh"
query_command = "cat > /dev/null; echo 1"

[task.marker]
kind = "command"
cmd = "echo started > marker.txt"

[task.load]
kind = "load"
after = ["marker"]
source = "ingress/*.csv"
table = "ds.reviews"
schema = '[{"name": "country"}, {"name": "points"}]'
skip_leading_rows = 1

[task.check]
kind = "check"
after = ["load"]
sql = "SELECT COUNT(*) FROM ds.reviews"

[task.archive]
kind = "archive"
after = ["check"]
source = "ingress/reviews_1.csv"
destination = "done/reviews_1.csv"
"#,
    );
    let cfg = load_and_validate(&path).expect("valid");
    let connectors = Connectors::from_config(&cfg, Arc::new(RealFileSystem), root).expect("wired");
    let pipeline = Pipeline::from_config(&cfg, &connectors, root).expect("builds");

    let record = run_pipeline(pipeline).await;

    assert_eq!(record.status, RunStatus::Succeeded, "{record}");
    assert!(root.join("marker.txt").is_file(), "command runs in the config dir");
    let data = std::fs::read_to_string(root.join("wh/ds/reviews/data.csv")).unwrap();
    assert_eq!(data, "Italy,87\n");
    assert!(root.join("data/done/reviews_1.csv").is_file());
    assert!(!root.join("data/ingress/reviews_1.csv").exists());
}
