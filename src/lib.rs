// src/lib.rs

pub mod cli;
pub mod config;
pub mod connectors;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod pipeline;
pub mod provision;
pub mod record;
pub mod store;
pub mod tasks;
pub mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::cli::{CliArgs, Command};
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::connectors::Connectors;
use crate::engine::RunController;
use crate::errors::{PipedagError, Result};
use crate::fs::{FileSystem, RealFileSystem};
use crate::pipeline::Pipeline;
use crate::record::AttemptStatus;
use crate::store::RunStore;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - collaborators and the pipeline graph
/// - the run controller with its persistent store
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone();
    let cfg = load_and_validate(&config_path)?;
    let base_dir = config_root_dir(&config_path);
    let fs: Arc<dyn FileSystem> = Arc::new(RealFileSystem);
    let store = RunStore::new(Arc::clone(&fs), base_dir.join(&cfg.pipeline().state_dir));

    match args.command {
        Command::Validate => {
            let pipeline = build_pipeline(&cfg, fs, &base_dir)?;
            print_plan(&cfg, &pipeline);
            Ok(())
        }
        Command::Run {
            pipeline_id,
            dry_run,
        } => {
            if let Some(requested) = pipeline_id {
                if requested != cfg.pipeline().id {
                    return Err(PipedagError::PipelineNotFound(requested));
                }
            }
            let pipeline = build_pipeline(&cfg, fs, &base_dir)?;
            if dry_run {
                print_plan(&cfg, &pipeline);
                return Ok(());
            }
            run_pipeline(pipeline, store).await
        }
        Command::Status { run_id } => {
            let record = store.load(&run_id)?;
            print!("{record}");
            Ok(())
        }
    }
}

fn build_pipeline(cfg: &ConfigFile, fs: Arc<dyn FileSystem>, base_dir: &Path) -> Result<Pipeline> {
    let connectors = Connectors::from_config(cfg, fs, base_dir)?;
    Pipeline::from_config(cfg, &connectors, base_dir)
}

async fn run_pipeline(pipeline: Pipeline, store: RunStore) -> Result<()> {
    let pipeline_id = pipeline.id.clone();
    let mut controller = RunController::new().with_store(store);
    controller.register(pipeline);
    let controller = Arc::new(controller);

    let handle = controller.spawn(&pipeline_id)?;
    info!(pipeline = %pipeline_id, run_id = %handle.run_id, "run started");

    // Ctrl-C → cancel the run; the record still gets written.
    {
        let controller = Arc::clone(&controller);
        let pipeline_id = pipeline_id.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            controller.cancel(&pipeline_id).await;
        });
    }

    let record = handle.wait().await?;
    let failed = record.tasks_with_status(AttemptStatus::Failed);
    if !failed.is_empty() {
        warn!(run_id = %record.run_id, ?failed, "tasks failed");
    }
    print!("{record}");
    record.ensure_succeeded()
}

/// Directory the config lives in; relative paths in the config resolve
/// against it.
///
/// A bare filename like "Pipedag.toml" (parent = "") falls back to the
/// current working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Print the tasks in the order they would be started.
fn print_plan(cfg: &ConfigFile, pipeline: &Pipeline) {
    println!("pipeline {}", pipeline.id);
    if let Some(ref description) = pipeline.description {
        println!("  {description}");
    }
    println!("  concurrency = {}", pipeline.concurrency);
    println!("  backend = {}", cfg.connectors().backend);
    println!();

    println!("tasks ({}):", pipeline.graph.len());
    for id in pipeline.graph.topological_order() {
        let Some(task) = pipeline.graph.task(id) else {
            continue;
        };
        let kind = cfg.tasks().get(id).map(|t| t.kind).unwrap_or_default();
        println!("  - {id} [{kind}]");
        let upstream = pipeline.graph.upstream_of(id);
        if !upstream.is_empty() {
            println!("      after: {upstream:?}");
        }
        if task.retry.retries > 0 {
            println!(
                "      retries: {} (delay {:?})",
                task.retry.retries, task.retry.retry_delay
            );
        }
        println!("      trigger_rule: {}", task.trigger_rule);
    }

    debug!("plan printed (no execution)");
}
