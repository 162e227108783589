// tests/scheduler_property.rs

//! Random DAGs driven through the pure scheduler with random completion
//! orders, failures and retries.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use proptest::prelude::*;

use pipedag::config::ConfigFile;
use pipedag::connectors::{Connectors, MemoryWarehouse};
use pipedag::dag::{Graph, Scheduler, SchedulerStep};
use pipedag::engine::AttemptOutcome;
use pipedag::pipeline::Pipeline;
use pipedag::record::{AttemptStatus, RunStatus};
use pipedag::types::TriggerRule;
use pipedag_test_utils::builders::{ConfigFileBuilder, TaskConfigBuilder};

/// Task `i` may only depend on tasks `0..i`, which keeps the graph acyclic.
fn dag_config_strategy(max_tasks: usize) -> impl Strategy<Value = ConfigFile> {
    (1..=max_tasks).prop_flat_map(|num_tasks| {
        let deps = proptest::collection::vec(
            proptest::collection::vec(any::<usize>(), 0..3),
            num_tasks,
        );
        let retries = proptest::collection::vec(0u32..3, num_tasks);
        let timed = proptest::collection::vec(any::<bool>(), num_tasks);
        let all_done = proptest::collection::vec(proptest::bool::weighted(0.2), num_tasks);

        (deps, retries, timed, all_done).prop_map(move |(raw_deps, retries, timed, all_done)| {
            let mut builder = ConfigFileBuilder::new("prop");
            for (i, potential) in raw_deps.into_iter().enumerate() {
                let name = format!("task_{i}");
                // The simulation fires timers itself, so the length is irrelevant.
                let delay = if timed[i] { "1s" } else { "0s" };
                let mut task = TaskConfigBuilder::noop().retries(retries[i], delay);
                if all_done[i] {
                    task = task.trigger_rule(TriggerRule::AllDone);
                }
                let valid: BTreeSet<usize> = potential
                    .into_iter()
                    .filter(|_| i > 0)
                    .map(|d| d % i)
                    .collect();
                for dep in valid {
                    task = task.after(&format!("task_{dep}"));
                }
                builder = builder.with_task(&name, task.build());
            }
            builder.build()
        })
    })
}

fn graph_of(cfg: &ConfigFile) -> Graph {
    let connectors = Connectors::memory(Arc::new(MemoryWarehouse::new()));
    let pipeline = Pipeline::from_config(cfg, &connectors, Path::new(".")).expect("builds");
    (*pipeline.graph).clone()
}

struct Sim {
    graph: Arc<Graph>,
    scheduler: Scheduler,
    limit: usize,
    /// Dispatched, not yet completed: (task, attempt).
    running: Vec<(String, u32)>,
    timers: Vec<String>,
    dispatches: HashMap<String, u32>,
}

impl Sim {
    fn absorb(&mut self, step: SchedulerStep) -> Result<(), TestCaseError> {
        for scheduled in step.newly_scheduled {
            prop_assert_eq!(
                self.scheduler.upstream_terminal(&scheduled.task_id),
                Some(true)
            );
            for up in self.graph.upstream_of(&scheduled.task_id) {
                let state = self.scheduler.run_state_of(up).unwrap();
                prop_assert!(
                    state.is_terminal(),
                    "{} dispatched while upstream {} is {:?}",
                    scheduled.task_id,
                    up,
                    state
                );
            }
            prop_assert!(
                !self.running.iter().any(|(t, _)| t == &scheduled.task_id),
                "{} dispatched twice",
                scheduled.task_id
            );
            *self.dispatches.entry(scheduled.task_id.clone()).or_default() += 1;
            self.running.push((scheduled.task_id, scheduled.attempt));
        }
        self.timers.extend(step.retries.into_iter().map(|r| r.task));
        prop_assert!(self.running.len() <= self.limit);
        prop_assert_eq!(self.running.len(), self.scheduler.running_count());
        Ok(())
    }
}

proptest! {
    #[test]
    fn runs_terminate_and_respect_dependencies(
        cfg in dag_config_strategy(10),
        limit in 1usize..4,
        failing in proptest::collection::hash_set(0usize..10, 0..4),
        picks in proptest::collection::vec(any::<usize>(), 200),
    ) {
        let graph = Arc::new(graph_of(&cfg));
        let failing: HashSet<String> = failing.into_iter().map(|i| format!("task_{i}")).collect();
        let mut sim = Sim {
            graph: Arc::clone(&graph),
            scheduler: Scheduler::new(Arc::clone(&graph), "prop", "run", limit),
            limit,
            running: Vec::new(),
            timers: Vec::new(),
            dispatches: HashMap::new(),
        };

        let step = sim.scheduler.start();
        sim.absorb(step)?;

        let mut picks = picks.into_iter().cycle();
        let mut steps = 0;
        while !sim.scheduler.is_finished() {
            steps += 1;
            prop_assert!(steps < 1000, "simulation did not terminate");
            prop_assert!(
                !sim.running.is_empty() || !sim.timers.is_empty(),
                "run is stuck with nothing in flight"
            );

            let pick = picks.next().unwrap_or(0);
            let step = if !sim.timers.is_empty() && (sim.running.is_empty() || pick % 3 == 0) {
                let task = sim.timers.remove(pick % sim.timers.len());
                sim.scheduler.step_retry_due(&task)
            } else {
                let (task, attempt) = sim.running.remove(pick % sim.running.len());
                let outcome = if failing.contains(&task) {
                    AttemptOutcome::Failed("scripted".to_string())
                } else {
                    AttemptOutcome::Success(None)
                };
                sim.scheduler.step_completion(&task, attempt, outcome)
            };
            sim.absorb(step)?;
        }

        prop_assert!(sim.running.is_empty());
        let record = sim.scheduler.record();
        for id in graph.tasks() {
            let task = graph.task(id).unwrap();
            let attempts = record.attempts_of(id);
            prop_assert!(attempts.len() as u32 <= task.retry.max_attempts());
            prop_assert!(attempts.iter().all(|a| a.status.is_terminal()));
            if failing.contains(id) && sim.dispatches.contains_key(id) {
                prop_assert_eq!(attempts.len() as u32, task.retry.max_attempts());
            }
        }
        let any_failed = graph
            .tasks()
            .any(|id| record.task_status(id) == Some(AttemptStatus::Failed));
        let expected = if any_failed { RunStatus::Failed } else { RunStatus::Succeeded };
        prop_assert_eq!(record.status, expected);
    }
}
