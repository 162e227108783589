// src/dag/graph.rs

use std::collections::{BTreeSet, HashMap};

use crate::dag::task::Task;
use crate::engine::TaskId;
use crate::types::SkipPolicy;

static NO_TASKS: BTreeSet<TaskId> = BTreeSet::new();

/// Internal node structure: the task plus its resolved edges.
#[derive(Debug, Clone)]
pub(crate) struct GraphNode {
    pub(crate) task: Task,
    /// Direct dependencies: tasks that must be terminal before this one runs.
    pub(crate) upstream: BTreeSet<TaskId>,
    /// Upstream members whose `Skipped` state counts as satisfied.
    pub(crate) skip_satisfied: BTreeSet<TaskId>,
    /// Direct dependents: tasks that list this one upstream.
    pub(crate) downstream: BTreeSet<TaskId>,
}

/// Immutable task graph produced by [`GraphBuilder`](super::GraphBuilder).
///
/// Construction guarantees that the graph is acyclic, that every edge
/// endpoint is a declared task and that `upstream`/`downstream` mirror each
/// other. Nothing mutates it afterwards, so a single `Arc<Graph>` can be
/// shared by every run of a pipeline.
#[derive(Debug, Clone)]
pub struct Graph {
    nodes: HashMap<TaskId, GraphNode>,
    order: Vec<TaskId>,
}

impl Graph {
    pub(crate) fn from_parts(nodes: HashMap<TaskId, GraphNode>, order: Vec<TaskId>) -> Self {
        Self { nodes, order }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.nodes.get(id).map(|n| &n.task)
    }

    /// All task ids in topological order.
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Immediate upstream members of a task.
    pub fn upstream_of(&self, id: &str) -> &BTreeSet<TaskId> {
        self.nodes.get(id).map(|n| &n.upstream).unwrap_or(&NO_TASKS)
    }

    /// Immediate downstream members of a task.
    pub fn downstream_of(&self, id: &str) -> &BTreeSet<TaskId> {
        self.nodes.get(id).map(|n| &n.downstream).unwrap_or(&NO_TASKS)
    }

    /// Skip policy of the edge `from -> to`.
    pub fn skip_policy(&self, from: &str, to: &str) -> SkipPolicy {
        match self.nodes.get(to) {
            Some(node) if node.skip_satisfied.contains(from) => SkipPolicy::Satisfied,
            _ => SkipPolicy::Propagate,
        }
    }

    /// Tasks with no upstream members, in topological order.
    pub fn roots(&self) -> Vec<&str> {
        self.tasks()
            .filter(|id| self.upstream_of(id).is_empty())
            .collect()
    }
}
