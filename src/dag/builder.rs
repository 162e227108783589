// src/dag/builder.rs

//! Graph construction from a declarative edge list.
//!
//! Edges can be given one by one, as fan-out groups (one source, many
//! targets), as fan-in groups (many sources joined into one target) or as a
//! chain of stages where every member of a stage feeds every member of the
//! next one:
//!
//! ```text
//! start >> load >> [check, noop] >> archive
//! ```
//!
//! becomes `chain([["start"], ["load"], ["check", "noop"], ["archive"]])`.

use std::collections::{BTreeSet, HashMap};

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graphmap::DiGraphMap;
use tracing::debug;

use crate::dag::graph::{Graph, GraphNode};
use crate::dag::task::Task;
use crate::engine::TaskId;
use crate::errors::{PipedagError, Result};
use crate::types::SkipPolicy;

/// A single dependency `from -> to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
    pub on_skip: SkipPolicy,
}

impl Edge {
    pub fn new(from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            on_skip: SkipPolicy::default(),
        }
    }

    pub fn on_skip(mut self, policy: SkipPolicy) -> Self {
        self.on_skip = policy;
        self
    }
}

/// Declarative edge group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeGroup {
    Single(Edge),
    /// One source unblocks many targets.
    FanOut { from: TaskId, to: Vec<TaskId> },
    /// The target waits for *all* sources (logical AND).
    FanIn { from: Vec<TaskId>, to: TaskId },
}

impl EdgeGroup {
    pub fn into_edges(self) -> Vec<Edge> {
        match self {
            EdgeGroup::Single(edge) => vec![edge],
            EdgeGroup::FanOut { from, to } => to
                .into_iter()
                .map(|target| Edge::new(from.clone(), target))
                .collect(),
            EdgeGroup::FanIn { from, to } => from
                .into_iter()
                .map(|source| Edge::new(source, to.clone()))
                .collect(),
        }
    }
}

impl From<Edge> for EdgeGroup {
    fn from(edge: Edge) -> Self {
        EdgeGroup::Single(edge)
    }
}

impl From<(&str, &str)> for EdgeGroup {
    fn from((from, to): (&str, &str)) -> Self {
        EdgeGroup::Single(Edge::new(from, to))
    }
}

/// Expand a chain of stages into edges: each member of stage `k` gets an
/// edge to each member of stage `k + 1`.
pub fn chain_edges<S: AsRef<str>>(stages: &[Vec<S>]) -> Vec<Edge> {
    stages
        .windows(2)
        .flat_map(|pair| {
            pair[0].iter().flat_map(move |from| {
                pair[1]
                    .iter()
                    .map(move |to| Edge::new(from.as_ref(), to.as_ref()))
            })
        })
        .collect()
}

/// Build a graph from task definitions and edge groups.
pub fn build(
    tasks: impl IntoIterator<Item = Task>,
    edges: impl IntoIterator<Item = EdgeGroup>,
) -> Result<Graph> {
    let mut builder = GraphBuilder::new();
    for task in tasks {
        builder = builder.task(task);
    }
    for group in edges {
        builder = builder.group(group);
    }
    builder.build()
}

/// Fluent graph construction. Nothing is validated until [`build`](Self::build).
#[derive(Debug, Default)]
pub struct GraphBuilder {
    tasks: Vec<Task>,
    edges: Vec<Edge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task(mut self, task: Task) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn edge(self, from: impl Into<TaskId>, to: impl Into<TaskId>) -> Self {
        self.edge_with(Edge::new(from, to))
    }

    pub fn edge_with(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn fan_out<I, S>(self, from: impl Into<TaskId>, to: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.group(EdgeGroup::FanOut {
            from: from.into(),
            to: to.into_iter().map(Into::into).collect(),
        })
    }

    pub fn fan_in<I, S>(self, from: I, to: impl Into<TaskId>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<TaskId>,
    {
        self.group(EdgeGroup::FanIn {
            from: from.into_iter().map(Into::into).collect(),
            to: to.into(),
        })
    }

    pub fn chain<S: AsRef<str>>(mut self, stages: &[Vec<S>]) -> Self {
        self.edges.extend(chain_edges(stages));
        self
    }

    pub fn group(mut self, group: EdgeGroup) -> Self {
        self.edges.extend(group.into_edges());
        self
    }

    /// Validate and freeze the graph.
    ///
    /// Fails with:
    /// - [`PipedagError::DuplicateTask`] if two tasks share an id,
    /// - [`PipedagError::TaskNotFound`] if an edge endpoint is undeclared,
    /// - [`PipedagError::DagCycle`] naming a node on a cycle.
    pub fn build(self) -> Result<Graph> {
        let GraphBuilder { tasks, edges } = self;

        let mut declared: Vec<TaskId> = Vec::with_capacity(tasks.len());
        let mut nodes: HashMap<TaskId, GraphNode> = HashMap::with_capacity(tasks.len());

        for task in tasks {
            if nodes.contains_key(&task.id) {
                return Err(PipedagError::DuplicateTask(task.id));
            }
            declared.push(task.id.clone());
            nodes.insert(
                task.id.clone(),
                GraphNode {
                    task,
                    upstream: BTreeSet::new(),
                    skip_satisfied: BTreeSet::new(),
                    downstream: BTreeSet::new(),
                },
            );
        }

        for edge in &edges {
            if !nodes.contains_key(&edge.from) {
                return Err(PipedagError::TaskNotFound {
                    task: edge.from.clone(),
                    referenced_by: edge.to.clone(),
                });
            }
            if !nodes.contains_key(&edge.to) {
                return Err(PipedagError::TaskNotFound {
                    task: edge.to.clone(),
                    referenced_by: edge.from.clone(),
                });
            }
            if edge.from == edge.to {
                return Err(PipedagError::DagCycle(edge.from.clone()));
            }
        }

        let order = topological_order(&declared, &edges)?;

        // Duplicate edges collapse; a `Satisfied` copy wins.
        for edge in edges {
            if let Some(target) = nodes.get_mut(&edge.to) {
                target.upstream.insert(edge.from.clone());
                if edge.on_skip == SkipPolicy::Satisfied {
                    target.skip_satisfied.insert(edge.from.clone());
                }
            }
            if let Some(source) = nodes.get_mut(&edge.from) {
                source.downstream.insert(edge.to);
            }
        }

        debug!(tasks = nodes.len(), ?order, "task graph built");

        Ok(Graph::from_parts(nodes, order))
    }
}

/// Topologically sort the declared tasks, reporting a node on a cycle if
/// there is one.
///
/// Edge direction: upstream -> downstream.
pub(crate) fn topological_order(declared: &[TaskId], edges: &[Edge]) -> Result<Vec<TaskId>> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for id in declared {
        graph.add_node(id.as_str());
    }
    for edge in edges {
        graph.add_edge(edge.from.as_str(), edge.to.as_str(), ());
    }

    match toposort(&graph, None) {
        Ok(order) => Ok(order.into_iter().map(str::to_string).collect()),
        Err(cycle) => {
            // The node reported by toposort may only be *reachable* from a
            // cycle; pick a member of a non-trivial strongly connected
            // component instead so the error always names a node on it.
            let on_cycle = tarjan_scc(&graph)
                .into_iter()
                .filter(|scc| scc.len() > 1)
                .filter_map(|scc| scc.into_iter().min())
                .min()
                .unwrap_or(cycle.node_id());
            Err(PipedagError::DagCycle(on_cycle.to_string()))
        }
    }
}
