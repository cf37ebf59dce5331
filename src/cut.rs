//! Peak-memory bound of a task graph and the partial serialisation that
//! brings it under the CMX budget.
//!
//! The peak memory of any execution order is the heaviest set of mutually
//! unordered tasks (a maximum weight antichain). It is computed as a minimum
//! flow with lower bounds: every task is split into an `in` and an `out`
//! node joined by an arc that must carry at least the task's footprint, and
//! every dependency becomes an unbounded `out -> in` arc. Starting from the
//! flow that routes each task's footprint straight from source to sink, the
//! maximum flow that can be pushed back from sink to source is removed; what
//! remains is the minimum feasible flow, whose value is the cut weight.

use std::{cmp::Reverse, collections::VecDeque};

use itertools::Itertools;
use petgraph::{
    stable_graph::StableGraph,
    visit::{EdgeRef, IntoEdgeReferences, NodeIndexable},
};
use tracing::{debug, info, trace};

use crate::{
    error::{Resource, Result, ScheduleError, Stage},
    graph::{TaskGraph, TaskId},
    trace::LogContext,
};

const UNBOUNDED: u64 = u64::MAX / 4;

/// Heaviest topological frontier of a graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MaxTopologicalCut {
    /// Bytes of CMX alive on the frontier
    pub weight: u64,
    /// Tasks on the frontier, sorted by id
    pub tasks: Vec<TaskId>,
    /// Dependencies crossing the frontier
    pub edges: Vec<(TaskId, TaskId)>,
}

#[derive(Debug, Clone, Copy)]
struct Arc {
    to: usize,
    residual: u64,
}

/// Residual network for Dinic's algorithm. Arc `e ^ 1` is the reverse of `e`.
#[derive(Debug, Clone, Default)]
struct FlowNetwork {
    arcs: Vec<Arc>,
    adjacency: Vec<Vec<usize>>,
}

impl FlowNetwork {
    fn with_nodes(count: usize) -> Self {
        Self {
            arcs: vec![],
            adjacency: vec![vec![]; count],
        }
    }

    fn add_arc(&mut self, from: usize, to: usize, forward: u64, backward: u64) {
        self.adjacency[from].push(self.arcs.len());
        self.arcs.push(Arc {
            to,
            residual: forward,
        });
        self.adjacency[to].push(self.arcs.len());
        self.arcs.push(Arc {
            to: from,
            residual: backward,
        });
    }

    fn levels(&self, source: usize) -> Vec<Option<usize>> {
        let mut level = vec![None; self.adjacency.len()];
        level[source] = Some(0);
        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            for &e in &self.adjacency[v] {
                let arc = self.arcs[e];
                if arc.residual > 0 && level[arc.to].is_none() {
                    level[arc.to] = level[v].map(|l| l + 1);
                    queue.push_back(arc.to);
                }
            }
        }
        level
    }

    fn augment(
        &mut self,
        v: usize,
        sink: usize,
        limit: u64,
        level: &[Option<usize>],
        next: &mut [usize],
    ) -> u64 {
        if v == sink {
            return limit;
        }
        while next[v] < self.adjacency[v].len() {
            let e = self.adjacency[v][next[v]];
            let arc = self.arcs[e];
            let deeper = matches!((level[v], level[arc.to]), (Some(a), Some(b)) if b == a + 1);
            if arc.residual > 0 && deeper {
                let pushed = self.augment(arc.to, sink, limit.min(arc.residual), level, next);
                if pushed > 0 {
                    self.arcs[e].residual -= pushed;
                    self.arcs[e ^ 1].residual += pushed;
                    return pushed;
                }
            }
            next[v] += 1;
        }
        0
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> u64 {
        let mut total = 0;
        loop {
            let level = self.levels(source);
            if level[sink].is_none() {
                return total;
            }
            let mut next = vec![0; self.adjacency.len()];
            loop {
                let pushed = self.augment(source, sink, UNBOUNDED, &level, &mut next);
                if pushed == 0 {
                    break;
                }
                total += pushed;
            }
        }
    }

    fn reachable(&self, from: usize) -> Vec<bool> {
        self.levels(from).into_iter().map(|l| l.is_some()).collect()
    }
}

#[derive(Debug, Clone)]
struct CutNode {
    name: String,
    footprint: u64,
}

/// Working copy of a task graph, weighted by CMX footprint, that partial
/// serialisation edges are added to before they are committed.
#[derive(Debug, Clone)]
pub struct MaxCutEngine {
    flow_graph: StableGraph<CutNode, ()>,
    /// Position of every task in a topological order of the working copy
    rank: Vec<usize>,
    budget: u64,
    serialisation_edges: Vec<(TaskId, TaskId)>,
    log: LogContext,
}

impl MaxCutEngine {
    pub fn from_graph(graph: &TaskGraph, budget: u64, log: &LogContext) -> Result<Self> {
        let flow_graph = graph.graph.map(
            |_, task| CutNode {
                name: task.name.clone(),
                footprint: task.cmx_footprint(),
            },
            |_, _| (),
        );
        let order = graph.topological_order()?;
        let mut rank = vec![0; flow_graph.node_bound()];
        for (position, id) in order.into_iter().enumerate() {
            rank[id.index()] = position;
        }
        Ok(Self {
            flow_graph,
            rank,
            budget,
            serialisation_edges: vec![],
            log: log.clone(),
        })
    }

    pub fn budget(&self) -> u64 {
        self.budget
    }

    pub fn footprint(&self, id: TaskId) -> u64 {
        self.flow_graph[id].footprint
    }

    /// Edges added by [`MaxCutEngine::perform_partial_serialisation`] and not
    /// yet committed.
    pub fn partial_serialisation_edges(&self) -> &[(TaskId, TaskId)] {
        &self.serialisation_edges
    }

    pub fn calculate_max_topological_cut(&self) -> MaxTopologicalCut {
        let _span = self.log.enter();
        let bound = self.flow_graph.node_bound();
        let (source, sink) = (2 * bound, 2 * bound + 1);
        let task_in = |id: TaskId| 2 * id.index();
        let task_out = |id: TaskId| 2 * id.index() + 1;

        let mut network = FlowNetwork::with_nodes(2 * bound + 2);
        let mut total = 0;
        for id in self.flow_graph.node_indices() {
            let w = self.flow_graph[id].footprint;
            total += w;
            // Residuals of the initial flow: w units on source -> in -> out -> sink,
            // with the split arc's lower bound equal to its flow.
            network.add_arc(source, task_in(id), UNBOUNDED, w);
            network.add_arc(task_in(id), task_out(id), UNBOUNDED, 0);
            network.add_arc(task_out(id), sink, UNBOUNDED, w);
        }
        for edge in self.flow_graph.edge_references() {
            network.add_arc(task_out(edge.source()), task_in(edge.target()), UNBOUNDED, 0);
        }

        let reduction = network.max_flow(sink, source);
        let weight = total - reduction;

        let reached = network.reachable(sink);
        let tasks = self
            .flow_graph
            .node_indices()
            .filter(|&id| !reached[task_in(id)] && reached[task_out(id)])
            .sorted()
            .collect_vec();
        let edges = self
            .flow_graph
            .edge_references()
            .filter(|e| !reached[task_out(e.source())] && reached[task_in(e.target())])
            .map(|e| (e.source(), e.target()))
            .collect_vec();
        debug_assert_eq!(
            weight,
            tasks.iter().map(|&t| self.footprint(t)).sum::<u64>(),
            "cut weight disagrees with its frontier"
        );
        trace!(
            target: "vpusched::cut",
            weight,
            frontier = tasks.len(),
            crossing = edges.len(),
            "computed max topological cut"
        );
        MaxTopologicalCut {
            weight,
            tasks,
            edges,
        }
    }

    /// Order the two heaviest tasks of the frontier, earlier topological
    /// rank first.
    ///
    /// Fails when the frontier has fewer than two tasks that hold memory,
    /// since no ordering edge can then lower the peak.
    pub fn perform_partial_serialisation(
        &mut self,
        cut: &MaxTopologicalCut,
    ) -> Result<(TaskId, TaskId)> {
        let _span = self.log.enter();
        let heaviest = cut
            .tasks
            .iter()
            .copied()
            .filter(|&t| self.footprint(t) > 0)
            .sorted_by_key(|&t| (Reverse(self.footprint(t)), t))
            .collect_vec();
        let &[first, second, ..] = heaviest.as_slice() else {
            let (task, required) = match heaviest.first() {
                Some(&t) => (self.flow_graph[t].name.clone(), self.footprint(t)),
                None => ("<empty frontier>".to_string(), cut.weight),
            };
            return Err(ScheduleError::infeasible(
                Stage::MaxTopologicalCut,
                task,
                Resource::Cmx,
                required,
                self.budget,
            ));
        };
        let (from, to) = if self.rank[first.index()] < self.rank[second.index()] {
            (first, second)
        } else {
            (second, first)
        };
        assert!(
            !petgraph::algo::has_path_connecting(&self.flow_graph, to, from, None),
            "frontier tasks '{}' and '{}' are already ordered",
            self.flow_graph[to].name,
            self.flow_graph[from].name
        );
        self.flow_graph.add_edge(from, to, ());
        self.serialisation_edges.push((from, to));
        debug!(
            target: "vpusched::cut",
            from = %self.flow_graph[from].name,
            to = %self.flow_graph[to].name,
            "serialised frontier pair"
        );
        Ok((from, to))
    }

    /// Serialise until the peak fits the budget.
    pub fn serialise_to_budget(&mut self) -> Result<MaxTopologicalCut> {
        loop {
            let cut = self.calculate_max_topological_cut();
            if cut.weight <= self.budget {
                return Ok(cut);
            }
            {
                let _span = self.log.enter();
                info!(
                    target: "vpusched::cut",
                    weight_kb = cut.weight / 1024,
                    budget_kb = self.budget / 1024,
                    percent = cut.weight * 100 / self.budget.max(1),
                    "peak memory exceeds CMX, serialising"
                );
            }
            self.perform_partial_serialisation(&cut)?;
        }
    }

    /// Commit the serialisation edges to `graph` as control edges.
    pub fn insert_partial_serialisation_edges(&mut self, graph: &mut TaskGraph) -> usize {
        self.serialisation_edges
            .drain(..)
            .filter(|&(from, to)| graph.add_control_edge(from, to))
            .count()
    }
}

/// Bound the graph's peak CMX use by `budget`, adding control edges as
/// needed, and return the resulting peak cut.
#[tracing::instrument(skip_all, fields(budget = budget))]
pub fn max_topological_cut_and_partial_serialisation(
    graph: &mut TaskGraph,
    budget: u64,
    log: &LogContext,
) -> Result<MaxTopologicalCut> {
    let mut engine = MaxCutEngine::from_graph(graph, budget, log)?;
    let initial = engine.calculate_max_topological_cut();
    {
        let _span = log.enter();
        info!(
            target: "vpusched::cut",
            weight_kb = initial.weight.div_ceil(1024),
            budget_kb = budget / 1024,
            percent = initial.weight * 100 / budget.max(1),
            "network requires peak CMX"
        );
    }
    engine.serialise_to_budget()?;
    let inserted = engine.insert_partial_serialisation_edges(graph);

    let recheck = MaxCutEngine::from_graph(graph, budget, log)?.calculate_max_topological_cut();
    if recheck.weight > budget {
        let task = recheck
            .tasks
            .iter()
            .max_by_key(|&&t| (graph.task(t).cmx_footprint(), Reverse(t)))
            .map(|&t| graph.task(t).name.clone())
            .unwrap_or_default();
        return Err(ScheduleError::infeasible(
            Stage::MaxTopologicalCut,
            task,
            Resource::Cmx,
            recheck.weight,
            budget,
        ));
    }
    let _span = log.enter();
    info!(
        target: "vpusched::cut",
        inserted,
        weight_kb = recheck.weight.div_ceil(1024),
        "peak CMX fits after partial serialisation"
    );
    Ok(recheck)
}
