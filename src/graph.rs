use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    ops::{Deref, DerefMut},
};

use itertools::Itertools;
use petgraph::{
    Direction,
    stable_graph::StableGraph,
    visit::{EdgeRef, IntoEdgeReferences},
};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Result, ScheduleError},
    prelude::NodeIndex,
};

/// Dense arena index of a task. Stays valid while edges are added.
pub type TaskId = NodeIndex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    /// On-chip scratch memory, the constrained resource.
    Cmx,
    Ddr,
}

/// A buffer a task reads or writes while it executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buffer {
    pub name: String,
    pub size: u64,
    pub space: MemorySpace,
    /// Fixed placement decided upstream. CMX buffers are placed by the scheduler.
    pub offset: Option<u64>,
}

impl Buffer {
    pub fn cmx(name: impl ToString, size: u64) -> Self {
        Self {
            name: name.to_string(),
            size,
            space: MemorySpace::Cmx,
            offset: None,
        }
    }

    pub fn ddr(name: impl ToString, size: u64) -> Self {
        Self {
            name: name.to_string(),
            size,
            space: MemorySpace::Ddr,
            offset: None,
        }
    }

    pub fn at(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// DPU workload split into `variants` hardware invariants.
    Compute { variants: usize },
    Dma,
    /// UPA/SHAVE kernel.
    Software,
    /// Ordering marker with no hardware work attached.
    Control,
}

impl TaskKind {
    /// Producer slots the task occupies on the barrier it updates.
    pub fn barrier_demand(&self) -> usize {
        match self {
            TaskKind::Compute { variants } => (*variants).max(1),
            TaskKind::Dma | TaskKind::Software => 1,
            TaskKind::Control => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub name: String,
    pub kind: TaskKind,
    pub buffers: Vec<Buffer>,
    /// Time step assigned by the scheduler
    pub time: Option<usize>,
    /// Position in the emitted instruction stream
    pub scheduling_number: Option<usize>,
    /// Virtual barriers the task waits on before starting
    pub wait_barriers: Vec<usize>,
    /// Virtual barriers the task posts when it completes
    pub update_barriers: Vec<usize>,
}

impl Task {
    pub fn new(name: impl ToString, kind: TaskKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            buffers: vec![],
            time: None,
            scheduling_number: None,
            wait_barriers: vec![],
            update_barriers: vec![],
        }
    }

    pub fn compute(name: impl ToString, variants: usize) -> Self {
        Self::new(name, TaskKind::Compute { variants })
    }

    pub fn dma(name: impl ToString) -> Self {
        Self::new(name, TaskKind::Dma)
    }

    pub fn software(name: impl ToString) -> Self {
        Self::new(name, TaskKind::Software)
    }

    pub fn control(name: impl ToString) -> Self {
        Self::new(name, TaskKind::Control)
    }

    pub fn with_buffer(mut self, buffer: Buffer) -> Self {
        self.buffers.push(buffer);
        self
    }

    /// Attach an anonymous CMX buffer of `size` bytes.
    pub fn with_cmx(self, size: u64) -> Self {
        let name = format!("{}.cmx{}", self.name, self.buffers.len());
        self.with_buffer(Buffer::cmx(name, size))
    }

    /// Attach an anonymous DDR buffer of `size` bytes.
    pub fn with_ddr(self, size: u64) -> Self {
        let name = format!("{}.ddr{}", self.name, self.buffers.len());
        self.with_buffer(Buffer::ddr(name, size))
    }

    pub fn footprint(&self, space: MemorySpace) -> u64 {
        self.buffers
            .iter()
            .filter(|b| b.space == space)
            .map(|b| b.size)
            .sum()
    }

    pub fn cmx_footprint(&self) -> u64 {
        self.footprint(MemorySpace::Cmx)
    }

    pub fn touches(&self, space: MemorySpace) -> bool {
        self.buffers.iter().any(|b| b.space == space)
    }

    pub fn barrier_demand(&self) -> usize {
        self.kind.barrier_demand()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// Produced by the upstream lowering.
    Data,
    /// Inserted by the scheduler to bound memory or pin an order.
    Control,
}

/// A DAG of hardware tasks.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    pub graph: StableGraph<Task, Dependency>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task to the graph, and get back a NewTask to wire its inputs
    ///
    /// ```rust
    /// # use vpusched::prelude::*;
    /// let mut graph = TaskGraph::new();
    /// let load = graph.add_task(Task::dma("load").with_cmx(1024)).finish();
    /// let conv = graph
    ///     .add_task(Task::compute("conv", 4).with_cmx(2048))
    ///     .after(load)
    ///     .finish();
    /// assert_eq!(graph.predecessors(conv), vec![load]);
    /// ```
    pub fn add_task(&mut self, task: Task) -> NewTask<'_> {
        NewTask {
            new_task_id: self.graph.add_node(task),
            graph_ref: self,
        }
    }

    /// Add a data dependency. Repeated dependencies are ignored.
    pub fn add_dependency(&mut self, from: TaskId, to: TaskId) {
        assert_ne!(
            from, to,
            "task '{}' cannot depend on itself",
            self.graph[from].name
        );
        if self.graph.find_edge(from, to).is_none() {
            self.graph.add_edge(from, to, Dependency::Data);
        }
    }

    /// Add an ordering edge, returning false if the pair was already ordered
    /// by a direct edge.
    ///
    /// Panics if the edge would close a cycle.
    pub fn add_control_edge(&mut self, from: TaskId, to: TaskId) -> bool {
        if self.graph.find_edge(from, to).is_some() {
            return false;
        }
        assert!(
            from != to && !self.has_path(to, from),
            "control edge '{}' -> '{}' closes a cycle",
            self.graph[from].name,
            self.graph[to].name
        );
        self.graph.add_edge(from, to, Dependency::Control);
        true
    }

    pub fn task(&self, id: TaskId) -> &Task {
        &self.graph[id]
    }

    pub fn task_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.graph[id]
    }

    pub fn find_task(&self, name: &str) -> Option<TaskId> {
        self.graph
            .node_indices()
            .find(|&id| self.graph[id].name == name)
    }

    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.graph.node_indices()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Every edge as `(from, to, kind)`, in insertion order.
    pub fn dependencies(&self) -> impl Iterator<Item = (TaskId, TaskId, Dependency)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (e.source(), e.target(), *e.weight()))
    }

    pub fn control_edge_count(&self) -> usize {
        self.graph
            .edge_weights()
            .filter(|d| **d == Dependency::Control)
            .count()
    }

    /// Get the upstream tasks of a task, sorted by id
    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Get the downstream tasks of a task, sorted by id
    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.neighbors(id, Direction::Outgoing)
    }

    fn neighbors(&self, id: TaskId, direction: Direction) -> Vec<TaskId> {
        self.graph
            .neighbors_directed(id, direction)
            .sorted()
            .dedup()
            .collect()
    }

    pub fn has_path(&self, from: TaskId, to: TaskId) -> bool {
        petgraph::algo::has_path_connecting(&self.graph, from, to, None)
    }

    pub fn total_footprint(&self, space: MemorySpace) -> u64 {
        self.graph.node_weights().map(|t| t.footprint(space)).sum()
    }

    /// Kahn order with ties broken by lowest task id.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        toposort(&self.graph).map_err(|task| ScheduleError::CyclicGraph {
            task: self.graph[task].name.clone(),
        })
    }

    /// Longest-path depth of every task from the graph's sources.
    pub fn levels(&self) -> Result<FxHashMap<TaskId, usize>> {
        let mut levels = FxHashMap::default();
        for id in self.topological_order()? {
            let level = self
                .graph
                .neighbors_directed(id, Direction::Incoming)
                .map(|p| levels[&p] + 1)
                .max()
                .unwrap_or(0);
            levels.insert(id, level);
        }
        Ok(levels)
    }
}

impl Deref for TaskGraph {
    type Target = StableGraph<Task, Dependency>;
    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl DerefMut for TaskGraph {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}

pub struct NewTask<'a> {
    new_task_id: TaskId,
    graph_ref: &'a mut TaskGraph,
}

impl NewTask<'_> {
    pub fn finish(self) -> TaskId {
        self.new_task_id
    }

    pub fn after(self, id: TaskId) -> Self {
        self.graph_ref.add_dependency(id, self.new_task_id);
        self
    }

    pub fn after_all(self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        ids.into_iter().fold(self, |new, id| new.after(id))
    }
}

/// Deterministic topological sort of any stable graph.
///
/// On a cycle, returns a node that could not be ordered.
pub(crate) fn toposort<N, E>(
    graph: &StableGraph<N, E>,
) -> std::result::Result<Vec<NodeIndex>, NodeIndex> {
    let mut indegree: FxHashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|n| (n, graph.edges_directed(n, Direction::Incoming).count()))
        .collect();
    let mut ready: BinaryHeap<(Reverse<usize>, NodeIndex)> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(n, _)| (Reverse(n.index()), *n))
        .collect();
    let mut order = Vec::with_capacity(indegree.len());
    while let Some((_, node)) = ready.pop() {
        order.push(node);
        for edge in graph.edges_directed(node, Direction::Outgoing) {
            let succ = edge.target();
            let d = indegree
                .get_mut(&succ)
                .expect("successor missing from indegree table");
            *d -= 1;
            if *d == 0 {
                ready.push((Reverse(succ.index()), succ));
            }
        }
    }
    if order.len() == indegree.len() {
        Ok(order)
    } else {
        let stuck = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(n, _)| n)
            .min()
            .unwrap_or_default();
        Err(stuck)
    }
}
