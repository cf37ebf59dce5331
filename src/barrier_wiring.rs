//! Turn per-task physical barrier assignments into virtual barriers with
//! explicit producer and consumer sets.
//!
//! A physical barrier is reused over time. Each run of tasks that produce on
//! it in the same time step becomes one virtual barrier: those tasks post it,
//! their graph successors wait on it, and they themselves wait on the
//! previous virtual barrier of the same physical id so the hardware counter
//! is not reprogrammed while still in flight.
//!
//! Tasks that post no barrier (control markers) are transparent: whoever
//! waits on them waits on their producers' barriers instead.

use std::collections::BTreeSet;

use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::{
    barrier::BarrierId,
    graph::{TaskGraph, TaskId},
    scheduler::ScheduledTask,
    trace::LogContext,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualBarrier {
    pub id: usize,
    pub physical: BarrierId,
    pub producers: BTreeSet<TaskId>,
    pub consumers: BTreeSet<TaskId>,
}

/// Reuse history of one physical barrier.
#[derive(Debug, Default)]
struct BarrierTransition {
    time: Option<usize>,
    previous: Option<usize>,
    producers: Vec<TaskId>,
}

pub struct BarrierWiring<'a> {
    graph: &'a TaskGraph,
    transitions: FxHashMap<BarrierId, BarrierTransition>,
    producing: FxHashSet<TaskId>,
    barriers: Vec<VirtualBarrier>,
    log: LogContext,
}

impl<'a> BarrierWiring<'a> {
    pub fn new(graph: &'a TaskGraph, log: &LogContext) -> Self {
        Self {
            graph,
            transitions: FxHashMap::default(),
            producing: FxHashSet::default(),
            barriers: vec![],
            log: log.clone(),
        }
    }

    /// Build the virtual barriers of a schedule, with redundant dependencies
    /// and barriers removed.
    #[tracing::instrument(skip_all)]
    pub fn wire(mut self, scheduled: &[ScheduledTask]) -> Vec<VirtualBarrier> {
        self.producing = scheduled
            .iter()
            .filter(|op| op.barrier.is_some())
            .map(|op| op.task)
            .collect();
        let order = scheduled
            .iter()
            .filter(|op| op.barrier.is_some())
            .sorted_by_key(|op| (op.time, op.task));
        for op in order {
            if let Some(physical) = op.barrier {
                self.process_next_scheduled_op(physical, op.time, op.task);
            }
        }
        let open = self.transitions.keys().copied().sorted().collect_vec();
        for physical in open {
            self.close(physical);
        }
        let created = self.barriers.len();
        let mut barriers = self.barriers;
        remove_redundant_dependencies(self.graph, &mut barriers);
        let barriers = remove_redundant_barriers(barriers);
        let _span = self.log.enter();
        debug!(
            target: "vpusched::barriers",
            created,
            kept = barriers.len(),
            "wired virtual barriers"
        );
        barriers
    }

    fn process_next_scheduled_op(&mut self, physical: BarrierId, time: usize, task: TaskId) {
        let changed = self
            .transitions
            .get(&physical)
            .is_some_and(|t| t.time != Some(time));
        if changed {
            self.close(physical);
        }
        let transition = self.transitions.entry(physical).or_default();
        transition.time = Some(time);
        transition.producers.push(task);
    }

    /// Seal the producers gathered so far into a new virtual barrier.
    fn close(&mut self, physical: BarrierId) {
        let Some(transition) = self.transitions.get_mut(&physical) else {
            return;
        };
        if transition.producers.is_empty() {
            return;
        }
        let producers: BTreeSet<TaskId> = transition.producers.drain(..).collect();
        let consumers = producers
            .iter()
            .flat_map(|&p| hardware_successors(self.graph, &self.producing, p))
            .collect();
        let id = self.barriers.len();
        if let Some(previous) = transition.previous.replace(id) {
            self.barriers[previous].consumers.extend(producers.iter().copied());
        }
        self.barriers.push(VirtualBarrier {
            id,
            physical,
            producers,
            consumers,
        });
    }
}

/// Successors of `task`, looking through tasks that post no barrier.
fn hardware_successors(
    graph: &TaskGraph,
    producing: &FxHashSet<TaskId>,
    task: TaskId,
) -> Vec<TaskId> {
    let mut found = BTreeSet::new();
    let mut stack = graph.successors(task);
    while let Some(next) = stack.pop() {
        if found.insert(next) && !producing.contains(&next) {
            stack.extend(graph.successors(next));
        }
    }
    found.into_iter().collect()
}

/// Drop consumers that already run after another consumer of the same
/// barrier, when that other consumer posts a barrier of its own.
pub fn remove_redundant_dependencies(graph: &TaskGraph, barriers: &mut [VirtualBarrier]) {
    let producing: FxHashSet<TaskId> = barriers
        .iter()
        .flat_map(|b| b.producers.iter().copied())
        .collect();
    for barrier in barriers.iter_mut() {
        let redundant = barrier
            .consumers
            .iter()
            .copied()
            .filter(|&c| {
                barrier
                    .consumers
                    .iter()
                    .any(|&other| {
                        other != c && producing.contains(&other) && graph.has_path(other, c)
                    })
            })
            .collect_vec();
        for c in redundant {
            barrier.consumers.remove(&c);
        }
    }
}

/// Merge barriers waited on by the same consumers and drop barriers nobody
/// posts or waits on. Surviving barriers are renumbered densely.
pub fn remove_redundant_barriers(barriers: Vec<VirtualBarrier>) -> Vec<VirtualBarrier> {
    let mut merged: Vec<VirtualBarrier> = vec![];
    let mut by_consumers: FxHashMap<Vec<TaskId>, usize> = FxHashMap::default();
    for barrier in barriers {
        if barrier.producers.is_empty() || barrier.consumers.is_empty() {
            continue;
        }
        let key = barrier.consumers.iter().copied().collect_vec();
        match by_consumers.get(&key) {
            Some(&at) => merged[at].producers.extend(barrier.producers),
            None => {
                by_consumers.insert(key, merged.len());
                merged.push(barrier);
            }
        }
    }
    for (id, barrier) in merged.iter_mut().enumerate() {
        barrier.id = id;
    }
    merged
}

/// Wait and update barrier ids of every task.
pub fn task_barriers(
    barriers: &[VirtualBarrier],
) -> FxHashMap<TaskId, (Vec<usize>, Vec<usize>)> {
    let mut per_task: FxHashMap<TaskId, (Vec<usize>, Vec<usize>)> = FxHashMap::default();
    for barrier in barriers {
        for &c in &barrier.consumers {
            per_task.entry(c).or_default().0.push(barrier.id);
        }
        for &p in &barrier.producers {
            per_task.entry(p).or_default().1.push(barrier.id);
        }
    }
    per_task
}
