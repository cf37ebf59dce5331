//! Ordering edges derived from a finished schedule.
//!
//! Every edge added here runs from an earlier time step to a later one, and
//! the schedule already orders every existing edge forward in time, so no
//! insertion can close a cycle.

use std::collections::BTreeMap;

use itertools::Itertools;
use tracing::debug;

use crate::{
    allocator::Interval,
    config::ControlEdgePolicy,
    graph::{MemorySpace, TaskGraph, TaskId},
    scheduler::ScheduledTask,
    trace::LogContext,
};

fn by_time<'s>(
    scheduled: impl IntoIterator<Item = &'s ScheduledTask>,
) -> BTreeMap<usize, Vec<TaskId>> {
    let mut steps: BTreeMap<usize, Vec<TaskId>> = BTreeMap::new();
    for op in scheduled {
        steps.entry(op.time).or_default().push(op.task);
    }
    steps
}

fn connect_adjacent_steps(graph: &mut TaskGraph, steps: &BTreeMap<usize, Vec<TaskId>>) -> usize {
    steps
        .values()
        .tuple_windows()
        .map(|(earlier, later)| {
            earlier
                .iter()
                .cartesian_product(later)
                .filter(|&(&from, &to)| graph.add_control_edge(from, to))
                .count()
        })
        .sum()
}

/// Order every task of a time step before every task of the next occupied step.
#[tracing::instrument(skip_all)]
pub fn insert_dependencies_basic(
    graph: &mut TaskGraph,
    scheduled: &[ScheduledTask],
    log: &LogContext,
) -> usize {
    let inserted = connect_adjacent_steps(graph, &by_time(scheduled));
    let _span = log.enter();
    debug!(target: "vpusched::control_edges", inserted, "basic control edges");
    inserted
}

/// [`insert_dependencies_basic`] restricted to tasks that touch DDR buffers.
#[tracing::instrument(skip_all)]
pub fn insert_dependencies_basic_for_non_cmx_resources(
    graph: &mut TaskGraph,
    scheduled: &[ScheduledTask],
    log: &LogContext,
) -> usize {
    let steps = by_time(
        scheduled
            .iter()
            .filter(|op| graph.task(op.task).touches(MemorySpace::Ddr)),
    );
    let inserted = connect_adjacent_steps(graph, &steps);
    let _span = log.enter();
    debug!(target: "vpusched::control_edges", inserted, "non-CMX control edges");
    inserted
}

/// Last task to have used each CMX byte range.
#[derive(Debug, Default)]
struct RegionOwners {
    /// Disjoint `(begin, end, owner)` segments, sorted by begin
    segments: Vec<(u64, u64, TaskId)>,
}

impl RegionOwners {
    fn owners(&self, interval: &Interval) -> impl Iterator<Item = TaskId> + '_ {
        let (begin, end) = (interval.begin, interval.end);
        self.segments
            .iter()
            .filter(move |&&(b, e, _)| b < end && begin < e)
            .map(|&(_, _, owner)| owner)
    }

    fn claim(&mut self, interval: &Interval, task: TaskId) {
        let (begin, end) = (interval.begin, interval.end);
        let mut segments = Vec::with_capacity(self.segments.len() + 2);
        for &(b, e, owner) in &self.segments {
            if e <= begin || end <= b {
                segments.push((b, e, owner));
                continue;
            }
            if b < begin {
                segments.push((b, begin, owner));
            }
            if end < e {
                segments.push((end, e, owner));
            }
        }
        segments.push((begin, end, task));
        segments.sort_unstable_by_key(|&(b, _, _)| b);
        self.segments = segments;
    }
}

/// Order each task after the most recent earlier users of the CMX ranges it
/// reuses. Tasks with disjoint ranges stay unordered.
#[tracing::instrument(skip_all)]
pub fn insert_memory_control_edges(
    graph: &mut TaskGraph,
    scheduled: &[ScheduledTask],
    log: &LogContext,
) -> usize {
    let mut owners = RegionOwners::default();
    let mut inserted = 0;
    let steps: BTreeMap<usize, Vec<&ScheduledTask>> =
        scheduled.iter().fold(BTreeMap::new(), |mut steps, op| {
            steps.entry(op.time).or_insert_with(Vec::new).push(op);
            steps
        });
    for ops in steps.values() {
        for op in ops {
            let earlier = op
                .resources
                .iter()
                .filter(|i| !i.is_empty())
                .flat_map(|i| owners.owners(i))
                .sorted()
                .dedup()
                .collect_vec();
            inserted += earlier
                .into_iter()
                .filter(|&from| graph.add_control_edge(from, op.task))
                .count();
        }
        for op in ops {
            for interval in op.resources.iter().filter(|i| !i.is_empty()) {
                owners.claim(interval, op.task);
            }
        }
    }
    let _span = log.enter();
    debug!(target: "vpusched::control_edges", inserted, "memory control edges");
    inserted
}

/// Apply the configured control-edge policy.
pub fn insert_control_edges(
    policy: ControlEdgePolicy,
    graph: &mut TaskGraph,
    scheduled: &[ScheduledTask],
    log: &LogContext,
) -> usize {
    match policy {
        ControlEdgePolicy::None => 0,
        ControlEdgePolicy::Basic => insert_dependencies_basic(graph, scheduled, log),
        ControlEdgePolicy::BasicNonCmx => {
            insert_dependencies_basic_for_non_cmx_resources(graph, scheduled, log)
        }
        ControlEdgePolicy::MemoryAware => insert_memory_control_edges(graph, scheduled, log),
    }
}
