//! Prefetch hints: DMAs that may run alongside an earlier compute task.
//!
//! A DMA is pulled ahead of its slot when every task it depends on already
//! ran before the compute task, the CMX left free in every step between the
//! two can hold it, and it stays within the configured level and time
//! window. The hints are replayed by a second list-scheduling run, which
//! still checks every resource.

use std::collections::BTreeMap;

use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::{
    allocator::Interval,
    config::PrefetchLimits,
    graph::{Task, TaskGraph, TaskId, TaskKind},
    scheduler::ScheduledTask,
    trace::LogContext,
};

/// DMAs to start together with each compute task, in schedule order.
pub type PrefetchEdges = BTreeMap<TaskId, Vec<TaskId>>;

fn is_prefetch_sink(task: &Task) -> bool {
    matches!(task.kind, TaskKind::Compute { .. }) && task.cmx_footprint() > 0
}

fn is_data_op(task: &Task) -> bool {
    task.kind == TaskKind::Dma && task.cmx_footprint() > 0
}

/// Find the DMAs of `scheduled` that could overlap an earlier compute task.
#[tracing::instrument(skip_all)]
pub fn generate_prefetch_edges(
    graph: &TaskGraph,
    scheduled: &[ScheduledTask],
    cmx_size: u64,
    limits: &PrefetchLimits,
    log: &LogContext,
) -> PrefetchEdges {
    let order = scheduled
        .iter()
        .sorted_by_key(|op| (op.time, op.task))
        .collect_vec();
    let time: FxHashMap<TaskId, usize> = order.iter().map(|op| (op.task, op.time)).collect();
    let mut free: BTreeMap<usize, u64> = BTreeMap::new();
    for op in &order {
        let held: u64 = op.resources.iter().map(Interval::len).sum();
        let room = free.entry(op.time).or_insert(cmx_size);
        *room = room.saturating_sub(held);
    }

    let _span = log.enter();
    let mut prefetched = FxHashSet::default();
    let mut edges = PrefetchEdges::new();
    for (at, compute) in order.iter().enumerate() {
        if !is_prefetch_sink(graph.task(compute.task)) {
            continue;
        }
        let mut level = 1;
        for data in &order[at + 1..] {
            let task = graph.task(data.task);
            if is_prefetch_sink(task) {
                level += 1;
            }
            if !is_data_op(task) {
                continue;
            }
            let preds = graph.predecessors(data.task);
            let limit = if preds.is_empty() {
                limits.const_levels
            } else {
                limits.activation_levels
            };
            if level > limit || data.time - compute.time > limits.time_window {
                break;
            }
            if data.time == compute.time
                || prefetched.contains(&data.task)
                || preds.iter().any(|p| time[p] >= compute.time)
            {
                continue;
            }
            let size = task.cmx_footprint();
            let room = free
                .range(compute.time..data.time)
                .map(|(_, &f)| f)
                .min()
                .unwrap_or(0);
            if size >= room {
                continue;
            }
            for (_, f) in free.range_mut(compute.time..data.time) {
                *f -= size;
            }
            prefetched.insert(data.task);
            edges.entry(compute.task).or_default().push(data.task);
            trace!(
                target: "vpusched::prefetch",
                data = %task.name,
                compute = %graph.task(compute.task).name,
                time_diff = data.time - compute.time,
                level,
                "data op fits during compute"
            );
        }
    }
    debug!(
        target: "vpusched::prefetch",
        edges = prefetched.len(),
        "prefetch edges"
    );
    edges
}
