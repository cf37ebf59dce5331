//! Post-conditions of a finished schedule.

use std::collections::{BTreeMap, VecDeque};

use itertools::Itertools;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    barrier_wiring::VirtualBarrier,
    error::VerificationError,
    graph::{TaskGraph, TaskId},
    scheduler::ScheduledTask,
};

fn times(scheduled: &[ScheduledTask]) -> FxHashMap<TaskId, usize> {
    scheduled.iter().map(|op| (op.task, op.time)).collect()
}

/// Every task is scheduled and every edge points forward in time.
pub fn verify_topological(
    graph: &TaskGraph,
    scheduled: &[ScheduledTask],
) -> Result<(), VerificationError> {
    let time = times(scheduled);
    if let Some(missing) = graph.tasks().find(|id| !time.contains_key(id)) {
        return Err(VerificationError::Unscheduled {
            task: graph.task(missing).name.clone(),
        });
    }
    for (from, to, _) in graph.dependencies() {
        if time[&from] >= time[&to] {
            return Err(VerificationError::DependencyOrder {
                from: graph.task(from).name.clone(),
                to: graph.task(to).name.clone(),
                from_time: time[&from],
                to_time: time[&to],
            });
        }
    }
    Ok(())
}

/// CMX alive in any time step fits the budget, in disjoint ranges.
pub fn verify_memory(
    graph: &TaskGraph,
    scheduled: &[ScheduledTask],
    budget: u64,
) -> Result<(), VerificationError> {
    let steps: BTreeMap<usize, Vec<&ScheduledTask>> =
        scheduled.iter().fold(BTreeMap::new(), |mut steps, op| {
            steps.entry(op.time).or_insert_with(Vec::new).push(op);
            steps
        });
    for (&time, ops) in &steps {
        let used: u64 = ops
            .iter()
            .map(|op| graph.task(op.task).cmx_footprint())
            .sum();
        if used > budget {
            return Err(VerificationError::MemoryOverflow { time, used, budget });
        }
        let held = ops
            .iter()
            .flat_map(|op| op.resources.iter().map(move |i| (op.task, i)))
            .filter(|(_, i)| !i.is_empty())
            .collect_vec();
        if let Some((task, i)) = held.iter().find(|(_, i)| i.end > budget) {
            return Err(VerificationError::OutOfBounds {
                task: graph.task(*task).name.clone(),
                begin: i.begin,
                end: i.end,
                budget,
            });
        }
        for ((a, first), (b, second)) in held.iter().tuple_combinations() {
            if a != b && first.overlaps(second) {
                return Err(VerificationError::OverlappingBuffers {
                    time,
                    first: graph.task(*a).name.clone(),
                    second: graph.task(*b).name.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Barriers have both ends, run producers first, and together enforce
/// every dependency out of a task that posts a barrier.
pub fn verify_barriers(
    graph: &TaskGraph,
    scheduled: &[ScheduledTask],
    barriers: &[VirtualBarrier],
) -> Result<(), VerificationError> {
    let time = times(scheduled);
    for barrier in barriers {
        if barrier.producers.is_empty() {
            return Err(VerificationError::DanglingBarrier {
                barrier: barrier.id,
                role: "producer",
            });
        }
        if barrier.consumers.is_empty() {
            return Err(VerificationError::DanglingBarrier {
                barrier: barrier.id,
                role: "consumer",
            });
        }
        for (&p, &c) in barrier.producers.iter().cartesian_product(&barrier.consumers) {
            if time[&p] >= time[&c] {
                return Err(VerificationError::BarrierOrder {
                    barrier: barrier.id,
                    producer: graph.task(p).name.clone(),
                    consumer: graph.task(c).name.clone(),
                });
            }
        }
    }

    let mut updates: FxHashMap<TaskId, Vec<usize>> = FxHashMap::default();
    for barrier in barriers {
        for &p in &barrier.producers {
            updates.entry(p).or_default().push(barrier.id);
        }
    }
    let producing: FxHashSet<TaskId> = scheduled
        .iter()
        .filter(|op| op.barrier.is_some())
        .map(|op| op.task)
        .collect();
    let by_id: FxHashMap<usize, &VirtualBarrier> = barriers.iter().map(|b| (b.id, b)).collect();
    let waits_for = |from: TaskId, to: TaskId| {
        let mut seen = FxHashSet::default();
        let mut queue = VecDeque::from([from]);
        while let Some(task) = queue.pop_front() {
            for &b in updates.get(&task).into_iter().flatten() {
                for &c in &by_id[&b].consumers {
                    if c == to {
                        return true;
                    }
                    if seen.insert(c) {
                        queue.push_back(c);
                    }
                }
            }
        }
        false
    };
    for (from, to, _) in graph.dependencies() {
        if producing.contains(&from) && !waits_for(from, to) {
            return Err(VerificationError::UnenforcedDependency {
                from: graph.task(from).name.clone(),
                to: graph.task(to).name.clone(),
            });
        }
    }
    Ok(())
}
