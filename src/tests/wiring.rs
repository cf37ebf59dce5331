use std::collections::BTreeSet;

use crate::{
    barrier_wiring::{remove_redundant_barriers, remove_redundant_dependencies},
    prelude::*,
    verify::verify_barriers,
};

use super::chain;

fn barrier(id: usize, producers: &[TaskId], consumers: &[TaskId]) -> VirtualBarrier {
    VirtualBarrier {
        id,
        physical: BarrierId(1),
        producers: producers.iter().copied().collect(),
        consumers: consumers.iter().copied().collect(),
    }
}

fn set(ids: &[TaskId]) -> BTreeSet<TaskId> {
    ids.iter().copied().collect()
}

#[test]
fn test_chain_reuses_one_physical_barrier() {
    let (mut graph, t) = chain(&[64, 64, 64]);
    let config = SchedulerConfig::default().with_control_edges(ControlEdgePolicy::None);
    let schedule = schedule(&mut graph, &config, &LogContext::disabled()).unwrap();

    assert_eq!(schedule.barriers.len(), 2);
    assert_eq!(schedule.barriers[0].producers, set(&[t[0]]));
    assert_eq!(schedule.barriers[0].consumers, set(&[t[1]]));
    assert_eq!(schedule.barriers[1].producers, set(&[t[1]]));
    assert_eq!(schedule.barriers[1].consumers, set(&[t[2]]));
    assert!(schedule.barriers.iter().all(|b| b.physical == BarrierId(1)));

    assert_eq!(graph.task(t[0]).update_barriers, vec![0]);
    assert!(graph.task(t[0]).wait_barriers.is_empty());
    assert_eq!(graph.task(t[1]).wait_barriers, vec![0]);
    assert_eq!(graph.task(t[1]).update_barriers, vec![1]);
    assert_eq!(graph.task(t[2]).wait_barriers, vec![1]);
    assert!(graph.task(t[2]).update_barriers.is_empty());
}

#[test]
fn test_marker_is_looked_through() {
    let mut graph = TaskGraph::new();
    let load = graph.add_task(Task::dma("load").with_cmx(64)).finish();
    let sync = graph.add_task(Task::control("sync")).after(load).finish();
    let conv = graph
        .add_task(Task::compute("conv", 2).with_cmx(64))
        .after(sync)
        .finish();
    let schedule = schedule(&mut graph, &SchedulerConfig::default(), &LogContext::disabled()).unwrap();
    let posted = schedule
        .barriers
        .iter()
        .find(|b| b.producers.contains(&load))
        .unwrap();
    assert!(posted.consumers.contains(&conv) || posted.consumers.contains(&sync));
    assert!(graph.task(conv).wait_barriers.contains(&posted.id));
    verify_barriers(&graph, &schedule.tasks, &schedule.barriers).unwrap();
}

#[test]
fn test_consumer_implied_by_another_is_dropped() {
    let (graph, t) = chain(&[64, 64, 64]);
    let mut barriers = vec![
        barrier(0, &[t[0]], &[t[1], t[2]]),
        barrier(1, &[t[1]], &[t[2]]),
    ];
    remove_redundant_dependencies(&graph, &mut barriers);
    assert_eq!(barriers[0].consumers, set(&[t[1]]));
    assert_eq!(barriers[1].consumers, set(&[t[2]]));
}

#[test]
fn test_barriers_with_same_consumers_merge() {
    let (_, t) = chain(&[64, 64, 64, 64]);
    let merged = remove_redundant_barriers(vec![
        barrier(0, &[t[0]], &[t[2]]),
        barrier(1, &[], &[t[3]]),
        barrier(2, &[t[1]], &[t[2]]),
        barrier(3, &[t[2]], &[]),
        barrier(4, &[t[2]], &[t[3]]),
    ]);
    assert_eq!(merged.len(), 2);
    assert_eq!(merged[0].id, 0);
    assert_eq!(merged[0].producers, set(&[t[0], t[1]]));
    assert_eq!(merged[1].id, 1);
    assert_eq!(merged[1].producers, set(&[t[2]]));
}

#[test]
fn test_unenforced_dependency_is_reported() {
    let (graph, t) = chain(&[64, 64]);
    let scheduled: Vec<ScheduledTask> = t
        .iter()
        .enumerate()
        .map(|(time, &task)| ScheduledTask {
            task,
            time,
            barrier: Some(BarrierId(1)),
            producer_slots: 1,
            resources: vec![],
        })
        .collect();
    assert!(matches!(
        verify_barriers(&graph, &scheduled, &[]),
        Err(VerificationError::UnenforcedDependency { .. })
    ));
    assert!(matches!(
        verify_barriers(&graph, &scheduled, &[barrier(0, &[t[1]], &[t[0]])]),
        Err(VerificationError::BarrierOrder { .. })
    ));
    verify_barriers(&graph, &scheduled, &[barrier(0, &[t[0]], &[t[1]])]).unwrap();
}
