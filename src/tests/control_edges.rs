use crate::prelude::*;

fn op(task: TaskId, time: usize, ranges: &[(u64, u64)]) -> ScheduledTask {
    ScheduledTask {
        task,
        time,
        barrier: Some(BarrierId(1)),
        producer_slots: 1,
        resources: ranges
            .iter()
            .enumerate()
            .map(|(buffer, &(begin, end))| Interval { buffer, begin, end })
            .collect(),
    }
}

/// Unconnected tasks named after their index.
fn independent(count: usize, ddr: &[usize]) -> (TaskGraph, Vec<TaskId>) {
    let mut graph = TaskGraph::new();
    let ids = (0..count)
        .map(|i| {
            let task = Task::dma(format!("t{i}")).with_cmx(64);
            let task = if ddr.contains(&i) { task.with_ddr(64) } else { task };
            graph.add_task(task).finish()
        })
        .collect();
    (graph, ids)
}

#[test]
fn test_basic_orders_adjacent_steps() {
    let (mut graph, t) = independent(4, &[]);
    let scheduled = [
        op(t[0], 0, &[]),
        op(t[1], 0, &[]),
        op(t[2], 2, &[]),
        op(t[3], 5, &[]),
    ];
    let log = LogContext::disabled();
    assert_eq!(insert_dependencies_basic(&mut graph, &scheduled, &log), 3);
    assert!(graph.find_edge(t[0], t[2]).is_some());
    assert!(graph.find_edge(t[1], t[2]).is_some());
    assert!(graph.find_edge(t[2], t[3]).is_some());
    assert!(graph.find_edge(t[0], t[1]).is_none());
    assert_eq!(insert_dependencies_basic(&mut graph, &scheduled, &log), 0);
}

#[test]
fn test_non_cmx_variant_only_orders_ddr_users() {
    let (mut graph, t) = independent(5, &[0, 2, 4]);
    let scheduled = [
        op(t[0], 0, &[]),
        op(t[1], 0, &[]),
        op(t[2], 1, &[]),
        op(t[3], 2, &[]),
        op(t[4], 3, &[]),
    ];
    let inserted =
        insert_dependencies_basic_for_non_cmx_resources(&mut graph, &scheduled, &LogContext::disabled());
    assert_eq!(inserted, 2);
    assert!(graph.find_edge(t[0], t[2]).is_some());
    assert!(graph.find_edge(t[2], t[4]).is_some());
    assert_eq!(graph.control_edge_count(), 2);
}

#[test]
fn test_memory_edges_follow_overlap() {
    let (mut graph, t) = independent(4, &[]);
    let scheduled = [
        op(t[0], 0, &[(0, 100)]),
        op(t[1], 0, &[(100, 200)]),
        op(t[2], 1, &[(0, 50)]),
        op(t[3], 2, &[(150, 300)]),
    ];
    let inserted = insert_memory_control_edges(&mut graph, &scheduled, &LogContext::disabled());
    assert_eq!(inserted, 2);
    assert!(graph.find_edge(t[0], t[2]).is_some());
    assert!(graph.find_edge(t[1], t[3]).is_some());
    assert!(graph.find_edge(t[0], t[1]).is_none());
    assert!(graph.find_edge(t[2], t[3]).is_none());
}

#[test]
fn test_memory_edges_target_most_recent_user() {
    let (mut graph, t) = independent(3, &[]);
    let scheduled = [
        op(t[0], 0, &[(0, 128)]),
        op(t[1], 1, &[(0, 128)]),
        op(t[2], 2, &[(64, 128)]),
    ];
    let inserted = insert_memory_control_edges(&mut graph, &scheduled, &LogContext::disabled());
    assert_eq!(inserted, 2);
    assert!(graph.find_edge(t[0], t[1]).is_some());
    assert!(graph.find_edge(t[1], t[2]).is_some());
    assert!(graph.find_edge(t[0], t[2]).is_none());
}

#[test]
fn test_policy_dispatch() {
    let (mut graph, t) = independent(2, &[]);
    let scheduled = [op(t[0], 0, &[(0, 64)]), op(t[1], 1, &[(0, 64)])];
    let log = LogContext::disabled();
    assert_eq!(
        insert_control_edges(ControlEdgePolicy::None, &mut graph, &scheduled, &log),
        0
    );
    assert_eq!(
        insert_control_edges(ControlEdgePolicy::BasicNonCmx, &mut graph, &scheduled, &log),
        0
    );
    assert_eq!(
        insert_control_edges(ControlEdgePolicy::MemoryAware, &mut graph, &scheduled, &log),
        1
    );
    assert_eq!(
        insert_control_edges(ControlEdgePolicy::Basic, &mut graph, &scheduled, &log),
        0
    );
    assert_eq!(graph.dependencies().count(), 1);
}
