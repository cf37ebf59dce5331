use crate::prelude::*;
use proptest::prelude::*;
use rand::{Rng, SeedableRng, rngs::StdRng};

use super::{assert_topological, dag_strategy, diamond, random_dag};

fn policy(index: usize) -> ControlEdgePolicy {
    [
        ControlEdgePolicy::None,
        ControlEdgePolicy::Basic,
        ControlEdgePolicy::BasicNonCmx,
        ControlEdgePolicy::MemoryAware,
    ][index % 4]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]
    #[test]
    fn test_schedule_is_topological_and_fits((weights, edges) in dag_strategy(14), slack in 0u64..8, policy_index in 0usize..4) {
        let mut graph = random_dag(&weights, &edges);
        let largest = weights.iter().copied().max().unwrap_or(0).max(64);
        let budget = largest + slack * 64;
        let config = SchedulerConfig::default()
            .with_cmx_size(budget)
            .with_barriers(2, 4)
            .with_control_edges(policy(policy_index));
        let edges_before = graph.dependencies().count();

        let schedule = schedule(&mut graph, &config, &LogContext::disabled()).unwrap();

        assert_topological(&graph, &schedule.tasks);
        prop_assert!(graph.topological_order().is_ok());
        prop_assert!(graph.dependencies().count() >= edges_before);
        prop_assert!(schedule.peak_cut.weight <= budget);
        for time in 0..schedule.makespan {
            let used: u64 = schedule
                .tasks_at(time)
                .map(|op| graph.task(op.task).cmx_footprint())
                .sum();
            prop_assert!(used <= budget);
        }
        for op in &schedule.tasks {
            prop_assert!(op.producer_slots <= config.max_producer_slots_per_barrier);
            let task = graph.task(op.task);
            prop_assert_eq!(task.time, Some(op.time));
            prop_assert!(task.scheduling_number.is_some());
        }
        for barrier in &schedule.barriers {
            prop_assert!(!barrier.producers.is_empty() && !barrier.consumers.is_empty());
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10))]
    #[test]
    fn test_schedule_is_deterministic((weights, edges) in dag_strategy(14), policy_index in 0usize..4, barriers in 1usize..4) {
        let graph = random_dag(&weights, &edges);
        let largest = weights.iter().copied().max().unwrap_or(0).max(64);
        let config = SchedulerConfig::default()
            .with_cmx_size(largest * 2)
            .with_barriers(barriers, 4)
            .with_control_edges(policy(policy_index));
        let run = || {
            let mut graph = graph.clone();
            let schedule = schedule(&mut graph, &config, &LogContext::disabled()).unwrap();
            let edges = graph.dependencies().collect::<Vec<_>>();
            (schedule, edges)
        };
        let (first, first_edges) = run();
        let (second, second_edges) = run();
        prop_assert_eq!(&first.tasks, &second.tasks);
        prop_assert_eq!(&first.barriers, &second.barriers);
        prop_assert_eq!(first_edges, second_edges);
        prop_assert_eq!(first.prefetched, second.prefetched);
    }
}

#[test]
fn test_diamond_end_to_end() {
    let (mut graph, [a, b, c, d]) = diamond(100, 100);
    let config = SchedulerConfig::default()
        .with_cmx_size(150)
        .with_alignment(1);
    let schedule = schedule(&mut graph, &config, &LogContext::new("diamond")).unwrap();
    assert_eq!(schedule.serialisation_edges, 1);
    assert_eq!(schedule.peak_cut.weight, 100);
    let times: Vec<usize> = [a, b, c, d]
        .iter()
        .map(|&t| schedule.time_of(t).unwrap())
        .collect();
    assert_eq!(times, vec![0, 1, 2, 3]);
    assert_eq!(schedule.makespan, 4);
    assert_eq!(schedule.time_of(NodeIndex::new(42)), None);
    assert_eq!(graph.task(d).scheduling_number, Some(3));
}

#[test]
fn test_infeasible_input_reports_error() {
    let mut graph = TaskGraph::new();
    graph.add_task(Task::compute("huge", 1).with_cmx(4096)).finish();
    let config = SchedulerConfig::default().with_cmx_size(1024);
    let err = schedule(&mut graph, &config, &LogContext::disabled()).unwrap_err();
    assert!(err.is_infeasible());
    assert!(graph.task(graph.find_task("huge").unwrap()).time.is_none());
}

#[test]
fn test_random_network_with_tracing() {
    let _session = vpusched_tracing::subscriber()
        .env_filter("vpusched=debug")
        .try_init();
    let mut rng = StdRng::seed_from_u64(7);
    let mut graph = TaskGraph::new();
    let mut ids: Vec<TaskId> = vec![];
    for i in 0..60 {
        let size = rng.random_range(1..16u64) * 1024;
        let task = if i % 2 == 0 {
            Task::dma(format!("dma{i}")).with_cmx(size).with_ddr(size)
        } else {
            Task::compute(format!("dpu{i}"), rng.random_range(1..6)).with_cmx(size)
        };
        let mut new = graph.add_task(task);
        for &p in &ids {
            if rng.random_bool(0.08) {
                new = new.after(p);
            }
        }
        ids.push(new.finish());
    }
    let config = SchedulerConfig::default().with_cmx_size(48 * 1024);
    let schedule = schedule(&mut graph, &config, &LogContext::new("random")).unwrap();
    assert_eq!(schedule.tasks.len(), 60);
    assert!(schedule.peak_cut.weight <= 48 * 1024);
    assert_topological(&graph, &schedule.tasks);
}
