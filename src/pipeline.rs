use itertools::Itertools;
use rustc_hash::FxHashMap;
use tracing::info;

use crate::{
    barrier_wiring::{BarrierWiring, VirtualBarrier, task_barriers},
    config::SchedulerConfig,
    control_edges::insert_control_edges,
    cut::{MaxTopologicalCut, max_topological_cut_and_partial_serialisation},
    error::Result,
    graph::{TaskGraph, TaskId},
    prefetch::generate_prefetch_edges,
    scheduler::{FeasibleScheduler, ScheduledTask},
    trace::LogContext,
    verify::{verify_barriers, verify_memory, verify_topological},
};

/// Everything the scheduling pipeline decided about a graph.
#[derive(Debug, Clone)]
pub struct Schedule {
    /// Scheduling decisions in emission order
    pub tasks: Vec<ScheduledTask>,
    pub barriers: Vec<VirtualBarrier>,
    /// Control edges added to bound peak memory
    pub serialisation_edges: usize,
    /// Prefetch hints handed to the second scheduling run
    pub prefetched: usize,
    /// Control edges added after list scheduling
    pub control_edges: usize,
    /// Peak CMX frontier of the serialised graph
    pub peak_cut: MaxTopologicalCut,
    /// Number of time steps
    pub makespan: usize,
    times: FxHashMap<TaskId, usize>,
}

impl Schedule {
    pub fn time_of(&self, task: TaskId) -> Option<usize> {
        self.times.get(&task).copied()
    }

    pub fn tasks_at(&self, time: usize) -> impl Iterator<Item = &ScheduledTask> + '_ {
        self.tasks.iter().filter(move |op| op.time == time)
    }
}

/// Run the full pipeline: bound peak CMX, list schedule (twice when DMAs can
/// be prefetched), add control edges, wire barriers and record the decisions
/// on `graph`.
///
/// Panics if the resulting schedule breaks its own guarantees.
#[tracing::instrument(skip_all, fields(tasks = graph.len()))]
pub fn schedule(
    graph: &mut TaskGraph,
    config: &SchedulerConfig,
    log: &LogContext,
) -> Result<Schedule> {
    config.validate()?;
    let before = graph.control_edge_count();
    let peak_cut = max_topological_cut_and_partial_serialisation(
        graph,
        config.cmx_size,
        &log.nest("max_topological_cut"),
    )?;
    let serialisation_edges = graph.control_edge_count() - before;

    let list_log = log.nest("list_scheduling");
    let mut tasks = FeasibleScheduler::new(graph, config, &list_log)?.generate_schedule()?;
    let mut prefetched = 0;
    if let Some(limits) = &config.prefetch {
        let edges = generate_prefetch_edges(
            graph,
            &tasks,
            config.cmx_size,
            limits,
            &log.nest("prefetch"),
        );
        if !edges.is_empty() {
            prefetched = edges.values().map(Vec::len).sum();
            tasks = FeasibleScheduler::new(graph, config, &list_log)?
                .with_prefetch(edges)
                .generate_schedule()?;
        }
    }
    let tasks = tasks
        .into_iter()
        .sorted_by_key(|op| (op.time, op.task))
        .collect_vec();
    let control_edges =
        insert_control_edges(config.control_edges, graph, &tasks, &log.nest("control_edges"));
    let barriers = BarrierWiring::new(graph, &log.nest("barriers")).wire(&tasks);
    annotate(graph, &tasks, &barriers);

    if let Err(e) = verify_topological(graph, &tasks)
        .and_then(|_| verify_memory(graph, &tasks, config.cmx_size))
        .and_then(|_| verify_barriers(graph, &tasks, &barriers))
    {
        panic!("schedule verification failed: {e}");
    }

    let makespan = tasks.last().map(|op| op.time + 1).unwrap_or(0);
    let _span = log.enter();
    info!(
        target: "vpusched::schedule",
        tasks = tasks.len(),
        makespan,
        barriers = barriers.len(),
        serialisation_edges,
        prefetched,
        control_edges,
        peak_cmx = peak_cut.weight,
        "schedule complete"
    );
    Ok(Schedule {
        times: tasks.iter().map(|op| (op.task, op.time)).collect(),
        tasks,
        barriers,
        serialisation_edges,
        prefetched,
        control_edges,
        peak_cut,
        makespan,
    })
}

/// Record time steps, emission order and barrier roles on the graph.
fn annotate(graph: &mut TaskGraph, tasks: &[ScheduledTask], barriers: &[VirtualBarrier]) {
    let mut roles = task_barriers(barriers);
    for (number, op) in tasks.iter().enumerate() {
        let (wait, update) = roles.remove(&op.task).unwrap_or_default();
        let task = graph.task_mut(op.task);
        task.time = Some(op.time);
        task.scheduling_number = Some(number);
        task.wait_barriers = wait;
        task.update_barriers = update;
    }
}
