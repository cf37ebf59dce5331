use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap},
};

use itertools::Itertools;
use petgraph::Direction;
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::{
    allocator::{Interval, LinearScan},
    barrier::{BarrierId, OpResourceState},
    config::SchedulerConfig,
    error::{Resource, Result, ScheduleError, Stage},
    graph::{MemorySpace, TaskGraph, TaskId},
    prefetch::PrefetchEdges,
    trace::LogContext,
};

/// Where a task stands relative to the resource checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    Unscheduled,
    ResourceCheckPending,
    Scheduled,
    /// Ready but out of CMX or barrier slots; retried after a retirement.
    Deferred,
    Retired,
}

/// One committed scheduling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledTask {
    pub task: TaskId,
    pub time: usize,
    /// Barrier the task produces on, if it updates one
    pub barrier: Option<BarrierId>,
    pub producer_slots: usize,
    /// CMX ranges held while the task runs
    pub resources: Vec<Interval>,
}

/// Mutable state of one scheduling run.
struct Run {
    memory: LinearScan,
    barriers: OpResourceState,
    indegree: FxHashMap<TaskId, usize>,
    /// Ready tasks not checked since the last retirement, by priority
    ready: BTreeSet<(usize, TaskId)>,
    /// Ready tasks that did not fit; resources only shrink until a retirement
    deferred: BTreeSet<(usize, TaskId)>,
    in_flight: BinaryHeap<Reverse<(usize, TaskId)>>,
    live: FxHashMap<TaskId, Vec<Interval>>,
    schedule: Vec<ScheduledTask>,
    time: usize,
}

/// Time-stepped list scheduler over CMX and barrier producer slots.
pub struct FeasibleScheduler<'a> {
    graph: &'a TaskGraph,
    config: SchedulerConfig,
    log: LogContext,
    /// Dense rank, lower runs first
    priority: FxHashMap<TaskId, usize>,
    state: FxHashMap<TaskId, TaskState>,
    /// Buffers sorted by decreasing size, as `(buffer index, size)`
    cmx_requests: FxHashMap<TaskId, Vec<(usize, u64)>>,
    cmx_sizes: FxHashMap<TaskId, Vec<u64>>,
    prefetch: PrefetchEdges,
    resource_checks: usize,
}

impl<'a> FeasibleScheduler<'a> {
    pub fn new(graph: &'a TaskGraph, config: &SchedulerConfig, log: &LogContext) -> Result<Self> {
        config.validate()?;
        let levels = graph.levels()?;
        let priority = graph
            .tasks()
            .sorted_by_key(|id| (levels[id], *id))
            .enumerate()
            .map(|(rank, id)| (id, rank))
            .collect();
        let cmx_requests: FxHashMap<TaskId, Vec<(usize, u64)>> = graph
            .tasks()
            .map(|id| {
                let requests = graph
                    .task(id)
                    .buffers
                    .iter()
                    .enumerate()
                    .filter(|(_, b)| b.space == MemorySpace::Cmx)
                    .map(|(i, b)| (i, b.size))
                    .sorted_by_key(|&(i, size)| (Reverse(size), i))
                    .collect_vec();
                (id, requests)
            })
            .collect();
        let cmx_sizes = cmx_requests
            .iter()
            .map(|(&id, requests)| (id, requests.iter().map(|&(_, size)| size).collect()))
            .collect();
        Ok(Self {
            graph,
            config: config.clone(),
            log: log.clone(),
            priority,
            state: graph.tasks().map(|id| (id, TaskState::Unscheduled)).collect(),
            cmx_requests,
            cmx_sizes,
            prefetch: PrefetchEdges::new(),
            resource_checks: 0,
        })
    }

    /// Start the listed DMAs right after their compute task whenever they
    /// are ready and fit, ahead of their priority.
    pub fn with_prefetch(mut self, edges: PrefetchEdges) -> Self {
        self.prefetch = edges;
        self
    }

    pub fn state(&self, task: TaskId) -> TaskState {
        self.state[&task]
    }

    pub fn priority(&self, task: TaskId) -> usize {
        self.priority[&task]
    }

    /// Number of CMX and barrier fit checks made so far.
    pub fn resource_checks(&self) -> usize {
        self.resource_checks
    }

    fn fits(&mut self, task: TaskId, run: &Run) -> bool {
        self.resource_checks += 1;
        let demand = self.graph.task(task).barrier_demand();
        (demand == 0 || run.barriers.is_resource_available(demand))
            && run.memory.can_alloc(&self.cmx_sizes[&task])
    }

    fn transition(&mut self, task: TaskId, state: TaskState) {
        trace!(
            target: "vpusched::scheduler",
            task = %self.graph.task(task).name,
            from = ?self.state[&task],
            to = ?state,
            "state change"
        );
        self.state.insert(task, state);
    }

    /// Order every task of the graph.
    #[tracing::instrument(skip_all)]
    pub fn generate_schedule(&mut self) -> Result<Vec<ScheduledTask>> {
        let span = self.log.span().clone();
        let _span = span.enter();
        let indegree: FxHashMap<TaskId, usize> = self
            .graph
            .tasks()
            .map(|id| (id, self.graph.neighbors_directed(id, Direction::Incoming).count()))
            .collect();
        let mut run = Run {
            memory: LinearScan::new(self.config.cmx_size, self.config.alignment),
            barriers: OpResourceState::new(
                self.config.barrier_count,
                self.config.max_producer_slots_per_barrier,
            )?,
            ready: indegree
                .iter()
                .filter(|(_, d)| **d == 0)
                .map(|(id, _)| (self.priority[id], *id))
                .collect(),
            indegree,
            deferred: BTreeSet::new(),
            in_flight: BinaryHeap::new(),
            live: FxHashMap::default(),
            schedule: Vec::with_capacity(self.graph.len()),
            time: 0,
        };

        while run.schedule.len() < self.graph.len() || !run.in_flight.is_empty() {
            if let Some(task) = self.next_fitting(&mut run) {
                self.commit(&mut run, task);
                self.prefetch_alongside(&mut run, task);
                continue;
            }
            if !run.in_flight.is_empty() {
                self.retire_next(&mut run);
                continue;
            }

            // Nothing runs and nothing fits: the cheapest ready task alone
            // exceeds the hardware.
            let stuck = run.ready.iter().chain(&run.deferred).min().copied();
            return Err(match stuck {
                Some((_, task)) => self.shortfall(task, &run.memory),
                None => ScheduleError::CyclicGraph {
                    task: self
                        .state
                        .iter()
                        .filter(|(_, s)| **s == TaskState::Unscheduled)
                        .map(|(id, _)| *id)
                        .min()
                        .map(|id| self.graph.task(id).name.clone())
                        .unwrap_or_default(),
                },
            });
        }

        debug!(
            target: "vpusched::scheduler",
            tasks = run.schedule.len(),
            makespan = run.time,
            peak_cmx = run.memory.peak(),
            resource_checks = self.resource_checks,
            "list scheduling finished"
        );
        Ok(run.schedule)
    }

    /// Highest-priority unchecked ready task that fits. Tasks that do not
    /// fit are parked until the next retirement.
    fn next_fitting(&mut self, run: &mut Run) -> Option<TaskId> {
        while let Some(entry @ (_, task)) = run.ready.first().copied() {
            self.transition(task, TaskState::ResourceCheckPending);
            if self.fits(task, run) {
                run.ready.remove(&entry);
                return Some(task);
            }
            run.ready.remove(&entry);
            run.deferred.insert(entry);
            self.transition(task, TaskState::Deferred);
        }
        None
    }

    fn prefetch_alongside(&mut self, run: &mut Run, compute: TaskId) {
        let Some(hints) = self.prefetch.get(&compute).cloned() else {
            return;
        };
        for dma in hints {
            let entry = (self.priority[&dma], dma);
            if !run.ready.contains(&entry) {
                continue;
            }
            self.transition(dma, TaskState::ResourceCheckPending);
            if self.fits(dma, run) {
                run.ready.remove(&entry);
                trace!(
                    target: "vpusched::scheduler",
                    task = %self.graph.task(dma).name,
                    compute = %self.graph.task(compute).name,
                    "prefetched"
                );
                self.commit(run, dma);
            } else {
                run.ready.remove(&entry);
                run.deferred.insert(entry);
                self.transition(dma, TaskState::Deferred);
            }
        }
    }

    fn commit(&mut self, run: &mut Run, task: TaskId) {
        let resources = self.cmx_requests[&task]
            .iter()
            .map(|&(buffer, size)| {
                let range = run
                    .memory
                    .alloc(size)
                    .expect("CMX vanished between check and commit");
                Interval {
                    buffer,
                    begin: range.start,
                    end: range.end,
                }
            })
            .collect_vec();
        let demand = self.graph.task(task).barrier_demand();
        let barrier = if demand > 0 {
            assert!(
                run.barriers.schedule_operation(task, demand),
                "barrier slots vanished between check and commit"
            );
            run.barriers.barrier_info(task).map(|info| info.barrier)
        } else {
            None
        };
        debug!(
            target: "vpusched::scheduler",
            task = %self.graph.task(task).name,
            time = run.time,
            barrier = ?barrier,
            cmx_used = run.memory.used(),
            "scheduled"
        );
        self.transition(task, TaskState::Scheduled);
        run.live.insert(task, resources.clone());
        run.in_flight.push(Reverse((run.time + 1, task)));
        run.schedule.push(ScheduledTask {
            task,
            time: run.time,
            barrier,
            producer_slots: demand,
            resources,
        });
    }

    /// Advance to the earliest completion and retire everything ending then.
    fn retire_next(&mut self, run: &mut Run) {
        let Some(&Reverse((completion, _))) = run.in_flight.peek() else {
            return;
        };
        run.time = completion;
        while let Some(&Reverse((t, task))) = run.in_flight.peek() {
            if t != completion {
                break;
            }
            run.in_flight.pop();
            for interval in run.live.remove(&task).unwrap_or_default() {
                run.memory.free(interval.range());
            }
            run.barriers.unschedule_operation(task);
            self.transition(task, TaskState::Retired);
            for succ in self.graph.neighbors_directed(task, Direction::Outgoing) {
                let d = run
                    .indegree
                    .get_mut(&succ)
                    .expect("successor without indegree");
                *d -= 1;
                if *d == 0 {
                    run.ready.insert((self.priority[&succ], succ));
                }
            }
        }
        run.ready.append(&mut run.deferred);
    }

    fn shortfall(&self, task: TaskId, memory: &LinearScan) -> ScheduleError {
        let name = self.graph.task(task).name.clone();
        let sizes = &self.cmx_sizes[&task];
        if !memory.can_alloc(sizes) {
            let required = sizes.iter().map(|&s| memory.aligned(s)).sum();
            ScheduleError::infeasible(
                Stage::ListScheduling,
                name,
                Resource::Cmx,
                required,
                memory.capacity(),
            )
        } else {
            ScheduleError::infeasible(
                Stage::ListScheduling,
                name,
                Resource::BarrierSlots,
                self.graph.task(task).barrier_demand() as u64,
                self.config.max_producer_slots_per_barrier as u64,
            )
        }
    }
}
