//! # vpusched benchmark infrastructure
//!
//! Synthetic task-graph workloads for timing the scheduling pipeline.
//!
//! - **BenchmarkPattern**: trait for defining a workload shape
//! - **ScheduleMetrics**: quality numbers of a schedule, reported next to
//!   criterion's timings

mod patterns;

pub use patterns::*;

use vpusched::prelude::*;

/// Size configuration for benchmarks
#[derive(Debug, Clone, Copy)]
pub struct BenchSize {
    pub name: &'static str,
    /// Number of tasks the pattern should emit, approximately
    pub value: usize,
}

impl BenchSize {
    pub const fn new(name: &'static str, value: usize) -> Self {
        Self { name, value }
    }
}

/// Standard graph sizes
pub const GRAPH_SIZES: &[BenchSize] = &[
    BenchSize::new("32", 32),
    BenchSize::new("128", 128),
    BenchSize::new("512", 512),
];

/// Trait for defining benchmark workloads (dyn-compatible version)
pub trait BenchmarkPattern {
    /// Pattern name (used in reports)
    fn name(&self) -> &'static str;

    /// Available sizes for this pattern
    fn sizes(&self) -> &[BenchSize] {
        GRAPH_SIZES
    }

    /// Build the task graph for this pattern
    fn build_graph(&self, size: BenchSize) -> TaskGraph;

    /// Hardware budget to schedule the pattern against
    fn config(&self) -> SchedulerConfig {
        SchedulerConfig::default()
    }
}

/// Quality of a finished schedule
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleMetrics {
    pub tasks: usize,
    pub makespan: usize,
    pub barriers: usize,
    pub serialisation_edges: usize,
    pub control_edges: usize,
    pub peak_cmx: u64,
}

impl ScheduleMetrics {
    pub fn from_schedule(schedule: &Schedule) -> Self {
        Self {
            tasks: schedule.tasks.len(),
            makespan: schedule.makespan,
            barriers: schedule.barriers.len(),
            serialisation_edges: schedule.serialisation_edges,
            control_edges: schedule.control_edges,
            peak_cmx: schedule.peak_cut.weight,
        }
    }

    /// Average number of tasks running per time step
    pub fn parallelism(&self) -> f64 {
        if self.makespan == 0 {
            return 0.0;
        }
        self.tasks as f64 / self.makespan as f64
    }
}

/// Build and schedule one pattern at one size.
pub fn run_pattern(pattern: &dyn BenchmarkPattern, size: BenchSize) -> anyhow::Result<ScheduleMetrics> {
    let mut graph = pattern.build_graph(size);
    let log = LogContext::new(pattern.name());
    let schedule = schedule(&mut graph, &pattern.config(), &log)?;
    Ok(ScheduleMetrics::from_schedule(&schedule))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_pattern_schedules() {
        for pattern in all_patterns() {
            let size = BenchSize::new("tiny", 24);
            let metrics = run_pattern(pattern.as_ref(), size).unwrap();
            assert!(metrics.tasks > 0, "{} produced no tasks", pattern.name());
            assert!(metrics.peak_cmx <= pattern.config().cmx_size);
            assert!(metrics.parallelism() >= 1.0);
        }
    }
}
