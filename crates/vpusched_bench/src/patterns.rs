//! Workload shapes used by `benches/patterns.rs`.

use rand::{Rng, SeedableRng, rngs::StdRng};
use vpusched::prelude::*;

use crate::{BenchSize, BenchmarkPattern};

const KB: u64 = 1024;

/// Every pattern, for runners that sweep them all
pub fn all_patterns() -> Vec<Box<dyn BenchmarkPattern>> {
    vec![
        Box::new(ChainBench),
        Box::new(FanOutBench { width: 8 }),
        Box::new(ResidualBench),
        Box::new(RandomDagBench { seed: 42 }),
    ]
}

// ============================================================================
// Chain
// ============================================================================

/// Alternating DMA-in, compute, DMA-out chain: no parallelism at all.
#[derive(Debug, Clone, Copy)]
pub struct ChainBench;

impl BenchmarkPattern for ChainBench {
    fn name(&self) -> &'static str {
        "chain"
    }

    fn build_graph(&self, size: BenchSize) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut prev: Option<TaskId> = None;
        for i in 0..size.value {
            let task = match i % 3 {
                0 => Task::dma(format!("load{i}")).with_ddr(16 * KB).with_cmx(16 * KB),
                1 => Task::compute(format!("conv{i}"), 4).with_cmx(48 * KB),
                _ => Task::dma(format!("store{i}")).with_cmx(16 * KB).with_ddr(16 * KB),
            };
            let mut new = graph.add_task(task);
            if let Some(p) = prev {
                new = new.after(p);
            }
            prev = Some(new.finish());
        }
        graph
    }
}

// ============================================================================
// Fan-out
// ============================================================================

/// Stages of `width` independent branches joined by a barrier-only sync:
/// stresses partial serialisation.
#[derive(Debug, Clone, Copy)]
pub struct FanOutBench {
    pub width: usize,
}

impl BenchmarkPattern for FanOutBench {
    fn name(&self) -> &'static str {
        "fan_out"
    }

    fn build_graph(&self, size: BenchSize) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut sync = graph.add_task(Task::control("sync0")).finish();
        for stage in 0..size.value.div_ceil(self.width + 1) {
            let branches: Vec<TaskId> = (0..self.width)
                .map(|b| {
                    graph
                        .add_task(Task::compute(format!("s{stage}b{b}"), 2).with_cmx(96 * KB))
                        .after(sync)
                        .finish()
                })
                .collect();
            sync = graph
                .add_task(Task::control(format!("sync{}", stage + 1)))
                .after_all(branches)
                .finish();
        }
        graph
    }

    fn config(&self) -> SchedulerConfig {
        SchedulerConfig::default().with_cmx_size(384 * KB)
    }
}

// ============================================================================
// Residual blocks
// ============================================================================

/// Residual blocks with a prefetch DMA per block that may overlap the
/// previous block's compute.
#[derive(Debug, Clone, Copy)]
pub struct ResidualBench;

impl BenchmarkPattern for ResidualBench {
    fn name(&self) -> &'static str {
        "residual"
    }

    fn build_graph(&self, size: BenchSize) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut input = graph
            .add_task(Task::dma("input").with_ddr(64 * KB).with_cmx(64 * KB))
            .finish();
        for block in 0..size.value.div_ceil(4) {
            let weights = graph
                .add_task(Task::dma(format!("w{block}")).with_ddr(32 * KB).with_cmx(32 * KB))
                .finish();
            let conv_a = graph
                .add_task(Task::compute(format!("conv{block}a"), 4).with_cmx(128 * KB))
                .after_all([input, weights])
                .finish();
            let conv_b = graph
                .add_task(Task::compute(format!("conv{block}b"), 4).with_cmx(128 * KB))
                .after(conv_a)
                .finish();
            input = graph
                .add_task(Task::compute(format!("add{block}"), 1).with_cmx(64 * KB))
                .after_all([input, conv_b])
                .finish();
        }
        graph
    }

    fn config(&self) -> SchedulerConfig {
        SchedulerConfig::default().with_cmx_size(512 * KB)
    }
}

// ============================================================================
// Random DAG
// ============================================================================

/// Seeded random DAG with mixed task kinds and sparse dependencies.
#[derive(Debug, Clone, Copy)]
pub struct RandomDagBench {
    pub seed: u64,
}

impl BenchmarkPattern for RandomDagBench {
    fn name(&self) -> &'static str {
        "random_dag"
    }

    fn build_graph(&self, size: BenchSize) -> TaskGraph {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut graph = TaskGraph::new();
        let mut ids: Vec<TaskId> = Vec::with_capacity(size.value);
        for i in 0..size.value {
            let cmx = rng.random_range(1..32u64) * KB;
            let task = match rng.random_range(0..3) {
                0 => Task::dma(format!("dma{i}")).with_ddr(cmx).with_cmx(cmx),
                1 => Task::compute(format!("dpu{i}"), rng.random_range(1..8)).with_cmx(cmx),
                _ => Task::software(format!("shave{i}")).with_cmx(cmx),
            };
            let mut new = graph.add_task(task);
            let window = ids.len().min(16);
            for &p in &ids[ids.len() - window..] {
                if rng.random_bool(0.15) {
                    new = new.after(p);
                }
            }
            ids.push(new.finish());
        }
        graph
    }
}
