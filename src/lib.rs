//! Memory-feasible, barrier-aware scheduling of task graphs for VPU-style
//! accelerators.

pub mod allocator;
pub mod barrier;
pub mod barrier_wiring;
pub mod config;
pub mod control_edges;
pub mod cut;
pub mod error;
pub mod graph;
pub mod pipeline;
pub mod prefetch;
pub mod scheduler;
pub mod trace;
pub mod verify;
pub mod visualization;

#[cfg(test)]
pub mod tests;

pub mod prelude {
    pub use crate::allocator::{Interval, LinearScan};
    pub use crate::barrier::{BarrierId, BarrierInfo, BarrierResourceState, OpResourceState};
    pub use crate::barrier_wiring::{BarrierWiring, VirtualBarrier};
    pub use crate::config::{ControlEdgePolicy, PrefetchLimits, SchedulerConfig};
    pub use crate::control_edges::*;
    pub use crate::cut::{MaxCutEngine, MaxTopologicalCut, max_topological_cut_and_partial_serialisation};
    pub use crate::error::{Resource, Result, ScheduleError, Stage, VerificationError};
    pub use crate::graph::*;
    pub use crate::pipeline::{Schedule, schedule};
    pub use crate::prefetch::{PrefetchEdges, generate_prefetch_edges};
    pub use crate::scheduler::{FeasibleScheduler, ScheduledTask, TaskState};
    pub use crate::trace::LogContext;
    pub use crate::visualization::ToDot;
    pub use anyhow;
    pub use petgraph;
    pub use petgraph::stable_graph::NodeIndex;
    pub use rustc_hash::{FxHashMap, FxHashSet};
    pub use tracing;
}
