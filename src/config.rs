use serde::{Deserialize, Serialize};

use crate::error::{Result, ScheduleError};

/// Which post-schedule ordering edges to add to the task graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlEdgePolicy {
    /// Leave the graph as the scheduler found it.
    None,
    /// Order every task of a time step before every task of the next one.
    Basic,
    /// Like [`ControlEdgePolicy::Basic`], limited to tasks touching DDR.
    BasicNonCmx,
    /// Order only tasks whose CMX ranges overlap.
    #[default]
    MemoryAware,
}

/// How far ahead a DMA may be pulled to overlap an earlier compute task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct PrefetchLimits {
    /// Compute tasks a DMA with no dependencies may jump over.
    pub const_levels: usize,
    /// Compute tasks a DMA with dependencies may jump over.
    pub activation_levels: usize,
    /// Time steps between the compute task and the DMA's original slot.
    pub time_window: usize,
}

impl Default for PrefetchLimits {
    fn default() -> Self {
        Self {
            const_levels: 2,
            activation_levels: 1,
            time_window: 50,
        }
    }
}

/// Hardware budget and knobs consumed by the scheduling pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// On-chip scratch memory in bytes.
    pub cmx_size: u64,
    /// Hardware barriers available to one cluster.
    pub barrier_count: usize,
    /// Producer slots a single barrier can count.
    pub max_producer_slots_per_barrier: usize,
    /// CMX allocation granularity in bytes.
    pub alignment: u64,
    pub control_edges: ControlEdgePolicy,
    /// `None` turns DMA prefetching off.
    pub prefetch: Option<PrefetchLimits>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            cmx_size: 1 << 20,
            barrier_count: 8,
            max_producer_slots_per_barrier: 256,
            alignment: 64,
            control_edges: ControlEdgePolicy::default(),
            prefetch: Some(PrefetchLimits::default()),
        }
    }
}

impl SchedulerConfig {
    pub fn with_cmx_size(mut self, cmx_size: u64) -> Self {
        self.cmx_size = cmx_size;
        self
    }

    pub fn with_barriers(mut self, barrier_count: usize, slots: usize) -> Self {
        self.barrier_count = barrier_count;
        self.max_producer_slots_per_barrier = slots;
        self
    }

    pub fn with_alignment(mut self, alignment: u64) -> Self {
        self.alignment = alignment;
        self
    }

    pub fn with_control_edges(mut self, policy: ControlEdgePolicy) -> Self {
        self.control_edges = policy;
        self
    }

    pub fn with_prefetch(mut self, prefetch: Option<PrefetchLimits>) -> Self {
        self.prefetch = prefetch;
        self
    }

    /// Reject capacities no schedule could satisfy.
    pub fn validate(&self) -> Result<()> {
        if self.cmx_size == 0 {
            return Err(ScheduleError::invalid_config("CMX size must be non-zero"));
        }
        if self.barrier_count == 0 {
            return Err(ScheduleError::invalid_config(
                "barrier count must be non-zero",
            ));
        }
        if self.max_producer_slots_per_barrier == 0 {
            return Err(ScheduleError::invalid_config(
                "producer slots per barrier must be non-zero",
            ));
        }
        if self.alignment == 0 || !self.alignment.is_power_of_two() {
            return Err(ScheduleError::invalid_config(format!(
                "alignment {} is not a power of two",
                self.alignment
            )));
        }
        Ok(())
    }
}
