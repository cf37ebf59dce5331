use std::fmt;

use thiserror::Error;

/// Result alias used throughout the scheduler.
pub type Result<T> = std::result::Result<T, ScheduleError>;

/// Pipeline stage that gave up on a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    MaxTopologicalCut,
    ListScheduling,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::MaxTopologicalCut => write!(f, "max topological cut"),
            Stage::ListScheduling => write!(f, "list scheduling"),
        }
    }
}

/// Finite hardware resource a task can run out of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    /// On-chip scratch memory, measured in bytes.
    Cmx,
    /// Producer slots of a single hardware barrier.
    BarrierSlots,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Cmx => write!(f, "CMX"),
            Resource::BarrierSlots => write!(f, "barrier producer slots"),
        }
    }
}

/// Errors a correct scheduler can legitimately report to its caller.
///
/// Broken internal invariants (over-committed barrier slots, a cycle closed
/// by an inserted edge, a schedule failing verification) are not represented
/// here; they panic.
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// Zero or otherwise unusable resource capacities.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// What is wrong with the configuration
        reason: String,
    },

    /// The input cannot be scheduled within the hardware budget.
    #[error("{stage}: task '{task}' {}", shortfall(.resource, .required, .available))]
    InfeasibleSchedule {
        /// Stage that detected the shortfall
        stage: Stage,
        /// Name of the offending task
        task: String,
        /// Exhausted resource
        resource: Resource,
        /// Amount the task needs
        required: u64,
        /// Amount the hardware provides
        available: u64,
    },

    /// The dependency graph handed to the scheduler is not a DAG.
    #[error("dependency graph contains a cycle through task '{task}'")]
    CyclicGraph {
        /// A task on the cycle
        task: String,
    },
}

impl ScheduleError {
    pub fn invalid_config(reason: impl Into<String>) -> Self {
        ScheduleError::InvalidConfiguration {
            reason: reason.into(),
        }
    }

    pub fn infeasible(
        stage: Stage,
        task: impl Into<String>,
        resource: Resource,
        required: u64,
        available: u64,
    ) -> Self {
        ScheduleError::InfeasibleSchedule {
            stage,
            task: task.into(),
            resource,
            required,
            available,
        }
    }

    /// True for errors caused by an input that does not fit the hardware.
    pub fn is_infeasible(&self) -> bool {
        matches!(self, ScheduleError::InfeasibleSchedule { .. })
    }
}

fn shortfall(resource: &Resource, required: &u64, available: &u64) -> String {
    match resource {
        Resource::Cmx => format!(
            "requires {} KB of CMX, budget is {} KB",
            required.div_ceil(1024),
            available / 1024
        ),
        Resource::BarrierSlots => format!(
            "requires {required} barrier producer slots, a barrier holds {available}"
        ),
    }
}

/// A produced schedule that breaks one of its own guarantees.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    #[error("task '{to}' runs at step {to_time} but depends on '{from}' at step {from_time}")]
    DependencyOrder {
        from: String,
        to: String,
        from_time: usize,
        to_time: usize,
    },

    #[error("step {time} keeps {used} bytes of CMX alive, budget is {budget}")]
    MemoryOverflow { time: usize, used: u64, budget: u64 },

    #[error("step {time}: CMX ranges of '{first}' and '{second}' overlap")]
    OverlappingBuffers {
        time: usize,
        first: String,
        second: String,
    },

    #[error("CMX range [{begin}, {end}) of '{task}' lies outside the {budget} byte budget")]
    OutOfBounds {
        task: String,
        begin: u64,
        end: u64,
        budget: u64,
    },

    #[error("task '{task}' was never scheduled")]
    Unscheduled { task: String },

    #[error("virtual barrier {barrier} has no {role}")]
    DanglingBarrier { barrier: usize, role: &'static str },

    #[error("virtual barrier {barrier} is consumed by '{consumer}' before producer '{producer}' runs")]
    BarrierOrder {
        barrier: usize,
        producer: String,
        consumer: String,
    },

    #[error("dependency '{from}' -> '{to}' is not enforced by any barrier chain")]
    UnenforcedDependency { from: String, to: String },
}
