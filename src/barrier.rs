use std::{collections::BTreeSet, fmt};

use rustc_hash::FxHashMap;

use crate::{
    error::{Result, ScheduleError},
    graph::TaskId,
};

/// Hardware barrier id, counted from 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BarrierId(pub usize);

impl BarrierId {
    /// Returned when no barrier can take a request.
    pub const INVALID: BarrierId = BarrierId(usize::MAX);

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Display for BarrierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "b{}", self.0)
        } else {
            write!(f, "b<invalid>")
        }
    }
}

/// Ordering key of a barrier in the availability set.
///
/// Field order matters: the derived ordering sorts by free slots first, then
/// puts untouched barriers ahead of partially used ones, then by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct SlotKey {
    available: usize,
    in_use: bool,
    barrier: usize,
}

/// Producer-slot accounting over a fixed pool of hardware barriers.
#[derive(Debug, Clone)]
pub struct BarrierResourceState {
    by_slots: BTreeSet<SlotKey>,
    /// Current key of barrier `i + 1`
    lookup: Vec<SlotKey>,
    max_slots: usize,
}

impl BarrierResourceState {
    pub fn new(barrier_count: usize, slots_per_barrier: usize) -> Result<Self> {
        let mut state = Self {
            by_slots: BTreeSet::new(),
            lookup: vec![],
            max_slots: 0,
        };
        state.init(barrier_count, slots_per_barrier)?;
        Ok(state)
    }

    /// Reset to `barrier_count` barriers, each with every slot free.
    pub fn init(&mut self, barrier_count: usize, slots_per_barrier: usize) -> Result<()> {
        if barrier_count == 0 || slots_per_barrier == 0 {
            return Err(ScheduleError::invalid_config(format!(
                "barrier pool needs at least one barrier and one slot, got {barrier_count} x {slots_per_barrier}"
            )));
        }
        self.max_slots = slots_per_barrier;
        self.lookup = (1..=barrier_count)
            .map(|barrier| SlotKey {
                available: slots_per_barrier,
                in_use: false,
                barrier,
            })
            .collect();
        self.by_slots = self.lookup.iter().copied().collect();
        Ok(())
    }

    pub fn barrier_count(&self) -> usize {
        self.lookup.len()
    }

    pub fn max_slots(&self) -> usize {
        self.max_slots
    }

    pub fn is_valid_barrier(&self, id: BarrierId) -> bool {
        (1..=self.lookup.len()).contains(&id.0)
    }

    pub fn available_slots(&self, id: BarrierId) -> usize {
        self.key(id).available
    }

    pub fn in_use(&self, id: BarrierId) -> bool {
        self.key(id).in_use
    }

    pub fn has_barrier_with_slots(&self, demand: usize) -> bool {
        self.pick(demand).is_some()
    }

    /// Take `demand` slots from the preferred barrier, or return
    /// [`BarrierId::INVALID`] when none has enough room.
    pub fn assign_slots(&mut self, demand: usize) -> BarrierId {
        match self.pick(demand) {
            Some(id) => {
                self.assign_barrier_slots(id, demand);
                id
            }
            None => BarrierId::INVALID,
        }
    }

    /// Take `demand` slots from a specific barrier.
    ///
    /// Panics if the barrier does not have that many slots free.
    pub fn assign_barrier_slots(&mut self, id: BarrierId, demand: usize) -> bool {
        let key = self.key(id);
        assert!(
            demand <= key.available,
            "barrier {id} has {} free slots, cannot commit {demand}",
            key.available
        );
        self.update(id, key.available - demand)
    }

    /// Return `demand` slots to a barrier.
    ///
    /// Panics if that would leave more slots free than the barrier has.
    pub fn unassign_barrier_slots(&mut self, id: BarrierId, demand: usize) -> bool {
        let key = self.key(id);
        let restored = key.available + demand;
        assert!(
            restored <= self.max_slots,
            "barrier {id} would hold {restored} free slots, maximum is {}",
            self.max_slots
        );
        self.update(id, restored)
    }

    /// Re-key a barrier after its free slot count changed.
    pub fn update(&mut self, id: BarrierId, available: usize) -> bool {
        let old = self.key(id);
        let removed = self.by_slots.remove(&old);
        let new = SlotKey {
            available,
            in_use: available < self.max_slots,
            barrier: id.0,
        };
        self.by_slots.insert(new);
        self.lookup[id.0 - 1] = new;
        removed
    }

    /// Smallest sufficient barrier, skipping ahead to an untouched one if
    /// any qualifies.
    fn pick(&self, demand: usize) -> Option<BarrierId> {
        let lower = SlotKey {
            available: demand,
            in_use: false,
            barrier: 0,
        };
        let mut sufficient = self.by_slots.range(lower..);
        let first = sufficient.next()?;
        let chosen = if first.in_use {
            sufficient.find(|k| !k.in_use).unwrap_or(first)
        } else {
            first
        };
        Some(BarrierId(chosen.barrier))
    }

    fn key(&self, id: BarrierId) -> SlotKey {
        assert!(
            self.is_valid_barrier(id),
            "barrier {id} is outside the pool of {}",
            self.lookup.len()
        );
        self.lookup[id.0 - 1]
    }
}

/// Barrier and slot count held by a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierInfo {
    pub barrier: BarrierId,
    pub slots: usize,
}

/// Per-task view of the barrier pool: remembers which barrier each
/// scheduled task produces on so it can be released on retirement.
#[derive(Debug, Clone)]
pub struct OpResourceState {
    pool: BarrierResourceState,
    assignments: FxHashMap<TaskId, BarrierInfo>,
}

impl OpResourceState {
    pub fn new(barrier_count: usize, slots_per_barrier: usize) -> Result<Self> {
        Ok(Self {
            pool: BarrierResourceState::new(barrier_count, slots_per_barrier)?,
            assignments: FxHashMap::default(),
        })
    }

    pub fn is_resource_available(&self, demand: usize) -> bool {
        self.pool.has_barrier_with_slots(demand)
    }

    /// Reserve a barrier for `task`. False if the task already holds one or
    /// no barrier has room.
    pub fn schedule_operation(&mut self, task: TaskId, demand: usize) -> bool {
        if self.assignments.contains_key(&task) {
            return false;
        }
        let barrier = self.pool.assign_slots(demand);
        if !barrier.is_valid() {
            return false;
        }
        self.assignments.insert(
            task,
            BarrierInfo {
                barrier,
                slots: demand,
            },
        );
        true
    }

    pub fn unschedule_operation(&mut self, task: TaskId) -> bool {
        match self.assignments.remove(&task) {
            Some(info) => self.pool.unassign_barrier_slots(info.barrier, info.slots),
            None => false,
        }
    }

    pub fn barrier_info(&self, task: TaskId) -> Option<&BarrierInfo> {
        self.assignments.get(&task)
    }

    pub fn pool(&self) -> &BarrierResourceState {
        &self.pool
    }
}
