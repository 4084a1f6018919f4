//! Resource-augmented search states and the move-cost model.
//!
//! Budgets are unsigned and every debit is checked, so a state whose time or
//! fuel would go negative is never constructed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Level, Position, Timestep, world::Cell};

/// A remaining amount of time or fuel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Budget {
    Unlimited,
    Left(u32),
}

impl Budget {
    /// Debits `cost`, or `None` if that would go below zero.
    pub fn spend(self, cost: u32) -> Option<Budget> {
        match self {
            Budget::Unlimited => Some(Budget::Unlimited),
            Budget::Left(left) => left.checked_sub(cost).map(Budget::Left),
        }
    }

    /// Remaining amount, `None` when unlimited.
    pub fn remaining(self) -> Option<u32> {
        match self {
            Budget::Unlimited => None,
            Budget::Left(left) => Some(left),
        }
    }
}

/// Starting budgets plus the level fuel is topped up to at a fuel station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub time: Budget,
    pub fuel: Budget,
    pub fuel_capacity: Budget,
}

impl Limits {
    pub const UNLIMITED: Limits = Limits {
        time: Budget::Unlimited,
        fuel: Budget::Unlimited,
        fuel_capacity: Budget::Unlimited,
    };

    /// Limits active at `level`: time from level 2, fuel from level 3.
    pub fn for_level(level: Level, time_limit: u32, fuel_limit: u32) -> Self {
        let time = if level.time_limited() {
            Budget::Left(time_limit)
        } else {
            Budget::Unlimited
        };
        let fuel = if level.fuel_limited() {
            Budget::Left(fuel_limit)
        } else {
            Budget::Unlimited
        };
        Limits {
            time,
            fuel,
            fuel_capacity: fuel,
        }
    }
}

/// Which resource dimensions a strategy tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Tracking {
    /// Position only.
    None,
    /// Position and time.
    Time,
    /// Position, time and fuel.
    TimeAndFuel,
}

/// A search state: where the agent is, what it has left and when.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceState {
    pub position: Position,
    pub time_left: Budget,
    pub fuel_left: Budget,
    pub timestep: Timestep,
}

impl ResourceState {
    pub fn new(position: Position, limits: &Limits, timestep: Timestep) -> Self {
        ResourceState {
            position,
            time_left: limits.time,
            fuel_left: limits.fuel,
            timestep,
        }
    }

    /// Enters `cell` at `next`, applying the move-cost model for the tracked
    /// dimensions. `None` when the move would exhaust a tracked budget, or
    /// when the cell's cost does not fit a budget at all.
    pub(crate) fn step(
        &self,
        next: Position,
        cell: &Cell,
        limits: &Limits,
        tracking: Tracking,
    ) -> Option<ResourceState> {
        let time_left = match tracking {
            Tracking::None => self.time_left,
            Tracking::Time | Tracking::TimeAndFuel => {
                self.time_left.spend(cell.extra_time().checked_add(1)?)?
            }
        };
        let fuel_left = match tracking {
            Tracking::TimeAndFuel if cell.refuels() => limits.fuel_capacity,
            Tracking::TimeAndFuel => self.fuel_left.spend(1)?,
            Tracking::None | Tracking::Time => self.fuel_left,
        };
        Some(ResourceState {
            position: next,
            time_left,
            fuel_left,
            timestep: self.timestep + 1,
        })
    }

    /// Stays in place for one timestep, spending one unit of tracked time.
    pub(crate) fn wait(&self, tracking: Tracking) -> Option<ResourceState> {
        let time_left = match tracking {
            Tracking::None => self.time_left,
            Tracking::Time | Tracking::TimeAndFuel => self.time_left.spend(1)?,
        };
        Some(ResourceState {
            time_left,
            timestep: self.timestep + 1,
            ..*self
        })
    }

    /// The identity of this state for duplicate detection.
    pub(crate) fn key(&self, tracking: Tracking, timed: bool) -> StateKey {
        StateKey {
            position: self.position,
            time_left: (tracking != Tracking::None).then_some(self.time_left),
            fuel_left: (tracking == Tracking::TimeAndFuel).then_some(self.fuel_left),
            timestep: timed.then_some(self.timestep),
        }
    }
}

/// The state tuple used to key the best-cost table and parent map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct StateKey {
    pub position: Position,
    pub time_left: Option<Budget>,
    pub fuel_left: Option<Budget>,
    pub timestep: Option<Timestep>,
}

/// Best known cost per state. Only strict improvements are recorded, which
/// keeps dominated states from being expanded again.
#[derive(Debug, Default)]
pub(crate) struct BestCostTable {
    costs: HashMap<StateKey, usize>,
}

impl BestCostTable {
    /// Records `cost` for `key` if it beats the current entry.
    pub fn improve(&mut self, key: StateKey, cost: usize) -> bool {
        match self.costs.get(&key) {
            Some(&best) if best <= cost => false,
            _ => {
                self.costs.insert(key, cost);
                true
            }
        }
    }

    /// True if an entry popped with `cost` has since been beaten.
    pub fn is_stale(&self, key: &StateKey, cost: usize) -> bool {
        self.costs.get(key).is_some_and(|&best| best < cost)
    }
}
