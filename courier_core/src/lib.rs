use std::fmt;

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod config;
pub mod conflict;
pub mod error;
pub mod executor;
pub mod map;
pub mod occupancy;
pub mod planner;
pub mod resources;
pub mod search;
pub mod world;

pub use config::PlannerConfig;
pub use error::{MapError, PlanError};
pub use executor::TickReport;
pub use planner::{Fleet, MultiPlan};
pub use search::{Algorithm, PlanOutcome, plan};
pub use world::{Cell, World, load_world_from_string};

/// Discrete time index shared by every agent in multi-agent mode.
pub type Timestep = u32;

/// Represents a grid coordinate as `(row, col)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: usize,
    pub col: usize,
}

impl Position {
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Returns manhattan distance between two positions
    pub fn manhattan(&self, other: &Position) -> usize {
        self.row.abs_diff(other.row) + self.col.abs_diff(other.col)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// Identifies an agent. `AgentId::MAIN` is the agent drawn as `S`/`G` on a map,
/// every other agent `n` is drawn as `S<n>`/`G<n>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AgentId(pub u32);

impl AgentId {
    pub const MAIN: AgentId = AgentId(0);

    pub fn is_main(self) -> bool {
        self == Self::MAIN
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_main() {
            write!(f, "S")
        } else {
            write!(f, "S{}", self.0)
        }
    }
}

/// Selects which constraints are active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Level {
    /// No time or fuel limit, single agent.
    Unconstrained = 1,
    /// Time limit, single agent.
    Timed = 2,
    /// Time and fuel limits, single agent.
    TimedFuel = 3,
    /// Time and fuel limits, multiple agents.
    MultiAgent = 4,
}

impl Level {
    pub fn time_limited(self) -> bool {
        self != Level::Unconstrained
    }

    pub fn fuel_limited(self) -> bool {
        matches!(self, Level::TimedFuel | Level::MultiAgent)
    }
}

impl TryFrom<u8> for Level {
    type Error = PlanError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Level::Unconstrained),
            2 => Ok(Level::Timed),
            3 => Ok(Level::TimedFuel),
            4 => Ok(Level::MultiAgent),
            other => Err(PlanError::UnsupportedLevel(other)),
        }
    }
}
