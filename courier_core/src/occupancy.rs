//! Time-indexed occupancy: which agent holds which cell at which timestep.

use std::collections::{BTreeMap, HashMap};

use log::trace;

use crate::{AgentId, Position, Timestep, search::MoveRule};

/// Mapping from cell to timestep to the agent reserving it.
///
/// An agent whose route ends keeps its last cell: that cell is recorded as
/// *resting* from the arrival timestep on and counts as occupied at every later
/// timestep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeWindowTable {
    slots: HashMap<Position, BTreeMap<Timestep, AgentId>>,
    resting: HashMap<Position, (Timestep, AgentId)>,
}

impl TimeWindowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds the table from agents' timelines, keeping timesteps up to and
    /// including `now`.
    pub fn from_timelines<'a>(
        timelines: impl IntoIterator<Item = (AgentId, &'a [Position])>,
        now: Timestep,
    ) -> Self {
        let mut table = Self::new();
        for (agent, timeline) in timelines {
            for (t, position) in timeline.iter().enumerate().take(now as usize + 1) {
                table.reserve(*position, t as Timestep, agent);
            }
        }
        table
    }

    /// Records `agent` on `position` at `timestep`. The first claim wins; a
    /// competing claim is ignored and reported as `false`.
    pub fn reserve(&mut self, position: Position, timestep: Timestep, agent: AgentId) -> bool {
        match self.occupant(position, timestep) {
            Some(other) if other != agent => {
                trace!("{agent} cannot claim {position}@{timestep}: held by {other}");
                false
            }
            _ => {
                self.slots.entry(position).or_default().insert(timestep, agent);
                true
            }
        }
    }

    /// Reserves a route that starts at `start` and rests on its last cell.
    pub fn reserve_path(&mut self, agent: AgentId, start: Timestep, path: &[Position]) {
        for (offset, position) in path.iter().enumerate() {
            self.reserve(*position, start + offset as Timestep, agent);
        }
        if let Some(last) = path.last() {
            let arrival = start + path.len().saturating_sub(1) as Timestep;
            match self.resting.get(last) {
                Some((_, other)) if *other != agent => {
                    trace!("{agent} cannot rest on {last}: {other} rests there");
                }
                _ => {
                    self.resting.insert(*last, (arrival, agent));
                }
            }
        }
    }

    /// Drops every reservation held by `agent`.
    pub fn release(&mut self, agent: AgentId) {
        for slots in self.slots.values_mut() {
            slots.retain(|_, holder| *holder != agent);
        }
        self.slots.retain(|_, slots| !slots.is_empty());
        self.resting.retain(|_, (_, holder)| *holder != agent);
    }

    /// Agent holding `position` at `timestep`, if any.
    pub fn occupant(&self, position: Position, timestep: Timestep) -> Option<AgentId> {
        self.slots
            .get(&position)
            .and_then(|slots| slots.get(&timestep).copied())
            .or_else(|| {
                self.resting
                    .get(&position)
                    .filter(|(from, _)| *from <= timestep)
                    .map(|(_, agent)| *agent)
            })
    }

    /// True when no agent other than `agent` holds `position` at `timestep`.
    pub fn is_free_for(&self, position: Position, timestep: Timestep, agent: AgentId) -> bool {
        self.occupant(position, timestep).is_none_or(|holder| holder == agent)
    }

    /// Whether `agent` may move `from` → `to`, arriving at `arrival`: the
    /// target must be free for it, and it must not swap places with the agent
    /// that is arriving on `from`.
    pub fn is_valid_move(
        &self,
        agent: AgentId,
        from: Position,
        to: Position,
        arrival: Timestep,
    ) -> bool {
        if !self.is_free_for(to, arrival, agent) {
            return false;
        }
        if from == to || arrival == 0 {
            return true;
        }
        match self.occupant(from, arrival) {
            Some(other) if other != agent => self.occupant(to, arrival - 1) != Some(other),
            _ => true,
        }
    }

    /// True when no other agent claims `position` at `from` or any later timestep.
    pub fn clear_from(&self, position: Position, from: Timestep, agent: AgentId) -> bool {
        let slots_clear = self.slots.get(&position).is_none_or(|slots| {
            slots
                .range(from..)
                .all(|(_, holder)| *holder == agent)
        });
        let rest_clear = self
            .resting
            .get(&position)
            .is_none_or(|(_, holder)| *holder == agent);
        slots_clear && rest_clear
    }

    /// Number of explicit `(cell, timestep)` reservations.
    pub fn len(&self) -> usize {
        self.slots.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.resting.is_empty()
    }
}

/// Move legality for one agent planned against the occupancy table.
#[derive(Debug, Clone, Copy)]
pub struct OccupancyRule<'a> {
    pub table: &'a TimeWindowTable,
    pub agent: AgentId,
}

impl MoveRule for OccupancyRule<'_> {
    fn timed(&self) -> bool {
        true
    }

    fn allows(&self, from: Position, to: Position, arrival: Timestep) -> bool {
        self.table.is_valid_move(self.agent, from, to, arrival)
    }

    fn accepts_goal(&self, goal: Position, arrival: Timestep) -> bool {
        self.table.clear_from(goal, arrival, self.agent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: AgentId = AgentId(1);
    const B: AgentId = AgentId(2);

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    #[test]
    fn first_claim_wins() {
        let mut table = TimeWindowTable::new();
        assert!(table.reserve(p(0, 0), 3, A));
        assert!(!table.reserve(p(0, 0), 3, B));
        assert!(table.reserve(p(0, 0), 3, A));
        assert_eq!(table.occupant(p(0, 0), 3), Some(A));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn resting_agent_holds_its_last_cell() {
        let mut table = TimeWindowTable::new();
        table.reserve_path(A, 0, &[p(0, 0), p(0, 1)]);
        assert_eq!(table.occupant(p(0, 1), 1), Some(A));
        assert_eq!(table.occupant(p(0, 1), 50), Some(A));
        assert_eq!(table.occupant(p(0, 0), 1), None);
        assert!(!table.clear_from(p(0, 1), 0, B));
        assert!(table.clear_from(p(0, 0), 1, B));
    }

    #[test]
    fn swaps_are_rejected() {
        let mut table = TimeWindowTable::new();
        table.reserve_path(A, 0, &[p(0, 1), p(0, 0)]);
        // B at (0,0) wants (0,1) at t=1 while A goes the other way.
        assert!(!table.is_valid_move(B, p(0, 0), p(0, 1), 1));
        // Following A into the cell it leaves is fine.
        assert!(table.is_valid_move(B, p(0, 2), p(0, 1), 1));
    }

    #[test]
    fn release_forgets_an_agent() {
        let mut table = TimeWindowTable::new();
        table.reserve_path(A, 0, &[p(0, 0), p(1, 0)]);
        table.reserve_path(B, 0, &[p(2, 2)]);
        table.release(A);
        assert_eq!(table.occupant(p(1, 0), 9), None);
        assert_eq!(table.occupant(p(2, 2), 9), Some(B));
    }

    #[test]
    fn rebuild_keeps_only_the_executed_prefix() {
        let a_timeline = [p(0, 0), p(0, 1), p(0, 2)];
        let b_timeline = [p(3, 3), p(3, 2)];
        let table =
            TimeWindowTable::from_timelines([(A, &a_timeline[..]), (B, &b_timeline[..])], 1);
        assert_eq!(table.occupant(p(0, 1), 1), Some(A));
        assert_eq!(table.occupant(p(0, 2), 2), None);
        assert_eq!(table.occupant(p(3, 2), 1), Some(B));
        assert_eq!(table.len(), 4);
    }
}
