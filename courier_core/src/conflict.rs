//! Conflict detection between committed routes.
//!
//! Routes are compared timestep by timestep from a shared origin. A route that
//! has ended keeps its agent on the final cell, so a short route still blocks
//! its last cell for the rest of a longer one.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::{AgentId, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictKind {
    /// Both agents on the same cell at the same timestep.
    Vertex,
    /// The agents trade cells between two timesteps.
    Swap,
    /// Both agents move and their moves cross between two timesteps without
    /// sharing a cell at either one.
    PassThrough,
}

/// A conflict between `first` and `second` at offset `timestep` from the
/// routes' origin. For edge conflicts the offset is the arrival timestep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Conflict {
    pub first: AgentId,
    pub second: AgentId,
    pub timestep: usize,
    pub kind: ConflictKind,
}

fn at(route: &[Position], t: usize) -> Option<Position> {
    route.get(t).or(route.last()).copied()
}

/// Twice the midpoint of a move, so crossings compare exactly.
fn doubled_midpoint(from: Position, to: Position) -> (usize, usize) {
    (from.row + to.row, from.col + to.col)
}

/// The first conflict between two routes, if any.
pub fn first_conflict(
    (first, a): (AgentId, &[Position]),
    (second, b): (AgentId, &[Position]),
) -> Option<Conflict> {
    let horizon = a.len().max(b.len());
    let conflict = |timestep, kind| Conflict {
        first,
        second,
        timestep,
        kind,
    };

    for t in 0..horizon {
        let (Some(a_now), Some(b_now)) = (at(a, t), at(b, t)) else {
            return None;
        };
        if a_now == b_now {
            return Some(conflict(t, ConflictKind::Vertex));
        }
        if t == 0 {
            continue;
        }
        let (Some(a_prev), Some(b_prev)) = (at(a, t - 1), at(b, t - 1)) else {
            continue;
        };
        if a_now == b_prev && b_now == a_prev {
            return Some(conflict(t, ConflictKind::Swap));
        }
        let both_move = a_prev != a_now && b_prev != b_now;
        if both_move && doubled_midpoint(a_prev, a_now) == doubled_midpoint(b_prev, b_now) {
            return Some(conflict(t, ConflictKind::PassThrough));
        }
    }
    None
}

/// Every conflicting pair among `routes`, one conflict per pair.
pub fn detect_conflicts(routes: &[(AgentId, Vec<Position>)]) -> Vec<Conflict> {
    let mut conflicts = Vec::new();
    for (i, (first, a)) in routes.iter().enumerate() {
        for (second, b) in &routes[i + 1..] {
            if let Some(conflict) = first_conflict((*first, a), (*second, b)) {
                conflicts.push(conflict);
            }
        }
    }
    conflicts
}

/// Undirected adjacency between conflicting agents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictGraph {
    edges: BTreeMap<AgentId, BTreeSet<AgentId>>,
}

impl ConflictGraph {
    pub fn from_conflicts(conflicts: &[Conflict]) -> Self {
        let mut graph = Self::default();
        for conflict in conflicts {
            graph.edges.entry(conflict.first).or_default().insert(conflict.second);
            graph.edges.entry(conflict.second).or_default().insert(conflict.first);
        }
        graph
    }

    pub fn neighbors(&self, agent: AgentId) -> impl Iterator<Item = AgentId> + '_ {
        self.edges.get(&agent).into_iter().flatten().copied()
    }

    pub fn contains(&self, agent: AgentId) -> bool {
        self.edges.contains_key(&agent)
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

/// What conflict resolution achieved in one planning pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionReport {
    /// Detect-and-repair rounds that ran.
    pub rounds: usize,
    /// Agents given a new route during resolution.
    pub rerouted: Vec<AgentId>,
    /// Agents forced to hold position.
    pub parked: Vec<AgentId>,
    /// Conflicts still present after every fallback. Non-empty only when the
    /// resolution budget ran out.
    pub unresolved: Vec<Conflict>,
}

impl ResolutionReport {
    /// True when the attempt cap was reached with conflicts left over.
    pub fn exhausted(&self) -> bool {
        !self.unresolved.is_empty()
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
    fn detects_vertex_conflicts() {
        let a = [p(0, 0), p(0, 1), p(0, 2)];
        let b = [p(1, 1), p(0, 1), p(1, 1)];
        assert_eq!(
            first_conflict((A, &a), (B, &b)),
            Some(Conflict {
                first: A,
                second: B,
                timestep: 1,
                kind: ConflictKind::Vertex
            })
        );
    }

    #[test]
    fn detects_swaps() {
        let a = [p(0, 0), p(0, 1)];
        let b = [p(0, 1), p(0, 0)];
        assert_eq!(
            first_conflict((A, &a), (B, &b)).map(|c| c.kind),
            Some(ConflictKind::Swap)
        );
    }

    #[test]
    fn detects_crossing_moves() {
        // Diagonal jumps that cross at (0.5, 0.5).
        let a = [p(0, 0), p(1, 1)];
        let b = [p(0, 1), p(1, 0)];
        assert_eq!(
            first_conflict((A, &a), (B, &b)).map(|c| c.kind),
            Some(ConflictKind::PassThrough)
        );
    }

    #[test]
    fn following_is_not_a_conflict() {
        let a = [p(0, 1), p(0, 2), p(0, 3)];
        let b = [p(0, 0), p(0, 1), p(0, 2)];
        assert_eq!(first_conflict((A, &a), (B, &b)), None);
    }

    #[test]
    fn finished_route_blocks_its_last_cell() {
        let a = [p(0, 0), p(0, 1)];
        let b = [p(2, 1), p(1, 1), p(1, 0), p(0, 0), p(0, 1)];
        let conflict = first_conflict((A, &a), (B, &b)).unwrap();
        assert_eq!((conflict.timestep, conflict.kind), (4, ConflictKind::Vertex));
    }

    #[test]
    fn graph_is_undirected() {
        let routes = vec![
            (A, vec![p(0, 0), p(0, 1)]),
            (B, vec![p(0, 2), p(0, 1)]),
            (AgentId(3), vec![p(5, 5)]),
        ];
        let conflicts = detect_conflicts(&routes);
        assert_eq!(conflicts.len(), 1);
        let graph = ConflictGraph::from_conflicts(&conflicts);
        assert_eq!(graph.neighbors(A).collect::<Vec<_>>(), vec![B]);
        assert_eq!(graph.neighbors(B).collect::<Vec<_>>(), vec![A]);
        assert!(!graph.contains(AgentId(3)));
    }
}
