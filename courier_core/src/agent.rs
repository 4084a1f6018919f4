use std::collections::{HashSet, VecDeque};

use log::debug;
use rand::{Rng, SeedableRng, rngs::StdRng};
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Position, Timestep,
    resources::{Budget, Limits},
    world::World,
};

/// Holds the routing state of one agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub position: Position,
    pub start: Position,
    pub goal: Option<Position>,
    /// Committed steps not executed yet, one per future timestep.
    pub path: VecDeque<Position>,
    /// Position at every timestep: executed history up to the current tick,
    /// then the committed steps.
    pub path_all: Vec<Position>,
    pub time_left: Budget,
    pub fuel_left: Budget,
    pub completed: bool,
}

impl Agent {
    pub fn new(id: AgentId, start: Position, goal: Option<Position>, limits: &Limits) -> Self {
        Agent {
            id,
            position: start,
            start,
            goal,
            path: VecDeque::new(),
            path_all: vec![start],
            time_left: limits.time,
            fuel_left: limits.fuel,
            completed: false,
        }
    }

    /// Decodes the agents from a world's start and goal markers.
    pub fn from_world(world: &World, limits: &Limits) -> Vec<Agent> {
        world
            .agent_ids()
            .filter_map(|id| {
                let start = world.start_of(id)?;
                Some(Agent::new(id, start, world.goal_of(id), limits))
            })
            .collect()
    }

    pub fn at_goal(&self) -> bool {
        self.goal == Some(self.position)
    }

    /// Executed prefix of the timeline up to and including `now`.
    pub fn history(&self, now: Timestep) -> &[Position] {
        let end = (now as usize + 1).min(self.path_all.len());
        &self.path_all[..end]
    }

    /// Replaces the committed steps after `now` with `route`, where
    /// `route[0]` is the position at `now`.
    pub fn commit_route(&mut self, now: Timestep, route: &[Position]) {
        self.path = route.iter().skip(1).copied().collect();
        self.sync_timeline(now);
    }

    /// Rewrites the timeline from `now` on: current position, then `path`.
    pub(crate) fn sync_timeline(&mut self, now: Timestep) {
        self.path_all.truncate(now as usize);
        self.path_all.push(self.position);
        self.path_all.extend(self.path.iter().copied());
    }

    /// The committed route seen from `now`: current position first.
    pub fn route(&self) -> Vec<Position> {
        std::iter::once(self.position)
            .chain(self.path.iter().copied())
            .collect()
    }

    /// Archives the reached goal and starts a new errand from here.
    pub fn begin_errand(&mut self, goal: Option<Position>, limits: &Limits) {
        self.start = self.position;
        self.goal = goal;
        self.completed = false;
        self.time_left = limits.time;
        self.fuel_left = limits.fuel;
    }
}

/// Decides the planning order of a fleet. The first agent of the order leads:
/// its route is never changed to make room for the others.
pub trait PriorityPolicy {
    fn order(&self, agents: &[Agent]) -> Vec<AgentId>;
}

/// The main agent leads, the rest follow by id.
#[derive(Debug, Clone, Copy, Default)]
pub struct MainFirst;

impl PriorityPolicy for MainFirst {
    fn order(&self, agents: &[Agent]) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = agents.iter().map(|agent| agent.id).collect();
        ids.sort_by_key(|id| (!id.is_main(), *id));
        ids
    }
}

/// The main agent leads, the rest follow by how close they are to their goal.
/// Agents without a goal go last.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestRemainingFirst;

impl PriorityPolicy for ShortestRemainingFirst {
    fn order(&self, agents: &[Agent]) -> Vec<AgentId> {
        let mut keyed: Vec<_> = agents
            .iter()
            .map(|agent| {
                let remaining = agent
                    .goal
                    .map_or(usize::MAX, |goal| agent.position.manhattan(&goal));
                ((!agent.id.is_main(), remaining, agent.id), agent.id)
            })
            .collect();
        keyed.sort_by_key(|(key, _)| *key);
        keyed.into_iter().map(|(_, id)| id).collect()
    }
}

/// Draws new goals by rejection sampling over plain floor cells.
#[derive(Debug)]
pub struct GoalSampler {
    rng: StdRng,
    attempts: usize,
}

impl GoalSampler {
    pub fn new(seed: u64, attempts: usize) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            attempts,
        }
    }

    /// A cell that is plain floor and is nobody's position, start or goal.
    pub fn sample(&mut self, world: &World, agents: &[Agent]) -> Option<Position> {
        let claimed: HashSet<Position> = agents
            .iter()
            .flat_map(|agent| [Some(agent.position), Some(agent.start), agent.goal])
            .flatten()
            .collect();
        let (rows, cols) = (world.grid.rows(), world.grid.cols());
        if rows == 0 || cols == 0 {
            return None;
        }

        for _ in 0..self.attempts {
            let candidate = Position::new(
                self.rng.random_range(0..rows),
                self.rng.random_range(0..cols),
            );
            if world.grid[candidate].is_plain() && !claimed.contains(&candidate) {
                return Some(candidate);
            }
        }
        debug!("no free goal found in {} draws", self.attempts);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Level, world::load_world_from_string};

    fn agent(id: u32, position: Position, goal: Option<Position>) -> Agent {
        Agent::new(AgentId(id), position, goal, &Limits::UNLIMITED)
    }

    #[test]
    fn decodes_agents_from_markers() {
        let world = load_world_from_string(
            "2 3 10 10
             S S1 G
             G1 0 S2",
            Level::MultiAgent,
        )
        .unwrap();
        let agents = Agent::from_world(&world, &Limits::UNLIMITED);
        assert_eq!(agents.len(), 3);
        assert_eq!(agents[0].id, AgentId::MAIN);
        assert_eq!(agents[1].goal, Some(Position::new(1, 0)));
        assert_eq!(agents[2].goal, None);
    }

    #[test]
    fn commit_route_keeps_history() {
        let mut a = agent(1, Position::new(0, 0), None);
        a.commit_route(0, &[Position::new(0, 0), Position::new(0, 1), Position::new(0, 2)]);
        assert_eq!(a.path_all.len(), 3);
        assert_eq!(a.path.len(), 2);

        // Two ticks later the agent replans from (0,2).
        a.path_all = vec![Position::new(0, 0), Position::new(0, 1), Position::new(0, 2)];
        a.position = Position::new(0, 2);
        a.commit_route(2, &[Position::new(0, 2), Position::new(1, 2)]);
        assert_eq!(
            a.path_all,
            vec![
                Position::new(0, 0),
                Position::new(0, 1),
                Position::new(0, 2),
                Position::new(1, 2)
            ]
        );
        assert_eq!(a.route(), vec![Position::new(0, 2), Position::new(1, 2)]);
        assert_eq!(a.history(1), &[Position::new(0, 0), Position::new(0, 1)]);
    }

    #[test]
    fn main_first_puts_the_main_agent_in_front() {
        let agents = vec![
            agent(2, Position::new(0, 0), None),
            agent(0, Position::new(0, 1), None),
            agent(1, Position::new(0, 2), None),
        ];
        assert_eq!(
            MainFirst.order(&agents),
            vec![AgentId::MAIN, AgentId(1), AgentId(2)]
        );
    }

    #[test]
    fn shortest_remaining_first_orders_by_distance() {
        let agents = vec![
            agent(1, Position::new(0, 0), Some(Position::new(4, 4))),
            agent(2, Position::new(0, 0), Some(Position::new(0, 1))),
            agent(3, Position::new(0, 0), None),
            agent(0, Position::new(0, 0), Some(Position::new(9, 9))),
        ];
        assert_eq!(
            ShortestRemainingFirst.order(&agents),
            vec![AgentId::MAIN, AgentId(2), AgentId(1), AgentId(3)]
        );
    }

    #[test]
    fn sampled_goals_avoid_claimed_and_special_cells() {
        let world = load_world_from_string(
            "2 3 10 10
             S -1 F2
             0 3 G",
            Level::MultiAgent,
        )
        .unwrap();
        let agents = vec![Agent::new(
            AgentId::MAIN,
            Position::new(0, 0),
            Some(Position::new(1, 2)),
            &Limits::UNLIMITED,
        )];
        let mut sampler = GoalSampler::new(7, 1_000);
        for _ in 0..20 {
            assert_eq!(sampler.sample(&world, &agents), Some(Position::new(1, 0)));
        }
    }

    #[test]
    fn marker_cells_are_free_once_nobody_claims_them() {
        let world = load_world_from_string("1 3 9 9\nS -1 G1", Level::MultiAgent).unwrap();
        let (start, goal) = (Position::new(0, 0), Position::new(0, 2));
        let mut sampler = GoalSampler::new(5, 200);

        // G1 has no agent record, so its cell is as good as an empty one.
        assert_eq!(sampler.sample(&world, &[agent(0, start, None)]), Some(goal));
        assert_eq!(sampler.sample(&world, &[agent(1, goal, None)]), Some(start));

        let claimed = [agent(0, start, None), agent(1, start, Some(goal))];
        assert_eq!(sampler.sample(&world, &claimed), None);
        let parked = [agent(0, start, None), agent(1, goal, None)];
        assert_eq!(sampler.sample(&world, &parked), None);
    }

    #[test]
    fn sampling_is_deterministic_per_seed() {
        let world =
            load_world_from_string("3 3 1 1\n0 0 0\n0 0 0\n0 0 0", Level::MultiAgent).unwrap();
        let draws = |seed| {
            let mut sampler = GoalSampler::new(seed, 100);
            (0..5).map(|_| sampler.sample(&world, &[])).collect::<Vec<_>>()
        };
        assert_eq!(draws(11), draws(11));
    }
}
