//! Tick-by-tick execution of committed routes.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Position, Timestep,
    agent::Agent,
    conflict::first_conflict,
    occupancy::OccupancyRule,
    planner::{Fleet, find, hold_route},
    resources::{Budget, Limits, ResourceState, Tracking},
    search::a_star_multi,
    world::Cell,
};

/// What happened during one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickReport {
    /// Timestep after the tick.
    pub timestep: Timestep,
    pub leader_position: Option<Position>,
    pub leader_completed: bool,
    /// Agents whose planned step was held back to avoid a collision.
    pub displaced: Vec<AgentId>,
    /// Agents that finished an errand this tick and were given a new goal.
    pub new_goals: Vec<(AgentId, Position)>,
}

impl Fleet {
    /// Moves every agent one step along its committed route.
    ///
    /// Steps that would put two agents on one cell, or make two agents trade
    /// cells, are held back starting from the lowest-ranked agent; a held agent
    /// keeps its step for the next tick. Followers that reach their goal get a
    /// fresh one and a new route, or hold position when that route would cross
    /// the leader.
    pub fn advance_multi(&mut self) -> TickReport {
        if self.order.is_empty() {
            self.order = self.policy.order(&self.agents);
        }
        let order = self.order.clone();
        let leader = order.first().copied();

        let indices: Vec<usize> = order
            .iter()
            .filter_map(|id| self.agents.iter().position(|agent| agent.id == *id))
            .collect();
        let current: Vec<Position> = indices.iter().map(|&i| self.agents[i].position).collect();
        let mut proposed: Vec<Position> = indices
            .iter()
            .map(|&i| {
                let agent = &self.agents[i];
                agent.path.front().copied().unwrap_or(agent.position)
            })
            .collect();
        arbitrate(&current, &mut proposed);

        self.now += 1;
        let mut displaced = Vec::new();
        for (rank, &i) in indices.iter().enumerate() {
            let next = proposed[rank];
            let agent = &mut self.agents[i];
            match agent.path.front() {
                Some(&step) if step == next => {
                    agent.path.pop_front();
                }
                Some(_) => displaced.push(agent.id),
                None => {}
            }
            charge(agent, next, &self.world.grid[next], &self.limits);
            agent.position = next;
            agent.sync_timeline(self.now);
        }
        if !displaced.is_empty() {
            debug!("t={}: held back {displaced:?}", self.now);
        }

        let mut leader_completed = false;
        if let Some(agent) = leader.and_then(|id| self.agents.iter_mut().find(|a| a.id == id)) {
            if agent.at_goal() {
                agent.completed = true;
                leader_completed = true;
            }
        }

        let new_goals = self.reissue_goals(&order);
        self.table = self.committed_table(None);

        TickReport {
            timestep: self.now,
            leader_position: leader.and_then(|id| find(&self.agents, id)).map(|a| a.position),
            leader_completed,
            displaced,
            new_goals,
        }
    }

    /// Gives followers standing on their goal a new errand and route.
    fn reissue_goals(&mut self, order: &[AgentId]) -> Vec<(AgentId, Position)> {
        let Some((&leader, followers)) = order.split_first() else {
            return Vec::new();
        };
        let leader_route = find(&self.agents, leader)
            .map(Agent::route)
            .unwrap_or_default();
        let horizon = leader_route.len().saturating_sub(1);
        let mut new_goals = Vec::new();

        for &id in followers {
            let Some(i) = self.agents.iter().position(|agent| agent.id == id) else {
                continue;
            };
            if !self.agents[i].at_goal() {
                continue;
            }
            let goal = self.sampler.sample(&self.world, &self.agents);
            self.agents[i].begin_errand(goal, &self.limits);
            let Some(goal) = goal else {
                debug!("{id} finished its errand, no free cell for another");
                continue;
            };
            new_goals.push((id, goal));

            let table = self.committed_table(Some(id));
            let planned = {
                let agent = &self.agents[i];
                let problem = self.problem(agent, goal, self.config.multi_agent_expansions);
                a_star_multi(&problem, &OccupancyRule { table: &table, agent: id })
            };
            let route = planned
                .map(|outcome| outcome.path)
                .filter(|route| first_conflict((id, route), (leader, &leader_route)).is_none())
                .unwrap_or_else(|| {
                    info!("{id} parks until the next pass, no route to {goal} clear of {leader}");
                    hold_route(self.agents[i].position, horizon)
                });
            self.agents[i].commit_route(self.now, &route);
        }
        new_goals
    }
}

/// Reverts proposed steps until no two agents share a target cell or trade
/// cells. Indices are ranks: lower index wins. The lower-ranked agent of a
/// clash yields first; the higher-ranked one only yields when the other is
/// already standing still.
fn arbitrate(current: &[Position], proposed: &mut [Position]) {
    loop {
        let mut changed = false;
        for high in 0..proposed.len() {
            for low in high + 1..proposed.len() {
                let vertex = proposed[high] == proposed[low];
                let swap = current[high] != current[low]
                    && proposed[high] == current[low]
                    && proposed[low] == current[high];
                if !vertex && !swap {
                    continue;
                }
                if proposed[low] != current[low] {
                    proposed[low] = current[low];
                } else if proposed[high] != current[high] {
                    proposed[high] = current[high];
                } else {
                    continue;
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

/// Applies the cost of moving to (or waiting on) `next`.
fn charge(agent: &mut Agent, next: Position, cell: &Cell, limits: &Limits) {
    let budgets = Limits {
        time: agent.time_left,
        fuel: agent.fuel_left,
        fuel_capacity: limits.fuel_capacity,
    };
    let state = ResourceState::new(agent.position, &budgets, 0);
    let after = if next == agent.position {
        state.wait(Tracking::TimeAndFuel)
    } else {
        state.step(next, cell, &budgets, Tracking::TimeAndFuel)
    };
    match after {
        Some(after) => {
            agent.time_left = after.time_left;
            agent.fuel_left = after.fuel_left;
        }
        None => {
            warn!("{} has run out of budget at {}", agent.id, agent.position);
            let drain = |budget: Budget| match budget {
                Budget::Unlimited => Budget::Unlimited,
                Budget::Left(_) => Budget::Left(0),
            };
            agent.time_left = drain(agent.time_left);
            if next != agent.position {
                agent.fuel_left = drain(agent.fuel_left);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Level, PlannerConfig, world::load_world_from_string};

    fn p(row: usize, col: usize) -> Position {
        Position::new(row, col)
    }

    fn fleet(map: &str) -> Fleet {
        let world = load_world_from_string(map, Level::MultiAgent).unwrap();
        Fleet::new(world, PlannerConfig::default())
    }

    #[test]
    fn lower_rank_yields_on_a_shared_target() {
        let current = [p(0, 0), p(0, 2)];
        let mut proposed = [p(0, 1), p(0, 1)];
        arbitrate(&current, &mut proposed);
        assert_eq!(proposed, [p(0, 1), p(0, 2)]);
    }

    #[test]
    fn swaps_are_broken() {
        let current = [p(0, 0), p(0, 1)];
        let mut proposed = [p(0, 1), p(0, 0)];
        arbitrate(&current, &mut proposed);
        // The follower stays put, so the leader cannot enter its cell either.
        assert_eq!(proposed, current);
    }

    #[test]
    fn yielding_cascades_down_a_queue() {
        // Three agents in a row all shuffle right, but the front one is blocked.
        let current = [p(0, 3), p(0, 1), p(0, 0)];
        let mut proposed = [p(0, 3), p(0, 2), p(0, 1)];
        arbitrate(&current, &mut proposed);
        assert_eq!(proposed, [p(0, 3), p(0, 2), p(0, 1)]);

        let mut blocked = [p(0, 3), p(0, 3), p(0, 1)];
        let current = [p(0, 3), p(0, 2), p(0, 1)];
        arbitrate(&current, &mut blocked);
        assert_eq!(blocked, current);
    }

    #[test]
    fn leader_walks_to_its_goal() {
        let mut fleet = fleet("1 4 10 10\nS 0 0 G");
        let plan = fleet.plan_multi().unwrap();
        let mut ticks = 0;
        loop {
            let report = fleet.advance_multi();
            ticks += 1;
            if report.leader_completed {
                assert_eq!(report.leader_position, Some(p(0, 3)));
                break;
            }
            assert!(ticks < 10);
        }
        assert_eq!(ticks, plan.path.len() - 1);
        let leader = fleet.agent(AgentId::MAIN).unwrap();
        assert_eq!(leader.time_left, Budget::Left(7));
        assert_eq!(leader.path_all, vec![p(0, 0), p(0, 1), p(0, 2), p(0, 3)]);
    }

    #[test]
    fn held_agent_keeps_its_step() {
        let mut fleet = fleet("1 3 9 9\nS 0 S1");
        fleet.agents[0].commit_route(0, &[p(0, 0), p(0, 1)]);
        fleet.agents[1].commit_route(0, &[p(0, 2), p(0, 1)]);

        let report = fleet.advance_multi();
        assert_eq!(report.displaced, vec![AgentId(1)]);
        assert_eq!(report.leader_position, Some(p(0, 1)));
        let follower = fleet.agent(AgentId(1)).unwrap();
        assert_eq!(follower.position, p(0, 2));
        assert_eq!(follower.path.front(), Some(&p(0, 1)));
        assert_eq!(follower.path_all, vec![p(0, 2), p(0, 2), p(0, 1)]);
    }

    #[test]
    fn finished_follower_gets_a_new_errand() {
        let mut fleet = fleet(
            "2 4 50 50
             S 0 0 G
             S1 G1 0 0",
        );
        fleet.plan_multi().unwrap();
        let report = fleet.advance_multi();
        let (id, goal) = report.new_goals[0];
        assert_eq!(id, AgentId(1));

        let follower = fleet.agent(AgentId(1)).unwrap();
        assert_eq!(follower.start, p(1, 1));
        assert_eq!(follower.goal, Some(goal));
        assert_eq!(follower.time_left, Budget::Left(50));
        assert_eq!(follower.route().first(), Some(&p(1, 1)));
    }

    #[test]
    fn agents_never_share_a_cell() {
        let mut fleet = fleet(
            "3 4 60 60
             S 0 S1 G2
             0 -1 0 0
             G1 0 S2 G",
        );
        fleet.plan_multi().unwrap();
        for _ in 0..12 {
            let report = fleet.advance_multi();
            let mut cells: Vec<Position> = fleet.agents().iter().map(|a| a.position).collect();
            cells.sort();
            cells.dedup();
            assert_eq!(cells.len(), fleet.agents().len());
            if report.leader_completed {
                break;
            }
        }
    }
}
