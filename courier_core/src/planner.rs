//! Multi-agent planning against a shared occupancy table.
//!
//! A pass plans every agent in priority order, each against the reservations
//! of the agents planned before it, then repairs whatever conflicts remain by
//! rerouting or parking lower-priority agents. The leader's route is never
//! touched by the repair.

use std::collections::{BTreeMap, HashSet};

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Level, Position, Timestep,
    agent::{Agent, GoalSampler, MainFirst, PriorityPolicy},
    config::PlannerConfig,
    conflict::{ConflictGraph, ResolutionReport, detect_conflicts, first_conflict},
    error::{Endpoint, PlanError},
    occupancy::{OccupancyRule, TimeWindowTable},
    resources::{Budget, Limits, Tracking},
    search::{MoveRule, SearchProblem, a_star_multi, cost_search},
    world::World,
};

/// Result of a committed planning pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultiPlan {
    pub leader: AgentId,
    /// The leader's route, starting at its current position.
    pub path: Vec<Position>,
    pub goal: Position,
    pub time_left: Budget,
    pub fuel_left: Budget,
    pub report: ResolutionReport,
}

/// A planning pass that has not been committed yet. Dropping it leaves the
/// fleet exactly as it was.
#[derive(Debug, Clone)]
pub struct PendingPlan {
    leader: AgentId,
    goal: Position,
    agents: Vec<Agent>,
    order: Vec<AgentId>,
    routes: BTreeMap<AgentId, Vec<Position>>,
    time_left: Budget,
    fuel_left: Budget,
    report: ResolutionReport,
    now: Timestep,
}

impl PendingPlan {
    pub fn route(&self, agent: AgentId) -> Option<&[Position]> {
        self.routes.get(&agent).map(Vec::as_slice)
    }

    pub fn report(&self) -> &ResolutionReport {
        &self.report
    }
}

/// A fleet of agents sharing one world and one timeline.
pub struct Fleet {
    pub(crate) world: World,
    pub(crate) config: PlannerConfig,
    pub(crate) limits: Limits,
    pub(crate) agents: Vec<Agent>,
    pub(crate) policy: Box<dyn PriorityPolicy>,
    pub(crate) sampler: GoalSampler,
    pub(crate) table: TimeWindowTable,
    pub(crate) order: Vec<AgentId>,
    pub(crate) now: Timestep,
}

impl Fleet {
    /// Creates a fleet from the world's agent markers, led by the main agent.
    pub fn new(world: World, config: PlannerConfig) -> Self {
        Self::with_policy(world, config, Box::new(MainFirst))
    }

    pub fn with_policy(
        world: World,
        config: PlannerConfig,
        policy: Box<dyn PriorityPolicy>,
    ) -> Self {
        let limits = Limits::for_level(Level::MultiAgent, world.time_limit, world.fuel_limit);
        let agents = Agent::from_world(&world, &limits);
        let sampler = GoalSampler::new(config.seed, config.goal_sample_attempts);
        Fleet {
            world,
            config,
            limits,
            agents,
            policy,
            sampler,
            table: TimeWindowTable::new(),
            order: Vec::new(),
            now: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|agent| agent.id == id)
    }

    /// Current timestep.
    pub fn now(&self) -> Timestep {
        self.now
    }

    /// Occupancy as of the last commit.
    pub fn occupancy(&self) -> &TimeWindowTable {
        &self.table
    }

    /// Plans and commits a full pass. Returns the leader's route and goal.
    pub fn plan_multi(&mut self) -> Result<MultiPlan, PlanError> {
        let pending = self.prepare()?;
        Ok(self.commit(pending))
    }

    /// Runs a planning pass without committing it. Only the goal sampler
    /// advances; agents, routes and occupancy are left untouched.
    pub fn prepare(&mut self) -> Result<PendingPlan, PlanError> {
        let now = self.now;
        let mut agents = self.agents.clone();
        let mut table = TimeWindowTable::from_timelines(
            agents.iter().map(|agent| (agent.id, agent.history(now))),
            now,
        );

        let order = self.policy.order(&agents);
        let leader = *order.first().ok_or(PlanError::MissingEndpoint {
            agent: AgentId::MAIN,
            which: Endpoint::Start,
        })?;

        self.refresh_goals(&mut agents, &order[1..]);

        let leader_agent = find(&agents, leader).ok_or(PlanError::MissingEndpoint {
            agent: leader,
            which: Endpoint::Start,
        })?;
        let leader_goal = leader_agent.goal.ok_or(PlanError::MissingEndpoint {
            agent: leader,
            which: Endpoint::Goal,
        })?;
        let outcome = {
            let expansions = self.config.multi_agent_expansions;
            let problem = self.problem(leader_agent, leader_goal, expansions);
            a_star_multi(&problem, &OccupancyRule { table: &table, agent: leader })
                .ok_or(PlanError::NoPathFound)?
        };
        table.reserve_path(leader, now, &outcome.path);
        let horizon = outcome.path.len() - 1;
        debug!("leader {leader} planned {} steps to {leader_goal}", horizon);

        let mut routes = BTreeMap::from([(leader, outcome.path.clone())]);
        let mut report = ResolutionReport::default();

        for &id in &order[1..] {
            let Some(agent) = find(&agents, id) else {
                continue;
            };
            let planned = agent.goal.and_then(|goal| {
                let problem = self.problem(agent, goal, self.config.multi_agent_expansions);
                a_star_multi(&problem, &OccupancyRule { table: &table, agent: id })
            });
            let route = match planned {
                Some(outcome) => outcome.path,
                None => {
                    debug!("{id} has no route this pass, holding at {}", agent.position);
                    report.parked.push(id);
                    hold_route(agent.position, horizon)
                }
            };
            table.reserve_path(id, now, &route);
            routes.insert(id, route);
        }

        self.resolve(&agents, &order, &mut routes, horizon, &mut report);
        info!(
            "pass at t={now}: {} agents, {} rounds, {} rerouted, {} parked",
            agents.len(),
            report.rounds,
            report.rerouted.len(),
            report.parked.len()
        );

        Ok(PendingPlan {
            leader,
            goal: leader_goal,
            agents,
            order,
            routes,
            time_left: outcome.time_left,
            fuel_left: outcome.fuel_left,
            report,
            now,
        })
    }

    /// Commits a prepared pass: routes become the agents' committed paths.
    pub fn commit(&mut self, pending: PendingPlan) -> MultiPlan {
        let PendingPlan {
            leader,
            goal,
            mut agents,
            order,
            routes,
            time_left,
            fuel_left,
            report,
            now,
        } = pending;

        for agent in &mut agents {
            if let Some(route) = routes.get(&agent.id) {
                agent.commit_route(now, route);
            }
        }
        self.agents = agents;
        self.order = order;
        self.table = self.committed_table(None);

        MultiPlan {
            leader,
            path: routes.get(&leader).cloned().unwrap_or_default(),
            goal,
            time_left,
            fuel_left,
            report,
        }
    }

    /// Assigns goals to followers that have none or have reached theirs.
    fn refresh_goals(&mut self, agents: &mut [Agent], followers: &[AgentId]) {
        for &id in followers {
            let Some(index) = agents.iter().position(|agent| agent.id == id) else {
                continue;
            };
            let agent = &agents[index];
            if agent.goal.is_some() && !agent.at_goal() {
                continue;
            }
            let goal = self.sampler.sample(&self.world, agents);
            debug!("{id} gets new goal {goal:?}");
            agents[index].begin_errand(goal, &self.limits);
        }
    }

    pub(crate) fn problem(
        &self,
        agent: &Agent,
        goal: Position,
        max_expansions: usize,
    ) -> SearchProblem<'_> {
        SearchProblem {
            grid: &self.world.grid,
            start: agent.position,
            goal,
            limits: Limits {
                time: agent.time_left,
                fuel: agent.fuel_left,
                fuel_capacity: self.limits.fuel_capacity,
            },
            start_timestep: self.now,
            max_expansions,
        }
    }

    /// Repairs conflicts among `routes` by rerouting or parking the
    /// lower-ranked agent of each conflicting pair. Stops early once a round
    /// leaves every route as it was.
    fn resolve(
        &self,
        agents: &[Agent],
        order: &[AgentId],
        routes: &mut BTreeMap<AgentId, Vec<Position>>,
        horizon: usize,
        report: &mut ResolutionReport,
    ) {
        let leader = order[0];
        let rank = |id: AgentId| order.iter().position(|&other| other == id).unwrap_or(usize::MAX);
        let ordered = |routes: &BTreeMap<AgentId, Vec<Position>>| -> Vec<(AgentId, Vec<Position>)> {
            order
                .iter()
                .filter_map(|id| routes.get(id).map(|route| (*id, route.clone())))
                .collect()
        };

        for round in 0..self.config.resolution_rounds {
            let conflicts = detect_conflicts(&ordered(routes));
            if conflicts.is_empty() {
                return;
            }
            report.rounds = round + 1;
            let graph = ConflictGraph::from_conflicts(&conflicts);

            // Anyone in conflict with a higher-ranked agent has to move.
            let displaced: Vec<AgentId> = order[1..]
                .iter()
                .copied()
                .filter(|&id| graph.neighbors(id).any(|other| rank(other) < rank(id)))
                .collect();

            let before = routes.clone();
            for id in displaced {
                let Some(agent) = find(agents, id) else {
                    continue;
                };
                let others: Vec<AgentId> = graph.neighbors(id).collect();
                debug!("round {round}: rerouting {id} around {others:?}");

                let table = table_from_routes(agents, routes, self.now, Some(id));
                let leader_route = &routes[&leader];
                let rerouted = self
                    .find_alternative_path(agent, &table, leader_route, horizon)
                    .filter(|route| first_conflict((id, route), (leader, leader_route)).is_none());

                match rerouted {
                    Some(route) => {
                        routes.insert(id, route);
                        push_unique(&mut report.rerouted, id);
                    }
                    None => {
                        routes.insert(id, hold_route(agent.position, horizon));
                        push_unique(&mut report.parked, id);
                    }
                }
            }
            if *routes == before {
                debug!("round {round} changed no route");
                break;
            }
        }

        self.force_holds(agents, order, routes, horizon, report, &ordered);
    }

    /// Last resort once the round budget is spent: park agents until no
    /// conflict is left that parking can remove, and report the rest.
    fn force_holds(
        &self,
        agents: &[Agent],
        order: &[AgentId],
        routes: &mut BTreeMap<AgentId, Vec<Position>>,
        horizon: usize,
        report: &mut ResolutionReport,
        ordered: &dyn Fn(&BTreeMap<AgentId, Vec<Position>>) -> Vec<(AgentId, Vec<Position>)>,
    ) {
        let leader = order[0];
        let mut held: HashSet<AgentId> = HashSet::new();
        loop {
            let conflicts = detect_conflicts(&ordered(routes));
            if conflicts.is_empty() {
                return;
            }
            // `ordered` lists agents by rank, so `second` is the lower-ranked one.
            let next = conflicts.iter().find_map(|c| {
                if !held.contains(&c.second) {
                    Some(c.second)
                } else if c.first != leader && !held.contains(&c.first) {
                    Some(c.first)
                } else {
                    None
                }
            });
            match next {
                Some(id) => {
                    held.insert(id);
                    if let Some(agent) = find(agents, id) {
                        routes.insert(id, hold_route(agent.position, horizon));
                        push_unique(&mut report.parked, id);
                    }
                }
                None => {
                    warn!(
                        "conflict resolution exhausted after {} rounds, {} conflicts remain",
                        report.rounds,
                        conflicts.len()
                    );
                    report.unresolved = conflicts;
                    return;
                }
            }
        }
    }

    /// Reroutes `agent` within `horizon` steps, never entering a cell of the
    /// leader's route (its own current cell excepted) and respecting every
    /// reservation in `table`. When the goal is out of reach the route ends on
    /// the reachable cell closest to it. Short routes hold their last cell up
    /// to the horizon.
    pub fn find_alternative_path(
        &self,
        agent: &Agent,
        table: &TimeWindowTable,
        leader_route: &[Position],
        horizon: usize,
    ) -> Option<Vec<Position>> {
        let goal = agent.goal?;
        let rule = DetourRule {
            table,
            agent: agent.id,
            start: agent.position,
            leader_cells: leader_route.iter().copied().collect(),
            deadline: self.now + horizon as Timestep,
        };
        let problem = self.problem(agent, goal, self.config.alternative_expansions);
        let exploration = cost_search(&problem, &rule, true, Tracking::TimeAndFuel);
        let mut route = exploration.reached.or(exploration.closest)?.path;
        if let Some(&last) = route.last() {
            if route.len() < horizon + 1 {
                route.resize(horizon + 1, last);
            }
        }
        Some(route)
    }

    /// Occupancy from every agent's committed timeline, optionally leaving one
    /// agent out.
    pub(crate) fn committed_table(&self, without: Option<AgentId>) -> TimeWindowTable {
        let routes: BTreeMap<AgentId, Vec<Position>> = self
            .agents
            .iter()
            .map(|agent| (agent.id, agent.route()))
            .collect();
        table_from_routes(&self.agents, &routes, self.now, without)
    }
}

/// Legality for rerouting a lower-priority agent.
struct DetourRule<'a> {
    table: &'a TimeWindowTable,
    agent: AgentId,
    start: Position,
    leader_cells: HashSet<Position>,
    deadline: Timestep,
}

impl MoveRule for DetourRule<'_> {
    fn timed(&self) -> bool {
        true
    }

    fn allows(&self, from: Position, to: Position, arrival: Timestep) -> bool {
        arrival <= self.deadline
            && (to == self.start || !self.leader_cells.contains(&to))
            && self.table.is_valid_move(self.agent, from, to, arrival)
    }

    fn accepts_goal(&self, goal: Position, arrival: Timestep) -> bool {
        self.table.clear_from(goal, arrival, self.agent)
    }

    fn can_rest(&self, position: Position, arrival: Timestep) -> bool {
        self.table.clear_from(position, arrival, self.agent)
    }
}

pub(crate) fn find(agents: &[Agent], id: AgentId) -> Option<&Agent> {
    agents.iter().find(|agent| agent.id == id)
}

/// Staying on `position` for `horizon` steps.
pub(crate) fn hold_route(position: Position, horizon: usize) -> Vec<Position> {
    vec![position; horizon + 1]
}

fn push_unique(ids: &mut Vec<AgentId>, id: AgentId) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

/// Occupancy from executed histories plus `routes` starting at `now`.
fn table_from_routes(
    agents: &[Agent],
    routes: &BTreeMap<AgentId, Vec<Position>>,
    now: Timestep,
    without: Option<AgentId>,
) -> TimeWindowTable {
    let included = || agents.iter().filter(|agent| Some(agent.id) != without);
    let timelines = included().map(|agent| (agent.id, agent.history(now)));
    let mut table = TimeWindowTable::from_timelines(timelines, now);
    for agent in included() {
        if let Some(route) = routes.get(&agent.id) {
            table.reserve_path(agent.id, now, route);
        }
    }
    table
}
