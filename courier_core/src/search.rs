//! Single-agent search strategies over the resource-augmented state space.
//!
//! Every strategy consumes a [`SearchProblem`] and yields a path from start to
//! goal (both inclusive) with the residual budgets, or `None`. UCS and both A*
//! variants share one best-first core; the time-indexed variant used by the
//! multi-agent planner is that same core with a timestep dimension, a wait
//! action and a [`MoveRule`] deciding which moves are legal.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet, VecDeque},
    fmt,
    str::FromStr,
};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::{
    AgentId, Level, Position, Timestep,
    config::PlannerConfig,
    error::{Endpoint, PlanError},
    map::Grid,
    resources::{BestCostTable, Budget, Limits, ResourceState, StateKey, Tracking},
    world::{Cell, World},
};

/// Everything a strategy needs to route one agent.
#[derive(Debug, Clone, Copy)]
pub struct SearchProblem<'a> {
    pub grid: &'a Grid<Cell>,
    pub start: Position,
    pub goal: Position,
    pub limits: Limits,
    /// Timestep at which the agent stands on `start`.
    pub start_timestep: Timestep,
    pub max_expansions: usize,
}

impl<'a> SearchProblem<'a> {
    pub fn new(grid: &'a Grid<Cell>, start: Position, goal: Position, limits: Limits) -> Self {
        SearchProblem {
            grid,
            start,
            goal,
            limits,
            start_timestep: 0,
            max_expansions: PlannerConfig::default().single_agent_expansions,
        }
    }

    fn endpoints_present(&self) -> bool {
        self.grid.contains(self.start) && self.grid.contains(self.goal)
    }

    fn heuristic(&self, position: Position) -> usize {
        position.manhattan(&self.goal)
    }

    /// Passable neighbours of `position`.
    fn open_neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        self.grid
            .neighbors(position)
            .filter(|next| self.grid[*next].is_passable())
    }
}

/// A found route and what is left of each budget at its end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchOutcome {
    pub path: Vec<Position>,
    pub time_left: Budget,
    pub fuel_left: Budget,
    pub expansions: usize,
}

impl SearchOutcome {
    /// Number of moves (path length minus the start cell).
    pub fn hops(&self) -> usize {
        self.path.len().saturating_sub(1)
    }
}

/// One way of searching for a route.
pub trait SearchStrategy {
    fn name(&self) -> &'static str;

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome>;
}

/// Legality of moves in the time-indexed search.
///
/// Untimed strategies use [`Unrestricted`]; the multi-agent planner injects a
/// rule backed by the occupancy table.
pub trait MoveRule {
    /// Whether states are identified by timestep and may wait in place.
    fn timed(&self) -> bool {
        false
    }

    /// Whether moving `from` → `to`, arriving at `arrival`, is allowed.
    fn allows(&self, _from: Position, _to: Position, _arrival: Timestep) -> bool {
        true
    }

    /// Whether standing on the goal at `arrival` finishes the search.
    fn accepts_goal(&self, _goal: Position, _arrival: Timestep) -> bool {
        true
    }

    /// Whether the agent could stop at `position` from `arrival` on. Used to
    /// pick a fallback end point when the goal is not reached.
    fn can_rest(&self, _position: Position, _arrival: Timestep) -> bool {
        false
    }
}

/// Every move the grid and budgets allow is legal.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl MoveRule for Unrestricted {}

/// Frontier entry ordered by priority, then insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Queued<T> {
    priority: usize,
    seq: u64,
    cost: usize,
    item: T,
}

impl<T: Eq> Ord for Queued<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering for min-heap behavior, FIFO among equal priorities
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl<T: Eq> PartialOrd for Queued<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Walks a parent map back from `end` and returns the path start-first.
fn reconstruct_positions(came_from: &HashMap<Position, Position>, end: Position) -> Vec<Position> {
    let mut path = vec![end];
    let mut current = end;
    while let Some(&previous) = came_from.get(&current) {
        path.push(previous);
        current = previous;
    }
    path.reverse();
    path
}

/// Container discipline for the uninformed searches.
trait Frontier: Default {
    fn put(&mut self, position: Position);
    fn take(&mut self) -> Option<Position>;
}

impl Frontier for VecDeque<Position> {
    fn put(&mut self, position: Position) {
        self.push_back(position);
    }

    fn take(&mut self) -> Option<Position> {
        self.pop_front()
    }
}

impl Frontier for Vec<Position> {
    fn put(&mut self, position: Position) {
        self.push(position);
    }

    fn take(&mut self) -> Option<Position> {
        self.pop()
    }
}

/// Graph search where the first visit to a cell wins.
fn first_visit_search<F: Frontier>(
    problem: &SearchProblem<'_>,
    name: &str,
) -> Option<SearchOutcome> {
    let mut frontier = F::default();
    let mut visited = HashSet::from([problem.start]);
    let mut came_from: HashMap<Position, Position> = HashMap::new();
    let mut expansions = 0;

    frontier.put(problem.start);
    while let Some(current) = frontier.take() {
        if current == problem.goal {
            return Some(SearchOutcome {
                path: reconstruct_positions(&came_from, current),
                time_left: problem.limits.time,
                fuel_left: problem.limits.fuel,
                expansions,
            });
        }
        expansions += 1;
        if expansions > problem.max_expansions {
            debug!("[{name}] gave up after {expansions} expansions");
            return None;
        }
        for next in problem.open_neighbors(current) {
            if visited.insert(next) {
                came_from.insert(next, current);
                frontier.put(next);
            }
        }
    }
    debug!("[{name}] frontier exhausted after {expansions} expansions");
    None
}

/// Breadth-first search: fewest hops, resources ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct BreadthFirst;

impl SearchStrategy for BreadthFirst {
    fn name(&self) -> &'static str {
        "BFS"
    }

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome> {
        if !problem.endpoints_present() {
            return None;
        }
        first_visit_search::<VecDeque<Position>>(problem, self.name())
    }
}

/// Depth-first search: any path, resources ignored.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirst;

impl SearchStrategy for DepthFirst {
    fn name(&self) -> &'static str {
        "DFS"
    }

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome> {
        if !problem.endpoints_present() {
            return None;
        }
        first_visit_search::<Vec<Position>>(problem, self.name())
    }
}

/// Greedy best-first search ordered by Manhattan distance to the goal.
#[derive(Debug, Clone, Copy, Default)]
pub struct GreedyBestFirst;

impl SearchStrategy for GreedyBestFirst {
    fn name(&self) -> &'static str {
        "GBFS"
    }

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome> {
        if !problem.endpoints_present() {
            return None;
        }

        let mut frontier = BinaryHeap::new();
        let mut visited = HashSet::new();
        let mut came_from: HashMap<Position, Position> = HashMap::new();
        let mut seq = 0;
        let mut expansions = 0;

        frontier.push(Queued {
            priority: problem.heuristic(problem.start),
            seq,
            cost: 0,
            item: problem.start,
        });

        while let Some(Queued { item: current, .. }) = frontier.pop() {
            if current == problem.goal {
                return Some(SearchOutcome {
                    path: reconstruct_positions(&came_from, current),
                    time_left: problem.limits.time,
                    fuel_left: problem.limits.fuel,
                    expansions,
                });
            }
            if !visited.insert(current) {
                continue;
            }
            expansions += 1;
            if expansions > problem.max_expansions {
                debug!("[GBFS] gave up after {expansions} expansions");
                return None;
            }
            for next in problem.open_neighbors(current) {
                if visited.contains(&next) {
                    continue;
                }
                came_from.entry(next).or_insert(current);
                seq += 1;
                frontier.push(Queued {
                    priority: problem.heuristic(next),
                    seq,
                    cost: 0,
                    item: next,
                });
            }
        }
        debug!("[GBFS] frontier exhausted after {expansions} expansions");
        None
    }
}

/// Uniform-cost search over `(position, time_left)`; time must stay feasible.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformCost;

impl SearchStrategy for UniformCost {
    fn name(&self) -> &'static str {
        "UCS"
    }

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome> {
        if !problem.endpoints_present() {
            return None;
        }
        cost_search(problem, &Unrestricted, false, Tracking::Time).reached
    }
}

/// A* over `(position, time_left, fuel_left)` with a Manhattan heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct AStar;

impl SearchStrategy for AStar {
    fn name(&self) -> &'static str {
        "A*"
    }

    fn search(&self, problem: &SearchProblem<'_>) -> Option<SearchOutcome> {
        if !problem.endpoints_present() {
            return None;
        }
        cost_search(problem, &Unrestricted, true, Tracking::TimeAndFuel).reached
    }
}

/// Time-indexed A*: states carry the timestep, agents may wait, and `rule`
/// decides which moves are legal.
pub fn a_star_multi<R: MoveRule>(problem: &SearchProblem<'_>, rule: &R) -> Option<SearchOutcome> {
    if !problem.endpoints_present() {
        return None;
    }
    cost_search(problem, rule, true, Tracking::TimeAndFuel).reached
}

/// Result of a best-first run: the route to the goal if one was found, and
/// the route to the restable state closest to the goal.
#[derive(Debug, Default)]
pub(crate) struct Exploration {
    pub reached: Option<SearchOutcome>,
    pub closest: Option<SearchOutcome>,
}

/// Best-first search over resource states, shared by UCS and both A* forms.
///
/// Every move costs one toward the objective; budgets are constraints only.
pub(crate) fn cost_search<R: MoveRule>(
    problem: &SearchProblem<'_>,
    rule: &R,
    informed: bool,
    tracking: Tracking,
) -> Exploration {
    let timed = rule.timed();
    let priority = |cost: usize, position: Position| {
        if informed {
            cost + problem.heuristic(position)
        } else {
            cost
        }
    };

    let start = ResourceState::new(problem.start, &problem.limits, problem.start_timestep);
    let mut best = BestCostTable::default();
    let mut came_from: HashMap<StateKey, ResourceState> = HashMap::new();
    let mut frontier = BinaryHeap::new();
    let mut seq = 0;
    let mut expansions = 0;
    // (distance to goal, cost, state)
    let mut closest: Option<(usize, usize, ResourceState)> = None;

    best.improve(start.key(tracking, timed), 0);
    frontier.push(Queued {
        priority: priority(0, start.position),
        seq,
        cost: 0,
        item: start,
    });

    let finish = |state: ResourceState, came_from: &HashMap<StateKey, ResourceState>, expansions| {
        let mut path = vec![state.position];
        let mut current = state;
        while let Some(previous) = came_from.get(&current.key(tracking, timed)) {
            path.push(previous.position);
            current = *previous;
        }
        path.reverse();
        SearchOutcome {
            path,
            time_left: state.time_left,
            fuel_left: state.fuel_left,
            expansions,
        }
    };

    while let Some(Queued { cost, item: state, .. }) = frontier.pop() {
        let key = state.key(tracking, timed);
        if best.is_stale(&key, cost) {
            continue;
        }

        if state.position == problem.goal && rule.accepts_goal(state.position, state.timestep) {
            trace!(
                "goal {} reached at t={} after {} expansions",
                problem.goal, state.timestep, expansions
            );
            return Exploration {
                reached: Some(finish(state, &came_from, expansions)),
                closest: None,
            };
        }

        if rule.can_rest(state.position, state.timestep) {
            let distance = problem.heuristic(state.position);
            if closest.is_none_or(|(d, c, _)| (distance, cost) < (d, c)) {
                closest = Some((distance, cost, state));
            }
        }

        expansions += 1;
        if expansions > problem.max_expansions {
            debug!(
                "search {} -> {} hit the cap of {} expansions",
                problem.start, problem.goal, problem.max_expansions
            );
            break;
        }

        let moves = problem.open_neighbors(state.position).filter_map(|next| {
            state.step(next, &problem.grid[next], &problem.limits, tracking)
        });
        let wait = if timed { state.wait(tracking) } else { None };

        for next in moves.chain(wait) {
            if !rule.allows(state.position, next.position, next.timestep) {
                continue;
            }
            let next_cost = cost + 1;
            let next_key = next.key(tracking, timed);
            if best.improve(next_key, next_cost) {
                came_from.insert(next_key, state);
                seq += 1;
                frontier.push(Queued {
                    priority: priority(next_cost, next.position),
                    seq,
                    cost: next_cost,
                    item: next,
                });
            }
        }
    }

    Exploration {
        reached: None,
        closest: closest.map(|(_, _, state)| finish(state, &came_from, expansions)),
    }
}

/// The five selectable single-agent strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Algorithm {
    Bfs,
    Dfs,
    Gbfs,
    Ucs,
    AStar,
}

impl Algorithm {
    pub const ALL: [Algorithm; 5] = [
        Algorithm::Bfs,
        Algorithm::Dfs,
        Algorithm::Gbfs,
        Algorithm::Ucs,
        Algorithm::AStar,
    ];

    pub fn strategy(self) -> &'static dyn SearchStrategy {
        match self {
            Algorithm::Bfs => &BreadthFirst,
            Algorithm::Dfs => &DepthFirst,
            Algorithm::Gbfs => &GreedyBestFirst,
            Algorithm::Ucs => &UniformCost,
            Algorithm::AStar => &AStar,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.strategy().name())
    }
}

impl FromStr for Algorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bfs" => Ok(Algorithm::Bfs),
            "dfs" => Ok(Algorithm::Dfs),
            "gbfs" => Ok(Algorithm::Gbfs),
            "ucs" => Ok(Algorithm::Ucs),
            "astar" | "a*" => Ok(Algorithm::AStar),
            other => Err(format!("unknown algorithm '{other}'")),
        }
    }
}

/// Route of the main agent with its residual budgets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanOutcome {
    pub path: Vec<Position>,
    pub time_left: Budget,
    pub fuel_left: Budget,
}

/// Plans the main agent from its `S` cell to its `G` cell.
///
/// `level` gates which limits apply: level 1 none, level 2 time, level 3
/// time and fuel. Level 4 is served by [`crate::Fleet`].
pub fn plan(
    world: &World,
    algorithm: Algorithm,
    level: Level,
    time_limit: u32,
    fuel_limit: u32,
) -> Result<PlanOutcome, PlanError> {
    plan_with_config(world, algorithm, level, time_limit, fuel_limit, &PlannerConfig::default())
}

/// [`plan`] with explicit caps.
pub fn plan_with_config(
    world: &World,
    algorithm: Algorithm,
    level: Level,
    time_limit: u32,
    fuel_limit: u32,
    config: &PlannerConfig,
) -> Result<PlanOutcome, PlanError> {
    if level == Level::MultiAgent {
        return Err(PlanError::UnsupportedLevel(level as u8));
    }
    let start = world.start_of(AgentId::MAIN).ok_or(PlanError::MissingEndpoint {
        agent: AgentId::MAIN,
        which: Endpoint::Start,
    })?;
    let goal = world.goal_of(AgentId::MAIN).ok_or(PlanError::MissingEndpoint {
        agent: AgentId::MAIN,
        which: Endpoint::Goal,
    })?;

    let problem = SearchProblem {
        max_expansions: config.single_agent_expansions,
        ..SearchProblem::new(
            &world.grid,
            start,
            goal,
            Limits::for_level(level, time_limit, fuel_limit),
        )
    };
    let outcome = algorithm
        .strategy()
        .search(&problem)
        .ok_or(PlanError::NoPathFound)?;
    debug!(
        "[{}] {} hops, {} expansions",
        algorithm,
        outcome.hops(),
        outcome.expansions
    );
    Ok(PlanOutcome {
        path: outcome.path,
        time_left: outcome.time_left,
        fuel_left: outcome.fuel_left,
    })
}
