use courier_core::{
    Algorithm, Fleet, Level, PlanError, PlannerConfig, Position, World,
    agent::Agent,
    conflict::detect_conflicts,
    load_world_from_string, plan,
    resources::Budget,
};

fn p(row: usize, col: usize) -> Position {
    Position::new(row, col)
}

fn world(map: &str, level: Level) -> World {
    load_world_from_string(map, level).expect("map parses")
}

/// Walks `path` with the move-cost model and returns the remaining
/// `(time, fuel)`, failing if either ever drops below zero.
fn replay(world: &World, path: &[Position], time: u32, fuel: u32) -> (u32, u32) {
    let (mut time, mut fuel) = (time as i64, fuel as i64);
    for next in &path[1..] {
        let cell = world.grid[*next];
        time -= 1 + i64::from(cell.extra_time());
        fuel = if cell.refuels() { world.fuel_limit as i64 } else { fuel - 1 };
        assert!(time >= 0 && fuel >= 0, "budget went negative at {next}");
    }
    (time as u32, fuel as u32)
}

fn routes(fleet: &Fleet) -> Vec<(courier_core::AgentId, Vec<Position>)> {
    fleet.agents().iter().map(|a| (a.id, a.route())).collect()
}

fn assert_collision_free(agents: &[Agent]) {
    let routes: Vec<Vec<Position>> = agents.iter().map(Agent::route).collect();
    let horizon = routes.iter().map(Vec::len).max().unwrap_or(0);
    let at = |route: &[Position], t: usize| route[t.min(route.len() - 1)];
    for (i, a) in routes.iter().enumerate() {
        for b in &routes[i + 1..] {
            for t in 0..horizon {
                assert_ne!(at(a, t), at(b, t), "vertex conflict at t={t}");
                if t > 0 {
                    let swapped = at(a, t) == at(b, t - 1) && at(b, t) == at(a, t - 1);
                    assert!(!swapped, "swap conflict at t={t}");
                }
            }
        }
    }
}

const MAZE: &str = "4 5 30 6
    S 0 2 0 0
    -1 -1 0 -1 0
    0 F1 0 0 0
    0 0 4 0 G";

/// The followers head for opposite corners and have to get past each other.
const CROSSWALK: &str = "3 5 40 40
    S 0 0 0 G
    S1 0 0 0 S2
    G2 0 0 0 G1";

#[test]
fn open_five_by_five_takes_eight_steps() {
    let world = world(
        "5 5 0 0
         S 0 0 0 0
         0 0 0 0 0
         0 0 0 0 0
         0 0 0 0 0
         0 0 0 0 G",
        Level::Unconstrained,
    );
    for algorithm in [Algorithm::Bfs, Algorithm::AStar] {
        let outcome = plan(&world, algorithm, Level::Unconstrained, 0, 0).unwrap();
        assert_eq!(outcome.path.len() - 1, 8, "{algorithm}");
        assert_eq!(outcome.time_left, Budget::Unlimited);
        assert_eq!(outcome.fuel_left, Budget::Unlimited);
    }
}

#[test]
fn bfs_uses_no_more_hops_than_any_strategy() {
    let world = world(MAZE, Level::Unconstrained);
    let hops = |algorithm| {
        let outcome = plan(&world, algorithm, Level::Unconstrained, 0, 0).unwrap();
        outcome.path.len() - 1
    };
    let bfs = hops(Algorithm::Bfs);
    assert_eq!(bfs, 7);
    for algorithm in Algorithm::ALL {
        assert!(bfs <= hops(algorithm), "{algorithm}");
    }
    assert_eq!(hops(Algorithm::AStar), bfs);
    assert_eq!(hops(Algorithm::Ucs), bfs);
}

#[test]
fn ucs_and_a_star_are_optimal_under_a_time_limit() {
    // The penalty on (0, 2) cannot be avoided, so the best route needs 9 time.
    let world = world(MAZE, Level::Timed);
    for algorithm in [Algorithm::Ucs, Algorithm::AStar] {
        let outcome = plan(&world, algorithm, Level::Timed, 9, 0).unwrap();
        assert_eq!(outcome.path.len() - 1, 7, "{algorithm}");
        assert_eq!(outcome.time_left, Budget::Left(0), "{algorithm}");
        assert_eq!(
            plan(&world, algorithm, Level::Timed, 8, 0),
            Err(PlanError::NoPathFound),
            "{algorithm}"
        );
    }
}

#[test]
fn a_star_detours_to_refuel_when_fuel_is_short() {
    // Fuel 6 covers none of the 7-hop routes; the station makes 9 hops work.
    let world = world(MAZE, Level::TimedFuel);
    let outcome = plan(&world, Algorithm::AStar, Level::TimedFuel, 30, 6).unwrap();
    assert_eq!(outcome.path.len() - 1, 9);
    assert!(outcome.path.contains(&p(2, 1)));

    let (time, fuel) = replay(&world, &outcome.path, 30, 6);
    assert_eq!(outcome.time_left, Budget::Left(time));
    assert_eq!(outcome.fuel_left, Budget::Left(fuel));
}

#[test]
fn fuel_station_refills_to_capacity() {
    let world = world("1 4 20 3\nS F5 0 G", Level::TimedFuel);
    let outcome = plan(&world, Algorithm::AStar, Level::TimedFuel, 20, 3).unwrap();
    assert_eq!(outcome.path, vec![p(0, 0), p(0, 1), p(0, 2), p(0, 3)]);
    // Full tank on the station, then two plain moves.
    assert_eq!(outcome.fuel_left, Budget::Left(1));
    assert_eq!(outcome.time_left, Budget::Left(12));
}

#[test]
fn time_penalty_on_the_only_route() {
    let world = world("1 3 5 0\nS 3 G", Level::Timed);
    let outcome = plan(&world, Algorithm::Ucs, Level::Timed, 5, 0).unwrap();
    assert_eq!(outcome.path, vec![p(0, 0), p(0, 1), p(0, 2)]);
    assert_eq!(outcome.time_left, Budget::Left(0));

    assert_eq!(
        plan(&world, Algorithm::Ucs, Level::Timed, 4, 0),
        Err(PlanError::NoPathFound)
    );
}

#[test]
fn penalty_beyond_any_budget_blocks_the_cell() {
    let world = world("1 3 100 0\nS 4294967295 G", Level::Timed);
    for algorithm in [Algorithm::Ucs, Algorithm::AStar] {
        assert_eq!(
            plan(&world, algorithm, Level::Timed, 100, 0),
            Err(PlanError::NoPathFound),
            "{algorithm}"
        );
    }
}

#[test]
fn crossing_agents_no_longer_meet() {
    // Planned on their own, both agents would stand on (1, 1) at t=1.
    let map = "3 3 20 20
        0 S1 0
        S 0 G
        0 G1 0";
    let mut fleet = Fleet::new(world(map, Level::MultiAgent), PlannerConfig::default());
    let plan = fleet.plan_multi().unwrap();
    assert_eq!(plan.path, vec![p(1, 0), p(1, 1), p(1, 2)]);

    let follower = fleet.agent(courier_core::AgentId(1)).unwrap().route();
    assert_ne!(follower.get(1), Some(&p(1, 1)));
    assert_eq!(follower.last(), Some(&p(2, 1)));
    assert!(plan.report.unresolved.is_empty());
    assert_collision_free(fleet.agents());
}

#[test]
fn a_pass_leaves_no_vertex_or_swap_conflicts() {
    let mut fleet = Fleet::new(world(CROSSWALK, Level::MultiAgent), PlannerConfig::default());
    let plan = fleet.plan_multi().unwrap();
    assert!(!plan.report.exhausted());
    assert_collision_free(fleet.agents());
}

#[test]
fn replanning_a_clean_fleet_stays_clean() {
    let mut fleet = Fleet::new(world(CROSSWALK, Level::MultiAgent), PlannerConfig::default());
    fleet.plan_multi().unwrap();
    assert!(detect_conflicts(&routes(&fleet)).is_empty());

    let again = fleet.plan_multi().unwrap();
    assert!(again.report.unresolved.is_empty());
    assert!(detect_conflicts(&routes(&fleet)).is_empty());
}

#[test]
fn fleet_runs_until_the_leader_arrives() {
    let map = "3 4 60 60
        S 0 S1 0
        0 -1 0 0
        G1 0 S2 G";
    let mut fleet = Fleet::new(
        world(map, Level::MultiAgent),
        PlannerConfig {
            seed: 3,
            ..PlannerConfig::default()
        },
    );
    fleet.plan_multi().unwrap();
    let mut finished = false;
    for _ in 0..40 {
        let report = fleet.advance_multi();
        let mut cells: Vec<Position> = fleet.agents().iter().map(|a| a.position).collect();
        cells.sort();
        cells.dedup();
        assert_eq!(cells.len(), fleet.agents().len(), "agents collided at t={}", report.timestep);
        if report.leader_completed {
            finished = true;
            break;
        }
    }
    assert!(finished);
    assert_eq!(fleet.agent(courier_core::AgentId::MAIN).unwrap().position, p(2, 3));
}
