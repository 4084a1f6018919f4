use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use clap::Parser;
use courier_core::{
    Algorithm, Cell, Fleet, Level, PlannerConfig, Position, World, load_world_from_string,
    resources::Budget, search::plan_with_config,
};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Map file to load
    #[arg(short, long, value_name = "MAP_FILE")]
    map: PathBuf,

    /// 1: unconstrained, 2: time limit, 3: time and fuel limits, 4: multi-agent
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(1..=4))]
    level: u8,

    /// Search strategy for levels 1 to 3 (bfs, dfs, gbfs, ucs, astar)
    #[arg(short, long, default_value = "astar")]
    algorithm: Algorithm,

    /// Planner settings as JSON
    #[arg(short, long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Ticks to run at level 4 before giving up on the leader
    #[arg(long, default_value_t = 200)]
    max_ticks: u32,

    /// Seed for goal sampling, overrides the config file
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let level = Level::try_from(args.level)?;
    let mut config = load_config(args.config.as_deref())?;
    if let Some(seed) = args.seed {
        config.seed = seed;
    }

    let map = fs::read_to_string(&args.map)
        .with_context(|| format!("reading map {}", args.map.display()))?;
    let world = load_world_from_string(&map, level)
        .with_context(|| format!("loading map {}", args.map.display()))?;
    info!(
        "loaded {}x{} map, time {}, fuel {}",
        world.grid.rows(),
        world.grid.cols(),
        world.time_limit,
        world.fuel_limit
    );

    if level == Level::MultiAgent {
        run_fleet(world, config, args.max_ticks)
    } else {
        run_single(&world, args.algorithm, level, &config)
    }
}

fn load_config(path: Option<&Path>) -> Result<PlannerConfig> {
    let Some(path) = path else {
        return Ok(PlannerConfig::default());
    };
    let text =
        fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
}

fn run_single(
    world: &World,
    algorithm: Algorithm,
    level: Level,
    config: &PlannerConfig,
) -> Result<()> {
    let outcome = plan_with_config(
        world,
        algorithm,
        level,
        world.time_limit,
        world.fuel_limit,
        config,
    )
    .with_context(|| format!("{algorithm} could not route the main agent"))?;

    println!("{algorithm}: {} steps", outcome.path.len().saturating_sub(1));
    println!("path: {}", format_path(&outcome.path));
    println!("time left: {}", format_budget(outcome.time_left));
    println!("fuel left: {}", format_budget(outcome.fuel_left));
    println!();
    print!("{}", render(world, &outcome.path));
    Ok(())
}

fn run_fleet(world: World, config: PlannerConfig, max_ticks: u32) -> Result<()> {
    let mut fleet = Fleet::new(world, config);
    let plan = fleet.plan_multi().context("planning the fleet")?;
    info!("{} leads, {} steps to {}", plan.leader, plan.path.len().saturating_sub(1), plan.goal);
    if plan.report.exhausted() {
        warn!("{} conflicts left unresolved", plan.report.unresolved.len());
    }

    let mut arrived = false;
    for _ in 0..max_ticks {
        let report = fleet.advance_multi();
        for (id, goal) in &report.new_goals {
            info!("t={}: {id} heads to {goal}", report.timestep);
        }
        if report.leader_completed {
            arrived = true;
            break;
        }
    }
    if !arrived {
        warn!("{} did not arrive within {max_ticks} ticks", plan.leader);
    }

    let status = if arrived { "arrived" } else { "still en route" };
    println!("t={}: leader {} {status}", fleet.now(), plan.leader);
    for agent in fleet.agents() {
        println!("{}: {}", agent.id, format_path(agent.history(fleet.now())));
    }
    if let Some(leader) = fleet.agent(plan.leader) {
        println!();
        print!("{}", render(fleet.world(), leader.history(fleet.now())));
    }
    Ok(())
}

fn format_path(path: &[Position]) -> String {
    path.iter()
        .map(Position::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_budget(budget: Budget) -> String {
    budget
        .remaining()
        .map_or_else(|| "unlimited".to_string(), |left| left.to_string())
}

/// Draws the grid with `path` marked by `*`.
fn render(world: &World, path: &[Position]) -> String {
    let mut out = String::new();
    for row in 0..world.grid.rows() {
        let line: Vec<String> = (0..world.grid.cols())
            .map(|col| {
                let position = Position::new(row, col);
                let symbol = match world.grid[position] {
                    Cell::Obstacle => "#".to_string(),
                    Cell::Start(id) => id.to_string(),
                    Cell::Goal(id) if id.is_main() => "G".to_string(),
                    Cell::Goal(id) => format!("G{}", id.0),
                    _ if path.contains(&position) => "*".to_string(),
                    Cell::TimePenalty(extra) => extra.to_string(),
                    Cell::Fuel(extra) => format!("F{extra}"),
                    Cell::Empty => ".".to_string(),
                };
                format!("{symbol:>3}")
            })
            .collect();
        out.push_str(&line.concat());
        out.push('\n');
    }
    out
}
