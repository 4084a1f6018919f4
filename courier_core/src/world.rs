use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{AgentId, Level, Position, error::MapError, map::Grid};

/// Represents the static kind of a cell in the world grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Cell {
    #[default]
    Empty,
    Obstacle,
    /// Start marker of an agent, traversed like an empty cell.
    Start(AgentId),
    /// Goal marker of an agent, traversed like an empty cell.
    Goal(AgentId),
    /// Entering costs `n` extra time units.
    TimePenalty(u32),
    /// Entering costs `n` extra time units and refuels to capacity.
    Fuel(u32),
}

impl Cell {
    pub fn is_passable(&self) -> bool {
        !matches!(self, Cell::Obstacle)
    }

    /// Extra time charged on top of the unit move cost when entering this cell.
    pub fn extra_time(&self) -> u32 {
        match self {
            Cell::TimePenalty(n) | Cell::Fuel(n) => *n,
            _ => 0,
        }
    }

    pub fn refuels(&self) -> bool {
        matches!(self, Cell::Fuel(_))
    }

    /// Plain floor: somewhere a new goal may be placed.
    pub fn is_plain(&self) -> bool {
        matches!(self, Cell::Empty | Cell::Start(_) | Cell::Goal(_))
    }

    /// Whether this cell kind survives loading at `level`; cells that do not
    /// are read as [`Cell::Empty`].
    fn active_at(&self, level: Level) -> bool {
        match self {
            Cell::Empty | Cell::Obstacle => true,
            Cell::Start(id) | Cell::Goal(id) => id.is_main() || level == Level::MultiAgent,
            Cell::TimePenalty(_) => level != Level::Unconstrained,
            Cell::Fuel(_) => level.fuel_limited(),
        }
    }
}

/// A loaded map: the immutable cell grid, its resource limits and the agent
/// markers decoded from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct World {
    pub grid: Grid<Cell>,
    pub time_limit: u32,
    pub fuel_limit: u32,
    starts: BTreeMap<AgentId, Position>,
    goals: BTreeMap<AgentId, Position>,
}

impl World {
    /// Builds a world from a grid, reading agent markers off its cells.
    pub fn new(grid: Grid<Cell>, time_limit: u32, fuel_limit: u32) -> Self {
        let mut starts = BTreeMap::new();
        let mut goals = BTreeMap::new();
        for (position, cell) in grid.enumerate() {
            match cell {
                Cell::Start(id) => {
                    starts.insert(*id, position);
                }
                Cell::Goal(id) => {
                    goals.insert(*id, position);
                }
                _ => {}
            }
        }
        World {
            grid,
            time_limit,
            fuel_limit,
            starts,
            goals,
        }
    }

    pub fn start_of(&self, agent: AgentId) -> Option<Position> {
        self.starts.get(&agent).copied()
    }

    pub fn goal_of(&self, agent: AgentId) -> Option<Position> {
        self.goals.get(&agent).copied()
    }

    /// Every agent that has a start marker, in id order.
    pub fn agent_ids(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.starts.keys().copied()
    }

    pub fn is_passable(&self, position: Position) -> bool {
        self.grid.get(position).is_some_and(Cell::is_passable)
    }
}

fn parse_token(token: &str) -> Option<Cell> {
    let numbered = |rest: &str| rest.parse::<u32>().ok();
    match token {
        "0" => Some(Cell::Empty),
        "-1" => Some(Cell::Obstacle),
        "S" => Some(Cell::Start(AgentId::MAIN)),
        "G" => Some(Cell::Goal(AgentId::MAIN)),
        _ => {
            if let Some(rest) = token.strip_prefix('S') {
                numbered(rest).filter(|n| *n > 0).map(|n| Cell::Start(AgentId(n)))
            } else if let Some(rest) = token.strip_prefix('G') {
                numbered(rest).filter(|n| *n > 0).map(|n| Cell::Goal(AgentId(n)))
            } else if let Some(rest) = token.strip_prefix('F') {
                numbered(rest).map(Cell::Fuel)
            } else if token.bytes().all(|b| b.is_ascii_digit()) {
                numbered(token).map(|n| {
                    if n == 0 {
                        Cell::Empty
                    } else {
                        Cell::TimePenalty(n)
                    }
                })
            } else {
                None
            }
        }
    }
}

/// Loads a world from the text map format.
///
/// The first line holds `rows cols time_limit fuel_limit`; each following line
/// holds one row of whitespace-separated cell codes. Cell kinds that are not
/// active at `level` are read as empty floor.
pub fn load_world_from_string(map_string: &str, level: Level) -> Result<World, MapError> {
    let mut lines = map_string
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty());

    let header = lines.next().ok_or(MapError::Empty)?;
    let numbers: Vec<u32> = header
        .split_whitespace()
        .map(str::parse)
        .collect::<Result<_, _>>()
        .map_err(|_| MapError::BadHeader(header.to_string()))?;
    let [rows, cols, time_limit, fuel_limit] = numbers[..] else {
        return Err(MapError::BadHeader(header.to_string()));
    };
    let (rows, cols) = (rows as usize, cols as usize);
    if rows.checked_mul(cols).is_none() {
        return Err(MapError::BadHeader(header.to_string()));
    }

    let mut cells = Vec::new();
    let mut seen_markers = Vec::new();
    let mut row_count = 0;

    for (row, line) in lines.enumerate() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() != cols {
            return Err(MapError::RowWidth {
                row,
                expected: cols,
                found: tokens.len(),
            });
        }
        for (col, token) in tokens.into_iter().enumerate() {
            let cell = parse_token(token).ok_or_else(|| MapError::UnknownToken {
                token: token.to_string(),
                row,
                col,
            })?;
            let cell = if cell.active_at(level) { cell } else { Cell::Empty };
            if matches!(cell, Cell::Start(_) | Cell::Goal(_)) {
                if seen_markers.contains(&cell) {
                    return Err(MapError::DuplicateMarker {
                        token: token.to_string(),
                        row,
                        col,
                    });
                }
                seen_markers.push(cell);
            }
            cells.push(cell);
        }
        row_count += 1;
    }

    if row_count != rows {
        return Err(MapError::RowCount {
            expected: rows,
            found: row_count,
        });
    }

    let grid = Grid::from_cells(rows, cols, cells)?;
    Ok(World::new(grid, time_limit, fuel_limit))
}
