use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::Position;

/// Represents errors that can occur within the grid operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("Position ({row}, {col}) is out of bounds for grid size ({rows}, {cols})")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("Grid of size ({rows}, {cols}) needs {expected} cells, got {found}")]
    CellCount {
        rows: usize,
        cols: usize,
        expected: usize,
        found: usize,
    },
}

/// Moves in a 4-connected grid as `(d_row, d_col)`: right, left, down, up.
const DIRECTIONS: [(isize, isize); 4] = [(0, 1), (0, -1), (1, 0), (-1, 0)];

/// A generic 2D grid structure.
///
/// Stores elements of type `T` in a flat vector using row-major order.
/// Provides methods for accessing and modifying elements via [`Position`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grid<T> {
    rows: usize,
    cols: usize,
    cells: Vec<T>,
}

impl<T> Grid<T> {
    /// Creates a new grid with the specified dimensions, filled with default values.
    ///
    /// # Panics
    ///
    /// Panics if `rows * cols` overflows `usize`.
    pub fn new(rows: usize, cols: usize) -> Self
    where
        T: Default + Clone,
    {
        let size = rows.checked_mul(cols).expect("Grid size overflow");
        Grid {
            rows,
            cols,
            cells: vec![T::default(); size],
        }
    }

    /// Builds a grid from cells already laid out in row-major order.
    pub fn from_cells(rows: usize, cols: usize, cells: Vec<T>) -> Result<Self, GridError> {
        let expected = rows.saturating_mul(cols);
        if cells.len() != expected {
            return Err(GridError::CellCount {
                rows,
                cols,
                expected,
                found: cells.len(),
            });
        }
        Ok(Grid { rows, cols, cells })
    }

    #[inline]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    fn index_of(&self, position: Position) -> Option<usize> {
        if self.contains(position) {
            Some(position.row * self.cols + position.col)
        } else {
            None
        }
    }

    /// Checks if the given position is within the grid boundaries.
    #[inline]
    pub fn contains(&self, position: Position) -> bool {
        position.row < self.rows && position.col < self.cols
    }

    /// Returns `None` if the position is out of bounds.
    pub fn get(&self, position: Position) -> Option<&T> {
        self.index_of(position).and_then(|index| self.cells.get(index))
    }

    /// Sets the value of the cell at the given position.
    pub fn set(&mut self, position: Position, value: T) -> Result<(), GridError> {
        let index = self.index_of(position).ok_or(GridError::OutOfBounds {
            row: position.row,
            col: position.col,
            rows: self.rows,
            cols: self.cols,
        })?;
        self.cells[index] = value;
        Ok(())
    }

    /// In-bounds 4-neighbours of `position`, in a fixed order.
    pub fn neighbors(&self, position: Position) -> impl Iterator<Item = Position> + '_ {
        DIRECTIONS.iter().filter_map(move |&(d_row, d_col)| {
            let row = position.row.checked_add_signed(d_row)?;
            let col = position.col.checked_add_signed(d_col)?;
            let next = Position { row, col };
            self.contains(next).then_some(next)
        })
    }

    /// Returns an iterator that yields `(Position, &T)` for each cell.
    pub fn enumerate(&self) -> impl Iterator<Item = (Position, &T)> {
        let cols = self.cols;
        self.cells.iter().enumerate().map(move |(index, cell)| {
            (
                Position {
                    row: index / cols,
                    col: index % cols,
                },
                cell,
            )
        })
    }
}

impl<T> Index<Position> for Grid<T> {
    type Output = T;

    #[inline]
    fn index(&self, position: Position) -> &Self::Output {
        match self.index_of(position) {
            Some(idx) => &self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                position, self.rows, self.cols
            ),
        }
    }
}

impl<T> IndexMut<Position> for Grid<T> {
    #[inline]
    fn index_mut(&mut self, position: Position) -> &mut Self::Output {
        let (rows, cols) = (self.rows, self.cols);
        match self.index_of(position) {
            Some(idx) => &mut self.cells[idx],
            None => panic!(
                "Grid index {} out of bounds for grid size ({}, {})",
                position, rows, cols
            ),
        }
    }
}
