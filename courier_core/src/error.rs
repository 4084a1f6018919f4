//! Error types for map loading and planning.
//!
//! Planning failures are ordinary values: a move that would exhaust time or
//! fuel is pruned inside the search and never surfaces here, and an exhausted
//! conflict-resolution budget degrades to a hold-position plan reported through
//! [`crate::conflict::ResolutionReport`] instead of an error.

use thiserror::Error;

use crate::{AgentId, map::GridError};

/// Which end of a route is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Start,
    Goal,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    #[error("no path found")]
    NoPathFound,

    #[error("agent {agent} has no {which:?} cell")]
    MissingEndpoint { agent: AgentId, which: Endpoint },

    #[error("level {0} is not supported here")]
    UnsupportedLevel(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MapError {
    #[error("map is empty")]
    Empty,

    #[error("bad header '{0}': expected 'rows cols time_limit fuel_limit'")]
    BadHeader(String),

    #[error("row {row}: expected {expected} cells, found {found}")]
    RowWidth {
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("expected {expected} rows, found {found}")]
    RowCount { expected: usize, found: usize },

    #[error("unknown map code '{token}' at ({row}, {col})")]
    UnknownToken {
        token: String,
        row: usize,
        col: usize,
    },

    #[error("duplicate marker '{token}' at ({row}, {col})")]
    DuplicateMarker {
        token: String,
        row: usize,
        col: usize,
    },

    #[error(transparent)]
    Grid(#[from] GridError),
}
