//! Planner configuration: iteration caps and goal sampling.

use serde::Deserialize;

/// Caps that bound every search and resolution loop, plus the seed used for
/// goal sampling. Any field missing from a config file keeps its default.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Node expansions allowed for a single-agent strategy.
    pub single_agent_expansions: usize,

    /// Node expansions allowed for one time-indexed per-agent search.
    pub multi_agent_expansions: usize,

    /// Node expansions allowed for one alternative-path search.
    pub alternative_expansions: usize,

    /// Detect-and-repair rounds before residual conflicts are forced to hold.
    pub resolution_rounds: usize,

    /// Rejection-sampling draws before goal generation gives up.
    pub goal_sample_attempts: usize,

    /// Seed for goal sampling.
    pub seed: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            single_agent_expansions: 100_000,
            multi_agent_expansions: 1_000,
            alternative_expansions: 10_000,
            resolution_rounds: 100,
            goal_sample_attempts: 1_000,
            seed: 0,
        }
    }
}
