//! World-wide progression data handed to joining players.

use serde::{Deserialize, Serialize};

use crate::entity::TechType;

/// Knowledge shared by every player (blueprints, databank entries).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PdaState {
    pub known_tech_types: Vec<TechType>,
    pub analyzed_tech_types: Vec<TechType>,
    pub encyclopedia_entries: Vec<String>,
}

/// Story progression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StoryGoals {
    pub completed_goals: Vec<String>,
    pub radio_queue: Vec<String>,
}

/// World clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TimeData {
    /// In-game seconds since world creation.
    pub elapsed_seconds: f64,
    /// Wall-clock seconds the world has been running.
    pub real_time_elapsed: f64,
}
