//! Player-facing value types shared by client and server.

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

use crate::entity::{EntityId, TechType};

/// Stable numeric player id. Reused when a known name reconnects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PlayerId(pub u16);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Permission levels, lowest first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Permissions {
    None,
    #[default]
    Player,
    Moderator,
    Admin,
    Console,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GameMode {
    #[default]
    Survival,
    Freedom,
    Hardcore,
    Creative,
}

/// Vital stats of a player.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub oxygen: f32,
    pub max_oxygen: f32,
    pub health: f32,
    pub food: f32,
    pub water: f32,
    pub infection_amount: f32,
}

impl Default for PlayerStats {
    fn default() -> Self {
        Self {
            oxygen: 45.0,
            max_oxygen: 45.0,
            health: 80.0,
            food: 50.5,
            water: 90.5,
            infection_amount: 0.0,
        }
    }
}

/// An item sitting in an equipment slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquippedItem {
    pub slot: String,
    pub item_id: EntityId,
    pub tech_type: TechType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingPreference {
    pub color: u8,
    pub visible: bool,
}

/// Per-player UI preferences restored on join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PlayerPreferences {
    /// Keyed by ping identifier (entity id or signal description key).
    pub ping_preferences: BTreeMap<String, PingPreference>,
    pub pinned_recipes: Vec<i32>,
}
