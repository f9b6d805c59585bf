//! Player records and the directory of every player ever seen.

use std::{
    collections::BTreeSet,
    sync::atomic::{AtomicU16, Ordering},
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sync_shared::{
    config::ServerConfig,
    entity::{EntityId, TechType},
    math::{Quat, Vec3},
    net::ConnectionId,
    player::{
        EquippedItem, GameMode, Permissions, PlayerId, PlayerPreferences, PlayerStats,
    },
    session::PlayerContext,
};

/// Streaming cell coordinate a client currently has loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CellId {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub level: u8,
}

/// Durable player record. Survives disconnects; keyed by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub entity_id: EntityId,
    pub position: Vec3,
    pub rotation: Quat,
    pub sub_root_id: Option<EntityId>,
    pub permissions: Permissions,
    pub game_mode: GameMode,
    pub stats: PlayerStats,
    pub equipment: Vec<EquippedItem>,
    pub used_items: Vec<TechType>,
    pub quick_slots: Vec<Option<EntityId>>,
    pub preferences: PlayerPreferences,
    pub is_perma_death: bool,

    #[serde(skip)]
    pub context: Option<PlayerContext>,
    #[serde(skip)]
    pub visible_cells: BTreeSet<CellId>,
    #[serde(skip)]
    pub connection: Option<ConnectionId>,
}

impl Player {
    /// First-time player built from a freshly negotiated context.
    pub fn from_context(context: &PlayerContext, config: &ServerConfig) -> Self {
        Self {
            id: context.player_id,
            name: context.player_name.clone(),
            entity_id: context.entity_id,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            sub_root_id: None,
            permissions: config.default_permissions,
            game_mode: config.game_mode,
            stats: config.default_player_stats,
            equipment: Vec::new(),
            used_items: Vec::new(),
            quick_slots: Vec::new(),
            preferences: PlayerPreferences::default(),
            is_perma_death: false,
            context: Some(context.clone()),
            visible_cells: BTreeSet::new(),
            connection: None,
        }
    }

    pub fn equipped_tech_types(&self) -> Vec<TechType> {
        self.equipment.iter().map(|i| i.tech_type.clone()).collect()
    }
}

/// Every player ever seen, keyed by name. Last writer wins per name.
#[derive(Debug, Default)]
pub struct PlayerDirectory {
    players: DashMap<String, Player>,
    last_player_id: AtomicU16,
}

impl PlayerDirectory {
    /// Seeds the directory; new ids continue after the highest existing one.
    pub fn new(players: Vec<Player>) -> Self {
        let last = players.iter().map(|p| p.id.0).max().unwrap_or(0);
        let directory = Self {
            players: DashMap::with_capacity(players.len()),
            last_player_id: AtomicU16::new(last),
        };
        for player in players {
            directory.players.insert(player.name.clone(), player);
        }
        directory
    }

    pub fn get(&self, name: &str) -> Option<Player> {
        self.players.get(name).map(|p| p.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.players.contains_key(name)
    }

    pub fn insert(&self, player: Player) {
        self.players.insert(player.name.clone(), player);
    }

    /// Applies `f` to the named player in place.
    pub fn update<R>(&self, name: &str, f: impl FnOnce(&mut Player) -> R) -> Option<R> {
        self.players.get_mut(name).map(|mut p| f(p.value_mut()))
    }

    /// Allocates the next never-used player id. `None` once the id space is
    /// exhausted; ids are never reused.
    pub fn next_player_id(&self) -> Option<PlayerId> {
        self.last_player_id
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| last.checked_add(1))
            .ok()
            .map(|last| PlayerId(last + 1))
    }

    /// All players ordered by id.
    pub fn all(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.iter().map(|p| p.value().clone()).collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
