//! Connection registry: reserved names, outstanding reservations and the
//! per-connection asset records.
//!
//! All three live in one table behind one lock so that multi-step updates
//! (claim a name + record a reservation + attach it to a connection) are
//! atomic to every observer.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use sync_shared::{net::ConnectionId, player::PlayerId, session::PlayerContext};

use crate::connection::Connection;

/// Names refused to everyone without occupying a connection slot.
/// `Player` is what clients call the local player.
pub const PLACEHOLDER_NAMES: &[&str] = &["Player"];

/// The player a connection finished joining as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedPlayer {
    pub id: PlayerId,
    pub name: String,
}

/// Per-connection record. Exactly one of `reservation_key` / `player` is set.
#[derive(Debug, Clone)]
pub struct ConnectionAssets {
    pub connection: Arc<dyn Connection>,
    pub reservation_key: Option<String>,
    pub player: Option<AttachedPlayer>,
}

impl ConnectionAssets {
    pub fn is_connected_player(&self) -> bool {
        self.player.is_some()
    }
}

#[derive(Debug, Default)]
pub struct SessionTable {
    reserved_names: HashSet<String>,
    reservations: HashMap<String, PlayerContext>,
    assets: BTreeMap<ConnectionId, ConnectionAssets>,
}

impl SessionTable {
    /// Number of claimed names; placeholders are not counted.
    pub fn reserved_count(&self) -> usize {
        self.reserved_names.len()
    }

    pub fn is_name_taken(&self, name: &str) -> bool {
        PLACEHOLDER_NAMES.contains(&name) || self.reserved_names.contains(name)
    }

    pub fn assets(&self, id: ConnectionId) -> Option<&ConnectionAssets> {
        self.assets.get(&id)
    }

    pub fn connection(&self, id: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.assets.get(&id).map(|a| a.connection.clone())
    }

    pub fn reservation(&self, key: &str) -> Option<&PlayerContext> {
        self.reservations.get(key)
    }

    /// Claims `context`'s name and binds the reservation to `connection`.
    pub fn insert_reservation(
        &mut self,
        connection: Arc<dyn Connection>,
        key: String,
        context: PlayerContext,
    ) {
        self.reserved_names.insert(context.player_name.clone());
        self.reservations.insert(key.clone(), context);
        self.assets.insert(
            connection.id(),
            ConnectionAssets {
                connection,
                reservation_key: Some(key),
                player: None,
            },
        );
    }

    /// Consumes the reservation behind `key`, attaching the player to `id`.
    /// The name stays claimed for the rest of the session.
    pub fn consume_reservation(
        &mut self,
        id: ConnectionId,
        key: &str,
        player: AttachedPlayer,
    ) -> Option<PlayerContext> {
        let assets = self.assets.get_mut(&id)?;
        if assets.reservation_key.as_deref() != Some(key) {
            return None;
        }
        let context = self.reservations.remove(key)?;
        assets.reservation_key = None;
        assets.player = Some(player);
        Some(context)
    }

    /// Removes a connection's record, releasing whatever it claimed.
    pub fn remove(&mut self, id: ConnectionId) -> Option<ConnectionAssets> {
        let assets = self.assets.remove(&id)?;
        if let Some(key) = &assets.reservation_key {
            if let Some(context) = self.reservations.remove(key) {
                self.reserved_names.remove(&context.player_name);
            }
        }
        if let Some(player) = &assets.player {
            self.reserved_names.remove(&player.name);
        }
        Some(assets)
    }

    /// Connected players and their connections, in connection order.
    pub fn connected(&self) -> impl Iterator<Item = (&AttachedPlayer, &Arc<dyn Connection>)> {
        self.assets
            .values()
            .filter_map(|a| a.player.as_ref().map(|p| (p, &a.connection)))
    }

    pub fn connected_player_ids(&self) -> Vec<PlayerId> {
        let mut ids: Vec<PlayerId> = self.connected().map(|(p, _)| p.id).collect();
        ids.sort();
        ids
    }

    pub fn connected_count(&self) -> usize {
        self.connected().count()
    }
}
