//! Initial sync composition.
//!
//! Admitting a player is one step under the session lock: consume the
//! reservation, seat the player in an escape pod, announce them to peers,
//! hand out simulation ownership, materialize their body, and finally send the
//! snapshot. Peers therefore always learn about the join before any ownership
//! grant for the new player, and the snapshot reflects every side effect.

use sync_shared::{
    entity::{Entity, EntityId, EntityKind, TechType},
    math::Transform,
    net::{ConnectionId, InitialSync, OwnershipChange, Packet},
    player::Permissions,
};
use tracing::{error, info};

use crate::{
    error::SessionError,
    manager::PlayerManager,
    player::Player,
    session::{AttachedPlayer, SessionTable},
};

impl PlayerManager {
    /// Consumes the reservation `key` held by `connection_id` and attaches
    /// its player. Returns the player and whether it was seen for the first
    /// time. A key is accepted at most once.
    pub fn player_connected(
        &self,
        connection_id: ConnectionId,
        key: &str,
    ) -> Result<(Player, bool), SessionError> {
        let mut table = self.sessions();
        self.player_connected_locked(&mut table, connection_id, key)
    }

    pub(crate) fn player_connected_locked(
        &self,
        table: &mut SessionTable,
        connection_id: ConnectionId,
        key: &str,
    ) -> Result<(Player, bool), SessionError> {
        let assets = table
            .assets(connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;
        if assets.reservation_key.as_deref() != Some(key) {
            return Err(if table.reservation(key).is_some() {
                SessionError::ReservationMismatch(connection_id)
            } else {
                SessionError::UnknownReservation(key.to_string())
            });
        }

        let context = table
            .reservation(key)
            .cloned()
            .ok_or_else(|| SessionError::UnknownReservation(key.to_string()))?;
        let attached = AttachedPlayer {
            id: context.player_id,
            name: context.player_name.clone(),
        };
        table
            .consume_reservation(connection_id, key, attached)
            .ok_or_else(|| SessionError::UnknownReservation(key.to_string()))?;

        let mut player = self
            .directory
            .get(&context.player_name)
            .unwrap_or_else(|| Player::from_context(&context, &self.config));
        player.context = Some(context.clone());
        player.connection = Some(connection_id);
        // Reconnecting clients start with nothing loaded.
        player.visible_cells.clear();
        self.directory.insert(player.clone());

        Ok((player, context.was_brand_new))
    }

    /// Admits the player behind `key` and sends its initial sync.
    pub(crate) fn send_initial_sync(
        &self,
        connection_id: ConnectionId,
        key: &str,
    ) -> Result<Player, SessionError> {
        let mut table = self.sessions();
        let connection = table
            .connection(connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;

        let (mut player, was_brand_new) =
            self.player_connected_locked(&mut table, connection_id, key)?;
        let context = player
            .context
            .clone()
            .ok_or_else(|| SessionError::UnknownPlayer(player.name.clone()))?;
        info!(player = %player.name, player_id = %player.id, "Starting initial sync");

        if table.connected_count() == 1 && self.lifecycle.is_paused() {
            self.lifecycle.resume();
        }

        let (escape_pod_id, new_pod) = self.world.escape_pods.assign_player(player.id);
        if let Some(pod) = new_pod {
            let spawn = Packet::SpawnEntities {
                entities: vec![pod],
                is_respawn: false,
            };
            Self::broadcast_locked(&table, &spawn, Some(connection_id));
        }

        let joined = Packet::PlayerJoined {
            context,
            sub_root_id: player.sub_root_id,
            equipped_tech_types: player.equipped_tech_types(),
        };
        Self::broadcast_locked(&table, &joined, Some(connection_id));

        if connection.endpoint().ip().is_loopback() && player.permissions < Permissions::Admin {
            player.permissions = Permissions::Admin;
            self.directory
                .update(&player.name, |p| p.permissions = Permissions::Admin);
        }

        let simulated: Vec<EntityId> = self
            .world
            .entities
            .global_root_entities()
            .iter()
            .filter(|e| e.is_simulated())
            .map(|e| e.id)
            .collect();
        let simulations = self.simulation.assign_initial_ownership(
            player.id,
            &simulated,
            &table.connected_player_ids(),
        );
        if !simulations.is_empty() {
            let grants = Packet::OwnershipChange {
                changes: simulations
                    .iter()
                    .map(|id| OwnershipChange {
                        entity_id: *id,
                        owner: Some(player.id),
                    })
                    .collect(),
            };
            Self::broadcast_locked(&table, &grants, Some(connection_id));
        }

        if was_brand_new {
            self.spawn_player_entity(&table, &player, connection_id);
        } else {
            self.respawn_player_entity(&table, &player, connection_id);
        }

        let other_players = self
            .connected_players_locked(&table, Some(connection_id))
            .into_iter()
            .filter_map(|p| p.context)
            .collect();

        let sync = InitialSync {
            player_entity_id: player.entity_id,
            was_brand_new,
            assigned_escape_pod_id: escape_pod_id,
            equipped_items: player.equipment.clone(),
            used_items: player.used_items.clone(),
            quick_slots: player.quick_slots.clone(),
            pda_state: self.world.game_data.pda_state(),
            story_goals: self.world.game_data.story_goals(),
            position: player.position,
            rotation: player.rotation,
            sub_root_id: player.sub_root_id,
            stats: player.stats,
            other_players,
            global_root_entities: self.world.entities.global_root_entities(),
            simulations,
            game_mode: player.game_mode,
            permissions: player.permissions,
            preferences: player.preferences.clone(),
            time_data: self.world.game_data.time_data(),
            build_operations: self.world.entities.build_operations(),
        };
        connection.send(Packet::InitialSync(Box::new(sync)))?;

        Ok(player)
    }

    fn spawn_player_entity(&self, table: &SessionTable, player: &Player, except: ConnectionId) {
        let entity = Entity::new(
            player.entity_id,
            TechType::none(),
            Transform::new(player.position, player.rotation),
            EntityKind::Player {
                player_id: player.id,
            },
        );
        self.world.entities.add_entity(entity.clone());
        let spawn = Packet::SpawnEntities {
            entities: vec![entity],
            is_respawn: false,
        };
        Self::broadcast_locked(table, &spawn, Some(except));
    }

    fn respawn_player_entity(&self, table: &SessionTable, player: &Player, except: ConnectionId) {
        match self.world.entities.entity(player.entity_id) {
            Some(entity) => {
                let spawn = Packet::SpawnEntities {
                    entities: vec![entity],
                    is_respawn: true,
                };
                Self::broadcast_locked(table, &spawn, Some(except));
            }
            None => error!(
                player = %player.name,
                entity = %player.entity_id,
                "Unable to find player entity"
            ),
        }
    }
}
