//! Inbound packet dispatch.

use std::sync::Arc;

use anyhow::Context;
use sync_shared::{
    entity::EntityId,
    math::Vec3,
    net::{ConnectionId, OwnershipChange, Packet},
    player::PlayerId,
};
use tracing::{debug, info, warn};

use crate::{
    connection::Connection, error::SessionError, manager::PlayerManager, session::SessionTable,
};

impl PlayerManager {
    /// Handles one packet received on `connection`.
    ///
    /// Errors are scoped to this packet; the caller logs them and keeps the
    /// connection open.
    pub fn process(&self, connection: &Arc<dyn Connection>, packet: Packet) -> anyhow::Result<()> {
        let connection_id = connection.id();
        match packet {
            Packet::ReservationRequest {
                correlation_id,
                settings,
                auth,
            } => {
                let response = self
                    .reserve(connection, settings, &auth, &correlation_id)
                    .context("reserve")?;
                connection.send(Packet::ReservationResponse(response))?;
            }
            Packet::JoinQueueAdd { reservation_key } => {
                self.add_to_join_queue(connection_id, &reservation_key)
                    .context("join queue")?;
            }
            Packet::SyncFinished => self.sync_finished(connection_id),
            Packet::SimulationOwnershipRequest { entity_id } => {
                self.request_simulation(connection, entity_id)
                    .context("ownership request")?;
            }
            Packet::SimulationOwnershipRelease { entity_id } => {
                self.release_simulation(connection_id, entity_id)
                    .context("ownership release")?;
            }
            Packet::PlayerDeath { position } => {
                self.player_died(connection_id, position)
                    .context("player death")?;
            }
            other => warn!(
                connection = %connection_id,
                packet = other.kind(),
                "Ignoring server-only packet"
            ),
        }
        Ok(())
    }

    /// Grants `entity_id` to the player on `connection` if it is a simulated
    /// entity nobody else owns. Answers the requester and tells the others
    /// about a grant. Returns whether it was granted.
    pub fn request_simulation(
        &self,
        connection: &Arc<dyn Connection>,
        entity_id: EntityId,
    ) -> Result<bool, SessionError> {
        let connection_id = connection.id();
        let table = self.sessions();
        let player_id = Self::attached_player_id(&table, connection_id)?;

        let simulated = self
            .world
            .entities
            .entity(entity_id)
            .is_some_and(|e| e.is_simulated());
        let granted = simulated && self.simulation.request_ownership(player_id, entity_id);
        debug!(player_id = %player_id, entity = %entity_id, granted, "Ownership requested");

        connection.send(Packet::SimulationOwnershipResponse { entity_id, granted })?;
        if granted {
            let change = Packet::OwnershipChange {
                changes: vec![OwnershipChange {
                    entity_id,
                    owner: Some(player_id),
                }],
            };
            Self::broadcast_locked(&table, &change, Some(connection_id));
        }
        Ok(granted)
    }

    /// Drops the player's hold on `entity_id`. Everyone else learns the
    /// entity is ownerless.
    pub fn release_simulation(
        &self,
        connection_id: ConnectionId,
        entity_id: EntityId,
    ) -> Result<bool, SessionError> {
        let table = self.sessions();
        let player_id = Self::attached_player_id(&table, connection_id)?;

        let released = self.simulation.release(player_id, entity_id);
        if released {
            debug!(player_id = %player_id, entity = %entity_id, "Ownership released");
            let change = Packet::OwnershipChange {
                changes: vec![OwnershipChange {
                    entity_id,
                    owner: None,
                }],
            };
            Self::broadcast_locked(&table, &change, Some(connection_id));
        }
        Ok(released)
    }

    /// Records a death. On a hardcore server the player may not come back.
    pub fn player_died(&self, connection_id: ConnectionId, position: Vec3) -> Result<(), SessionError> {
        let table = self.sessions();
        let name = table
            .assets(connection_id)
            .and_then(|a| a.player.as_ref())
            .map(|p| p.name.clone())
            .ok_or(SessionError::UnknownConnection(connection_id))?;

        let hardcore = self.config.hardcore;
        self.directory.update(&name, |p| {
            p.position = position;
            if hardcore {
                p.is_perma_death = true;
            }
        });
        info!(player = %name, permanent = hardcore, "Player died");
        Ok(())
    }

    fn attached_player_id(
        table: &SessionTable,
        connection_id: ConnectionId,
    ) -> Result<PlayerId, SessionError> {
        table
            .assets(connection_id)
            .and_then(|a| a.player.as_ref())
            .map(|p| p.id)
            .ok_or(SessionError::UnknownConnection(connection_id))
    }
}
