//! The session coordinator.
//!
//! `PlayerManager` owns every piece of shared session state. Its operations
//! are split across modules by concern:
//! - `reservation`: admission checks and reservation keys
//! - `join_queue`: serialized initial sync with timeout
//! - `initial_sync`: snapshot composition and admission side effects
//! - `disconnect`: reconciliation when a connection drops
//! - `handler`: inbound packet dispatch
//!
//! Locking discipline: session table first, then directory shards, then the
//! ownership map. No lock is held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use sync_shared::{config::ServerConfig, net::{ConnectionId, Packet}};
use tracing::debug;

use crate::{
    connection::Connection,
    join_queue::JoinQueue,
    player::{Player, PlayerDirectory},
    session::SessionTable,
    simulation::EntitySimulation,
    world::{ServerLifecycle, World},
};

pub struct PlayerManager {
    pub(crate) config: Arc<ServerConfig>,
    pub(crate) sessions: Mutex<SessionTable>,
    pub(crate) directory: Arc<PlayerDirectory>,
    pub(crate) simulation: EntitySimulation,
    pub(crate) join_queue: JoinQueue,
    pub(crate) world: World,
    pub(crate) lifecycle: Arc<dyn ServerLifecycle>,
}

impl PlayerManager {
    pub fn new(
        config: Arc<ServerConfig>,
        directory: Arc<PlayerDirectory>,
        world: World,
        lifecycle: Arc<dyn ServerLifecycle>,
    ) -> Self {
        Self {
            config,
            sessions: Mutex::new(SessionTable::default()),
            directory,
            simulation: EntitySimulation::new(),
            join_queue: JoinQueue::new(),
            world,
            lifecycle,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn directory(&self) -> &PlayerDirectory {
        &self.directory
    }

    pub fn simulation(&self) -> &EntitySimulation {
        &self.simulation
    }

    pub fn join_queue(&self) -> &JoinQueue {
        &self.join_queue
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub(crate) fn sessions(&self) -> MutexGuard<'_, SessionTable> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn connected_players_locked(
        &self,
        table: &SessionTable,
        except: Option<ConnectionId>,
    ) -> Vec<Player> {
        let mut players: Vec<Player> = table
            .connected()
            .filter(|(_, conn)| Some(conn.id()) != except)
            .filter_map(|(attached, _)| self.directory.get(&attached.name))
            .collect();
        players.sort_by_key(|p| p.id);
        players
    }

    pub fn connected_count(&self) -> usize {
        self.sessions().connected_count()
    }

    /// Names currently claimed by reservations or connections.
    pub fn reserved_count(&self) -> usize {
        self.sessions().reserved_count()
    }

    /// The player joined on `connection_id`, if it finished joining.
    pub fn player(&self, connection_id: ConnectionId) -> Option<Player> {
        let name = self
            .sessions()
            .assets(connection_id)?
            .player
            .as_ref()?
            .name
            .clone();
        self.directory.get(&name)
    }

    pub fn connection(&self, connection_id: ConnectionId) -> Option<Arc<dyn Connection>> {
        self.sessions().connection(connection_id)
    }

    /// Sends to every connected player except `except`. A peer whose
    /// connection is already closing is skipped; its disconnect path cleans up.
    pub(crate) fn broadcast_locked(table: &SessionTable, packet: &Packet, except: Option<ConnectionId>) {
        for (player, conn) in table.connected() {
            if Some(conn.id()) == except {
                continue;
            }
            if let Err(e) = conn.send(packet.clone()) {
                debug!(player = %player.name, packet = packet.kind(), error = %e, "Dropped broadcast");
            }
        }
    }
}
