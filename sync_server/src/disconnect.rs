//! Disconnect reconciliation.

use sync_shared::net::{ConnectionId, Packet};
use tracing::{debug, error, info};

use crate::manager::PlayerManager;

impl PlayerManager {
    /// Closes `connection_id` from the server side and reconciles it.
    pub fn kick(&self, connection_id: ConnectionId, reason: &str) {
        if let Some(connection) = self.connection(connection_id) {
            info!(connection = %connection_id, reason, "Disconnecting");
            connection.disconnect(reason);
        }
        self.handle_disconnect(connection_id);
    }

    /// Releases everything `connection_id` held.
    ///
    /// A pending reservation frees its name and key. A joined player is
    /// announced as gone, its simulations move to the remaining players, and
    /// the world pauses and saves once nobody is left. Safe to call twice.
    pub fn handle_disconnect(&self, connection_id: ConnectionId) {
        if self.join_queue.cancel(connection_id) {
            debug!(connection = %connection_id, "Removed from join queue");
        }

        let mut table = self.sessions();
        let Some(assets) = table.remove(connection_id) else {
            return;
        };
        let Some(attached) = assets.player else {
            info!(connection = %connection_id, "Dropped pending reservation");
            return;
        };

        self.directory.update(&attached.name, |p| {
            p.connection = None;
            p.visible_cells.clear();
        });
        info!(player = %attached.name, player_id = %attached.id, "Player disconnected");

        Self::broadcast_locked(
            &table,
            &Packet::PlayerDisconnected {
                player_id: attached.id,
            },
            None,
        );

        let remaining = table.connected_player_ids();
        let changes = self
            .simulation
            .recompute_on_disconnect(attached.id, &remaining);
        if !changes.is_empty() {
            debug!(player_id = %attached.id, moved = changes.len(), "Reassigned simulations");
            Self::broadcast_locked(&table, &Packet::OwnershipChange { changes }, None);
        }

        if remaining.is_empty() {
            self.lifecycle.pause();
            // Disk I/O must not stall reservations.
            drop(table);
            if let Err(e) = self.lifecycle.save() {
                error!(error = ?e, "Failed to save world");
            }
        }
    }
}
