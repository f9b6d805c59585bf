//! Reservation service.
//!
//! Turns a join request into a single-use reservation key. Checks run in a
//! fixed order and the first failing one decides the rejection flag:
//! capacity, password, name syntax, hardcore death, name uniqueness.

use std::sync::Arc;

use rand::{rngs::OsRng, RngCore};
use sync_shared::{
    entity::EntityId,
    session::{
        AuthenticationContext, PlayerContext, PlayerSettings, ReservationResponse,
        ReservationState,
    },
};
use tracing::{debug, info};

use crate::{connection::Connection, error::SessionError, manager::PlayerManager};

pub const MIN_USERNAME_LEN: usize = 3;
pub const MAX_USERNAME_LEN: usize = 25;

/// `^[a-zA-Z0-9._-]{3,25}$`
pub fn is_valid_username(name: &str) -> bool {
    (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&name.len())
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// 128 bits from the OS RNG, hex encoded.
pub fn generate_reservation_key() -> String {
    let mut bytes = [0u8; 16];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

impl PlayerManager {
    /// Validates a join request and, on success, reserves the name for
    /// `connection`.
    ///
    /// A connection that reserves again before joining gives up its earlier
    /// reservation and any join queue entry made with it. A connection that already joined gets
    /// [`SessionError::AlreadyJoined`].
    pub fn reserve(
        &self,
        connection: &Arc<dyn Connection>,
        settings: PlayerSettings,
        auth: &AuthenticationContext,
        correlation_id: &str,
    ) -> Result<ReservationResponse, SessionError> {
        let mut table = self.sessions();
        let connection_id = connection.id();

        if let Some(assets) = table.assets(connection_id) {
            if assets.is_connected_player() {
                return Err(SessionError::AlreadyJoined(connection_id));
            }
            table.remove(connection_id);
            self.join_queue.cancel(connection_id);
            debug!(connection = %connection_id, "Replaced stale reservation");
        }

        let reject = |reason: ReservationState| -> Result<ReservationResponse, SessionError> {
            info!(
                player = %auth.username,
                connection = %connection_id,
                reason = ?reason,
                "Reservation rejected"
            );
            Ok(ReservationResponse::rejected(correlation_id, reason))
        };

        if table.reserved_count() >= self.config.max_connections {
            return reject(ReservationState::CAPACITY_REACHED);
        }

        if self.config.requires_password()
            && auth.server_password.as_deref() != self.config.server_password.as_deref()
        {
            return reject(ReservationState::AUTHENTICATION_FAILED);
        }

        if !is_valid_username(&auth.username) {
            return reject(ReservationState::INVALID_USERNAME);
        }

        let name = auth.username.as_str();
        let known = self.directory.get(name);
        if self.config.hardcore && known.as_ref().is_some_and(|p| p.is_perma_death) {
            return reject(ReservationState::HARDCORE_PLAYER_DEAD);
        }

        if table.is_name_taken(name) {
            return reject(ReservationState::DUPLICATE_NAME);
        }

        let (player_id, entity_id, game_mode) = match &known {
            Some(player) => (player.id, player.entity_id, player.game_mode),
            None => match self.directory.next_player_id() {
                Some(id) => (id, EntityId::new_random(), self.config.game_mode),
                None => return reject(ReservationState::CAPACITY_REACHED),
            },
        };

        let context = PlayerContext {
            player_name: name.to_string(),
            player_id,
            entity_id,
            was_brand_new: known.is_none(),
            settings,
            is_muted: false,
            game_mode,
        };
        let key = generate_reservation_key();
        table.insert_reservation(connection.clone(), key.clone(), context);

        info!(
            player = %name,
            player_id = %player_id,
            connection = %connection_id,
            returning = known.is_some(),
            "Reserved player slot"
        );
        Ok(ReservationResponse::accepted(correlation_id, player_id, key))
    }
}
