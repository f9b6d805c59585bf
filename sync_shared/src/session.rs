//! Session negotiation types.
//!
//! # Join Flow
//! 1. Client sends `ReservationRequest` with its settings and credentials
//! 2. Server answers `ReservationResponse` with a single-use key or rejection flags
//! 3. Client sends `JoinQueueAdd` with the key
//! 4. Server sends `InitialSync` when the player's turn in the join queue comes
//! 5. Client acknowledges with `SyncFinished`

use serde::{Deserialize, Serialize};

use crate::{
    entity::EntityId,
    player::{GameMode, PlayerId},
};

/// Cosmetic settings the client chooses for itself.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerSettings {
    /// RGB, each component in `0.0..=1.0`.
    pub color: [f32; 3],
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            color: [1.0, 1.0, 1.0],
        }
    }
}

/// Credentials presented with a reservation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationContext {
    pub username: String,
    pub server_password: Option<String>,
}

impl AuthenticationContext {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            server_password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.server_password = Some(password.into());
        self
    }
}

/// Negotiated identity of one session. Immutable once issued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerContext {
    pub player_name: String,
    pub player_id: PlayerId,
    pub entity_id: EntityId,
    pub was_brand_new: bool,
    pub settings: PlayerSettings,
    pub is_muted: bool,
    pub game_mode: GameMode,
}

bitflags::bitflags! {
    /// Outcome of a reservation. Empty means reserved.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReservationState: u8 {
        const REJECTED = 1 << 0;
        const CAPACITY_REACHED = 1 << 1;
        const AUTHENTICATION_FAILED = 1 << 2;
        const INVALID_USERNAME = 1 << 3;
        const HARDCORE_PLAYER_DEAD = 1 << 4;
        const DUPLICATE_NAME = 1 << 5;
    }
}

impl ReservationState {
    pub const RESERVED: Self = Self::empty();

    pub fn is_rejected(&self) -> bool {
        self.contains(Self::REJECTED)
    }

    /// Human-readable reason shown to the player.
    pub fn describe(&self) -> &'static str {
        if !self.is_rejected() {
            "Reservation accepted"
        } else if self.contains(Self::CAPACITY_REACHED) {
            "The server is full"
        } else if self.contains(Self::AUTHENTICATION_FAILED) {
            "Wrong server password"
        } else if self.contains(Self::INVALID_USERNAME) {
            "Names must be 3 to 25 characters of letters, digits, '.', '_' or '-'"
        } else if self.contains(Self::HARDCORE_PLAYER_DEAD) {
            "This player died on a hardcore server and cannot rejoin"
        } else if self.contains(Self::DUPLICATE_NAME) {
            "That name is already in use"
        } else {
            "Reservation rejected"
        }
    }
}

/// Server answer to a `ReservationRequest`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationResponse {
    pub correlation_id: String,
    pub state: ReservationState,
    pub reservation_key: Option<String>,
    pub player_id: Option<PlayerId>,
}

impl ReservationResponse {
    pub fn accepted(correlation_id: impl Into<String>, player_id: PlayerId, key: String) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            state: ReservationState::RESERVED,
            reservation_key: Some(key),
            player_id: Some(player_id),
        }
    }

    /// Rejection; `REJECTED` is always set alongside `reason`.
    pub fn rejected(correlation_id: impl Into<String>, reason: ReservationState) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            state: ReservationState::REJECTED | reason,
            reservation_key: None,
            player_id: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        !self.state.is_rejected()
    }
}
