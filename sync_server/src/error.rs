//! Session core errors.
//!
//! Rejected reservations are not errors; they travel back to the client as
//! `ReservationState` flags. These variants are integrity faults: fatal to the
//! request that hit them, never to the server.

use sync_shared::net::ConnectionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no reservation found for key {0}")]
    UnknownReservation(String),

    #[error("{0} has no session record")]
    UnknownConnection(ConnectionId),

    #[error("{0} already has a joined player")]
    AlreadyJoined(ConnectionId),

    #[error("reservation key was not issued to {0}")]
    ReservationMismatch(ConnectionId),

    #[error("player {0} is not in the directory")]
    UnknownPlayer(String),

    #[error("{0} is closed")]
    ConnectionClosed(ConnectionId),
}
