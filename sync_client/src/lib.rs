//! `sync_client`
//!
//! Client-side half of the session handshake:
//! - Reservation request and response matching by correlation id
//! - Join queue entry and initial sync reception
//! - Sync acknowledgment and peer event buffering

pub mod client;

pub use client::{ClientState, SyncClient};
