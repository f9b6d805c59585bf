//! `sync_shared`
//!
//! Types shared by the session server and its clients.
//!
//! Design goals:
//! - One packet enum for the whole admission / initial sync / ownership protocol.
//! - Plain data types with serde derives; no game logic.
//! - No `unsafe`.

pub mod config;
pub mod entity;
pub mod game;
pub mod math;
pub mod net;
pub mod player;
pub mod session;
