//! `sync_server`
//!
//! Session core of the multiplayer server:
//! - Reservations: admission checks and single-use reservation keys
//! - Join queue: one initial sync at a time, acknowledged or timed out
//! - Initial sync: the snapshot a joining player needs to enter the world
//! - Simulation ownership: which player simulates which entity
//! - Disconnect handling: name release, peer notification, ownership handoff
//!
//! Networking model:
//! - TCP only, length-prefixed JSON frames (see `sync_shared::net`)
//! - The core talks to clients through the [`Connection`] trait

pub mod connection;
pub mod disconnect;
pub mod error;
pub mod handler;
pub mod initial_sync;
pub mod join_queue;
pub mod manager;
pub mod persistence;
pub mod player;
pub mod reservation;
pub mod server;
pub mod session;
pub mod simulation;
pub mod world;

pub use connection::{ChannelConnection, Connection};
pub use error::SessionError;
pub use manager::PlayerManager;
pub use server::GameServer;
