//! Networking primitives.
//!
//! Goals:
//! - Provide a reliable (TCP) packet channel with length-prefixed frames.
//! - Define every packet exchanged during admission, initial sync and
//!   simulation ownership handoff.
//! - Keep serialization explicit (JSON payloads, big-endian u32 length).

use anyhow::{bail, Context};
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpListener, TcpStream,
    },
};

use crate::{
    entity::{Entity, EntityId, TechType},
    game::{PdaState, StoryGoals, TimeData},
    math::{Quat, Vec3},
    player::{EquippedItem, GameMode, Permissions, PlayerId, PlayerPreferences, PlayerStats},
    session::{AuthenticationContext, PlayerContext, PlayerSettings, ReservationResponse},
};

/// Largest accepted frame payload. An initial sync of a big world stays well below this.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies one live transport connection. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn new_unique() -> Self {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// One entry of an ownership handoff. `owner: None` leaves the entity unsimulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipChange {
    pub entity_id: EntityId,
    pub owner: Option<PlayerId>,
}

/// Latest build operation applied to a base, so clients can replay partial builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOperation {
    pub base_id: EntityId,
    pub operation_id: u32,
}

/// Full world snapshot sent once to a newly admitted player.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitialSync {
    pub player_entity_id: EntityId,
    pub was_brand_new: bool,
    pub assigned_escape_pod_id: EntityId,
    pub equipped_items: Vec<EquippedItem>,
    pub used_items: Vec<TechType>,
    pub quick_slots: Vec<Option<EntityId>>,
    pub pda_state: PdaState,
    pub story_goals: StoryGoals,
    pub position: Vec3,
    pub rotation: Quat,
    pub sub_root_id: Option<EntityId>,
    pub stats: PlayerStats,
    pub other_players: Vec<PlayerContext>,
    pub global_root_entities: Vec<Entity>,
    /// Entities this player was made responsible for simulating.
    pub simulations: Vec<EntityId>,
    pub game_mode: GameMode,
    pub permissions: Permissions,
    pub preferences: PlayerPreferences,
    pub time_data: TimeData,
    pub build_operations: Vec<BuildOperation>,
}

/// Packet envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Packet {
    // ─── Admission ───
    /// Client -> server: ask for a reservation.
    ReservationRequest {
        correlation_id: String,
        settings: PlayerSettings,
        auth: AuthenticationContext,
    },
    ReservationResponse(ReservationResponse),
    /// Client -> server: join the queue with a reservation key.
    JoinQueueAdd {
        reservation_key: String,
    },

    // ─── Initial sync ───
    InitialSync(Box<InitialSync>),
    /// Client -> server: initial sync fully applied.
    SyncFinished,
    /// Server -> client: the acknowledgment did not arrive in time.
    SyncTimeout,

    // ─── Peers ───
    PlayerJoined {
        context: PlayerContext,
        sub_root_id: Option<EntityId>,
        equipped_tech_types: Vec<TechType>,
    },
    PlayerDisconnected {
        player_id: PlayerId,
    },
    /// Client -> server: the player died.
    PlayerDeath {
        position: Vec3,
    },

    // ─── Entities ───
    SpawnEntities {
        entities: Vec<Entity>,
        is_respawn: bool,
    },
    OwnershipChange {
        changes: Vec<OwnershipChange>,
    },
    /// Client -> server: ask to simulate an entity.
    SimulationOwnershipRequest {
        entity_id: EntityId,
    },
    SimulationOwnershipResponse {
        entity_id: EntityId,
        granted: bool,
    },
    /// Client -> server: stop simulating an entity.
    SimulationOwnershipRelease {
        entity_id: EntityId,
    },

    // ─── Disconnect ───
    Disconnect {
        reason: String,
    },
}

impl Packet {
    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Packet::ReservationRequest { .. } => "ReservationRequest",
            Packet::ReservationResponse(_) => "ReservationResponse",
            Packet::JoinQueueAdd { .. } => "JoinQueueAdd",
            Packet::InitialSync(_) => "InitialSync",
            Packet::SyncFinished => "SyncFinished",
            Packet::SyncTimeout => "SyncTimeout",
            Packet::PlayerJoined { .. } => "PlayerJoined",
            Packet::PlayerDisconnected { .. } => "PlayerDisconnected",
            Packet::PlayerDeath { .. } => "PlayerDeath",
            Packet::SpawnEntities { .. } => "SpawnEntities",
            Packet::OwnershipChange { .. } => "OwnershipChange",
            Packet::SimulationOwnershipRequest { .. } => "SimulationOwnershipRequest",
            Packet::SimulationOwnershipResponse { .. } => "SimulationOwnershipResponse",
            Packet::SimulationOwnershipRelease { .. } => "SimulationOwnershipRelease",
            Packet::Disconnect { .. } => "Disconnect",
        }
    }
}

/// Writes one length-prefixed frame.
pub async fn write_packet<W: AsyncWrite + Unpin>(writer: &mut W, msg: &Packet) -> anyhow::Result<()> {
    let payload = serde_json::to_vec(msg).context("serialize packet")?;
    if payload.len() > MAX_FRAME_LEN {
        bail!("packet {} too large: {} bytes", msg.kind(), payload.len());
    }
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);
    writer.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> anyhow::Result<Packet> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        bail!("frame length {len} exceeds limit {MAX_FRAME_LEN}");
    }
    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    serde_json::from_slice(&payload).context("deserialize packet")
}

/// Reliable connection over TCP with length-prefixed frames.
#[derive(Debug)]
pub struct ReliableConn {
    stream: TcpStream,
}

impl ReliableConn {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }

    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok(Self::new(stream))
    }

    /// Splits into independently owned read and write halves.
    pub fn into_split(self) -> (PacketReader, PacketWriter) {
        let (read, write) = self.stream.into_split();
        (PacketReader { half: read }, PacketWriter { half: write })
    }
}

/// Read half of a [`ReliableConn`].
#[derive(Debug)]
pub struct PacketReader {
    half: OwnedReadHalf,
}

impl PacketReader {
    pub async fn recv(&mut self) -> anyhow::Result<Packet> {
        read_packet(&mut self.half).await
    }
}

/// Write half of a [`ReliableConn`].
#[derive(Debug)]
pub struct PacketWriter {
    half: OwnedWriteHalf,
}

impl PacketWriter {
    pub async fn send(&mut self, msg: &Packet) -> anyhow::Result<()> {
        write_packet(&mut self.half, msg).await
    }
}

/// TCP server listener.
pub struct ReliableListener {
    listener: TcpListener,
}

impl ReliableListener {
    pub async fn bind(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        Ok(Self { listener })
    }

    pub async fn accept(&self) -> anyhow::Result<(ReliableConn, SocketAddr)> {
        let (stream, addr) = self.listener.accept().await.context("tcp accept")?;
        stream.set_nodelay(true).context("tcp nodelay")?;
        Ok((ReliableConn::new(stream), addr))
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

/// Convenience codec helpers.
pub fn encode_to_bytes(msg: &Packet) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes(b: &[u8]) -> anyhow::Result<Packet> {
    serde_json::from_slice(b).context("deserialize")
}
