//! Client implementation.
//!
//! The client walks the join handshake:
//! - `ReservationRequest` -> `ReservationResponse` (reservation key)
//! - `JoinQueueAdd` -> `InitialSync` once the server reaches us in its queue
//! - `SyncFinished` once the snapshot has been applied
//!
//! Inbound frames are read by a background task into a channel, so waiting
//! with a timeout never tears a frame in half.

use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use sync_shared::{
    config::ClientConfig,
    entity::EntityId,
    math::Vec3,
    net::{InitialSync, Packet, PacketWriter, ReliableConn},
    player::PlayerId,
    session::{AuthenticationContext, PlayerSettings, ReservationResponse},
};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// Not connected to any server.
    Disconnected,
    /// Socket open, no reservation yet.
    Connected,
    /// Holding a reservation key.
    Reserved,
    /// Waiting in the server's join queue.
    Queued,
    /// Initial sync received and acknowledged.
    InGame,
}

/// Session client.
pub struct SyncClient {
    pub state: ClientState,
    pub player_id: Option<PlayerId>,
    reservation_key: Option<String>,
    /// Everything received that was not consumed by a handshake step.
    pub events: Vec<Packet>,
    pub disconnect_reason: Option<String>,

    writer: PacketWriter,
    inbound: mpsc::UnboundedReceiver<Packet>,
    reader_task: JoinHandle<()>,
    next_correlation: u64,
}

impl SyncClient {
    /// Connects to a server.
    pub async fn connect(server_addr: SocketAddr) -> anyhow::Result<Self> {
        info!(server = %server_addr, "Connecting to server");
        let conn = ReliableConn::connect(server_addr).await?;
        let (mut reader, writer) = conn.into_split();

        let (tx, inbound) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(packet) => {
                        if tx.send(packet).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Server stream closed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            state: ClientState::Connected,
            player_id: None,
            reservation_key: None,
            events: Vec::new(),
            disconnect_reason: None,
            writer,
            inbound,
            reader_task,
            next_correlation: 0,
        })
    }

    /// Connects using a client config.
    pub async fn connect_with(cfg: &ClientConfig) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.server_addr.parse().context("parse server_addr")?;
        Self::connect(addr).await
    }

    pub fn reservation_key(&self) -> Option<&str> {
        self.reservation_key.as_deref()
    }

    pub async fn send(&mut self, packet: &Packet) -> anyhow::Result<()> {
        self.writer.send(packet).await
    }

    /// Next packet within `timeout`. `Ok(None)` on timeout; an error once the
    /// server closed the stream.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> anyhow::Result<Option<Packet>> {
        match tokio::time::timeout(timeout, self.inbound.recv()).await {
            Ok(Some(packet)) => {
                if let Packet::Disconnect { reason } = &packet {
                    info!(reason = %reason, "Disconnected by server");
                    self.disconnect_reason = Some(reason.clone());
                    self.state = ClientState::Disconnected;
                }
                Ok(Some(packet))
            }
            Ok(None) => {
                self.state = ClientState::Disconnected;
                anyhow::bail!("server closed the connection")
            }
            Err(_) => Ok(None),
        }
    }

    /// Asks for a reservation and waits for the matching response.
    pub async fn reserve(
        &mut self,
        auth: AuthenticationContext,
        settings: PlayerSettings,
        timeout: Duration,
    ) -> anyhow::Result<ReservationResponse> {
        self.next_correlation += 1;
        let correlation_id = format!("{}-{}", auth.username, self.next_correlation);
        self.send(&Packet::ReservationRequest {
            correlation_id: correlation_id.clone(),
            settings,
            auth,
        })
        .await?;

        let response = self
            .wait_for(timeout, |packet| match packet {
                Packet::ReservationResponse(r) if r.correlation_id == correlation_id => Ok(r),
                other => Err(other),
            })
            .await
            .context("waiting for ReservationResponse")?;

        if response.is_accepted() {
            self.reservation_key = response.reservation_key.clone();
            self.player_id = response.player_id;
            self.state = ClientState::Reserved;
            info!(player_id = ?response.player_id, "Reservation accepted");
        } else {
            warn!(reason = %response.state.describe(), "Reservation rejected");
        }
        Ok(response)
    }

    /// Enters the join queue with the held reservation key.
    pub async fn join_queue(&mut self) -> anyhow::Result<()> {
        let reservation_key = self
            .reservation_key
            .clone()
            .context("no reservation to join with")?;
        self.send(&Packet::JoinQueueAdd { reservation_key }).await?;
        self.state = ClientState::Queued;
        Ok(())
    }

    /// Waits for the initial sync. Fails on `SyncTimeout` or disconnect.
    pub async fn wait_initial_sync(&mut self, timeout: Duration) -> anyhow::Result<Box<InitialSync>> {
        let sync = self
            .wait_for(timeout, |packet| match packet {
                Packet::InitialSync(sync) => Ok(sync),
                other => Err(other),
            })
            .await
            .context("waiting for InitialSync")?;
        info!(
            entity = %sync.player_entity_id,
            brand_new = sync.was_brand_new,
            others = sync.other_players.len(),
            "Initial sync received"
        );
        Ok(sync)
    }

    /// Tells the server the initial sync is applied.
    pub async fn acknowledge_sync(&mut self) -> anyhow::Result<()> {
        self.send(&Packet::SyncFinished).await?;
        self.reservation_key = None;
        self.state = ClientState::InGame;
        Ok(())
    }

    /// Reserve, queue, receive and acknowledge in one go.
    pub async fn join(
        &mut self,
        auth: AuthenticationContext,
        settings: PlayerSettings,
        timeout: Duration,
    ) -> anyhow::Result<Box<InitialSync>> {
        let response = self.reserve(auth, settings, timeout).await?;
        if !response.is_accepted() {
            anyhow::bail!("reservation rejected: {}", response.state.describe());
        }
        self.join_queue().await?;
        let sync = self.wait_initial_sync(timeout).await?;
        self.acknowledge_sync().await?;
        Ok(sync)
    }

    pub async fn request_ownership(&mut self, entity_id: EntityId) -> anyhow::Result<()> {
        self.send(&Packet::SimulationOwnershipRequest { entity_id })
            .await
    }

    pub async fn release_ownership(&mut self, entity_id: EntityId) -> anyhow::Result<()> {
        self.send(&Packet::SimulationOwnershipRelease { entity_id })
            .await
    }

    pub async fn report_death(&mut self, position: Vec3) -> anyhow::Result<()> {
        self.send(&Packet::PlayerDeath { position }).await
    }

    /// Buffers everything that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> anyhow::Result<()> {
        while let Some(packet) = self.recv_timeout(window).await? {
            self.events.push(packet);
        }
        Ok(())
    }

    /// Receives until `pick` accepts a packet. Fails when the server reports
    /// a sync timeout, closes the session, or nothing matches in time.
    async fn wait_for<T>(
        &mut self,
        timeout: Duration,
        mut pick: impl FnMut(Packet) -> Result<T, Packet>,
    ) -> anyhow::Result<T> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let Some(packet) = self.recv_timeout(remaining).await? else {
                anyhow::bail!("timed out after {timeout:?}");
            };
            match packet {
                Packet::SyncTimeout => {
                    self.events.push(Packet::SyncTimeout);
                    anyhow::bail!("server timed out our initial sync");
                }
                Packet::Disconnect { reason } => anyhow::bail!("disconnected: {reason}"),
                other => match pick(other) {
                    Ok(value) => return Ok(value),
                    Err(unmatched) => self.events.push(unmatched),
                },
            }
        }
    }
}

impl Drop for SyncClient {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}
