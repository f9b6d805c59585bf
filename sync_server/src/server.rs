//! TCP front end.
//!
//! Each accepted socket becomes a [`ChannelConnection`]:
//! - a reader task decodes frames and hands them to [`PlayerManager::process`]
//! - a writer task drains the connection's outbound channel onto the socket
//!
//! When the socket closes, or the session core asks for it to be closed, the
//! manager reconciles the connection before the tasks exit.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use sync_shared::{
    config::ServerConfig,
    net::{ConnectionId, Packet, ReliableConn, ReliableListener},
};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    connection::{ChannelConnection, Connection},
    manager::PlayerManager,
    persistence::{SaveFile, WorldSaver},
    player::PlayerDirectory,
    world::{InMemoryWorld, World},
};

/// How long a server-initiated close waits for queued packets to flush.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Session server.
pub struct GameServer {
    manager: Arc<PlayerManager>,
    tcp: ReliableListener,
}

impl GameServer {
    /// Binds `manager.config().server_addr`.
    pub async fn bind(manager: Arc<PlayerManager>) -> anyhow::Result<Self> {
        let addr: SocketAddr = manager
            .config()
            .server_addr
            .parse()
            .context("parse server_addr")?;
        let tcp = ReliableListener::bind(addr).await?;
        Ok(Self { manager, tcp })
    }

    /// Returns the local address (after binding).
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    pub fn manager(&self) -> &Arc<PlayerManager> {
        &self.manager
    }

    /// Accepts exactly one client and starts serving it in the background.
    pub async fn accept_one(&self) -> anyhow::Result<ConnectionId> {
        let (conn, peer) = self.tcp.accept().await?;
        let (channel, outbound) = ChannelConnection::new(peer);
        let id = channel.id();
        info!(connection = %id, %peer, "Client connected");
        tokio::spawn(serve_connection(
            Arc::clone(&self.manager),
            conn,
            channel,
            outbound,
        ));
        Ok(id)
    }

    /// Accepts clients until the listener fails.
    pub async fn run(&self) -> anyhow::Result<()> {
        loop {
            if let Err(e) = self.accept_one().await {
                warn!(error = %e, "Accept failed");
            }
        }
    }
}

async fn serve_connection(
    manager: Arc<PlayerManager>,
    conn: ReliableConn,
    channel: Arc<ChannelConnection>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
) {
    let id = channel.id();
    let (mut reader, mut writer) = conn.into_split();

    let writer_task = tokio::spawn(async move {
        while let Some(packet) = outbound.recv().await {
            let last = matches!(packet, Packet::Disconnect { .. });
            if let Err(e) = writer.send(&packet).await {
                debug!(connection = %id, error = %e, "Write failed");
                break;
            }
            if last {
                break;
            }
        }
    });

    let connection: Arc<dyn Connection> = channel.clone();
    let server_closed = loop {
        tokio::select! {
            received = reader.recv() => match received {
                Ok(packet) => {
                    debug!(connection = %id, packet = packet.kind(), "Received");
                    if let Err(e) = manager.process(&connection, packet) {
                        warn!(connection = %id, error = %e, "Packet rejected");
                    }
                }
                Err(e) => {
                    debug!(connection = %id, error = %e, "Connection closed");
                    break false;
                }
            },
            _ = channel.closed() => break true,
        }
    };

    channel.mark_disconnected();
    manager.handle_disconnect(id);

    if server_closed {
        if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, writer_task).await.is_err() {
            debug!(connection = %id, "Writer did not flush before close");
        }
    } else {
        writer_task.abort();
    }
    info!(connection = %id, "Client disconnected");
}

/// Builds a manager over an in-memory world, restored from `save` if given.
pub fn in_memory_manager(config: ServerConfig, save: Option<SaveFile>) -> Arc<PlayerManager> {
    let config = Arc::new(config);
    let pods = config.players_per_escape_pod;
    let (directory, world) = match save {
        Some(save) => (
            PlayerDirectory::new(save.players),
            InMemoryWorld::restore(
                pods,
                save.entities,
                save.pda_state,
                save.story_goals,
                save.elapsed_seconds,
            ),
        ),
        None => (PlayerDirectory::default(), InMemoryWorld::new(pods)),
    };
    let directory = Arc::new(directory);
    let world = Arc::new(world);
    let saver = Arc::new(WorldSaver::new(
        PathBuf::from(&config.save_path),
        Arc::clone(&directory),
        Arc::clone(&world),
    ));
    Arc::new(PlayerManager::new(
        config,
        directory,
        World::from_memory(world),
        saver,
    ))
}

/// Helper for tests: bind to an ephemeral loopback port with the join queue
/// running. Saves go to the system temp directory.
pub async fn bind_ephemeral(mut cfg: ServerConfig) -> anyhow::Result<(GameServer, ServerConfig)> {
    cfg.server_addr = format!("{}:{}", IpAddr::V4(Ipv4Addr::LOCALHOST), 0);
    cfg.save_path = std::env::temp_dir()
        .join(format!(
            "sync_server_{}_{}.json",
            std::process::id(),
            rand::random::<u32>()
        ))
        .display()
        .to_string();

    let manager = in_memory_manager(cfg, None);
    let server = GameServer::bind(Arc::clone(&manager)).await?;
    manager.spawn_join_queue();

    let mut cfg = manager.config().clone();
    cfg.server_addr = server.local_addr()?.to_string();
    Ok((server, cfg))
}
