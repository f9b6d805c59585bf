//! Transport capability consumed by the session core.
//!
//! The core never touches sockets. It pushes packets into a [`Connection`]
//! and the transport layer delivers them reliably and in order.

use std::{
    fmt,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use sync_shared::net::{ConnectionId, Packet};
use tokio::sync::{mpsc, Notify};

use crate::error::SessionError;

/// A live client connection.
pub trait Connection: Send + Sync + fmt::Debug {
    fn id(&self) -> ConnectionId;

    /// Remote address.
    fn endpoint(&self) -> SocketAddr;

    fn is_connected(&self) -> bool;

    /// Queues a packet for delivery. Never blocks.
    fn send(&self, packet: Packet) -> Result<(), SessionError>;

    /// Sends a final `Disconnect` and asks the transport to close.
    fn disconnect(&self, reason: &str);
}

/// [`Connection`] backed by an unbounded channel drained by a writer task.
#[derive(Debug)]
pub struct ChannelConnection {
    id: ConnectionId,
    endpoint: SocketAddr,
    tx: mpsc::UnboundedSender<Packet>,
    connected: AtomicBool,
    closed: Notify,
}

impl ChannelConnection {
    /// Creates the connection and the receiving end the writer drains.
    pub fn new(endpoint: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Self {
            id: ConnectionId::new_unique(),
            endpoint,
            tx,
            connected: AtomicBool::new(true),
            closed: Notify::new(),
        });
        (conn, rx)
    }

    pub fn mark_disconnected(&self) {
        self.connected.store(false, Ordering::Release);
    }

    /// Resolves once the server side asked for this connection to close.
    pub async fn closed(&self) {
        self.closed.notified().await;
    }
}

impl Connection for ChannelConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn endpoint(&self) -> SocketAddr {
        self.endpoint
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    fn send(&self, packet: Packet) -> Result<(), SessionError> {
        if !self.connected.load(Ordering::Acquire) {
            return Err(SessionError::ConnectionClosed(self.id));
        }
        self.tx
            .send(packet)
            .map_err(|_| SessionError::ConnectionClosed(self.id))
    }

    fn disconnect(&self, reason: &str) {
        if self.connected.swap(false, Ordering::AcqRel) {
            let _ = self.tx.send(Packet::Disconnect {
                reason: reason.to_string(),
            });
            self.closed.notify_one();
        }
    }
}
