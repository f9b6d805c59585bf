//! Join queue.
//!
//! Initial syncs are composed one at a time, in the order `JoinQueueAdd`
//! packets were accepted. The scheduler holds the next entry back until the
//! client in flight acknowledges with `SyncFinished`, its connection goes away,
//! or the configured timeout elapses.
//!
//! - A timed out client receives exactly one `SyncTimeout` and is then
//!   disconnected.
//! - A failure or panic while servicing a request disconnects only that
//!   connection; the scheduler keeps running.

use std::{
    collections::VecDeque,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use sync_shared::net::{ConnectionId, Packet};
use tokio::{
    sync::{oneshot, Notify},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{error::SessionError, manager::PlayerManager};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub connection_id: ConnectionId,
    pub reservation_key: String,
}

#[derive(Debug)]
struct InFlight {
    connection_id: ConnectionId,
    finished: oneshot::Sender<()>,
}

/// FIFO of accepted join requests plus the sync currently awaiting its ack.
#[derive(Debug, Default)]
pub struct JoinQueue {
    entries: Mutex<VecDeque<JoinRequest>>,
    notify: Notify,
    in_flight: Mutex<Option<InFlight>>,
}

impl JoinQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, VecDeque<JoinRequest>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn in_flight(&self) -> MutexGuard<'_, Option<InFlight>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `request` unless its connection is already queued.
    pub fn push(&self, request: JoinRequest) -> bool {
        {
            let mut entries = self.entries();
            if entries
                .iter()
                .any(|e| e.connection_id == request.connection_id)
            {
                return false;
            }
            entries.push_back(request);
        }
        self.notify.notify_one();
        true
    }

    /// Waits for the oldest request.
    pub async fn next(&self) -> JoinRequest {
        loop {
            let front = self.entries().pop_front();
            if let Some(request) = front {
                return request;
            }
            self.notify.notified().await;
        }
    }

    /// Drops every trace of `connection_id`: queued entries and, if it is the
    /// one in flight, the pending wait. Returns whether anything was dropped.
    pub fn cancel(&self, connection_id: ConnectionId) -> bool {
        let queued = {
            let mut entries = self.entries();
            let before = entries.len();
            entries.retain(|e| e.connection_id != connection_id);
            before != entries.len()
        };
        self.take_in_flight(connection_id).is_some() || queued
    }

    /// Marks `connection_id` as the sync in flight. The receiver resolves on
    /// [`finish`](Self::finish) and errors when the wait is cancelled.
    pub fn begin(&self, connection_id: ConnectionId) -> oneshot::Receiver<()> {
        let (finished, rx) = oneshot::channel();
        *self.in_flight() = Some(InFlight {
            connection_id,
            finished,
        });
        rx
    }

    /// Completes the wait for `connection_id`. False if it is not in flight.
    pub fn finish(&self, connection_id: ConnectionId) -> bool {
        match self.take_in_flight(connection_id) {
            Some(in_flight) => in_flight.finished.send(()).is_ok(),
            None => false,
        }
    }

    pub fn abandon(&self, connection_id: ConnectionId) {
        self.take_in_flight(connection_id);
    }

    fn take_in_flight(&self, connection_id: ConnectionId) -> Option<InFlight> {
        let mut slot = self.in_flight();
        if slot.as_ref().map(|f| f.connection_id) == Some(connection_id) {
            slot.take()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Queued connections, oldest first.
    pub fn queued_connections(&self) -> Vec<ConnectionId> {
        self.entries().iter().map(|e| e.connection_id).collect()
    }
}

impl PlayerManager {
    /// Queues `connection_id` for its initial sync. The key must be the
    /// connection's own, still unconsumed reservation.
    pub fn add_to_join_queue(
        &self,
        connection_id: ConnectionId,
        reservation_key: &str,
    ) -> Result<(), SessionError> {
        let table = self.sessions();
        let assets = table
            .assets(connection_id)
            .ok_or(SessionError::UnknownConnection(connection_id))?;
        if assets.is_connected_player() {
            return Err(SessionError::AlreadyJoined(connection_id));
        }
        if assets.reservation_key.as_deref() != Some(reservation_key) {
            return Err(SessionError::ReservationMismatch(connection_id));
        }

        let queued = self.join_queue.push(JoinRequest {
            connection_id,
            reservation_key: reservation_key.to_string(),
        });
        if queued {
            info!(
                connection = %connection_id,
                position = self.join_queue.len(),
                "Added to join queue"
            );
        } else {
            debug!(connection = %connection_id, "Already in join queue");
        }
        Ok(())
    }

    /// Client acknowledged its initial sync.
    pub fn sync_finished(&self, connection_id: ConnectionId) {
        if !self.join_queue.finish(connection_id) {
            debug!(connection = %connection_id, "SyncFinished with no sync in flight");
        }
    }

    /// Composes and sends one initial sync, then waits for the ack.
    pub(crate) async fn service_join_request(&self, request: JoinRequest) {
        let JoinRequest {
            connection_id,
            reservation_key,
        } = request;

        // Registered before the snapshot goes out so a fast ack is not lost.
        let finished = self.join_queue.begin(connection_id);

        let player = match self.send_initial_sync(connection_id, &reservation_key) {
            Ok(player) => player,
            Err(SessionError::UnknownConnection(_)) => {
                self.join_queue.abandon(connection_id);
                info!(connection = %connection_id, "Connection left before its initial sync");
                return;
            }
            Err(SessionError::UnknownReservation(_)) if self.has_pending_reservation(connection_id) => {
                self.join_queue.abandon(connection_id);
                info!(connection = %connection_id, "Reservation replaced before its initial sync");
                return;
            }
            Err(e) => {
                self.join_queue.abandon(connection_id);
                warn!(connection = %connection_id, error = %e, "Initial sync failed");
                self.kick(connection_id, "initial sync failed");
                return;
            }
        };

        match tokio::time::timeout(self.config.initial_sync_timeout(), finished).await {
            Ok(Ok(())) => info!(player = %player.name, "Initial sync finished"),
            Ok(Err(_)) => info!(player = %player.name, "Disconnected during initial sync"),
            Err(_) => {
                self.join_queue.abandon(connection_id);
                warn!(
                    player = %player.name,
                    timeout_ms = self.config.initial_sync_timeout_ms,
                    "Initial sync timed out"
                );
                if let Some(connection) = self.connection(connection_id) {
                    if connection.is_connected() {
                        if let Err(e) = connection.send(Packet::SyncTimeout) {
                            debug!(player = %player.name, error = %e, "SyncTimeout not delivered");
                        }
                    }
                }
                self.kick(connection_id, "initial sync timed out");
            }
        }
    }

    fn has_pending_reservation(&self, connection_id: ConnectionId) -> bool {
        self.sessions()
            .assets(connection_id)
            .is_some_and(|a| a.reservation_key.is_some())
    }

    /// Services the join queue forever. Each request runs in its own task so a
    /// panic anywhere while servicing it only costs that connection.
    pub async fn run_join_queue(self: Arc<Self>) {
        loop {
            let request = self.join_queue.next().await;
            let connection_id = request.connection_id;
            debug!(connection = %connection_id, "Servicing join request");

            let worker = Arc::clone(&self);
            let serviced =
                tokio::spawn(async move { worker.service_join_request(request).await }).await;
            if let Err(e) = serviced {
                self.join_queue.abandon(connection_id);
                error!(connection = %connection_id, error = %e, "Join request servicing failed");
                let kicked = panic::catch_unwind(AssertUnwindSafe(|| {
                    self.kick(connection_id, "initial sync failed")
                }));
                if kicked.is_err() {
                    error!(connection = %connection_id, "Disconnect after failed join panicked");
                }
            }
        }
    }

    pub fn spawn_join_queue(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run_join_queue())
    }
}
