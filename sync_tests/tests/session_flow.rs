//! In-process tests of the session core: reservations, the join queue,
//! initial sync and disconnect handling, driven through channel connections.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        mpsc, Arc, OnceLock, Weak,
    },
    time::Duration,
};

use sync_server::{
    connection::{ChannelConnection, Connection},
    error::SessionError,
    join_queue::JoinRequest,
    manager::PlayerManager,
    player::{Player, PlayerDirectory},
    world::{EntityRegistry, InMemoryWorld, ServerLifecycle, World},
};
use sync_shared::{
    config::ServerConfig,
    entity::{Entity, EntityId, EntityKind, TechType},
    math::{Transform, Vec3},
    net::{ConnectionId, InitialSync, OwnershipChange, Packet},
    player::{GameMode, Permissions, PlayerId},
    session::{
        AuthenticationContext, PlayerContext, PlayerSettings, ReservationResponse,
        ReservationState,
    },
};
use tokio::sync::mpsc::UnboundedReceiver;

const WAIT: Duration = Duration::from_secs(3);

#[derive(Default)]
struct RecordingLifecycle {
    paused: std::sync::atomic::AtomicBool,
    pauses: AtomicUsize,
    resumes: AtomicUsize,
    saves: AtomicUsize,
    /// Saves during which another thread could take the session lock.
    unlocked_saves: AtomicUsize,
    manager: OnceLock<Weak<PlayerManager>>,
}

impl ServerLifecycle for RecordingLifecycle {
    fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
        self.pauses.fetch_add(1, Ordering::SeqCst);
    }

    fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resumes.fetch_add(1, Ordering::SeqCst);
    }

    fn save(&self) -> anyhow::Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        if let Some(manager) = self.manager.get().and_then(Weak::upgrade) {
            let (tx, rx) = mpsc::channel();
            std::thread::spawn(move || {
                let _ = tx.send(manager.reserved_count());
            });
            if rx.recv_timeout(Duration::from_secs(1)).is_ok() {
                self.unlocked_saves.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

struct Harness {
    manager: Arc<PlayerManager>,
    world: Arc<InMemoryWorld>,
    lifecycle: Arc<RecordingLifecycle>,
}

impl Harness {
    fn new(cfg: ServerConfig) -> Self {
        Self::with_players(cfg, Vec::new())
    }

    fn with_players(cfg: ServerConfig, players: Vec<Player>) -> Self {
        sync_tests::init_test_tracing();

        let world = Arc::new(InMemoryWorld::new(cfg.players_per_escape_pod));
        let lifecycle = Arc::new(RecordingLifecycle::default());
        let manager = Arc::new(PlayerManager::new(
            Arc::new(cfg),
            Arc::new(PlayerDirectory::new(players)),
            World::from_memory(world.clone()),
            lifecycle.clone(),
        ));
        let _ = lifecycle.manager.set(Arc::downgrade(&manager));
        Self {
            manager,
            world,
            lifecycle,
        }
    }

    fn with_join_queue(self) -> Self {
        self.manager.spawn_join_queue();
        self
    }

    fn reserve(&self, client: &Client, name: &str) -> ReservationResponse {
        self.reserve_with(client, AuthenticationContext::new(name))
    }

    fn reserve_with(&self, client: &Client, auth: AuthenticationContext) -> ReservationResponse {
        self.manager
            .reserve(&client.conn, PlayerSettings::default(), &auth, "corr")
            .expect("reserve")
    }

    /// Reserve, queue and receive the initial sync without acknowledging it.
    async fn start_join(&self, client: &mut Client, name: &str) -> Box<InitialSync> {
        let response = self.reserve(client, name);
        assert!(response.is_accepted(), "{name} rejected: {:?}", response.state);
        let key = response.reservation_key.expect("key");
        self.manager
            .add_to_join_queue(client.conn.id(), &key)
            .expect("queue");
        client.initial_sync().await
    }

    async fn join(&self, client: &mut Client, name: &str) -> Box<InitialSync> {
        let sync = self.start_join(client, name).await;
        self.manager.sync_finished(client.conn.id());
        sync
    }

    fn dynamic_entity(&self, id: u64) {
        self.world.add_entity(Entity::new(
            EntityId(id),
            TechType::new("Seamoth"),
            Transform::default(),
            EntityKind::Dynamic,
        ));
    }
}

/// Transport that fails hard when asked to deliver `SyncTimeout`.
#[derive(Debug)]
struct FragileConnection(Arc<ChannelConnection>);

impl Connection for FragileConnection {
    fn id(&self) -> ConnectionId {
        self.0.id()
    }

    fn endpoint(&self) -> SocketAddr {
        self.0.endpoint()
    }

    fn is_connected(&self) -> bool {
        self.0.is_connected()
    }

    fn send(&self, packet: Packet) -> Result<(), SessionError> {
        if matches!(packet, Packet::SyncTimeout) {
            panic!("transport failure");
        }
        self.0.send(packet)
    }

    fn disconnect(&self, reason: &str) {
        self.0.disconnect(reason)
    }
}

struct Client {
    channel: Arc<ChannelConnection>,
    conn: Arc<dyn Connection>,
    rx: UnboundedReceiver<Packet>,
}

impl Client {
    fn new() -> Self {
        Self::at("10.1.2.3:5000".parse().unwrap())
    }

    fn at(endpoint: SocketAddr) -> Self {
        let (channel, rx) = ChannelConnection::new(endpoint);
        let conn: Arc<dyn Connection> = channel.clone();
        Self { channel, conn, rx }
    }

    fn fragile() -> Self {
        let (channel, rx) = ChannelConnection::new("10.1.2.3:5001".parse().unwrap());
        let conn: Arc<dyn Connection> = Arc::new(FragileConnection(channel.clone()));
        Self { channel, conn, rx }
    }

    async fn next_matching(&mut self, pred: impl Fn(&Packet) -> bool) -> Packet {
        tokio::time::timeout(WAIT, async {
            loop {
                let packet = self.rx.recv().await.expect("connection channel open");
                if pred(&packet) {
                    return packet;
                }
            }
        })
        .await
        .expect("expected packet in time")
    }

    async fn initial_sync(&mut self) -> Box<InitialSync> {
        match self
            .next_matching(|p| matches!(p, Packet::InitialSync(_)))
            .await
        {
            Packet::InitialSync(sync) => sync,
            _ => unreachable!(),
        }
    }

    fn drain(&mut self) -> Vec<Packet> {
        let mut packets = Vec::new();
        while let Ok(packet) = self.rx.try_recv() {
            packets.push(packet);
        }
        packets
    }
}

fn cfg() -> ServerConfig {
    ServerConfig::default()
}

#[test]
fn concurrent_reservations_for_one_name_admit_exactly_one() {
    let h = Harness::new(cfg());
    let clients: Vec<Client> = (0..8).map(|_| Client::new()).collect();
    let conns: Vec<Arc<dyn Connection>> = clients.iter().map(|c| c.conn.clone()).collect();
    let manager = &h.manager;

    let responses: Vec<ReservationResponse> = std::thread::scope(|s| {
        let handles: Vec<_> = conns
            .iter()
            .map(|conn| {
                s.spawn(move || {
                    manager
                        .reserve(
                            conn,
                            PlayerSettings::default(),
                            &AuthenticationContext::new("alice"),
                            "corr",
                        )
                        .unwrap()
                })
            })
            .collect();
        handles.into_iter().map(|t| t.join().unwrap()).collect()
    });

    let accepted = responses.iter().filter(|r| r.is_accepted()).count();
    assert_eq!(accepted, 1);
    for r in responses.iter().filter(|r| !r.is_accepted()) {
        assert!(r.state.contains(ReservationState::DUPLICATE_NAME));
        assert!(r.state.contains(ReservationState::REJECTED));
    }
    assert_eq!(h.manager.reserved_count(), 1);
}

#[test]
fn capacity_counts_pending_reservations() {
    let h = Harness::new(ServerConfig {
        max_connections: 1,
        ..cfg()
    });
    let alice = Client::new();
    let bob = Client::new();

    assert!(h.reserve(&alice, "alice").is_accepted());
    let rejected = h.reserve(&bob, "bob");
    assert!(rejected.state.contains(ReservationState::CAPACITY_REACHED));
    assert!(rejected.state.contains(ReservationState::REJECTED));
    assert!(rejected.reservation_key.is_none());

    h.manager.handle_disconnect(alice.conn.id());
    assert!(h.reserve(&bob, "bob").is_accepted());
}

#[test]
fn placeholder_name_is_refused_without_using_a_slot() {
    let h = Harness::new(ServerConfig {
        max_connections: 1,
        ..cfg()
    });
    let first = Client::new();
    let second = Client::new();

    let placeholder = h.reserve(&first, "Player");
    assert!(placeholder.state.contains(ReservationState::DUPLICATE_NAME));
    assert!(h.reserve(&second, "alice").is_accepted());
}

#[test]
fn rejection_reasons_follow_check_order() {
    let h = Harness::new(ServerConfig {
        server_password: Some("hunter2".into()),
        ..cfg()
    });
    let c = Client::new();

    let wrong = h.reserve_with(&c, AuthenticationContext::new("alice").with_password("nope"));
    assert_eq!(
        wrong.state,
        ReservationState::REJECTED | ReservationState::AUTHENTICATION_FAILED
    );

    // Password is checked before the name.
    let both_bad = h.reserve(&c, "a b");
    assert!(both_bad
        .state
        .contains(ReservationState::AUTHENTICATION_FAILED));

    let bad_name = h.reserve_with(&c, AuthenticationContext::new("a b").with_password("hunter2"));
    assert!(bad_name.state.contains(ReservationState::INVALID_USERNAME));

    let ok = h.reserve_with(&c, AuthenticationContext::new("alice").with_password("hunter2"));
    assert!(ok.is_accepted());
    assert_eq!(ok.correlation_id, "corr");
}

#[test]
fn dead_hardcore_player_cannot_return() {
    let context = PlayerContext {
        player_name: "ghost".into(),
        player_id: PlayerId(4),
        entity_id: EntityId(40),
        was_brand_new: false,
        settings: PlayerSettings::default(),
        is_muted: false,
        game_mode: GameMode::Hardcore,
    };
    let server_cfg = ServerConfig {
        hardcore: true,
        ..cfg()
    };
    let mut ghost = Player::from_context(&context, &server_cfg);
    ghost.is_perma_death = true;
    let h = Harness::with_players(server_cfg, vec![ghost]);

    let response = h.reserve(&Client::new(), "ghost");
    assert!(response
        .state
        .contains(ReservationState::HARDCORE_PLAYER_DEAD));

    // New players keep getting ids after the saved ones.
    let fresh = h.reserve(&Client::new(), "alice");
    assert_eq!(fresh.player_id, Some(PlayerId(5)));
}

#[test]
fn reservation_key_is_single_use() {
    let h = Harness::new(cfg());
    let c = Client::new();
    let key = h
        .reserve(&c, "alice")
        .reservation_key
        .expect("accepted");

    let (player, brand_new) = h.manager.player_connected(c.conn.id(), &key).unwrap();
    assert_eq!(player.name, "alice");
    assert!(brand_new);

    let again = h.manager.player_connected(c.conn.id(), &key);
    assert!(matches!(again, Err(SessionError::UnknownReservation(_))));
}

#[test]
fn join_queue_only_accepts_the_connections_own_key() {
    let h = Harness::new(cfg());
    let alice = Client::new();
    let mallory = Client::new();
    let alice_key = h.reserve(&alice, "alice").reservation_key.unwrap();
    h.reserve(&mallory, "mallory");

    let stolen = h.manager.add_to_join_queue(mallory.conn.id(), &alice_key);
    assert!(matches!(stolen, Err(SessionError::ReservationMismatch(_))));
    assert!(h.manager.join_queue().is_empty());

    let stranger = h.manager.add_to_join_queue(Client::new().conn.id(), &alice_key);
    assert!(matches!(stranger, Err(SessionError::UnknownConnection(_))));
}

#[test]
fn re_reserving_replaces_the_pending_reservation() {
    let h = Harness::new(cfg());
    let c = Client::new();
    let first = h.reserve(&c, "alice").reservation_key.unwrap();
    let second = h.reserve(&c, "alice2").reservation_key.unwrap();
    assert_ne!(first, second);
    assert_eq!(h.manager.reserved_count(), 1);
    assert!(h.reserve(&Client::new(), "alice").is_accepted());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn syncs_are_served_one_at_a_time_in_queue_order() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();

    h.start_join(&mut alice, "alice").await;

    let bob_key = h.reserve(&bob, "bob").reservation_key.unwrap();
    h.manager.add_to_join_queue(bob.conn.id(), &bob_key).unwrap();

    // Alice has not acknowledged yet, so bob must wait.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!bob
        .drain()
        .iter()
        .any(|p| matches!(p, Packet::InitialSync(_))));

    h.manager.sync_finished(alice.conn.id());
    let sync = bob.initial_sync().await;
    assert_eq!(sync.other_players.len(), 1);
    assert_eq!(sync.other_players[0].player_name, "alice");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnected_queue_entry_never_gets_a_snapshot() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();
    let mut carol = Client::new();

    h.start_join(&mut alice, "alice").await;
    for (client, name) in [(&bob, "bob"), (&carol, "carol")] {
        let key = h.reserve(client, name).reservation_key.unwrap();
        h.manager.add_to_join_queue(client.conn.id(), &key).unwrap();
    }

    h.manager.handle_disconnect(bob.conn.id());
    assert_eq!(h.manager.join_queue().queued_connections(), vec![carol.conn.id()]);

    h.manager.sync_finished(alice.conn.id());
    let sync = carol.initial_sync().await;
    assert_eq!(sync.other_players.len(), 1);
    assert!(!bob
        .drain()
        .iter()
        .any(|p| matches!(p, Packet::InitialSync(_))));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unacknowledged_sync_times_out_once_and_disconnects() {
    let h = Harness::new(ServerConfig {
        initial_sync_timeout_ms: 100,
        ..cfg()
    })
    .with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();

    h.start_join(&mut alice, "alice").await;
    alice
        .next_matching(|p| matches!(p, Packet::SyncTimeout))
        .await;
    alice
        .next_matching(|p| matches!(p, Packet::Disconnect { .. }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let timeouts = alice
        .drain()
        .iter()
        .filter(|p| matches!(p, Packet::SyncTimeout))
        .count();
    assert_eq!(timeouts, 0, "SyncTimeout must be sent exactly once");
    assert!(!alice.channel.is_connected());
    assert_eq!(h.manager.connected_count(), 0);
    assert_eq!(h.manager.reserved_count(), 0);

    // The queue keeps going.
    let sync = h.join(&mut bob, "bob").await;
    assert!(sync.other_players.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn returning_player_keeps_identity() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut first = Client::new();
    let sync = h.join(&mut first, "alice").await;
    assert!(sync.was_brand_new);
    let player_id = h.manager.player(first.conn.id()).unwrap().id;
    let pod = sync.assigned_escape_pod_id;

    h.manager.handle_disconnect(first.conn.id());
    assert!(h.manager.directory().contains("alice"));

    let mut second = Client::new();
    let response = h.reserve(&second, "alice");
    assert_eq!(response.player_id, Some(player_id));
    let key = response.reservation_key.unwrap();
    h.manager.add_to_join_queue(second.conn.id(), &key).unwrap();
    let again = second.initial_sync().await;

    assert!(!again.was_brand_new);
    assert_eq!(again.player_entity_id, sync.player_entity_id);
    assert_eq!(again.assigned_escape_pod_id, pod);
    assert_eq!(h.world.all_entities().len(), 2, "pod and player body only");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn peers_hear_about_a_join_before_its_ownership_grants() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();

    h.dynamic_entity(1);
    let alice_sync = h.join(&mut alice, "alice").await;
    assert_eq!(alice_sync.simulations, vec![EntityId(1)]);

    // Unowned entity that appears later goes to the next joiner.
    h.dynamic_entity(2);
    alice.drain();
    let bob_sync = h.join(&mut bob, "bob").await;
    assert_eq!(bob_sync.simulations, vec![EntityId(2)]);
    let bob_id = h.manager.player(bob.conn.id()).unwrap().id;

    let seen: Vec<&'static str> = alice.drain().iter().map(|p| p.kind()).collect();
    assert_eq!(seen, vec!["PlayerJoined", "OwnershipChange", "SpawnEntities"]);
    assert_eq!(h.manager.simulation().owner_of(EntityId(2)), Some(bob_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn disconnect_hands_simulations_to_the_remaining_player() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();

    h.dynamic_entity(1);
    h.dynamic_entity(2);
    h.join(&mut alice, "alice").await;
    let bob_sync = h.join(&mut bob, "bob").await;
    assert!(bob_sync.simulations.is_empty());

    let alice_id = h.manager.player(alice.conn.id()).unwrap().id;
    let bob_id = h.manager.player(bob.conn.id()).unwrap().id;
    bob.drain();

    h.manager.handle_disconnect(alice.conn.id());

    let packets = bob.drain();
    assert_eq!(
        packets[0],
        Packet::PlayerDisconnected {
            player_id: alice_id
        }
    );
    let changes: Vec<&Packet> = packets
        .iter()
        .filter(|p| matches!(p, Packet::OwnershipChange { .. }))
        .collect();
    assert_eq!(changes.len(), 1);
    assert_eq!(
        changes[0],
        &Packet::OwnershipChange {
            changes: vec![
                OwnershipChange {
                    entity_id: EntityId(1),
                    owner: Some(bob_id)
                },
                OwnershipChange {
                    entity_id: EntityId(2),
                    owner: Some(bob_id)
                },
            ]
        }
    );
    assert!(h.manager.simulation().owned_by(alice_id).is_empty());
    assert!(!h.lifecycle.is_paused());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn world_pauses_and_saves_when_the_last_player_leaves() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    h.join(&mut alice, "alice").await;

    let pending = Client::new();
    h.reserve(&pending, "bob");
    h.manager.handle_disconnect(pending.conn.id());
    assert_eq!(h.lifecycle.pauses.load(Ordering::SeqCst), 0);

    h.manager.handle_disconnect(alice.conn.id());
    assert!(h.lifecycle.is_paused());
    assert_eq!(h.lifecycle.saves.load(Ordering::SeqCst), 1);
    // Reservations are not blocked while the world is written out.
    assert_eq!(h.lifecycle.unlocked_saves.load(Ordering::SeqCst), 1);

    // Second call is a no-op.
    h.manager.handle_disconnect(alice.conn.id());
    assert_eq!(h.lifecycle.saves.load(Ordering::SeqCst), 1);

    let mut again = Client::new();
    h.join(&mut again, "alice").await;
    assert!(!h.lifecycle.is_paused());
    assert_eq!(h.lifecycle.resumes.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn loopback_players_are_admins() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut local = Client::at("127.0.0.1:6000".parse().unwrap());
    let mut remote = Client::new();

    let local_sync = h.join(&mut local, "host").await;
    let remote_sync = h.join(&mut remote, "guest").await;

    assert_eq!(local_sync.permissions, Permissions::Admin);
    assert_eq!(remote_sync.permissions, Permissions::Player);
    assert_eq!(
        h.manager.directory().get("host").unwrap().permissions,
        Permissions::Admin
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn single_slot_server_scenario() {
    let h = Harness::new(ServerConfig {
        max_connections: 1,
        ..cfg()
    })
    .with_join_queue();
    let mut a = Client::new();
    let b = Client::new();

    let first = h.reserve(&a, "alice");
    assert!(first.is_accepted());
    assert_eq!(first.player_id, Some(PlayerId(1)));
    let t1 = first.reservation_key.unwrap();

    let rejected = h.reserve(&b, "bob");
    assert!(rejected.state.contains(ReservationState::CAPACITY_REACHED));

    h.manager.add_to_join_queue(a.conn.id(), &t1).unwrap();
    a.initial_sync().await;
    h.manager.sync_finished(a.conn.id());
    h.manager.handle_disconnect(a.conn.id());

    let retry = h.reserve(&b, "bob");
    assert!(retry.is_accepted());
    assert_ne!(retry.reservation_key.unwrap(), t1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn re_reserving_after_queueing_syncs_with_the_new_key() {
    let h = Harness::new(cfg());
    let mut c = Client::new();

    let first = h.reserve(&c, "alice").reservation_key.unwrap();
    h.manager.add_to_join_queue(c.conn.id(), &first).unwrap();

    let second = h.reserve(&c, "alice2").reservation_key.unwrap();
    assert!(h.manager.join_queue().is_empty());
    h.manager.add_to_join_queue(c.conn.id(), &second).unwrap();
    assert_eq!(h.manager.join_queue().queued_connections(), vec![c.conn.id()]);

    let h = h.with_join_queue();
    let sync = c.initial_sync().await;
    assert!(sync.was_brand_new);
    assert_eq!(h.manager.player(c.conn.id()).unwrap().name, "alice2");
    assert!(c.channel.is_connected());
    assert!(!c
        .drain()
        .iter()
        .any(|p| matches!(p, Packet::Disconnect { .. })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stale_queue_entry_does_not_disconnect_a_re_reserved_client() {
    let h = Harness::new(cfg());
    let mut c = Client::new();

    let first = h.reserve(&c, "alice").reservation_key.unwrap();
    let second = h.reserve(&c, "alice").reservation_key.unwrap();
    // An entry for the first key that was already taken off the queue.
    h.manager.join_queue().push(JoinRequest {
        connection_id: c.conn.id(),
        reservation_key: first,
    });

    let h = h.with_join_queue();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(c.channel.is_connected());
    assert!(c.drain().is_empty());

    h.manager.add_to_join_queue(c.conn.id(), &second).unwrap();
    c.initial_sync().await;
    assert_eq!(h.manager.connected_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn only_simulated_entities_can_be_claimed() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();
    let sync = h.join(&mut alice, "alice").await;
    h.join(&mut bob, "bob").await;
    let alice_id = h.manager.player(alice.conn.id()).unwrap().id;

    h.world.add_entity(Entity::new(
        EntityId(50),
        TechType::new("Coral"),
        Transform::default(),
        EntityKind::Prop,
    ));
    for refused in [
        EntityId(424242),
        EntityId(50),
        sync.player_entity_id,
        sync.assigned_escape_pod_id,
    ] {
        assert!(!h.manager.request_simulation(&alice.conn, refused).unwrap());
        assert_eq!(h.manager.simulation().owner_of(refused), None);
    }

    h.dynamic_entity(60);
    bob.drain();
    assert!(h.manager.request_simulation(&alice.conn, EntityId(60)).unwrap());
    assert_eq!(h.manager.simulation().owner_of(EntityId(60)), Some(alice_id));
    assert_eq!(
        bob.drain(),
        vec![Packet::OwnershipChange {
            changes: vec![OwnershipChange {
                entity_id: EntityId(60),
                owner: Some(alice_id)
            }]
        }]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn released_entity_can_be_claimed_by_another_player() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();
    h.join(&mut alice, "alice").await;
    h.join(&mut bob, "bob").await;
    let bob_id = h.manager.player(bob.conn.id()).unwrap().id;

    h.dynamic_entity(70);
    assert!(h.manager.request_simulation(&alice.conn, EntityId(70)).unwrap());
    assert!(!h.manager.request_simulation(&bob.conn, EntityId(70)).unwrap());
    bob.drain();

    h.manager
        .process(
            &alice.conn,
            Packet::SimulationOwnershipRelease {
                entity_id: EntityId(70),
            },
        )
        .unwrap();
    assert_eq!(
        bob.drain(),
        vec![Packet::OwnershipChange {
            changes: vec![OwnershipChange {
                entity_id: EntityId(70),
                owner: None
            }]
        }]
    );
    assert!(h.manager.request_simulation(&bob.conn, EntityId(70)).unwrap());
    assert_eq!(h.manager.simulation().owner_of(EntityId(70)), Some(bob_id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn departed_player_is_never_granted_ownership() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    let mut bob = Client::new();
    h.join(&mut alice, "alice").await;
    h.join(&mut bob, "bob").await;
    let alice_id = h.manager.player(alice.conn.id()).unwrap().id;
    h.dynamic_entity(7);

    h.manager.handle_disconnect(alice.conn.id());
    let late = h.manager.process(
        &alice.conn,
        Packet::SimulationOwnershipRequest {
            entity_id: EntityId(7),
        },
    );
    assert!(late.is_err());
    assert_eq!(h.manager.simulation().owner_of(EntityId(7)), None);
    assert!(h.manager.simulation().owned_by(alice_id).is_empty());

    assert!(h.manager.request_simulation(&bob.conn, EntityId(7)).unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reported_death_on_hardcore_server_bars_the_player() {
    let h = Harness::new(ServerConfig {
        hardcore: true,
        ..cfg()
    })
    .with_join_queue();
    let mut alice = Client::new();
    h.join(&mut alice, "alice").await;

    let position = Vec3::new(12.0, -40.0, 3.0);
    h.manager
        .process(&alice.conn, Packet::PlayerDeath { position })
        .unwrap();
    h.manager.handle_disconnect(alice.conn.id());

    let dead = h.manager.directory().get("alice").unwrap();
    assert!(dead.is_perma_death);
    assert_eq!(dead.position, position);

    let response = h.reserve(&Client::new(), "alice");
    assert_eq!(
        response.state,
        ReservationState::REJECTED | ReservationState::HARDCORE_PLAYER_DEAD
    );
    assert!(response.reservation_key.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reported_death_on_normal_server_is_not_permanent() {
    let h = Harness::new(cfg()).with_join_queue();
    let mut alice = Client::new();
    h.join(&mut alice, "alice").await;
    let alice_id = h.manager.player(alice.conn.id()).unwrap().id;

    let position = Vec3::new(1.0, -5.0, 1.0);
    h.manager
        .process(&alice.conn, Packet::PlayerDeath { position })
        .unwrap();
    h.manager.handle_disconnect(alice.conn.id());

    let player = h.manager.directory().get("alice").unwrap();
    assert!(!player.is_perma_death);
    assert_eq!(player.position, position);

    let response = h.reserve(&Client::new(), "alice");
    assert!(response.is_accepted());
    assert_eq!(response.player_id, Some(alice_id));
}

#[test]
fn exhausted_player_ids_reject_only_new_players() {
    let context = PlayerContext {
        player_name: "veteran".into(),
        player_id: PlayerId(u16::MAX),
        entity_id: EntityId(900),
        was_brand_new: false,
        settings: PlayerSettings::default(),
        is_muted: false,
        game_mode: GameMode::Survival,
    };
    let veteran = Player::from_context(&context, &cfg());
    let h = Harness::with_players(cfg(), vec![veteran]);

    let newcomer = h.reserve(&Client::new(), "newcomer");
    assert_eq!(
        newcomer.state,
        ReservationState::REJECTED | ReservationState::CAPACITY_REACHED
    );

    let returning = h.reserve(&Client::new(), "veteran");
    assert!(returning.is_accepted());
    assert_eq!(returning.player_id, Some(PlayerId(u16::MAX)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn scheduler_survives_a_panicking_transport() {
    let h = Harness::new(ServerConfig {
        initial_sync_timeout_ms: 100,
        ..cfg()
    })
    .with_join_queue();
    let mut fragile = Client::fragile();
    let mut bob = Client::new();

    // Never acknowledged: the timeout path hits the failing transport.
    h.start_join(&mut fragile, "alice").await;
    fragile
        .next_matching(|p| matches!(p, Packet::Disconnect { .. }))
        .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!fragile.channel.is_connected());
    assert_eq!(h.manager.reserved_count(), 0);

    let sync = h.join(&mut bob, "bob").await;
    assert!(sync.other_players.is_empty());
}
