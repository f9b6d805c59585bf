//! World collaborators the session core consumes.
//!
//! The core only needs a handful of capabilities from the game world: an
//! entity registry, escape pod assignment, shared progression data and a way
//! to pause/save. Each is a trait so a real world backend can be plugged in;
//! [`InMemoryWorld`] is the default backend used by the binary and tests.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use sync_shared::{
    entity::{Entity, EntityId, EntityKind, TechType},
    game::{PdaState, StoryGoals, TimeData},
    math::{Transform, Vec3},
    net::BuildOperation,
    player::PlayerId,
};
use tracing::info;

/// Creates, finds and tracks world entities.
pub trait EntityRegistry: Send + Sync {
    fn add_entity(&self, entity: Entity);

    fn entity(&self, id: EntityId) -> Option<Entity>;

    /// Entities without a parent, ascending by id.
    fn global_root_entities(&self) -> Vec<Entity>;

    /// Latest operation of every base with build history.
    fn build_operations(&self) -> Vec<BuildOperation>;
}

pub trait EscapePodManager: Send + Sync {
    /// Puts `player` in an escape pod. Returns the pod id and, when a pod had
    /// to be created for this, the new pod entity.
    fn assign_player(&self, player: PlayerId) -> (EntityId, Option<Entity>);
}

/// Progression shared by every player.
pub trait GameData: Send + Sync {
    fn pda_state(&self) -> PdaState;
    fn story_goals(&self) -> StoryGoals;
    fn time_data(&self) -> TimeData;
}

/// Server-level control handed to the session core explicitly.
pub trait ServerLifecycle: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn save(&self) -> anyhow::Result<()>;
    fn is_paused(&self) -> bool;
}

/// Bundle of world capabilities.
#[derive(Clone)]
pub struct World {
    pub entities: Arc<dyn EntityRegistry>,
    pub escape_pods: Arc<dyn EscapePodManager>,
    pub game_data: Arc<dyn GameData>,
}

impl World {
    /// All three capabilities served by one in-memory world.
    pub fn from_memory(world: Arc<InMemoryWorld>) -> Self {
        Self {
            entities: world.clone(),
            escape_pods: world.clone(),
            game_data: world,
        }
    }
}

#[derive(Debug, Default)]
struct WorldState {
    entities: BTreeMap<EntityId, Entity>,
    /// Escape pods in creation order.
    escape_pods: Vec<EntityId>,
    pda_state: PdaState,
    story_goals: StoryGoals,
    elapsed_at_load: f64,
}

/// Entity store, escape pods and progression kept in process memory.
#[derive(Debug)]
pub struct InMemoryWorld {
    state: Mutex<WorldState>,
    players_per_escape_pod: usize,
    started: Instant,
}

/// Spacing between consecutive escape pods along the x axis.
const ESCAPE_POD_SPACING: f32 = 40.0;

impl InMemoryWorld {
    pub fn new(players_per_escape_pod: usize) -> Self {
        Self {
            state: Mutex::new(WorldState::default()),
            players_per_escape_pod: players_per_escape_pod.max(1),
            started: Instant::now(),
        }
    }

    /// Restores a saved world.
    pub fn restore(
        players_per_escape_pod: usize,
        entities: Vec<Entity>,
        pda_state: PdaState,
        story_goals: StoryGoals,
        elapsed_seconds: f64,
    ) -> Self {
        let world = Self::new(players_per_escape_pod);
        {
            let mut state = world.state();
            for entity in entities {
                if matches!(entity.kind, EntityKind::EscapePod { .. }) {
                    state.escape_pods.push(entity.id);
                }
                state.entities.insert(entity.id, entity);
            }
            state.pda_state = pda_state;
            state.story_goals = story_goals;
            state.elapsed_at_load = elapsed_seconds;
        }
        world
    }

    fn state(&self) -> MutexGuard<'_, WorldState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn all_entities(&self) -> Vec<Entity> {
        self.state().entities.values().cloned().collect()
    }
}

impl EntityRegistry for InMemoryWorld {
    fn add_entity(&self, entity: Entity) {
        self.state().entities.insert(entity.id, entity);
    }

    fn entity(&self, id: EntityId) -> Option<Entity> {
        self.state().entities.get(&id).cloned()
    }

    fn global_root_entities(&self) -> Vec<Entity> {
        self.state()
            .entities
            .values()
            .filter(|e| e.is_global_root())
            .cloned()
            .collect()
    }

    fn build_operations(&self) -> Vec<BuildOperation> {
        self.state()
            .entities
            .values()
            .filter_map(|e| match e.kind {
                EntityKind::Base { operation_id } => Some(BuildOperation {
                    base_id: e.id,
                    operation_id,
                }),
                _ => None,
            })
            .collect()
    }
}

impl EscapePodManager for InMemoryWorld {
    fn assign_player(&self, player: PlayerId) -> (EntityId, Option<Entity>) {
        let capacity = self.players_per_escape_pod;
        let mut state = self.state();

        let existing = state.escape_pods.iter().copied().find(|id| {
            matches!(
                state.entities.get(id).map(|e| &e.kind),
                Some(EntityKind::EscapePod { players }) if players.contains(&player)
            )
        });
        if let Some(pod_id) = existing {
            return (pod_id, None);
        }

        let open = state.escape_pods.last().copied().filter(|id| {
            matches!(
                state.entities.get(id).map(|e| &e.kind),
                Some(EntityKind::EscapePod { players }) if players.len() < capacity
            )
        });
        if let Some(pod_id) = open {
            if let Some(Entity {
                kind: EntityKind::EscapePod { players },
                ..
            }) = state.entities.get_mut(&pod_id)
            {
                players.push(player);
            }
            return (pod_id, None);
        }

        let index = state.escape_pods.len() as f32;
        let pod = Entity::new(
            EntityId::new_random(),
            TechType::new("EscapePod"),
            Transform {
                position: Vec3::new(-112.2 + index * ESCAPE_POD_SPACING, 0.0, -322.6),
                ..Transform::default()
            },
            EntityKind::EscapePod {
                players: vec![player],
            },
        );
        info!(pod = %pod.id, player_id = %player, "Created escape pod");
        state.escape_pods.push(pod.id);
        state.entities.insert(pod.id, pod.clone());
        (pod.id, Some(pod))
    }
}

impl GameData for InMemoryWorld {
    fn pda_state(&self) -> PdaState {
        self.state().pda_state.clone()
    }

    fn story_goals(&self) -> StoryGoals {
        self.state().story_goals.clone()
    }

    fn time_data(&self) -> TimeData {
        let running = self.started.elapsed().as_secs_f64();
        TimeData {
            elapsed_seconds: self.state().elapsed_at_load + running,
            real_time_elapsed: running,
        }
    }
}
