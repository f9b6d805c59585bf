//! Simulation ownership.
//!
//! Every dynamic entity is simulated by at most one connected player. The map
//! is walked in ascending entity id order everywhere so results are
//! reproducible for the same input.
//!
//! Replacement policy on disconnect: each orphaned entity goes to the
//! remaining player that currently owns the fewest entities (counting grants
//! made earlier in the same pass); ties go to the lowest player id.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Mutex, MutexGuard, PoisonError},
};

use sync_shared::{entity::EntityId, net::OwnershipChange, player::PlayerId};
use tracing::debug;

#[derive(Debug, Default)]
pub struct EntitySimulation {
    owners: Mutex<BTreeMap<EntityId, PlayerId>>,
}

impl EntitySimulation {
    pub fn new() -> Self {
        Self::default()
    }

    fn owners(&self) -> MutexGuard<'_, BTreeMap<EntityId, PlayerId>> {
        self.owners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn owner_of(&self, entity: EntityId) -> Option<PlayerId> {
        self.owners().get(&entity).copied()
    }

    /// Entities `player` simulates, ascending.
    pub fn owned_by(&self, player: PlayerId) -> Vec<EntityId> {
        self.owners()
            .iter()
            .filter(|(_, owner)| **owner == player)
            .map(|(entity, _)| *entity)
            .collect()
    }

    /// Hands `player` every root that has no owner or whose owner is no longer
    /// in `connected`. Returns the granted ids, ascending.
    pub fn assign_initial_ownership(
        &self,
        player: PlayerId,
        global_roots: &[EntityId],
        connected: &[PlayerId],
    ) -> Vec<EntityId> {
        let mut owners = self.owners();
        let mut roots = global_roots.to_vec();
        roots.sort();
        roots.dedup();

        let mut granted = Vec::new();
        for entity in roots {
            let claimable = match owners.get(&entity) {
                None => true,
                Some(owner) => *owner != player && !connected.contains(owner),
            };
            if claimable {
                owners.insert(entity, player);
                granted.push(entity);
            }
        }
        debug!(player_id = %player, granted = granted.len(), "Assigned initial simulations");
        granted
    }

    /// Moves everything `player` owned to the other connected players.
    ///
    /// The returned changes cover exactly the entities `player` held. After
    /// this call `player` owns nothing.
    pub fn recompute_on_disconnect(
        &self,
        player: PlayerId,
        remaining: &[PlayerId],
    ) -> Vec<OwnershipChange> {
        let mut owners = self.owners();

        let mut load: HashMap<PlayerId, usize> = remaining
            .iter()
            .filter(|p| **p != player)
            .map(|p| (*p, 0))
            .collect();
        for owner in owners.values() {
            if let Some(count) = load.get_mut(owner) {
                *count += 1;
            }
        }

        let orphaned: Vec<EntityId> = owners
            .iter()
            .filter(|(_, owner)| **owner == player)
            .map(|(entity, _)| *entity)
            .collect();

        let mut changes = Vec::with_capacity(orphaned.len());
        for entity in orphaned {
            let next = load
                .iter()
                .min_by_key(|(id, count)| (**count, **id))
                .map(|(id, _)| *id);
            match next {
                Some(new_owner) => {
                    owners.insert(entity, new_owner);
                    if let Some(count) = load.get_mut(&new_owner) {
                        *count += 1;
                    }
                }
                None => {
                    owners.remove(&entity);
                }
            }
            changes.push(OwnershipChange {
                entity_id: entity,
                owner: next,
            });
        }
        changes
    }

    /// Grants `entity` to `player` if nobody else simulates it.
    pub fn request_ownership(&self, player: PlayerId, entity: EntityId) -> bool {
        let mut owners = self.owners();
        match owners.get(&entity) {
            Some(owner) if *owner != player => false,
            _ => {
                owners.insert(entity, player);
                true
            }
        }
    }

    /// Gives up `entity` if `player` holds it.
    pub fn release(&self, player: PlayerId, entity: EntityId) -> bool {
        let mut owners = self.owners();
        if owners.get(&entity) == Some(&player) {
            owners.remove(&entity);
            true
        } else {
            false
        }
    }
}
