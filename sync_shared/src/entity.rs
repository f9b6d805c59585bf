//! World entity model.
//!
//! The session layer does not simulate entities. It only needs to know their
//! identity, where they sit in the containment hierarchy (global roots have no
//! parent) and whether a player should be simulating them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{math::Transform, player::PlayerId};

/// Stable world entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Allocates a fresh random id.
    pub fn new_random() -> Self {
        EntityId(rand::random())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Item/creature/structure type name as understood by the game client.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TechType(pub String);

impl TechType {
    pub fn none() -> Self {
        TechType("None".to_string())
    }

    pub fn new(name: impl Into<String>) -> Self {
        TechType(name.into())
    }
}

impl fmt::Display for TechType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What an entity is, as far as session coordination cares.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Static scenery; never owned.
    Prop,
    /// Creatures, vehicles and other things a player must simulate.
    Dynamic,
    /// A player's body.
    Player { player_id: PlayerId },
    /// Escape pod and the players assigned to it.
    EscapePod { players: Vec<PlayerId> },
    /// A (possibly partially built) base and its latest build operation id.
    Base { operation_id: u32 },
}

/// A world entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,
    pub tech_type: TechType,
    pub transform: Transform,
    /// `None` for global root entities.
    pub parent: Option<EntityId>,
    pub kind: EntityKind,
}

impl Entity {
    pub fn new(id: EntityId, tech_type: TechType, transform: Transform, kind: EntityKind) -> Self {
        Self {
            id,
            tech_type,
            transform,
            parent: None,
            kind,
        }
    }

    pub fn with_parent(mut self, parent: EntityId) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn is_global_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Whether a connected player should own this entity's simulation.
    pub fn is_simulated(&self) -> bool {
        matches!(self.kind, EntityKind::Dynamic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_dynamic_roots_are_simulated() {
        let creature = Entity::new(
            EntityId(7),
            TechType::new("Peeper"),
            Transform::default(),
            EntityKind::Dynamic,
        );
        let rock = Entity::new(
            EntityId(8),
            TechType::new("Rock"),
            Transform::default(),
            EntityKind::Prop,
        );
        assert!(creature.is_simulated());
        assert!(!rock.is_simulated());
        assert!(!creature.clone().with_parent(EntityId(1)).is_global_root());
    }

    #[test]
    fn entity_id_display_is_fixed_width_hex() {
        assert_eq!(EntityId(255).to_string(), "00000000000000ff");
    }
}
