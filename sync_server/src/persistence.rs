//! World save file and the pause/save lifecycle.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_shared::{
    entity::Entity,
    game::{PdaState, StoryGoals},
};
use tracing::info;

use crate::{
    player::{Player, PlayerDirectory},
    world::{GameData, InMemoryWorld, ServerLifecycle},
};

/// On-disk world.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveFile {
    pub saved_at: DateTime<Utc>,
    pub players: Vec<Player>,
    pub entities: Vec<Entity>,
    #[serde(default)]
    pub pda_state: PdaState,
    #[serde(default)]
    pub story_goals: StoryGoals,
    #[serde(default)]
    pub elapsed_seconds: f64,
}

impl SaveFile {
    /// Reads a save file; `Ok(None)` when none exists yet.
    pub fn load(path: &Path) -> anyhow::Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("read save {}", path.display()))?;
        let save = serde_json::from_str(&raw)
            .with_context(|| format!("parse save {}", path.display()))?;
        Ok(Some(save))
    }
}

/// [`ServerLifecycle`] that persists the in-memory world as JSON.
pub struct WorldSaver {
    path: PathBuf,
    directory: Arc<PlayerDirectory>,
    world: Arc<InMemoryWorld>,
    paused: AtomicBool,
}

impl WorldSaver {
    pub fn new(path: PathBuf, directory: Arc<PlayerDirectory>, world: Arc<InMemoryWorld>) -> Self {
        Self {
            path,
            directory,
            world,
            paused: AtomicBool::new(false),
        }
    }

    fn snapshot(&self) -> SaveFile {
        SaveFile {
            saved_at: Utc::now(),
            players: self.directory.all(),
            entities: self.world.all_entities(),
            pda_state: self.world.pda_state(),
            story_goals: self.world.story_goals(),
            elapsed_seconds: self.world.time_data().elapsed_seconds,
        }
    }
}

impl ServerLifecycle for WorldSaver {
    fn pause(&self) {
        if !self.paused.swap(true, Ordering::AcqRel) {
            info!("World paused");
        }
    }

    fn resume(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            info!("World resumed");
        }
    }

    fn save(&self) -> anyhow::Result<()> {
        let save = self.snapshot();
        let json = serde_json::to_vec_pretty(&save).context("serialize save")?;
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, json).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("replace {}", self.path.display()))?;
        info!(
            path = %self.path.display(),
            players = save.players.len(),
            entities = save.entities.len(),
            "World saved"
        );
        Ok(())
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}
