//! Durable per-player minimap state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::overlay::ScreenPosition;
use crate::{PlayerId, WorldId};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt record: {0}")]
    Decode(#[from] toml::de::Error),

    #[error("Failed to encode record: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// One saved marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarkerState {
    pub name: String,
    pub icon: String,
    pub world: WorldId,
    pub x: i32,
    pub z: i32,
    #[serde(default)]
    pub stick_to_border: bool,
}

/// Everything needed to rebuild a player's minimap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimapState {
    pub player: PlayerId,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub position: ScreenPosition,
    #[serde(default)]
    pub markers: Vec<MarkerState>,
}

impl MinimapState {
    /// Empty state for a player.
    pub fn new(player: PlayerId) -> Self {
        Self {
            player,
            enabled: false,
            position: ScreenPosition::default(),
            markers: Vec::new(),
        }
    }
}

/// Storage of minimap state keyed by player.
pub trait PlayerMinimapStore: Send + Sync {
    fn save(&self, state: &MinimapState) -> Result<(), StoreError>;

    fn restore(&self, player: PlayerId) -> Result<Option<MinimapState>, StoreError>;

    fn enable_minimap(&self, player: PlayerId) -> Result<(), StoreError> {
        let mut state = self.restore(player)?.unwrap_or_else(|| MinimapState::new(player));
        state.enabled = true;
        self.save(&state)
    }

    /// Clear the enabled flag, keeping markers for the next enable.
    fn disable_minimap(&self, player: PlayerId) -> Result<(), StoreError> {
        let mut state = self.restore(player)?.unwrap_or_else(|| MinimapState::new(player));
        state.enabled = false;
        self.save(&state)
    }
}

/// One TOML file per player under `<data_dir>/players`.
pub struct FileStore {
    root: PathBuf,
    locks: Mutex<HashMap<PlayerId, Arc<Mutex<()>>>>,
}

impl FileStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let root = data_dir.join("players");
        std::fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_of(&self, player: PlayerId) -> PathBuf {
        self.root.join(format!("{}.toml", player))
    }

    fn lock_for(&self, player: PlayerId) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(player)
            .or_default()
            .clone()
    }

    fn read(&self, player: PlayerId) -> Result<Option<MinimapState>, StoreError> {
        let path = self.path_of(player);
        match std::fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(toml::from_str(&contents)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn write(&self, state: &MinimapState) -> Result<(), StoreError> {
        let path = self.path_of(state.player);
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, toml::to_string_pretty(state)?)?;
        std::fs::rename(&tmp, &path)?;
        debug!("Saved minimap state of {}", state.player);
        Ok(())
    }
}

impl PlayerMinimapStore for FileStore {
    fn save(&self, state: &MinimapState) -> Result<(), StoreError> {
        let lock = self.lock_for(state.player);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write(state)
    }

    fn restore(&self, player: PlayerId) -> Result<Option<MinimapState>, StoreError> {
        let lock = self.lock_for(player);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.read(player)
    }

    fn enable_minimap(&self, player: PlayerId) -> Result<(), StoreError> {
        self.set_enabled(player, true)
    }

    fn disable_minimap(&self, player: PlayerId) -> Result<(), StoreError> {
        self.set_enabled(player, false)
    }
}

impl FileStore {
    /// Read-modify-write under a single lock acquisition.
    fn set_enabled(&self, player: PlayerId, enabled: bool) -> Result<(), StoreError> {
        let lock = self.lock_for(player);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut state = self.read(player)?.unwrap_or_else(|| MinimapState::new(player));
        state.enabled = enabled;
        self.write(&state)
    }
}
