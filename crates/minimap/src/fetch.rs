//! Deduplicating background fetch of player skin icons.
//!
//! Fetches run on the blocking pool. A request for a player whose fetch is
//! already in flight is dropped. Results land in a shared cache that the
//! tick reads without waiting.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use image::RgbaImage;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::icon::{Icon, IconError};
use crate::PlayerId;

/// Where skins come from.
pub trait SkinSource: Send + Sync + 'static {
    fn fetch(&self, name: &str) -> Result<Icon, IconError>;
}

/// Skins stored as `<dir>/<name>.png`.
pub struct DirectorySkinSource {
    dir: PathBuf,
}

impl DirectorySkinSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SkinSource for DirectorySkinSource {
    fn fetch(&self, name: &str) -> Result<Icon, IconError> {
        let path = self.dir.join(format!("{}.png", name));
        let load_failed = |reason: String| IconError::LoadFailed {
            name: name.to_string(),
            reason,
        };
        let bytes = std::fs::read(&path).map_err(|e| load_failed(e.to_string()))?;
        let image = image::load_from_memory(&bytes).map_err(|e| load_failed(e.to_string()))?;
        Ok(face_icon(&image.to_rgba8()))
    }
}

/// Icon of the face of a skin. Images that are not skin-shaped are used
/// whole.
pub fn face_icon(skin: &RgbaImage) -> Icon {
    let skin_shaped = skin.width() == 64 && (skin.height() == 64 || skin.height() == 32);
    if skin_shaped {
        let face = image::imageops::crop_imm(skin, 8, 8, 8, 8).to_image();
        Icon::from_rgba(&face)
    } else {
        Icon::from_rgba(skin)
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct SkinState {
    cache: HashMap<PlayerId, Arc<Icon>>,
    /// Ticket of the fetch currently running for each player.
    in_flight: HashMap<PlayerId, u64>,
    next_ticket: u64,
}

/// Skin icons keyed by player.
pub struct SkinIcons {
    source: Arc<dyn SkinSource>,
    state: Arc<Mutex<SkinState>>,
}

impl SkinIcons {
    pub fn new(source: Arc<dyn SkinSource>) -> Self {
        Self {
            source,
            state: Arc::new(Mutex::new(SkinState::default())),
        }
    }

    /// Fetched icon for `player`, if any.
    pub fn get(&self, player: PlayerId) -> Option<Arc<Icon>> {
        lock(&self.state).cache.get(&player).cloned()
    }

    pub fn is_in_flight(&self, player: PlayerId) -> bool {
        lock(&self.state).in_flight.contains_key(&player)
    }

    /// Forget the skin of `player`. A fetch still running for them is
    /// discarded when it completes.
    pub fn evict(&self, player: PlayerId) {
        let mut state = lock(&self.state);
        state.cache.remove(&player);
        state.in_flight.remove(&player);
    }

    /// Start fetching the skin of `player` unless it is cached or already
    /// in flight. Must be called from within a tokio runtime.
    pub fn request(&self, player: PlayerId, name: &str) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime to fetch the skin of {} on", name);
            return None;
        };
        let ticket = {
            let mut state = lock(&self.state);
            if state.cache.contains_key(&player) {
                return None;
            }
            if state.in_flight.contains_key(&player) {
                debug!("Skin of {} already in flight", name);
                return None;
            }
            state.next_ticket += 1;
            let ticket = state.next_ticket;
            state.in_flight.insert(player, ticket);
            ticket
        };

        let source = Arc::clone(&self.source);
        let shared = Arc::clone(&self.state);
        let name = name.to_string();
        Some(runtime.spawn_blocking(move || {
            let fetched = source.fetch(&name);
            let mut state = lock(&shared);
            if state.in_flight.get(&player) != Some(&ticket) {
                debug!("Dropping skin of {}; evicted while fetching", name);
                return;
            }
            state.in_flight.remove(&player);
            match fetched {
                Ok(icon) => {
                    state.cache.insert(player, Arc::new(icon));
                    debug!("Fetched skin of {}", name);
                }
                Err(e) => warn!("Skin fetch failed: {}", e),
            }
        }))
    }
}
