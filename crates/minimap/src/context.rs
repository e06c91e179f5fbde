//! The application context: one per process, owning every collaborator.
//!
//! Host events (join, quit, move, death, block change) and commands are
//! routed through [`AppContext`], which keeps one [`Minimap`] per enabled
//! player keyed by stable player id.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use protocol::packets::build_system_chat;
use tracing::{debug, error, info, warn};

use crate::canvas::{Canvas, MAP_SIZE};
use crate::config::Config;
use crate::error::MinimapError;
use crate::fetch::{DirectorySkinSource, SkinIcons, SkinSource};
use crate::fullscreen::{FullscreenMinimap, FullscreenSettings};
use crate::icon::{BuiltinIconProvider, IconProvider, SPECIAL_ICON_KEYS};
use crate::layer::{LayerFactory, SecondaryLayer};
use crate::marker::IconRenderer;
use crate::overlay::{
    is_system_layer, Minimap, MinimapSettings, Outbound, ScreenPosition, Viewer, DEATH_POINT_LAYER, PLAYER_LAYER,
};
use crate::render::{BlockSource, CachedWorldRenderer, RendererRegistry, REGION_SIZE};
use crate::rewriter::{self, MountState, PassengerRewriter, SharedMountState, REWRITER_NAME};
use crate::sender::PacketSender;
use crate::store::{FileStore, MarkerState, MinimapState, PlayerMinimapStore};
use crate::transport::{ConnectionId, DeliveryError, Transport, PACKET_HANDLER};
use crate::{PlayerId, WorldId};

/// Icon used for the viewer blip and for follow markers without a skin.
const PLAYER_ICON: &str = "player";
/// Icon of the death point.
const DEATH_ICON: &str = "death";

/// A connected player as the host sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRef {
    pub id: PlayerId,
    pub name: String,
    pub connection: ConnectionId,
    /// Entity id of the player, the vehicle carriers ride on.
    pub entity_id: i32,
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl PlayerRef {
    pub fn viewer(&self) -> Viewer {
        Viewer::new(self.world, self.x, self.y, self.z)
    }

    fn block_x(&self) -> i32 {
        self.x as i32
    }

    fn block_z(&self) -> i32 {
        self.z as i32
    }
}

/// Name of the marker tracking `target`.
pub fn follow_layer_name(target: &PlayerRef) -> String {
    format!("follow{}", target.entity_id)
}

pub struct AppContext {
    config: Config,
    renderer: CachedWorldRenderer,
    icons: Box<dyn IconProvider>,
    skins: SkinIcons,
    factory: LayerFactory,
    sender: PacketSender,
    transport: Transport,
    store: Arc<dyn PlayerMinimapStore>,
    players: HashMap<PlayerId, PlayerRef>,
    mounts: HashMap<PlayerId, SharedMountState>,
    minimaps: HashMap<PlayerId, Minimap>,
    fullscreens: HashMap<PlayerId, FullscreenMinimap>,
    /// Players whose saved state could not be read on join. Nothing is
    /// written for them until a later read succeeds.
    unrestored: HashSet<PlayerId>,
    /// Viewer -> followed players, in follow order.
    follows: HashMap<PlayerId, Vec<PlayerId>>,
    ticks: u64,
}

impl AppContext {
    /// Build the context. Fails if the configured renderer is unknown.
    pub fn new(
        config: Config,
        icons: Box<dyn IconProvider>,
        skins: Arc<dyn SkinSource>,
        store: Arc<dyn PlayerMinimapStore>,
    ) -> Result<Self, MinimapError> {
        config.validate()?;
        let registry = RendererRegistry::builtin();
        let name = config.minimap.default_renderer.as_str();
        let renderer = registry
            .resolve(name, config.block_colors())
            .ok_or_else(|| MinimapError::UnknownRenderer(name.to_string()))?;
        info!("Using '{}' world renderer", renderer.name());

        Ok(Self {
            renderer: CachedWorldRenderer::new(renderer),
            icons,
            skins: SkinIcons::new(skins),
            factory: LayerFactory::new(),
            sender: PacketSender::new(),
            transport: Transport::new(),
            store,
            players: HashMap::new(),
            mounts: HashMap::new(),
            minimaps: HashMap::new(),
            fullscreens: HashMap::new(),
            unrestored: HashSet::new(),
            follows: HashMap::new(),
            ticks: 0,
            config,
        })
    }

    /// Build the context with file-backed collaborators under the
    /// configured data directory.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let icons = BuiltinIconProvider::load(&config.icons_dir())?;
        let skins = DirectorySkinSource::new(config.skins_dir());
        let store = FileStore::open(&config.server.data_dir)?;
        Ok(Self::new(config, Box::new(icons), Arc::new(skins), Arc::new(store))?)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn renderer(&self) -> &CachedWorldRenderer {
        &self.renderer
    }

    pub fn icons(&self) -> &dyn IconProvider {
        self.icons.as_ref()
    }

    pub fn transport_mut(&mut self) -> &mut Transport {
        &mut self.transport
    }

    pub fn player(&self, id: PlayerId) -> Option<&PlayerRef> {
        self.players.get(&id)
    }

    pub fn find_player(&self, name: &str) -> Option<PlayerId> {
        self.players
            .values()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.id)
    }

    pub fn minimap(&self, id: PlayerId) -> Option<&Minimap> {
        self.minimaps.get(&id)
    }

    pub fn has_minimap(&self, id: PlayerId) -> bool {
        self.minimaps.contains_key(&id)
    }

    pub fn fullscreen(&self, id: PlayerId) -> Option<&FullscreenMinimap> {
        self.fullscreens.get(&id)
    }

    /// Icon names a player may put on a marker.
    pub fn marker_icon_names(&self) -> Vec<String> {
        self.icons
            .keys()
            .into_iter()
            .filter(|k| !SPECIAL_ICON_KEYS.contains(&k.as_str()))
            .collect()
    }

    /// Players `viewer` is following.
    pub fn following(&self, viewer: PlayerId) -> &[PlayerId] {
        self.follows.get(&viewer).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Send a chat line to a connection.
    pub fn send_message(&mut self, connection: ConnectionId, text: &str) -> Result<(), DeliveryError> {
        self.transport
            .send(connection, build_system_chat(text, false).finish())
    }

    fn settings(&self) -> MinimapSettings {
        MinimapSettings {
            mode: self.config.minimap.mode,
            zoom: self.config.minimap.zoom,
            marker_limit: self.config.markers.custom_markers.limit,
        }
    }

    /// A player joined: attach the passenger rewriter and restore their
    /// minimap if it is enabled.
    pub fn on_join(&mut self, player: PlayerRef, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        let id = player.id;
        if let Some(previous) = self.players.get(&id).map(|p| p.connection) {
            warn!("{} joined twice; dropping the session on {}", player.name, previous);
            self.on_quit(id, previous);
        }

        let conn = player.connection;
        let mount = MountState::shared(conn, player.entity_id);
        if !self.transport.install_filter(
            conn,
            PACKET_HANDLER,
            REWRITER_NAME,
            Box::new(PassengerRewriter::new(mount.clone())),
        )? {
            warn!("{} already had a passenger rewriter", conn);
        }
        self.sender.attach(conn, mount.clone());
        self.mounts.insert(id, mount);
        info!("{} joined on {}", player.name, conn);
        self.players.insert(id, player);

        let state = match self.store.restore(id) {
            Ok(state) => state,
            Err(e) => {
                error!("Failed to restore minimap of {}: {}", id, e);
                self.unrestored.insert(id);
                None
            }
        };
        let enabled = state
            .as_ref()
            .map(|s| s.enabled)
            .unwrap_or(self.config.minimap.enabled_by_default);
        if enabled {
            self.create_minimap(id, state.as_ref(), blocks)?;
        }
        Ok(())
    }

    /// The player on `connection` left: tear everything of theirs down.
    ///
    /// Ignored if the player has since joined on another connection.
    pub fn on_quit(&mut self, id: PlayerId, connection: ConnectionId) {
        if let Some(player) = self.players.get(&id)
            && player.connection != connection
        {
            debug!("Stale quit of {} from {}; live on {}", id, connection, player.connection);
            return;
        }
        self.stop_following_target(id);
        self.follows.remove(&id);
        self.close_fullscreen_quietly(id);

        if self.minimaps.get(&id).is_some_and(Minimap::needs_persist) {
            self.persist(id);
        }
        if let Some(minimap) = self.minimaps.remove(&id) {
            let out = Outbound {
                sender: &mut self.sender,
                transport: &mut self.transport,
            };
            if let Err(e) = minimap.teardown(out) {
                debug!("Teardown of {} on quit: {}", id, e);
            }
        }

        if let Some(player) = self.players.remove(&id) {
            self.transport.remove_filter(player.connection, REWRITER_NAME);
            self.sender.forget_connection(player.connection);
            info!("{} left", player.name);
        }
        if let Some(mount) = self.mounts.remove(&id) {
            rewriter::lock(&mount).remove();
        }
        self.unrestored.remove(&id);
        self.skins.evict(id);
    }

    /// A player moved. The minimap is refreshed on the next update tick.
    pub fn on_move(&mut self, id: PlayerId, world: WorldId, x: f64, y: f64, z: f64) {
        let Some(player) = self.players.get_mut(&id) else {
            return;
        };
        player.world = world;
        player.x = x;
        player.y = y;
        player.z = z;
        let viewer = Viewer::new(world, x, y, z);
        if let Some(minimap) = self.minimaps.get_mut(&id) {
            minimap.set_viewer(viewer);
        }
        if let Some(fullscreen) = self.fullscreens.get_mut(&id) {
            fullscreen.set_viewer(viewer);
        }
    }

    /// A player died at their current position: move the death point there.
    pub fn on_death(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        if !self.config.markers.death_marker.enabled || !self.minimaps.contains_key(&id) {
            return Ok(());
        }
        let Some(player) = self.players.get(&id) else {
            return Ok(());
        };
        let (world, x, z) = (player.world, player.block_x(), player.block_z());
        let icon = self
            .icons
            .get_icon(DEATH_ICON)
            .ok_or_else(|| crate::icon::IconError::NotRegistered(DEATH_ICON.to_string()))?;
        let stick = self.config.markers.death_marker.stick_to_border;

        if self.minimap(id).is_some_and(|m| m.has_layer(DEATH_POINT_LAYER)) {
            self.with_minimap(id, |minimap, out| minimap.remove_layer(out, DEATH_POINT_LAYER))?;
        }
        self.add_layer(id, DEATH_POINT_LAYER, world, DEATH_ICON, icon, stick, x, z, true)?;
        debug!("Death point of {} set to ({}, {})", id, x, z);
        self.persist(id);
        self.refresh(id, blocks)
    }

    /// A block changed: drop the affected tiles and mark nearby minimaps.
    pub fn on_block_change(&mut self, world: WorldId, x: i32, _y: i32, z: i32) {
        self.renderer.on_block_change(world, x, z);
        let reach = ((MAP_SIZE as i32 / 2) << self.config.minimap.zoom) + REGION_SIZE;
        for minimap in self.minimaps.values_mut() {
            let viewer = minimap.viewer();
            if viewer.world == world
                && (viewer.block_x() - x).abs() <= reach
                && (viewer.block_z() - z).abs() <= reach
            {
                minimap.mark_dirty();
            }
        }
        for fullscreen in self.fullscreens.values_mut() {
            let (cx, cz) = fullscreen.center();
            let (half_x, half_z) = fullscreen.half_extent();
            if fullscreen.world() == world
                && (cx - x).abs() <= half_x + REGION_SIZE
                && (cz - z).abs() <= half_z + REGION_SIZE
            {
                fullscreen.mark_dirty();
            }
        }
    }

    /// Turn the minimap on, restoring saved markers.
    ///
    /// Fails without enabling anything if the saved state cannot be read.
    pub fn enable_minimap(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        if self.minimaps.contains_key(&id) {
            return Ok(());
        }
        if !self.players.contains_key(&id) {
            return Err(MinimapError::Disabled);
        }
        let state = self.store.restore(id).inspect_err(|e| {
            warn!("Failed to read minimap state of {}: {}", id, e);
        })?;
        self.unrestored.remove(&id);
        let stored = self.store.enable_minimap(id);
        self.create_minimap(id, state.as_ref(), blocks)?;
        if let Err(e) = stored {
            warn!("Failed to persist enable of {}: {}", id, e);
            self.persist(id);
        }
        Ok(())
    }

    /// Turn the minimap off. Saved markers are kept for the next enable.
    pub fn disable_minimap(&mut self, id: PlayerId) -> Result<(), MinimapError> {
        if !self.minimaps.contains_key(&id) {
            return Err(MinimapError::Disabled);
        }
        self.close_fullscreen_quietly(id);
        let minimap = self.minimaps.remove(&id).ok_or(MinimapError::Disabled)?;
        let saved = if minimap.needs_persist() && !self.unrestored.contains(&id) {
            let mut state = minimap.state();
            state.enabled = false;
            self.store.save(&state)
        } else {
            self.store.disable_minimap(id)
        };
        if let Err(e) = saved {
            warn!("Failed to persist disable of {}: {}", id, e);
        }

        for target in self.follows.remove(&id).unwrap_or_default() {
            debug!("{} stopped following {} on disable", id, target);
        }
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        minimap.teardown(out)?;
        Ok(())
    }

    pub fn set_position(
        &mut self,
        id: PlayerId,
        position: ScreenPosition,
        blocks: &dyn BlockSource,
    ) -> Result<(), MinimapError> {
        self.minimaps
            .get_mut(&id)
            .ok_or(MinimapError::Disabled)?
            .set_screen_position(position);
        self.persist(id);
        self.refresh(id, blocks)
    }

    /// Add a user marker in the player's current world.
    #[allow(clippy::too_many_arguments)]
    pub fn add_marker(
        &mut self,
        id: PlayerId,
        name: &str,
        icon_name: &str,
        x: i32,
        z: i32,
        stick_to_border: bool,
        blocks: &dyn BlockSource,
    ) -> Result<(), MinimapError> {
        if !self.minimaps.contains_key(&id) {
            return Err(MinimapError::Disabled);
        }
        if is_system_layer(name) {
            return Err(MinimapError::DuplicateLayerName(name.to_string()));
        }
        let world = self.players.get(&id).map(|p| p.world).ok_or(MinimapError::Disabled)?;
        let icon = self.icons.marker_icon(icon_name)?;
        self.add_layer(id, name, world, icon_name, icon, stick_to_border, x, z, true)?;
        self.persist(id);
        self.refresh(id, blocks)
    }

    pub fn remove_marker(&mut self, id: PlayerId, name: &str, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        if name == PLAYER_LAYER {
            return Err(MinimapError::UnknownLayer(name.to_string()));
        }
        self.with_minimap(id, |minimap, out| minimap.remove_layer(out, name))?;
        if let Some(targets) = self.follows.get_mut(&id) {
            let players = &self.players;
            targets.retain(|t| players.get(t).is_none_or(|p| follow_layer_name(p) != name));
        }
        self.persist(id);
        self.refresh(id, blocks)
    }

    /// Track `target` on the viewer's minimap.
    pub fn follow(&mut self, viewer: PlayerId, target: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        if !self.minimaps.contains_key(&viewer) {
            return Err(MinimapError::Disabled);
        }
        let Some(target_ref) = self.players.get(&target).cloned() else {
            return Err(MinimapError::UnknownLayer(target.to_string()));
        };
        let name = follow_layer_name(&target_ref);

        let (icon_name, icon) = match self.skins.get(target) {
            Some(skin) => (target_ref.name.clone(), skin),
            None => {
                self.skins.request(target, &target_ref.name);
                let icon = self
                    .icons
                    .get_icon(PLAYER_ICON)
                    .ok_or_else(|| crate::icon::IconError::NotRegistered(PLAYER_ICON.to_string()))?;
                (PLAYER_ICON.to_string(), icon)
            }
        };
        let stick = self.config.markers.custom_markers.stick_to_border;
        self.add_layer(
            viewer,
            &name,
            target_ref.world,
            &icon_name,
            icon,
            stick,
            target_ref.block_x(),
            target_ref.block_z(),
            false,
        )?;
        self.follows.entry(viewer).or_default().push(target);
        info!("{} is following {}", viewer, target_ref.name);
        self.refresh(viewer, blocks)
    }

    pub fn unfollow(&mut self, viewer: PlayerId, target: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        let Some(target_ref) = self.players.get(&target) else {
            return Err(MinimapError::UnknownLayer(target.to_string()));
        };
        let name = follow_layer_name(target_ref);
        let targets = self.follows.entry(viewer).or_default();
        let before = targets.len();
        targets.retain(|t| *t != target);
        if targets.len() == before {
            return Err(MinimapError::UnknownLayer(name));
        }
        self.with_minimap(viewer, |minimap, out| minimap.remove_layer(out, &name))?;
        self.refresh(viewer, blocks)
    }

    /// Periodic work: move follow markers, then refresh dirty minimaps
    /// every `update_interval_ticks`.
    pub fn tick(&mut self, blocks: &dyn BlockSource) {
        self.ticks += 1;
        self.update_follows();

        let interval = u64::from(self.config.minimap.update_interval_ticks.max(1));
        if self.ticks % interval != 0 {
            return;
        }
        let due: Vec<PlayerId> = self
            .minimaps
            .iter()
            .filter(|(_, m)| m.is_dirty() || m.needs_persist())
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Err(e) = self.refresh(id, blocks) {
                warn!("Minimap update of {} failed: {}", id, e);
            }
        }
        let due: Vec<PlayerId> = self
            .fullscreens
            .iter()
            .filter(|(_, f)| f.is_dirty())
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Err(e) = self.refresh_fullscreen(id, blocks) {
                warn!("Fullscreen map update of {} failed: {}", id, e);
            }
        }
    }

    /// Open the fullscreen map, hiding the corner overlay while it is up.
    pub fn open_fullscreen(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        if self.fullscreens.contains_key(&id) {
            return Ok(());
        }
        let minimap = self.minimaps.get(&id).ok_or(MinimapError::Disabled)?;
        let (connection, viewer) = (minimap.connection(), minimap.viewer());
        let settings = FullscreenSettings {
            columns: self.config.fullscreen.segments_x,
            rows: self.config.fullscreen.segments_z,
            steer_speed: self.config.fullscreen.steer_speed,
        };
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        let fullscreen = match FullscreenMinimap::open(out, &mut self.factory, id, connection, settings, viewer) {
            Ok(fullscreen) => fullscreen,
            Err(MinimapError::DeliveryFailure(e)) => {
                self.drop_minimap(id, &e);
                return Err(MinimapError::DeliveryFailure(e));
            }
            Err(e) => return Err(e),
        };
        self.fullscreens.insert(id, fullscreen);
        if let Some(minimap) = self.minimaps.get_mut(&id) {
            minimap.set_hidden(true);
        }
        self.refresh(id, blocks)?;
        self.refresh_fullscreen(id, blocks)
    }

    /// Close the fullscreen map and bring the corner overlay back.
    /// Returns false if no map was open.
    pub fn close_fullscreen(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<bool, MinimapError> {
        let Some(fullscreen) = self.fullscreens.remove(&id) else {
            return Ok(false);
        };
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        if let Err(e) = fullscreen.close(out) {
            self.drop_minimap(id, &e);
            return Err(e.into());
        }
        if let Some(minimap) = self.minimaps.get_mut(&id) {
            minimap.set_hidden(false);
        }
        self.refresh(id, blocks)?;
        Ok(true)
    }

    /// Open the fullscreen map if it is closed, close it otherwise.
    /// Returns whether it is open afterwards.
    pub fn toggle_fullscreen(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<bool, MinimapError> {
        if self.close_fullscreen(id, blocks)? {
            return Ok(false);
        }
        self.open_fullscreen(id, blocks)?;
        Ok(true)
    }

    /// Everything the player currently sees, flattened.
    pub fn compose_view(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Option<Canvas> {
        let minimap = self.minimaps.get_mut(&id)?;
        Some(minimap.snapshot(&mut self.renderer, blocks).compose())
    }

    /// Save the player's minimap now.
    ///
    /// If the saved state could not be read on join, it is read and merged
    /// first; nothing is written while it stays unreadable.
    pub fn save_minimap(&mut self, id: PlayerId) -> Result<(), MinimapError> {
        if self.unrestored.contains(&id) {
            self.reconcile(id)?;
        }
        let Some(minimap) = self.minimaps.get_mut(&id) else {
            return if self.players.contains_key(&id) {
                Ok(())
            } else {
                Err(MinimapError::Disabled)
            };
        };
        match self.store.save(&minimap.state()) {
            Ok(()) => {
                minimap.set_needs_persist(false);
                Ok(())
            }
            Err(e) => {
                minimap.set_needs_persist(true);
                Err(e.into())
            }
        }
    }

    /// Merge the saved state of a player whose join-time read failed into
    /// their live minimap. A saved `enabled = false` wins over the default.
    fn reconcile(&mut self, id: PlayerId) -> Result<(), MinimapError> {
        let state = match self.store.restore(id) {
            Ok(state) => state,
            Err(e) => {
                if let Some(minimap) = self.minimaps.get_mut(&id) {
                    minimap.set_needs_persist(true);
                }
                return Err(e.into());
            }
        };
        self.unrestored.remove(&id);
        let Some(state) = state else {
            return Ok(());
        };
        info!("Recovered saved minimap of {}", id);

        if !state.enabled {
            self.close_fullscreen_quietly(id);
            self.follows.remove(&id);
            if let Some(minimap) = self.minimaps.remove(&id) {
                let out = Outbound {
                    sender: &mut self.sender,
                    transport: &mut self.transport,
                };
                minimap.teardown(out)?;
            }
            return Ok(());
        }

        if let Some(minimap) = self.minimaps.get_mut(&id) {
            minimap.set_screen_position(state.position);
        }
        for marker in &state.markers {
            if self.minimaps.get(&id).is_none_or(|m| m.has_layer(&marker.name)) {
                continue;
            }
            if let Err(e) = self.restore_marker(id, marker) {
                if matches!(e, MinimapError::DeliveryFailure(_)) {
                    return Err(e);
                }
                warn!("Skipped saved marker '{}' of {}: {}", marker.name, id, e);
            }
        }
        Ok(())
    }

    /// Best-effort save; a failure is logged and retried after the next
    /// successful update.
    fn persist(&mut self, id: PlayerId) {
        if let Err(e) = self.save_minimap(id) {
            warn!("Minimap state of {} not saved: {}", id, e);
        }
    }

    /// Push the current state of a minimap to its owner.
    ///
    /// A delivery failure tears the minimap down.
    fn refresh(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        let minimap = self.minimaps.get_mut(&id).ok_or(MinimapError::Disabled)?;
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        let result = minimap.update(out, &mut self.renderer, blocks);
        let retry_persist = minimap.needs_persist();

        match result {
            Ok(()) => {
                if retry_persist {
                    self.persist(id);
                }
                Ok(())
            }
            Err(MinimapError::DeliveryFailure(e)) => {
                self.drop_minimap(id, &e);
                Err(MinimapError::DeliveryFailure(e))
            }
            Err(e) => Err(e),
        }
    }

    fn drop_minimap(&mut self, id: PlayerId, cause: &DeliveryError) {
        error!("Dropping minimap of {}: {}", id, cause);
        self.follows.remove(&id);
        self.close_fullscreen_quietly(id);
        if let Some(minimap) = self.minimaps.remove(&id) {
            let out = Outbound {
                sender: &mut self.sender,
                transport: &mut self.transport,
            };
            let _ = minimap.teardown(out);
        }
    }

    /// Push every segment of an open fullscreen map, with the owner's
    /// markers drawn on top.
    fn refresh_fullscreen(&mut self, id: PlayerId, blocks: &dyn BlockSource) -> Result<(), MinimapError> {
        let result = {
            let Self {
                fullscreens,
                minimaps,
                sender,
                transport,
                renderer,
                ..
            } = self;
            let fullscreen = fullscreens.get_mut(&id).ok_or(MinimapError::Disabled)?;
            let minimap = minimaps.get(&id).ok_or(MinimapError::Disabled)?;
            let markers: Vec<&SecondaryLayer> = minimap.layers().map(|(_, layer)| layer).collect();
            fullscreen.update(Outbound { sender, transport }, renderer, blocks, markers.iter().copied())
        };
        match result {
            Err(MinimapError::DeliveryFailure(e)) => {
                self.drop_minimap(id, &e);
                Err(MinimapError::DeliveryFailure(e))
            }
            other => other,
        }
    }

    /// Close the fullscreen map on the way out; errors only get logged.
    fn close_fullscreen_quietly(&mut self, id: PlayerId) {
        if let Some(fullscreen) = self.fullscreens.remove(&id) {
            let out = Outbound {
                sender: &mut self.sender,
                transport: &mut self.transport,
            };
            if let Err(e) = fullscreen.close(out) {
                debug!("Closing fullscreen map of {}: {}", id, e);
            }
        }
    }

    /// Run a mutation against a player's minimap; delivery failures tear
    /// it down.
    fn with_minimap<T>(
        &mut self,
        id: PlayerId,
        f: impl FnOnce(&mut Minimap, Outbound<'_>) -> Result<T, MinimapError>,
    ) -> Result<T, MinimapError> {
        let minimap = self.minimaps.get_mut(&id).ok_or(MinimapError::Disabled)?;
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        match f(minimap, out) {
            Err(MinimapError::DeliveryFailure(e)) => {
                self.drop_minimap(id, &e);
                Err(MinimapError::DeliveryFailure(e))
            }
            other => other,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn add_layer(
        &mut self,
        id: PlayerId,
        name: &str,
        world: WorldId,
        icon_name: &str,
        icon: Arc<crate::icon::Icon>,
        stick_to_border: bool,
        x: i32,
        z: i32,
        persistent: bool,
    ) -> Result<(), MinimapError> {
        let minimap = self.minimaps.get(&id).ok_or(MinimapError::Disabled)?;
        let layer = self
            .factory
            .create_layer(world, Some(minimap.base()), minimap.next_depth());
        let mut marker = SecondaryLayer::new(layer, IconRenderer::new(icon_name, icon), stick_to_border, x, z);
        if !persistent {
            marker = marker.transient();
        }
        self.with_minimap(id, move |minimap, out| minimap.add_layer(out, name, marker))
    }

    fn create_minimap(
        &mut self,
        id: PlayerId,
        state: Option<&MinimapState>,
        blocks: &dyn BlockSource,
    ) -> Result<(), MinimapError> {
        let player = self.players.get(&id).cloned().ok_or(MinimapError::Disabled)?;
        let position = state
            .map(|s| s.position)
            .unwrap_or(self.config.minimap.default_position);
        let settings = self.settings();
        let base = self.factory.create_layer(player.world, None, 0.0);
        let out = Outbound {
            sender: &mut self.sender,
            transport: &mut self.transport,
        };
        let minimap = Minimap::create(
            out,
            id,
            player.connection,
            base,
            settings,
            position,
            player.viewer(),
        )?;
        self.minimaps.insert(id, minimap);

        match self.icons.get_icon(PLAYER_ICON) {
            Some(icon) => self.add_layer(
                id,
                PLAYER_LAYER,
                player.world,
                PLAYER_ICON,
                icon,
                true,
                player.block_x(),
                player.block_z(),
                false,
            )?,
            None => warn!("No '{}' icon; viewer blip disabled", PLAYER_ICON),
        }

        for marker in state.map(|s| s.markers.as_slice()).unwrap_or(&[]) {
            if let Err(e) = self.restore_marker(id, marker) {
                if matches!(e, MinimapError::DeliveryFailure(_)) {
                    return Err(e);
                }
                warn!("Skipped saved marker '{}' of {}: {}", marker.name, id, e);
            }
        }
        debug!("Created minimap for {}", player.name);
        self.persist(id);
        if !self.minimaps.contains_key(&id) {
            return Ok(());
        }
        self.refresh(id, blocks)
    }

    fn restore_marker(&mut self, id: PlayerId, marker: &MarkerState) -> Result<(), MinimapError> {
        let icon = if marker.name == DEATH_POINT_LAYER {
            self.icons
                .get_icon(&marker.icon)
                .ok_or_else(|| crate::icon::IconError::NotRegistered(marker.icon.clone()))?
        } else {
            self.icons.marker_icon(&marker.icon)?
        };
        self.add_layer(
            id,
            &marker.name,
            marker.world,
            &marker.icon,
            icon,
            marker.stick_to_border,
            marker.x,
            marker.z,
            true,
        )
    }

    /// Move follow markers to their targets and swap in fetched skins.
    fn update_follows(&mut self) {
        let Self {
            follows,
            players,
            minimaps,
            skins,
            ..
        } = self;
        for (viewer, targets) in follows.iter() {
            let Some(minimap) = minimaps.get_mut(viewer) else {
                continue;
            };
            for target in targets {
                let Some(target_ref) = players.get(target) else {
                    continue;
                };
                let Some(layer) = minimap.layer_mut(&follow_layer_name(target_ref)) else {
                    continue;
                };
                let mut changed = false;
                let (x, z) = (target_ref.block_x(), target_ref.block_z());
                if (layer.world_x, layer.world_z) != (x, z) || layer.layer.world() != target_ref.world {
                    layer.move_to(x, z);
                    layer.layer.set_world(target_ref.world);
                    changed = true;
                }
                if layer.renderer.icon_name() == PLAYER_ICON
                    && let Some(skin) = skins.get(*target)
                {
                    layer.renderer.set_icon(target_ref.name.clone(), skin);
                    changed = true;
                }
                if changed {
                    minimap.mark_dirty();
                }
            }
        }
    }

    /// Remove `target` from everyone's follow list, with its markers.
    fn stop_following_target(&mut self, target: PlayerId) {
        let Some(target_ref) = self.players.get(&target) else {
            return;
        };
        let name = follow_layer_name(target_ref);
        let viewers: Vec<PlayerId> = self
            .follows
            .iter_mut()
            .filter_map(|(viewer, targets)| {
                let before = targets.len();
                targets.retain(|t| *t != target);
                (targets.len() != before).then_some(*viewer)
            })
            .collect();
        for viewer in viewers {
            if let Err(e) = self.with_minimap(viewer, |minimap, out| minimap.remove_layer(out, &name)) {
                debug!("Follow marker of {} on {}: {}", target, viewer, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::icon::{Icon, IconError, ICON_SIZE};
    use crate::render::tests::TestBlocks;
    use crate::store::StoreError;
    use image::{Rgba, RgbaImage};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use bytes::Bytes;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct MemoryStore {
        records: Mutex<HashMap<PlayerId, MinimapState>>,
        failing: AtomicBool,
        /// Number of upcoming reads that fail.
        restore_failures: AtomicUsize,
        save_attempts: AtomicUsize,
    }

    impl MemoryStore {
        fn check(&self) -> Result<(), StoreError> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StoreError::Io(std::io::Error::other("disk full")))
            } else {
                Ok(())
            }
        }

        fn get(&self, id: PlayerId) -> Option<MinimapState> {
            self.records.lock().unwrap().get(&id).cloned()
        }

        fn put(&self, state: MinimapState) {
            self.records.lock().unwrap().insert(state.player, state);
        }
    }

    impl PlayerMinimapStore for MemoryStore {
        fn save(&self, state: &MinimapState) -> Result<(), StoreError> {
            self.save_attempts.fetch_add(1, Ordering::SeqCst);
            self.check()?;
            self.records.lock().unwrap().insert(state.player, state.clone());
            Ok(())
        }

        fn restore(&self, player: PlayerId) -> Result<Option<MinimapState>, StoreError> {
            self.check()?;
            let remaining = self.restore_failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.restore_failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Io(std::io::Error::other("read timed out")));
            }
            Ok(self.get(player))
        }
    }

    struct RedSkins;

    impl SkinSource for RedSkins {
        fn fetch(&self, _name: &str) -> Result<Icon, IconError> {
            Ok(Icon::from_rgba(&RgbaImage::from_pixel(8, 8, Rgba([220, 20, 20, 255]))))
        }
    }

    struct Setup {
        ctx: AppContext,
        store: Arc<MemoryStore>,
        blocks: TestBlocks,
        receivers: Vec<mpsc::UnboundedReceiver<Bytes>>,
    }

    fn setup(enabled_by_default: bool) -> Setup {
        let mut config = Config::default();
        config.minimap.enabled_by_default = enabled_by_default;
        config.minimap.default_renderer = "flat".to_string();
        config.markers.custom_markers.limit = 2;
        config.minimap.update_interval_ticks = 2;
        let store = Arc::new(MemoryStore::default());
        let ctx = AppContext::new(config, Box::new(BuiltinIconProvider::new()), Arc::new(RedSkins), store.clone()).unwrap();
        Setup {
            ctx,
            store,
            blocks: TestBlocks::new(),
            receivers: Vec::new(),
        }
    }

    impl Setup {
        fn join(&mut self, n: u32, name: &str, x: f64, z: f64) -> PlayerId {
            self.join_on(ConnectionId(n), n, name, x, z)
        }

        fn join_on(&mut self, conn: ConnectionId, n: u32, name: &str, x: f64, z: f64) -> PlayerId {
            let (tx, rx) = mpsc::unbounded_channel();
            self.ctx.transport_mut().open(conn, tx);
            self.receivers.push(rx);
            let id = PlayerId(n as u128);
            let player = PlayerRef {
                id,
                name: name.to_string(),
                connection: conn,
                entity_id: n as i32,
                world: WorldId(0),
                x,
                y: 65.0,
                z,
            };
            self.ctx.on_join(player, &self.blocks).unwrap();
            id
        }
    }

    #[test]
    fn test_unknown_renderer_is_fatal() {
        let mut config = Config::default();
        config.minimap.default_renderer = "isometric".into();
        let result = AppContext::new(
            config,
            Box::new(BuiltinIconProvider::new()),
            Arc::new(RedSkins),
            Arc::new(MemoryStore::default()),
        );
        assert!(matches!(result, Err(MinimapError::UnknownRenderer(n)) if n == "isometric"));
    }

    #[test]
    fn test_marker_survives_reconnect() {
        let mut s = setup(false);
        let id = s.join(1, "alex", 100.5, 200.5);
        assert!(!s.ctx.has_minimap(id));

        s.ctx.enable_minimap(id, &s.blocks).unwrap();
        s.ctx.add_marker(id, "flag", "flag", 100, 200, false, &s.blocks).unwrap();

        let view = s.ctx.compose_view(id, &s.blocks).unwrap();
        let icon = s.ctx.icons().get_icon("flag").unwrap();
        let half = ICON_SIZE / 2;
        for y in 0..ICON_SIZE {
            for x in 0..ICON_SIZE {
                let expected = icon.canvas().get(x, y);
                if expected != crate::palette::TRANSPARENT {
                    assert_eq!(view.get(64 - half + x, 64 - half + y), expected);
                }
            }
        }

        s.ctx.on_quit(id, ConnectionId(1));
        assert!(!s.ctx.has_minimap(id));
        s.ctx.transport_mut().close(ConnectionId(1));

        let id = s.join(1, "alex", 0.5, 0.5);
        let minimap = s.ctx.minimap(id).unwrap();
        let flag = minimap.layer("flag").unwrap();
        assert_eq!((flag.world_x, flag.world_z), (100, 200));
        assert!(!flag.stick_to_border);
        assert_eq!(flag.renderer.icon_name(), "flag");
        assert!(minimap.has_layer(PLAYER_LAYER));
    }

    #[test]
    fn test_marker_rules() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        s.ctx.add_marker(id, "a", "flag", 1, 1, true, &s.blocks).unwrap();
        assert!(matches!(
            s.ctx.add_marker(id, "a", "star", 1, 1, true, &s.blocks),
            Err(MinimapError::DuplicateLayerName(_))
        ));
        s.ctx.add_marker(id, "b", "house", 1, 1, true, &s.blocks).unwrap();
        assert!(matches!(
            s.ctx.add_marker(id, "c", "flag", 1, 1, true, &s.blocks),
            Err(MinimapError::MarkerLimitExceeded { limit: 2 })
        ));
        assert!(matches!(
            s.ctx.add_marker(id, "d", "nope", 1, 1, true, &s.blocks),
            Err(MinimapError::InvalidIcon(IconError::NotRegistered(_)))
        ));
        assert!(matches!(
            s.ctx.add_marker(id, "player", "flag", 1, 1, true, &s.blocks),
            Err(MinimapError::DuplicateLayerName(_))
        ));

        // The death point is a system layer and never hits the limit.
        s.ctx.on_death(id, &s.blocks).unwrap();
        assert!(s.ctx.minimap(id).unwrap().has_layer(DEATH_POINT_LAYER));
        s.ctx.on_move(id, WorldId(0), 40.0, 65.0, -3.0);
        s.ctx.on_death(id, &s.blocks).unwrap();
        let death = s.ctx.minimap(id).unwrap().layer(DEATH_POINT_LAYER).unwrap();
        assert_eq!((death.world_x, death.world_z), (40, -3));

        s.ctx.remove_marker(id, "a", &s.blocks).unwrap();
        assert!(matches!(s.ctx.remove_marker(id, "a", &s.blocks), Err(MinimapError::UnknownLayer(_))));
        let saved = s.store.get(id).unwrap();
        let names: Vec<&str> = saved.markers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["b", DEATH_POINT_LAYER]);
    }

    #[test]
    fn test_failed_persist_keeps_memory_and_retries() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);

        s.store.failing.store(true, Ordering::SeqCst);
        s.ctx.add_marker(id, "home", "house", 5, 5, true, &s.blocks).unwrap();
        assert!(s.ctx.minimap(id).unwrap().has_layer("home"));
        assert!(s.ctx.minimap(id).unwrap().needs_persist());
        assert!(s.store.get(id).is_none_or(|st| st.markers.is_empty()));

        s.store.failing.store(false, Ordering::SeqCst);
        s.ctx.tick(&s.blocks);
        s.ctx.tick(&s.blocks);
        assert!(!s.ctx.minimap(id).unwrap().needs_persist());
        assert_eq!(s.store.get(id).unwrap().markers[0].name, "home");
    }

    #[test]
    fn test_disable_and_enable() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        s.ctx.add_marker(id, "home", "house", 5, 5, true, &s.blocks).unwrap();
        s.ctx.disable_minimap(id).unwrap();
        assert!(!s.ctx.has_minimap(id));
        assert!(matches!(s.ctx.disable_minimap(id), Err(MinimapError::Disabled)));
        assert!(!s.store.get(id).unwrap().enabled);
        assert!(matches!(
            s.ctx.add_marker(id, "x", "flag", 0, 0, true, &s.blocks),
            Err(MinimapError::Disabled)
        ));

        s.ctx.enable_minimap(id, &s.blocks).unwrap();
        assert!(s.ctx.minimap(id).unwrap().has_layer("home"));
        assert!(s.store.get(id).unwrap().enabled);
    }

    #[test]
    fn test_delivery_failure_drops_minimap() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        s.receivers.clear();
        let err = s.ctx.set_position(id, ScreenPosition::Right, &s.blocks).unwrap_err();
        assert!(matches!(err, MinimapError::DeliveryFailure(_)));
        assert!(!s.ctx.has_minimap(id));
        // Still enabled for the next session.
        assert!(s.store.get(id).unwrap().enabled);
    }

    #[test]
    fn test_block_change_marks_nearby_minimaps() {
        let mut s = setup(true);
        let near = s.join(1, "alex", 0.5, 0.5);
        let far = s.join(2, "sam", 5000.5, 0.5);
        s.ctx.on_block_change(WorldId(0), 10, 64, 10);
        assert!(s.ctx.minimap(near).unwrap().is_dirty());
        assert!(!s.ctx.minimap(far).unwrap().is_dirty());
    }

    #[tokio::test]
    async fn test_follow_tracks_target_and_swaps_skin() {
        let mut s = setup(true);
        let viewer = s.join(1, "alex", 0.5, 0.5);
        let target = s.join(2, "sam", 10.5, 10.5);
        s.ctx.follow(viewer, target, &s.blocks).unwrap();

        let name = follow_layer_name(s.ctx.player(target).unwrap());
        assert_eq!(name, "follow2");
        assert_eq!(s.ctx.minimap(viewer).unwrap().layer(&name).unwrap().renderer.icon_name(), "player");

        for _ in 0..200 {
            if !s.ctx.skins.is_in_flight(target) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        s.ctx.on_move(target, WorldId(0), -20.0, 65.0, 30.0);
        s.ctx.tick(&s.blocks);

        let layer = s.ctx.minimap(viewer).unwrap().layer(&name).unwrap();
        assert_eq!((layer.world_x, layer.world_z), (-20, 30));
        assert_eq!(layer.renderer.icon_name(), "sam");
        // Follow markers are not saved.
        assert!(s.store.get(viewer).unwrap().markers.is_empty());

        s.ctx.on_quit(target, ConnectionId(2));
        assert!(!s.ctx.minimap(viewer).unwrap().has_layer(&name));
        assert!(s.ctx.following(viewer).is_empty());
    }

    #[test]
    fn test_quit_detaches_rewriter() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        let conn = ConnectionId(1);
        assert!(s.ctx.transport_mut().pipeline(conn).unwrap().contains(REWRITER_NAME));
        s.ctx.on_quit(id, conn);
        assert!(!s.ctx.transport_mut().pipeline(conn).unwrap().contains(REWRITER_NAME));
        assert!(s.ctx.player(id).is_none());
    }

    #[test]
    fn test_out_of_range_zoom_is_fatal() {
        let mut config = Config::default();
        config.minimap.zoom = 32;
        let result = AppContext::new(
            config,
            Box::new(BuiltinIconProvider::new()),
            Arc::new(RedSkins),
            Arc::new(MemoryStore::default()),
        );
        assert!(matches!(result, Err(MinimapError::InvalidConfig(_))));
    }

    #[test]
    fn test_quit_from_replaced_connection_is_ignored() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        let (old, new) = (ConnectionId(1), ConnectionId(7));
        s.join_on(new, 1, "alex", 0.5, 0.5);
        assert_eq!(s.ctx.player(id).unwrap().connection, new);
        assert!(!s.ctx.transport_mut().pipeline(old).unwrap().contains(REWRITER_NAME));

        // The old socket closing late must not touch the live session.
        s.ctx.on_quit(id, old);
        assert!(s.ctx.has_minimap(id));
        assert_eq!(s.ctx.minimap(id).unwrap().connection(), new);
        assert!(s.ctx.transport_mut().pipeline(new).unwrap().contains(REWRITER_NAME));

        s.ctx.on_quit(id, new);
        assert!(!s.ctx.has_minimap(id));
        assert!(s.ctx.player(id).is_none());
    }

    fn saved_flag(id: PlayerId, enabled: bool) -> MinimapState {
        let mut state = MinimapState::new(id);
        state.enabled = enabled;
        state.markers.push(MarkerState {
            name: "flag".into(),
            icon: "flag".into(),
            world: WorldId(0),
            x: 30,
            z: -30,
            stick_to_border: true,
        });
        state
    }

    #[test]
    fn test_unreadable_state_is_never_overwritten() {
        let mut s = setup(true);
        let id = PlayerId(1);
        s.store.put(saved_flag(id, true));
        s.store.restore_failures.store(3, Ordering::SeqCst);

        s.join(1, "alex", 0.5, 0.5);
        assert!(!s.ctx.minimap(id).unwrap().has_layer("flag"));
        assert!(s.ctx.minimap(id).unwrap().needs_persist());
        assert_eq!(s.store.get(id).unwrap().markers.len(), 1);

        s.ctx.tick(&s.blocks);
        s.ctx.tick(&s.blocks);
        let flag = s.ctx.minimap(id).unwrap().layer("flag").unwrap();
        assert_eq!((flag.world_x, flag.world_z), (30, -30));
        assert!(!s.ctx.minimap(id).unwrap().needs_persist());
        assert_eq!(s.store.get(id).unwrap().markers[0].name, "flag");
    }

    #[test]
    fn test_late_read_of_disabled_state_drops_minimap() {
        let mut s = setup(true);
        let id = PlayerId(1);
        s.store.put(saved_flag(id, false));
        s.store.restore_failures.store(1, Ordering::SeqCst);

        s.join(1, "alex", 0.5, 0.5);
        assert!(!s.ctx.has_minimap(id));
        assert!(s.ctx.player(id).is_some());
        let saved = s.store.get(id).unwrap();
        assert!(!saved.enabled);
        assert_eq!(saved.markers.len(), 1);
    }

    #[test]
    fn test_enable_fails_when_state_is_unreadable() {
        let mut s = setup(false);
        let id = s.join(1, "alex", 0.5, 0.5);
        s.store.put(saved_flag(id, false));
        s.store.restore_failures.store(1, Ordering::SeqCst);
        assert!(matches!(
            s.ctx.enable_minimap(id, &s.blocks),
            Err(MinimapError::PersistenceFailure(_))
        ));
        assert!(!s.ctx.has_minimap(id));
        assert!(!s.store.get(id).unwrap().enabled);
    }

    #[test]
    fn test_quit_attempts_final_save() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        s.ctx.add_marker(id, "home", "house", 5, 5, true, &s.blocks).unwrap();

        s.store.failing.store(true, Ordering::SeqCst);
        s.ctx.add_marker(id, "flag", "flag", 9, 9, true, &s.blocks).unwrap();
        let attempts = s.store.save_attempts.load(Ordering::SeqCst);
        s.ctx.on_quit(id, ConnectionId(1));

        assert_eq!(s.store.save_attempts.load(Ordering::SeqCst), attempts + 1);
        assert!(!s.ctx.has_minimap(id));
        let saved = s.store.get(id).unwrap();
        let names: Vec<&str> = saved.markers.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["home"]);
    }

    #[test]
    fn test_fullscreen_replaces_overlay_and_steers() {
        let mut s = setup(true);
        let id = s.join(1, "alex", 0.5, 0.5);
        assert!(matches!(
            s.ctx.open_fullscreen(PlayerId(9), &s.blocks),
            Err(MinimapError::Disabled)
        ));

        assert!(s.ctx.toggle_fullscreen(id, &s.blocks).unwrap());
        let fullscreen = s.ctx.fullscreen(id).unwrap();
        assert_eq!(fullscreen.segments().len(), 15);
        assert_eq!(fullscreen.center(), (0, 0));
        assert!(!fullscreen.is_dirty());
        assert!(s.ctx.minimap(id).unwrap().is_hidden());

        s.ctx.on_move(id, WorldId(0), 10.5, 65.0, 0.5);
        assert_eq!(s.ctx.fullscreen(id).unwrap().center(), (40, 0));
        assert!(s.ctx.fullscreen(id).unwrap().is_dirty());
        s.ctx.tick(&s.blocks);
        s.ctx.tick(&s.blocks);
        assert!(!s.ctx.fullscreen(id).unwrap().is_dirty());

        // Inside the 5x3 grid but far outside the corner overlay.
        s.ctx.on_block_change(WorldId(0), 300, 64, 150);
        assert!(s.ctx.fullscreen(id).unwrap().is_dirty());

        assert!(!s.ctx.toggle_fullscreen(id, &s.blocks).unwrap());
        assert!(s.ctx.fullscreen(id).is_none());
        assert!(!s.ctx.minimap(id).unwrap().is_hidden());

        s.ctx.open_fullscreen(id, &s.blocks).unwrap();
        s.ctx.on_quit(id, ConnectionId(1));
        assert!(s.ctx.fullscreen(id).is_none());
    }

    #[test]
    fn test_marker_icon_names_hide_system_icons() {
        let s = setup(true);
        let names = s.ctx.marker_icon_names();
        assert!(names.iter().any(|n| n == "flag"));
        assert!(!names.iter().any(|n| n == "player" || n == "death"));
    }
}
