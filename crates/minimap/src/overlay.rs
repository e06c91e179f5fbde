//! The per-player minimap aggregate.
//!
//! A [`Minimap`] owns one world-rendered base layer and an ordered list of
//! named secondary layers. Mutations only touch local state (plus spawning
//! or destroying carriers); [`Minimap::update`] is the one point where the
//! current picture is rendered and pushed to the client.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::canvas::{Canvas, MAP_SIZE};
use crate::compose::compose;
use crate::error::MinimapError;
use crate::layer::{MinimapLayer, SecondaryLayer};
use crate::render::{BlockSource, CachedWorldRenderer};
use crate::sender::{PacketSender, Placement};
use crate::store::{MarkerState, MinimapState};
use crate::transport::{ConnectionId, DeliveryError, Transport};
use crate::{PlayerId, WorldId};

/// Layer name of the viewer blip.
pub const PLAYER_LAYER: &str = "player";
/// Layer name of the last death position.
pub const DEATH_POINT_LAYER: &str = "death_point";
/// Names reserved for system-managed layers.
pub const SYSTEM_LAYERS: [&str; 2] = [PLAYER_LAYER, DEATH_POINT_LAYER];

/// Depth of the first secondary layer.
pub const BASE_DEPTH: f32 = 0.05;
/// Depth added per existing secondary layer.
pub const DEPTH_INCREMENT: f32 = 0.01;

pub fn is_system_layer(name: &str) -> bool {
    SYSTEM_LAYERS.contains(&name)
}

/// Screen corner the overlay is shown in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenPosition {
    #[default]
    Left,
    Right,
}

impl fmt::Display for ScreenPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScreenPosition::Left => f.write_str("left"),
            ScreenPosition::Right => f.write_str("right"),
        }
    }
}

impl FromStr for ScreenPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "left" => Ok(ScreenPosition::Left),
            "right" => Ok(ScreenPosition::Right),
            other => Err(format!("Unknown screen position: {}", other)),
        }
    }
}

/// How layers reach the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayMode {
    /// One carrier per layer; the client stacks them by depth.
    #[default]
    Layered,
    /// Layers are composed server-side and sent on the base carrier only.
    Composited,
}

/// Borrowed wire collaborators for one operation.
pub struct Outbound<'a> {
    pub sender: &'a mut PacketSender,
    pub transport: &'a mut Transport,
}

/// Per-minimap settings fixed at creation.
#[derive(Debug, Clone, Copy)]
pub struct MinimapSettings {
    pub mode: OverlayMode,
    pub zoom: u8,
    pub marker_limit: usize,
}

/// Where the owner currently is.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewer {
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Viewer {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self { world, x, y, z }
    }

    /// Block column of the viewer; coordinates truncate toward zero.
    #[inline]
    pub fn block_x(&self) -> i32 {
        self.x as i32
    }

    #[inline]
    pub fn block_z(&self) -> i32 {
        self.z as i32
    }

    fn block_pos(&self) -> (WorldId, i32, i32, i32) {
        (self.world, self.block_x(), self.y as i32, self.block_z())
    }
}

/// Every canvas of one update, computed before anything is sent.
#[derive(Debug)]
pub struct Frame {
    pub base: Canvas,
    /// `(depth, canvas)` per secondary layer, in insertion order.
    pub layers: Vec<(f32, Canvas)>,
}

impl Frame {
    /// Everything flattened as the player would see it.
    pub fn compose(&self) -> Canvas {
        compose(std::iter::once((0.0, &self.base)).chain(self.layers.iter().map(|(d, c)| (*d, c))))
    }
}

/// A player's overlay.
#[derive(Debug)]
pub struct Minimap {
    owner: PlayerId,
    connection: ConnectionId,
    settings: MinimapSettings,
    position: ScreenPosition,
    viewer: Viewer,
    base: MinimapLayer,
    secondary: Vec<(String, SecondaryLayer)>,
    dirty: bool,
    moved: bool,
    needs_persist: bool,
    hidden: bool,
}

impl Minimap {
    /// Build the minimap and spawn its base carrier.
    pub fn create(
        out: Outbound<'_>,
        owner: PlayerId,
        connection: ConnectionId,
        base: MinimapLayer,
        settings: MinimapSettings,
        position: ScreenPosition,
        viewer: Viewer,
    ) -> Result<Self, MinimapError> {
        out.sender.spawn_layer(
            out.transport,
            connection,
            &base,
            Placement::new(position, base.depth()),
            [viewer.x, viewer.y, viewer.z],
        )?;
        Ok(Self {
            owner,
            connection,
            settings,
            position,
            viewer,
            base,
            secondary: Vec::new(),
            dirty: true,
            moved: false,
            needs_persist: false,
            hidden: false,
        })
    }

    #[inline]
    pub fn owner(&self) -> PlayerId {
        self.owner
    }

    #[inline]
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    #[inline]
    pub fn base(&self) -> &MinimapLayer {
        &self.base
    }

    #[inline]
    pub fn viewer(&self) -> Viewer {
        self.viewer
    }

    #[inline]
    pub fn settings(&self) -> MinimapSettings {
        self.settings
    }

    #[inline]
    pub fn screen_position(&self) -> ScreenPosition {
        self.position
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn needs_persist(&self) -> bool {
        self.needs_persist
    }

    pub fn set_needs_persist(&mut self, value: bool) {
        self.needs_persist = value;
    }

    /// Depth a layer added now would get.
    pub fn next_depth(&self) -> f32 {
        BASE_DEPTH + self.secondary.len() as f32 * DEPTH_INCREMENT
    }

    pub fn has_layer(&self, name: &str) -> bool {
        self.secondary.iter().any(|(n, _)| n == name)
    }

    pub fn layer(&self, name: &str) -> Option<&SecondaryLayer> {
        self.secondary.iter().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    pub fn layer_mut(&mut self, name: &str) -> Option<&mut SecondaryLayer> {
        self.secondary.iter_mut().find(|(n, _)| n == name).map(|(_, l)| l)
    }

    /// Secondary layers in insertion order.
    pub fn layers(&self) -> impl Iterator<Item = (&str, &SecondaryLayer)> {
        self.secondary.iter().map(|(n, l)| (n.as_str(), l))
    }

    /// Number of user markers, i.e. layers not managed by the system.
    pub fn marker_count(&self) -> usize {
        self.secondary.iter().filter(|(n, _)| !is_system_layer(n)).count()
    }

    /// Add a named secondary layer.
    ///
    /// Fails without touching existing layers if the name is taken, or if a
    /// user marker would exceed the configured limit.
    pub fn add_layer(&mut self, out: Outbound<'_>, name: &str, mut layer: SecondaryLayer) -> Result<(), MinimapError> {
        if self.has_layer(name) {
            warn!("{} already has a layer named '{}'", self.owner, name);
            return Err(MinimapError::DuplicateLayerName(name.to_string()));
        }
        if !is_system_layer(name) && self.marker_count() >= self.settings.marker_limit {
            return Err(MinimapError::MarkerLimitExceeded {
                limit: self.settings.marker_limit,
            });
        }
        if self.settings.mode == OverlayMode::Layered {
            let placement = Placement::new(self.position, layer.layer.depth());
            out.sender.spawn_layer(
                out.transport,
                self.connection,
                &layer.layer,
                placement,
                [self.viewer.x, self.viewer.y, self.viewer.z],
            )?;
        }
        debug!("Added layer '{}' at depth {:.2} for {}", name, layer.layer.depth(), self.owner);
        if self.hidden {
            layer.layer.set_visible(false);
        }
        self.secondary.push((name.to_string(), layer));
        self.dirty = true;
        Ok(())
    }

    /// Remove a named layer and destroy its carrier.
    pub fn remove_layer(&mut self, out: Outbound<'_>, name: &str) -> Result<(), MinimapError> {
        let index = self
            .secondary
            .iter()
            .position(|(n, _)| n == name)
            .ok_or_else(|| MinimapError::UnknownLayer(name.to_string()))?;
        let (_, removed) = self.secondary.remove(index);
        self.dirty = true;
        out.sender
            .destroy_layer(out.transport, self.connection, removed.layer)?;
        Ok(())
    }

    #[inline]
    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Blank every layer, or show them again. Takes effect on the next
    /// update; carriers stay spawned.
    pub fn set_hidden(&mut self, hidden: bool) {
        if self.hidden == hidden {
            return;
        }
        self.hidden = hidden;
        self.base.set_visible(!hidden);
        for (_, layer) in &mut self.secondary {
            layer.layer.set_visible(!hidden);
        }
        self.dirty = true;
    }

    /// Change the screen corner. Takes effect on the next update.
    pub fn set_screen_position(&mut self, position: ScreenPosition) {
        if self.position != position {
            self.position = position;
            self.moved = true;
            self.dirty = true;
        }
    }

    /// Record the owner's position. Returns true if the minimap became dirty.
    ///
    /// The `player` blip follows the viewer.
    pub fn set_viewer(&mut self, viewer: Viewer) -> bool {
        let changed = viewer.block_pos() != self.viewer.block_pos();
        self.viewer = viewer;
        if let Some(blip) = self.layer_mut(PLAYER_LAYER) {
            blip.layer.set_world(viewer.world);
            blip.move_to(viewer.block_x(), viewer.block_z());
        }
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Render every layer for the current viewer without sending anything.
    pub fn snapshot(&mut self, renderer: &mut CachedWorldRenderer, blocks: &dyn BlockSource) -> Frame {
        let zoom = self.settings.zoom;
        let (vx, vz) = (self.viewer.block_x(), self.viewer.block_z());
        let half = (MAP_SIZE as i32 / 2) << zoom;

        self.base.set_world(self.viewer.world);
        self.base.set_origin(vx - half, vz - half);
        let base = if self.base.visible() {
            renderer.render(blocks, self.viewer.world, vx, vz, zoom)
        } else {
            self.base.blank()
        };

        let layers = self
            .secondary
            .iter()
            .map(|(_, layer)| {
                let canvas = if layer.layer.world() == self.viewer.world {
                    layer.render(vx, vz, zoom)
                } else {
                    layer.layer.blank()
                };
                (layer.layer.depth(), canvas)
            })
            .collect();

        Frame { base, layers }
    }

    /// Render and push the full current state to the owner.
    ///
    /// All canvases are computed before the first packet is sent.
    pub fn update(
        &mut self,
        out: Outbound<'_>,
        renderer: &mut CachedWorldRenderer,
        blocks: &dyn BlockSource,
    ) -> Result<(), MinimapError> {
        let frame = self.snapshot(renderer, blocks);
        let connection = self.connection;

        if self.moved {
            out.sender.move_layer(
                out.transport,
                connection,
                &self.base,
                Placement::new(self.position, self.base.depth()),
            )?;
            if self.settings.mode == OverlayMode::Layered {
                for (_, layer) in &self.secondary {
                    let placement = Placement::new(self.position, layer.layer.depth());
                    out.sender
                        .move_layer(out.transport, connection, &layer.layer, placement)?;
                }
            }
            self.moved = false;
        }

        match self.settings.mode {
            OverlayMode::Layered => {
                out.sender
                    .update_layer(out.transport, connection, &self.base, &frame.base)?;
                for ((_, layer), (_, canvas)) in self.secondary.iter().zip(&frame.layers) {
                    out.sender
                        .update_layer(out.transport, connection, &layer.layer, canvas)?;
                }
            }
            OverlayMode::Composited => {
                let composed = frame.compose();
                out.sender
                    .update_layer(out.transport, connection, &self.base, &composed)?;
            }
        }

        self.dirty = false;
        Ok(())
    }

    /// Persistable view of this minimap.
    pub fn state(&self) -> MinimapState {
        MinimapState {
            player: self.owner,
            enabled: true,
            position: self.position,
            markers: self
                .secondary
                .iter()
                .filter(|(_, l)| l.persistent)
                .map(|(name, l)| MarkerState {
                    name: name.clone(),
                    icon: l.renderer.icon_name().to_string(),
                    world: l.layer.world(),
                    x: l.world_x,
                    z: l.world_z,
                    stick_to_border: l.stick_to_border,
                })
                .collect(),
        }
    }

    /// Destroy every carrier. Consumes the minimap, so no layer of it can be
    /// addressed again.
    ///
    /// Keeps going past delivery errors and reports the first one.
    pub fn teardown(self, out: Outbound<'_>) -> Result<(), DeliveryError> {
        let mut first_error = None;
        for (_, layer) in self.secondary.into_iter().rev() {
            if let Err(e) = out.sender.destroy_layer(out.transport, self.connection, layer.layer) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = out.sender.destroy_layer(out.transport, self.connection, self.base) {
            first_error.get_or_insert(e);
        }
        debug!("Tore down minimap of {}", self.owner);
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::icon::{BuiltinIconProvider, IconProvider};
    use crate::layer::LayerFactory;
    use crate::marker::IconRenderer;
    use crate::render::flat::FlatRenderer;
    use crate::render::tests::TestBlocks;
    use crate::render::BlockColors;
    use crate::rewriter::{MountState, PassengerRewriter, REWRITER_NAME};
    use crate::transport::PACKET_HANDLER;
    use bytes::Bytes;
    use protocol::packets::{peek_server_opcode, ServerOpcode};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    pub(crate) struct Harness {
        pub sender: PacketSender,
        pub transport: Transport,
        pub rx: mpsc::UnboundedReceiver<Bytes>,
        pub factory: LayerFactory,
        pub icons: BuiltinIconProvider,
        pub renderer: CachedWorldRenderer,
        pub blocks: TestBlocks,
        pub conn: ConnectionId,
    }

    impl Harness {
        pub fn new() -> Self {
            let conn = ConnectionId(1);
            let mut transport = Transport::new();
            let (tx, rx) = mpsc::unbounded_channel();
            transport.open(conn, tx);
            let mount = MountState::shared(conn, 1);
            transport
                .install_filter(conn, PACKET_HANDLER, REWRITER_NAME, Box::new(PassengerRewriter::new(mount.clone())))
                .unwrap();
            let mut sender = PacketSender::new();
            sender.attach(conn, mount);
            Self {
                sender,
                transport,
                rx,
                factory: LayerFactory::new(),
                icons: BuiltinIconProvider::new(),
                renderer: CachedWorldRenderer::new(Arc::new(FlatRenderer::new(BlockColors::default()))),
                blocks: TestBlocks::new(),
                conn,
            }
        }

        pub fn out(&mut self) -> Outbound<'_> {
            Outbound {
                sender: &mut self.sender,
                transport: &mut self.transport,
            }
        }

        /// Run `Minimap::update` against this harness.
        pub fn update(&mut self, minimap: &mut Minimap) -> Result<(), MinimapError> {
            let Harness {
                sender,
                transport,
                renderer,
                blocks,
                ..
            } = self;
            minimap.update(Outbound { sender, transport }, renderer, &*blocks)
        }

        pub fn minimap(&mut self, mode: OverlayMode, viewer: Viewer) -> Minimap {
            let base = self.factory.create_layer(viewer.world, None, 0.0);
            let settings = MinimapSettings {
                mode,
                zoom: 0,
                marker_limit: 2,
            };
            let conn = self.conn;
            Minimap::create(self.out(), PlayerId(1), conn, base, settings, ScreenPosition::Left, viewer).unwrap()
        }

        pub fn marker(&mut self, minimap: &Minimap, icon: &str, x: i32, z: i32, stick: bool) -> SecondaryLayer {
            let layer = self
                .factory
                .create_layer(minimap.viewer().world, Some(minimap.base()), minimap.next_depth());
            let renderer = IconRenderer::new(icon, self.icons.get_icon(icon).unwrap());
            SecondaryLayer::new(layer, renderer, stick, x, z)
        }

        pub fn opcodes(&mut self) -> Vec<ServerOpcode> {
            let mut out = Vec::new();
            while let Ok(p) = self.rx.try_recv() {
                out.push(ServerOpcode::from_raw(peek_server_opcode(&p).unwrap()).unwrap());
            }
            out
        }
    }

    fn viewer() -> Viewer {
        Viewer::new(WorldId(0), 100.5, 65.0, 200.5)
    }

    #[test]
    fn test_duplicate_name_keeps_first_layer() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        let first = h.marker(&minimap, "flag", 1, 2, false);
        minimap.add_layer(h.out(), "home", first).unwrap();
        let second = h.marker(&minimap, "star", 9, 9, false);
        let err = minimap.add_layer(h.out(), "home", second).unwrap_err();

        assert!(matches!(err, MinimapError::DuplicateLayerName(n) if n == "home"));
        let kept = minimap.layer("home").unwrap();
        assert_eq!(kept.renderer.icon_name(), "flag");
        assert_eq!((kept.world_x, kept.world_z), (1, 2));
        assert_eq!(minimap.layers().count(), 1);
    }

    #[test]
    fn test_marker_limit_ignores_system_layers() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        for name in ["a", "b"] {
            let m = h.marker(&minimap, "flag", 0, 0, false);
            minimap.add_layer(h.out(), name, m).unwrap();
        }
        let m = h.marker(&minimap, "flag", 0, 0, false);
        assert!(matches!(
            minimap.add_layer(h.out(), "c", m),
            Err(MinimapError::MarkerLimitExceeded { limit: 2 })
        ));
        for name in SYSTEM_LAYERS {
            let m = h.marker(&minimap, "flag", 0, 0, true);
            minimap.add_layer(h.out(), name, m).unwrap();
        }
        assert_eq!(minimap.marker_count(), 2);
        assert_eq!(minimap.layers().count(), 4);
    }

    #[test]
    fn test_depth_follows_insertion_count() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        assert_eq!(minimap.next_depth(), BASE_DEPTH);
        let a = h.marker(&minimap, "flag", 0, 0, false);
        minimap.add_layer(h.out(), "a", a).unwrap();
        let b = h.marker(&minimap, "flag", 0, 0, false);
        minimap.add_layer(h.out(), "b", b).unwrap();
        minimap.remove_layer(h.out(), "a").unwrap();
        // Not renumbered: the next layer shares b's depth.
        assert_eq!(minimap.next_depth(), minimap.layer("b").unwrap().layer.depth());
        assert!(matches!(minimap.remove_layer(h.out(), "a"), Err(MinimapError::UnknownLayer(_))));
    }

    #[test]
    fn test_off_canvas_marker_stays_in_set() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        let far = h.marker(&minimap, "flag", 5000, 200, false);
        minimap.add_layer(h.out(), "far", far).unwrap();

        let frame = minimap.snapshot(&mut h.renderer, &h.blocks);
        assert!(frame.layers[0].1.is_blank());
        assert!(minimap.has_layer("far"));

        minimap.layer_mut("far").unwrap().stick_to_border = true;
        let frame = minimap.snapshot(&mut h.renderer, &h.blocks);
        assert!(!frame.layers[0].1.is_blank());
    }

    #[test]
    fn test_composited_mode_uses_base_carrier_only() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Composited, viewer());
        let flag = h.marker(&minimap, "flag", 100, 200, false);
        minimap.add_layer(h.out(), "flag", flag).unwrap();
        h.update(&mut minimap).unwrap();

        let ops = h.opcodes();
        assert_eq!(ops.iter().filter(|o| **o == ServerOpcode::SpawnEntity).count(), 1);
        assert_eq!(ops.iter().filter(|o| **o == ServerOpcode::MapData).count(), 1);
        assert!(!minimap.is_dirty());
    }

    #[test]
    fn test_layered_update_and_move() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        let flag = h.marker(&minimap, "flag", 100, 200, false);
        minimap.add_layer(h.out(), "flag", flag).unwrap();
        h.opcodes();

        minimap.set_screen_position(ScreenPosition::Right);
        h.update(&mut minimap).unwrap();
        let ops = h.opcodes();
        assert_eq!(ops.iter().filter(|o| **o == ServerOpcode::SetEntityMetadata).count(), 2);
        assert_eq!(ops.iter().filter(|o| **o == ServerOpcode::MapData).count(), 2);

        // Position already applied.
        h.update(&mut minimap).unwrap();
        assert!(!h.opcodes().contains(&ServerOpcode::SetEntityMetadata));
    }

    #[test]
    fn test_viewer_moves_player_blip() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        let blip = h.marker(&minimap, "player", 100, 200, true).transient();
        minimap.add_layer(h.out(), PLAYER_LAYER, blip).unwrap();
        h.update(&mut minimap).unwrap();

        assert!(!minimap.set_viewer(Viewer::new(WorldId(0), 100.9, 65.0, 200.1)));
        assert!(minimap.set_viewer(Viewer::new(WorldId(0), -3.2, 65.0, 7.0)));
        let blip = minimap.layer(PLAYER_LAYER).unwrap();
        assert_eq!((blip.world_x, blip.world_z), (-3, 7));
        assert!(minimap.set_viewer(Viewer::new(WorldId(0), -3.2, 65.0, -0.5)));
        let blip = minimap.layer(PLAYER_LAYER).unwrap();
        assert_eq!((blip.world_x, blip.world_z), (-3, 0));
        assert!(minimap.state().markers.is_empty());
    }

    #[test]
    fn test_hidden_minimap_sends_blank_canvases() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        minimap.set_hidden(true);
        let flag = h.marker(&minimap, "flag", 100, 200, false);
        minimap.add_layer(h.out(), "flag", flag).unwrap();

        let frame = minimap.snapshot(&mut h.renderer, &h.blocks);
        assert!(frame.base.is_blank());
        assert!(frame.layers[0].1.is_blank());
        assert!(!minimap.layer("flag").unwrap().layer.visible());

        minimap.set_hidden(false);
        assert!(minimap.is_dirty());
        let frame = minimap.snapshot(&mut h.renderer, &h.blocks);
        assert!(!frame.base.is_blank());
        assert!(!frame.layers[0].1.is_blank());
    }

    #[test]
    fn test_teardown_destroys_everything() {
        let mut h = Harness::new();
        let mut minimap = h.minimap(OverlayMode::Layered, viewer());
        let flag = h.marker(&minimap, "flag", 0, 0, false);
        minimap.add_layer(h.out(), "flag", flag).unwrap();
        h.opcodes();

        minimap.teardown(h.out()).unwrap();
        let ops = h.opcodes();
        assert_eq!(ops.iter().filter(|o| **o == ServerOpcode::RemoveEntities).count(), 2);
        assert_eq!(ops.last(), Some(&ServerOpcode::RemoveEntities));
    }
}
