//! Fullscreen map.
//!
//! A grid of map carriers hung in front of the owner, each segment showing
//! a 128x128 block square at one block per pixel. Tiles come from the same
//! shared render cache as the corner overlay. While the map is open the
//! owner steers the view by walking: the view centre moves `steer_speed`
//! blocks per block walked from where the map was opened.

use tracing::debug;

use crate::canvas::{Canvas, MAP_SIZE};
use crate::error::MinimapError;
use crate::layer::{LayerFactory, MinimapLayer, SecondaryLayer};
use crate::marker;
use crate::overlay::{Outbound, Viewer};
use crate::render::{BlockSource, CachedWorldRenderer};
use crate::sender::Placement;
use crate::transport::{ConnectionId, DeliveryError};
use crate::{PlayerId, WorldId};

/// Blocks covered by one segment along each axis.
pub const SEGMENT_BLOCKS: i32 = MAP_SIZE as i32;

/// Grid shape and steering of a fullscreen map.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FullscreenSettings {
    pub columns: u32,
    pub rows: u32,
    pub steer_speed: f64,
}

/// View centre driven by the owner's movement.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SteerableView {
    anchor_x: f64,
    anchor_z: f64,
    origin_x: i32,
    origin_z: i32,
    speed: f64,
}

impl SteerableView {
    /// A view centred on `viewer`, anchored at their current position.
    pub fn new(viewer: &Viewer, speed: f64) -> Self {
        Self {
            anchor_x: viewer.x,
            anchor_z: viewer.z,
            origin_x: viewer.block_x(),
            origin_z: viewer.block_z(),
            speed,
        }
    }

    /// Block column at the centre of the view for a viewer at `viewer`.
    pub fn center(&self, viewer: &Viewer) -> (i32, i32) {
        let dx = (viewer.x - self.anchor_x) * self.speed;
        let dz = (viewer.z - self.anchor_z) * self.speed;
        (
            self.origin_x.saturating_add(dx as i32),
            self.origin_z.saturating_add(dz as i32),
        )
    }
}

/// One carrier of the grid.
#[derive(Debug)]
pub struct Segment {
    pub column: u32,
    pub row: u32,
    pub layer: MinimapLayer,
}

pub struct FullscreenMinimap {
    owner: PlayerId,
    connection: ConnectionId,
    settings: FullscreenSettings,
    view: SteerableView,
    viewer: Viewer,
    center: (i32, i32),
    segments: Vec<Segment>,
    dirty: bool,
}

impl FullscreenMinimap {
    /// Spawn every segment carrier. On a delivery failure the carriers
    /// spawned so far are destroyed again.
    pub fn open(
        out: Outbound<'_>,
        factory: &mut LayerFactory,
        owner: PlayerId,
        connection: ConnectionId,
        settings: FullscreenSettings,
        viewer: Viewer,
    ) -> Result<Self, MinimapError> {
        let at = [viewer.x, viewer.y, viewer.z];
        let mut segments: Vec<Segment> = Vec::new();
        let mut failure = None;

        'grid: for row in 0..settings.rows {
            for column in 0..settings.columns {
                let layer = factory.create_layer(viewer.world, None, 0.0);
                let placement = Placement::segment(column, row, settings.columns, settings.rows);
                if let Err(e) = out
                    .sender
                    .spawn_layer(out.transport, connection, &layer, placement, at)
                {
                    failure = Some(e);
                    break 'grid;
                }
                segments.push(Segment { column, row, layer });
            }
        }

        if let Some(e) = failure {
            for segment in segments {
                let _ = out.sender.destroy_layer(out.transport, connection, segment.layer);
            }
            return Err(e.into());
        }

        let view = SteerableView::new(&viewer, settings.steer_speed);
        debug!(
            "Opened {}x{} fullscreen map for {}",
            settings.columns, settings.rows, owner
        );
        Ok(Self {
            owner,
            connection,
            settings,
            center: view.center(&viewer),
            view,
            viewer,
            segments,
            dirty: true,
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
    pub fn settings(&self) -> FullscreenSettings {
        self.settings
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Block column at the centre of the grid.
    pub fn center(&self) -> (i32, i32) {
        self.center
    }

    pub fn world(&self) -> WorldId {
        self.viewer.world
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// Half the extent of the grid in blocks, per axis.
    pub fn half_extent(&self) -> (i32, i32) {
        (
            self.settings.columns as i32 * SEGMENT_BLOCKS / 2,
            self.settings.rows as i32 * SEGMENT_BLOCKS / 2,
        )
    }

    /// Block column shown at the centre of segment `(column, row)`.
    pub fn segment_center(&self, column: u32, row: u32) -> (i32, i32) {
        let (half_x, half_z) = self.half_extent();
        let half = SEGMENT_BLOCKS / 2;
        (
            self.center.0 - half_x + column as i32 * SEGMENT_BLOCKS + half,
            self.center.1 - half_z + row as i32 * SEGMENT_BLOCKS + half,
        )
    }

    /// Steer the view. Returns true if the view centre moved.
    pub fn set_viewer(&mut self, viewer: Viewer) -> bool {
        let center = self.view.center(&viewer);
        let changed = center != self.center || viewer.world != self.viewer.world;
        self.viewer = viewer;
        self.center = center;
        if changed {
            self.dirty = true;
        }
        changed
    }

    /// Render every segment with `markers` drawn on top, in grid order.
    pub fn snapshot<'a>(
        &self,
        renderer: &mut CachedWorldRenderer,
        blocks: &dyn BlockSource,
        markers: impl IntoIterator<Item = &'a SecondaryLayer> + Clone,
    ) -> Vec<Canvas> {
        let world = self.viewer.world;
        self.segments
            .iter()
            .map(|segment| {
                let (cx, cz) = self.segment_center(segment.column, segment.row);
                let mut canvas = renderer.render(blocks, world, cx, cz, 0);
                for layer in markers.clone() {
                    if layer.layer.world() == world {
                        marker::draw(
                            layer.renderer.icon(),
                            &mut canvas,
                            layer.world_x,
                            layer.world_z,
                            cx,
                            cz,
                            0,
                            false,
                        );
                    }
                }
                canvas
            })
            .collect()
    }

    /// Render and push every segment. All canvases are computed first.
    pub fn update<'a>(
        &mut self,
        out: Outbound<'_>,
        renderer: &mut CachedWorldRenderer,
        blocks: &dyn BlockSource,
        markers: impl IntoIterator<Item = &'a SecondaryLayer> + Clone,
    ) -> Result<(), MinimapError> {
        let canvases = self.snapshot(renderer, blocks, markers);
        for (segment, canvas) in self.segments.iter().zip(&canvases) {
            out.sender
                .update_layer(out.transport, self.connection, &segment.layer, canvas)?;
        }
        self.dirty = false;
        Ok(())
    }

    /// Destroy every segment carrier, reporting the first delivery error.
    pub fn close(self, out: Outbound<'_>) -> Result<(), DeliveryError> {
        let mut first_error = None;
        for segment in self.segments {
            if let Err(e) = out.sender.destroy_layer(out.transport, self.connection, segment.layer) {
                first_error.get_or_insert(e);
            }
        }
        debug!("Closed fullscreen map of {}", self.owner);
        first_error.map_or(Ok(()), Err)
    }
}
