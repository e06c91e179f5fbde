//! Minimap layers and the factory that hands out their identities.

use crate::canvas::{Canvas, MAP_SIZE};
use crate::marker::IconRenderer;
use crate::WorldId;

/// First entity id handed to carriers. Host entities count up from 1 and
/// never get near it.
pub const FIRST_CARRIER_ID: i32 = 0x7000_0000;

/// First map id owned by a layer.
pub const FIRST_MAP_ID: i32 = 0x0100_0000;

/// Carrier uuids share this high half so they never collide with players.
const CARRIER_UUID_PREFIX: u128 = 0x6d69_6e69_6d61_7000_0000_0000_0000_0000;

/// The client-visible identity of a layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayerId {
    /// Entity id of the carrier hosting the layer.
    pub carrier: i32,
    /// Map id the carrier displays.
    pub map_id: i32,
}

impl LayerId {
    pub fn carrier_uuid(&self) -> u128 {
        CARRIER_UUID_PREFIX | self.carrier as u32 as u128
    }
}

/// A positioned, depth-ordered pixel source.
///
/// Deliberately not `Clone`: a layer handle is consumed when the layer is
/// destroyed, so it cannot be addressed afterwards.
#[derive(Debug, PartialEq)]
pub struct MinimapLayer {
    id: LayerId,
    world: WorldId,
    width: usize,
    height: usize,
    origin_x: i32,
    origin_z: i32,
    depth: f32,
    visible: bool,
}

impl MinimapLayer {
    #[inline]
    pub fn id(&self) -> LayerId {
        self.id
    }

    #[inline]
    pub fn world(&self) -> WorldId {
        self.world
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    /// World column shown at the canvas' top-left pixel as of the last render.
    pub fn origin(&self) -> (i32, i32) {
        (self.origin_x, self.origin_z)
    }

    pub fn set_origin(&mut self, x: i32, z: i32) {
        self.origin_x = x;
        self.origin_z = z;
    }

    pub fn set_world(&mut self, world: WorldId) {
        self.world = world;
    }

    #[inline]
    pub fn depth(&self) -> f32 {
        self.depth
    }

    #[inline]
    pub fn visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// A blank canvas of this layer's size.
    pub fn blank(&self) -> Canvas {
        Canvas::new(self.width, self.height)
    }
}

/// Hands out carrier entity ids and map ids.
#[derive(Debug)]
pub struct LayerFactory {
    next_carrier: i32,
    next_map: i32,
}

impl Default for LayerFactory {
    fn default() -> Self {
        Self {
            next_carrier: FIRST_CARRIER_ID,
            next_map: FIRST_MAP_ID,
        }
    }
}

impl LayerFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a layer for `world`. A layer created against a base layer
    /// inherits its size and origin.
    pub fn create_layer(&mut self, world: WorldId, base: Option<&MinimapLayer>, depth: f32) -> MinimapLayer {
        let id = LayerId {
            carrier: self.next_carrier,
            map_id: self.next_map,
        };
        self.next_carrier = self.next_carrier.wrapping_add(1).max(FIRST_CARRIER_ID);
        self.next_map = self.next_map.wrapping_add(1).max(FIRST_MAP_ID);

        let (width, height, origin_x, origin_z) = match base {
            Some(b) => (b.width, b.height, b.origin_x, b.origin_z),
            None => (MAP_SIZE, MAP_SIZE, 0, 0),
        };
        MinimapLayer {
            id,
            world,
            width,
            height,
            origin_x,
            origin_z,
            depth,
            visible: true,
        }
    }
}

/// A marker layer: an icon pinned to a world position.
#[derive(Debug)]
pub struct SecondaryLayer {
    pub layer: MinimapLayer,
    pub renderer: IconRenderer,
    pub stick_to_border: bool,
    pub world_x: i32,
    pub world_z: i32,
    /// Saved with the player's minimap state.
    pub persistent: bool,
}

impl SecondaryLayer {
    pub fn new(layer: MinimapLayer, renderer: IconRenderer, stick_to_border: bool, world_x: i32, world_z: i32) -> Self {
        Self {
            layer,
            renderer,
            stick_to_border,
            world_x,
            world_z,
            persistent: true,
        }
    }

    /// Mark the layer as session-only.
    pub fn transient(mut self) -> Self {
        self.persistent = false;
        self
    }

    pub fn move_to(&mut self, world_x: i32, world_z: i32) {
        self.world_x = world_x;
        self.world_z = world_z;
    }

    /// Marker pixels for a viewer at `(viewer_x, viewer_z)`.
    pub fn render(&self, viewer_x: i32, viewer_z: i32, zoom: u8) -> Canvas {
        if !self.layer.visible() {
            return self.layer.blank();
        }
        self.renderer
            .render(self.world_x, self.world_z, viewer_x, viewer_z, zoom, self.stick_to_border)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_ids_are_unique() {
        let mut factory = LayerFactory::new();
        let a = factory.create_layer(WorldId(0), None, 0.0);
        let b = factory.create_layer(WorldId(0), Some(&a), 0.05);
        assert_ne!(a.id().carrier, b.id().carrier);
        assert_ne!(a.id().map_id, b.id().map_id);
        assert_ne!(a.id().carrier_uuid(), b.id().carrier_uuid());
        assert!(a.id().carrier >= FIRST_CARRIER_ID);
    }

    #[test]
    fn test_layer_inherits_base_geometry() {
        let mut factory = LayerFactory::new();
        let mut base = factory.create_layer(WorldId(1), None, 0.0);
        base.set_origin(-64, 36);
        let marker = factory.create_layer(WorldId(1), Some(&base), 0.05);
        assert_eq!(marker.origin(), (-64, 36));
        assert_eq!((marker.width(), marker.height()), (MAP_SIZE, MAP_SIZE));
        assert!(marker.visible());
    }
}
