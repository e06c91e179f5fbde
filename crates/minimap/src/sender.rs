//! Wire sequences that spawn, update, move and destroy layer carriers.
//!
//! A carrier is an item display holding a filled map, mounted on the owner.
//! The sender tracks which carriers it has spawned per connection and
//! refuses to address anything else, so a layer is never updated before it
//! is spawned nor after it is destroyed.

use std::collections::{HashMap, HashSet};

use glam::Vec3;
use protocol::packets::{
    build_entity_metadata, build_map_data, build_remove_entities, build_spawn_entity, display_index,
    ItemStack, MapPatch, MetadataEntry, MetadataValue, SetPassengers, ITEM_DISPLAY_ENTITY_TYPE,
};
use tracing::debug;

use crate::canvas::Canvas;
use crate::layer::MinimapLayer;
use crate::overlay::ScreenPosition;
use crate::rewriter::{self, SharedMountState};
use crate::transport::{ConnectionId, DeliveryError, Transport};

/// Horizontal offset of the overlay from the view axis.
const SCREEN_OFFSET_X: f32 = 0.46;
/// Vertical offset of the overlay relative to the mount point.
const SCREEN_OFFSET_Y: f32 = -0.28;
/// Distance of the base layer in front of the camera.
const SCREEN_DISTANCE: f32 = 0.62;
/// How far one unit of depth moves a layer towards the camera.
const DEPTH_STEP: f32 = 0.1;
/// Uniform display scale of a carrier.
const LAYER_SCALE: f32 = 0.25;

/// Item display context that renders the map flat, like an item frame.
const DISPLAY_FIXED: u8 = 8;
/// Packed light value: block and sky light both at 15.
const FULL_BRIGHT: i32 = (15 << 4) | (15 << 20);
/// Ticks a move is interpolated over.
const MOVE_DURATION: i32 = 3;

/// Distance of the fullscreen grid in front of the camera.
const FULLSCREEN_DISTANCE: f32 = 1.1;
/// Side length of one fullscreen segment in display units.
const SEGMENT_SPAN: f32 = 0.25;

/// Where a layer's carrier sits on screen.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placement {
    /// The corner overlay, pushed towards the camera by `depth`.
    Corner { position: ScreenPosition, depth: f32 },
    /// One cell of the fullscreen grid, centred on the view axis.
    Segment { column: u32, row: u32, columns: u32, rows: u32 },
}

impl Placement {
    pub fn new(position: ScreenPosition, depth: f32) -> Self {
        Self::Corner { position, depth }
    }

    pub fn segment(column: u32, row: u32, columns: u32, rows: u32) -> Self {
        Self::Segment {
            column,
            row,
            columns,
            rows,
        }
    }

    /// Display translation relative to the owner.
    pub fn translation(&self) -> Vec3 {
        match *self {
            Placement::Corner { position, depth } => {
                let side = match position {
                    ScreenPosition::Left => 1.0,
                    ScreenPosition::Right => -1.0,
                };
                Vec3::new(side * SCREEN_OFFSET_X, SCREEN_OFFSET_Y, SCREEN_DISTANCE - depth * DEPTH_STEP)
            }
            Placement::Segment {
                column,
                row,
                columns,
                rows,
            } => {
                // Display +x points to the viewer's left.
                let x = (columns as f32 - 1.0) / 2.0 - column as f32;
                let y = (rows as f32 - 1.0) / 2.0 - row as f32;
                Vec3::new(x * SEGMENT_SPAN, y * SEGMENT_SPAN, FULLSCREEN_DISTANCE)
            }
        }
    }
}

/// Issues carrier packet sequences on behalf of every minimap.
#[derive(Default)]
pub struct PacketSender {
    mounts: HashMap<ConnectionId, SharedMountState>,
    spawned: HashMap<ConnectionId, HashSet<i32>>,
}

impl PacketSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the mount state carriers on `connection` ride on.
    pub fn attach(&mut self, connection: ConnectionId, mount: SharedMountState) {
        self.mounts.insert(connection, mount);
        self.spawned.entry(connection).or_default();
    }

    /// Forget everything about a closed connection.
    pub fn forget_connection(&mut self, connection: ConnectionId) {
        self.mounts.remove(&connection);
        self.spawned.remove(&connection);
    }

    pub fn is_spawned(&self, connection: ConnectionId, layer: &MinimapLayer) -> bool {
        self.spawned
            .get(&connection)
            .is_some_and(|set| set.contains(&layer.id().carrier))
    }

    fn ensure_spawned(&self, connection: ConnectionId, layer: &MinimapLayer) -> Result<(), DeliveryError> {
        if self.is_spawned(connection, layer) {
            Ok(())
        } else {
            Err(DeliveryError::NotSpawned(connection, layer.id().carrier))
        }
    }

    /// Spawn the carrier for `layer` at `at` and mount it on the owner.
    pub fn spawn_layer(
        &mut self,
        transport: &mut Transport,
        connection: ConnectionId,
        layer: &MinimapLayer,
        placement: Placement,
        at: [f64; 3],
    ) -> Result<(), DeliveryError> {
        let mount = self
            .mounts
            .get(&connection)
            .cloned()
            .ok_or(DeliveryError::Detached(connection))?;
        let id = layer.id();
        if self.is_spawned(connection, layer) {
            return Ok(());
        }

        transport.send(
            connection,
            build_spawn_entity(id.carrier, id.carrier_uuid(), ITEM_DISPLAY_ENTITY_TYPE, at[0], at[1], at[2]).finish(),
        )?;
        self.spawned.entry(connection).or_default().insert(id.carrier);

        transport.send(
            connection,
            build_entity_metadata(
                id.carrier,
                &[
                    MetadataEntry::new(display_index::ITEM, MetadataValue::Item(ItemStack::FilledMap { map_id: id.map_id })),
                    MetadataEntry::new(display_index::ITEM_DISPLAY_TYPE, MetadataValue::Byte(DISPLAY_FIXED)),
                    MetadataEntry::new(display_index::BRIGHTNESS, MetadataValue::VarInt(FULL_BRIGHT)),
                    MetadataEntry::new(display_index::SCALE, MetadataValue::Vector3(Vec3::splat(LAYER_SCALE))),
                    MetadataEntry::new(display_index::TRANSLATION, MetadataValue::Vector3(placement.translation())),
                ],
            )
            .finish(),
        )?;

        let mount_packet = {
            let mut state = rewriter::lock(&mount);
            state.add_carrier(id.carrier);
            SetPassengers::new(state.vehicle(), state.passengers())
        };
        transport.send(connection, mount_packet.encode().finish())?;
        debug!("Spawned carrier {} (map {}) on {}", id.carrier, id.map_id, connection);
        Ok(())
    }

    /// Send `canvas` as the full contents of the layer's map.
    pub fn update_layer(
        &mut self,
        transport: &mut Transport,
        connection: ConnectionId,
        layer: &MinimapLayer,
        canvas: &Canvas,
    ) -> Result<(), DeliveryError> {
        self.ensure_spawned(connection, layer)?;
        let patch = MapPatch {
            columns: canvas.width().min(u8::MAX as usize) as u8,
            rows: canvas.height().min(u8::MAX as usize) as u8,
            x: 0,
            z: 0,
            data: canvas.pixels(),
        };
        transport.send(connection, build_map_data(layer.id().map_id, 0, true, Some(patch)).finish())
    }

    /// Move the carrier to a new screen placement.
    pub fn move_layer(
        &mut self,
        transport: &mut Transport,
        connection: ConnectionId,
        layer: &MinimapLayer,
        placement: Placement,
    ) -> Result<(), DeliveryError> {
        self.ensure_spawned(connection, layer)?;
        transport.send(
            connection,
            build_entity_metadata(
                layer.id().carrier,
                &[
                    MetadataEntry::new(display_index::INTERPOLATION_DELAY, MetadataValue::VarInt(0)),
                    MetadataEntry::new(display_index::TRANSFORMATION_DURATION, MetadataValue::VarInt(MOVE_DURATION)),
                    MetadataEntry::new(display_index::TRANSLATION, MetadataValue::Vector3(placement.translation())),
                ],
            )
            .finish(),
        )
    }

    /// Dismount and remove the carrier. Consumes the layer handle.
    ///
    /// A layer that was never spawned is simply dropped.
    pub fn destroy_layer(
        &mut self,
        transport: &mut Transport,
        connection: ConnectionId,
        layer: MinimapLayer,
    ) -> Result<(), DeliveryError> {
        let carrier = layer.id().carrier;
        let was_spawned = self
            .spawned
            .get_mut(&connection)
            .is_some_and(|set| set.remove(&carrier));
        if !was_spawned {
            return Ok(());
        }

        let dismount = self.mounts.get(&connection).map(|mount| {
            let mut state = rewriter::lock(mount);
            state.remove_carrier(carrier);
            SetPassengers::new(state.vehicle(), state.passengers())
        });
        let dismounted = match dismount {
            Some(packet) => transport.send(connection, packet.encode().finish()),
            None => Ok(()),
        };
        transport.send(connection, build_remove_entities(&[carrier]).finish())?;
        debug!("Destroyed carrier {} on {}", carrier, connection);
        dismounted
    }
}
