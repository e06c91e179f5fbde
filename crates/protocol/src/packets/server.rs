//! Server -> Client packet building.
//!
//! Only the packets needed to host the overlay are built here. Every builder
//! returns a [`BinaryWriter`] positioned after the last field so callers can
//! `finish()` it into a frame.

use super::ServerOpcode;
use crate::{BinaryReader, BinaryWriter, ProtocolError, Vec3};

/// Entity type id of the item display used as overlay carrier.
pub const ITEM_DISPLAY_ENTITY_TYPE: i32 = 56;

/// Item id of a filled map.
pub const FILLED_MAP_ITEM_ID: i32 = 982;

/// Metadata indices of the display entity fields we touch.
pub mod display_index {
    pub const INTERPOLATION_DELAY: u8 = 8;
    pub const TRANSFORMATION_DURATION: u8 = 9;
    pub const TRANSLATION: u8 = 11;
    pub const SCALE: u8 = 12;
    pub const BRIGHTNESS: u8 = 17;
    pub const ITEM: u8 = 23;
    pub const ITEM_DISPLAY_TYPE: u8 = 24;
}

/// Metadata serializer ids.
const META_BYTE: i32 = 0;
const META_VARINT: i32 = 1;
const META_FLOAT: i32 = 3;
const META_SLOT: i32 = 7;
const META_VECTOR3: i32 = 26;
const META_END: u8 = 0xFF;

fn start(opcode: ServerOpcode, capacity: usize) -> BinaryWriter {
    let mut w = BinaryWriter::with_capacity(capacity);
    w.put_varint(opcode as i32);
    w
}

/// Build a SpawnEntity packet.
pub fn build_spawn_entity(
    entity_id: i32,
    uuid: u128,
    entity_type: i32,
    x: f64,
    y: f64,
    z: f64,
) -> BinaryWriter {
    let mut w = start(ServerOpcode::SpawnEntity, 64);
    w.put_varint(entity_id);
    w.put_u128(uuid);
    w.put_varint(entity_type);
    w.put_f64(x);
    w.put_f64(y);
    w.put_f64(z);
    // Pitch, yaw, head yaw.
    w.put_u8(0);
    w.put_u8(0);
    w.put_u8(0);
    // Object data.
    w.put_varint(0);
    // Velocity.
    w.put_i16(0);
    w.put_i16(0);
    w.put_i16(0);
    w
}

/// A single item stack as carried by display metadata.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ItemStack {
    Empty,
    /// A filled map bound to `map_id`.
    FilledMap { map_id: i32 },
}

impl ItemStack {
    fn write(&self, w: &mut BinaryWriter) {
        match *self {
            ItemStack::Empty => w.put_bool(false),
            ItemStack::FilledMap { map_id } => {
                w.put_bool(true);
                w.put_varint(FILLED_MAP_ITEM_ID);
                w.put_u8(1);
                // Nameless root compound { map: Int }.
                w.put_u8(0x0A);
                w.put_u8(0x03);
                w.put_u16(3);
                w.put_slice(b"map");
                w.put_i32(map_id);
                w.put_u8(0x00);
            }
        }
    }
}

/// A metadata value with its serializer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetadataValue {
    Byte(u8),
    VarInt(i32),
    Float(f32),
    Item(ItemStack),
    Vector3(Vec3),
}

/// One metadata entry (index + value).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetadataEntry {
    pub index: u8,
    pub value: MetadataValue,
}

impl MetadataEntry {
    pub const fn new(index: u8, value: MetadataValue) -> Self {
        Self { index, value }
    }
}

/// Build a SetEntityMetadata packet.
pub fn build_entity_metadata(entity_id: i32, entries: &[MetadataEntry]) -> BinaryWriter {
    let mut w = start(ServerOpcode::SetEntityMetadata, 16 + entries.len() * 16);
    w.put_varint(entity_id);
    for entry in entries {
        w.put_u8(entry.index);
        match entry.value {
            MetadataValue::Byte(v) => {
                w.put_varint(META_BYTE);
                w.put_u8(v);
            }
            MetadataValue::VarInt(v) => {
                w.put_varint(META_VARINT);
                w.put_varint(v);
            }
            MetadataValue::Float(v) => {
                w.put_varint(META_FLOAT);
                w.put_f32(v);
            }
            MetadataValue::Item(item) => {
                w.put_varint(META_SLOT);
                item.write(&mut w);
            }
            MetadataValue::Vector3(v) => {
                w.put_varint(META_VECTOR3);
                w.put_f32(v.x);
                w.put_f32(v.y);
                w.put_f32(v.z);
            }
        }
    }
    w.put_u8(META_END);
    w
}

/// Rectangular canvas patch carried by a MapData packet.
#[derive(Debug, Clone, Copy)]
pub struct MapPatch<'a> {
    pub columns: u8,
    pub rows: u8,
    pub x: u8,
    pub z: u8,
    /// Row-major palette indices, `columns * rows` long.
    pub data: &'a [u8],
}

/// Build a MapData packet.
///
/// The map never carries vanilla decorations: every marker is baked into
/// the canvas.
pub fn build_map_data(map_id: i32, scale: u8, locked: bool, patch: Option<MapPatch<'_>>) -> BinaryWriter {
    let data_len = patch.map(|p| p.data.len()).unwrap_or(0);
    let mut w = start(ServerOpcode::MapData, 16 + data_len);
    w.put_varint(map_id);
    w.put_u8(scale);
    w.put_bool(locked);
    // No decorations.
    w.put_bool(false);
    match patch {
        Some(patch) if patch.columns > 0 => {
            w.put_u8(patch.columns);
            w.put_u8(patch.rows);
            w.put_u8(patch.x);
            w.put_u8(patch.z);
            w.put_varint(patch.data.len() as i32);
            w.put_slice(patch.data);
        }
        _ => w.put_u8(0),
    }
    w
}

/// Build a RemoveEntities packet.
pub fn build_remove_entities(entity_ids: &[i32]) -> BinaryWriter {
    let mut w = start(ServerOpcode::RemoveEntities, 8 + entity_ids.len() * 5);
    w.put_varint(entity_ids.len() as i32);
    for &id in entity_ids {
        w.put_varint(id);
    }
    w
}

/// Build a SystemChat packet.
pub fn build_system_chat(message: &str, overlay: bool) -> BinaryWriter {
    let mut w = start(ServerOpcode::SystemChat, 8 + message.len());
    w.put_string(message);
    w.put_bool(overlay);
    w
}

/// The SetPassengers packet.
///
/// Unlike the other server packets this one is also decoded, because
/// outbound filters rewrite it in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPassengers {
    pub vehicle: i32,
    pub passengers: Vec<i32>,
}

impl SetPassengers {
    pub fn new(vehicle: i32, passengers: Vec<i32>) -> Self {
        Self { vehicle, passengers }
    }

    /// Encode into a frame builder.
    pub fn encode(&self) -> BinaryWriter {
        let mut w = start(ServerOpcode::SetPassengers, 8 + self.passengers.len() * 5);
        w.put_varint(self.vehicle);
        w.put_varint(self.passengers.len() as i32);
        for &id in &self.passengers {
            w.put_varint(id);
        }
        w
    }

    /// Decode a full SetPassengers frame, opcode included.
    pub fn decode(data: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = BinaryReader::new(data.to_vec());
        let opcode = r.get_varint()?;
        if opcode != ServerOpcode::SetPassengers as i32 {
            return Err(ProtocolError::InvalidOpcode(opcode));
        }
        let vehicle = r.get_varint()?;
        let count = r.get_varint()?;
        if count < 0 || count as usize > r.remaining() {
            return Err(ProtocolError::InvalidLength(count));
        }
        let mut passengers = Vec::with_capacity(count as usize);
        for _ in 0..count {
            passengers.push(r.get_varint()?);
        }
        Ok(Self { vehicle, passengers })
    }
}
