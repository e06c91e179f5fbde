//! Packet definitions for the overlay protocol.
//!
//! This module contains both client->server and server->client packet types.
//! Every packet starts with its opcode encoded as a VarInt.

mod client;
mod server;

pub use client::*;
pub use server::*;

use crate::{BinaryReader, ProtocolError};

/// Opcodes for client -> server packets.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOpcode {
    /// Join with a stable player id and name.
    Join = 0x00,
    /// Player position update.
    Move = 0x01,
    /// Place or break a block.
    SetBlock = 0x02,
    /// Chat message or command.
    Chat = 0x03,
}

/// Opcodes for server -> client packets.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerOpcode {
    /// Spawn a (display) entity.
    SpawnEntity = 0x01,
    /// Map canvas contents.
    MapData = 0x2A,
    /// Remove entities by id.
    RemoveEntities = 0x40,
    /// Entity metadata entries.
    SetEntityMetadata = 0x56,
    /// Full passenger list of a vehicle.
    SetPassengers = 0x5D,
    /// System chat line.
    SystemChat = 0x69,
}

impl ServerOpcode {
    /// Map a raw opcode back to a known server opcode.
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0x01 => Some(Self::SpawnEntity),
            0x2A => Some(Self::MapData),
            0x40 => Some(Self::RemoveEntities),
            0x56 => Some(Self::SetEntityMetadata),
            0x5D => Some(Self::SetPassengers),
            0x69 => Some(Self::SystemChat),
            _ => None,
        }
    }
}

/// Read the opcode of an encoded server packet without consuming it.
pub fn peek_server_opcode(data: &[u8]) -> Result<i32, ProtocolError> {
    BinaryReader::new(data[..data.len().min(5)].to_vec()).get_varint()
}
