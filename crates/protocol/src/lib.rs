//! Shared protocol crate for the minimap overlay.
//!
//! This crate contains:
//! - Binary reading/writing utilities (big-endian, VarInt framing)
//! - Packet definitions and builders
//! - Shared wire types (item stacks, display metadata)

mod binary;
mod error;
pub mod packets;

pub use binary::{BinaryReader, BinaryWriter};
pub use error::ProtocolError;

/// Translation vector used by display entity metadata.
pub type Vec3 = glam::Vec3;
