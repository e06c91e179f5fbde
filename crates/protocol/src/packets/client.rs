//! Client -> Server packet parsing.

use super::ClientOpcode;
use crate::{BinaryReader, ProtocolError};

/// Parsed client packet.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientPacket {
    /// Join with a stable player id.
    Join { player_id: u128, name: String },
    /// Position update.
    Move { x: f64, y: f64, z: f64 },
    /// Block placed (or broken, when `block` is air).
    SetBlock { x: i32, y: i32, z: i32, block: u16 },
    /// Chat message; commands start with `/`.
    Chat { message: String },
}

impl ClientPacket {
    /// Parse a client packet from raw bytes.
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.is_empty() {
            return Err(ProtocolError::UnexpectedEof);
        }

        let mut reader = BinaryReader::new(data.to_vec());
        let opcode = reader.get_varint()?;

        match opcode {
            x if x == ClientOpcode::Join as i32 => {
                let player_id = reader.get_u128()?;
                let name = reader.get_string()?;
                Ok(ClientPacket::Join { player_id, name })
            }
            x if x == ClientOpcode::Move as i32 => {
                let x = reader.get_f64()?;
                let y = reader.get_f64()?;
                let z = reader.get_f64()?;
                Ok(ClientPacket::Move { x, y, z })
            }
            x if x == ClientOpcode::SetBlock as i32 => {
                let x = reader.get_i32()?;
                let y = reader.get_i32()?;
                let z = reader.get_i32()?;
                let block = reader.get_u16()?;
                Ok(ClientPacket::SetBlock { x, y, z, block })
            }
            x if x == ClientOpcode::Chat as i32 => {
                let message = reader.get_string()?;
                Ok(ClientPacket::Chat { message })
            }
            _ => Err(ProtocolError::InvalidOpcode(opcode)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BinaryWriter;

    #[test]
    fn test_parse_join() {
        let mut w = BinaryWriter::new();
        w.put_varint(ClientOpcode::Join as i32);
        w.put_u128(0x1234);
        w.put_string("Steve");
        let packet = ClientPacket::parse(w.as_slice()).unwrap();
        assert_eq!(packet, ClientPacket::Join { player_id: 0x1234, name: "Steve".into() });
    }

    #[test]
    fn test_parse_truncated_move() {
        let mut w = BinaryWriter::new();
        w.put_varint(ClientOpcode::Move as i32);
        w.put_f64(1.0);
        assert!(matches!(ClientPacket::parse(w.as_slice()), Err(ProtocolError::UnexpectedEof)));
    }

    #[test]
    fn test_parse_unknown_opcode() {
        assert!(matches!(ClientPacket::parse(&[0x7E]), Err(ProtocolError::InvalidOpcode(0x7E))));
    }
}
