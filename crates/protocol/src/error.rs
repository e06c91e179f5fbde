//! Protocol error types.

use thiserror::Error;

/// Errors that can occur during protocol parsing.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid packet opcode: {0:#04x}")]
    InvalidOpcode(i32),

    #[error("Unexpected end of data")]
    UnexpectedEof,

    #[error("VarInt is longer than 5 bytes")]
    VarIntTooLong,

    #[error("Invalid string length: {0}")]
    InvalidStringLength(i32),

    #[error("Invalid length prefix: {0}")]
    InvalidLength(i32),
}
