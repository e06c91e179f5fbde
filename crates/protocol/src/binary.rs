//! Binary reading and writing utilities for the overlay protocol.
//!
//! Fixed-width values are big-endian. Lengths, ids and opcodes use the
//! LEB128-style VarInt encoding (7 data bits per byte, at most 5 bytes).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::ProtocolError;

/// Longest string the reader accepts, in bytes.
const MAX_STRING_LEN: i32 = 32767 * 4;

/// A reader for parsing binary protocol messages.
#[derive(Debug)]
pub struct BinaryReader {
    buf: Bytes,
}

impl BinaryReader {
    /// Create a new reader from raw bytes.
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { buf: data.into() }
    }

    /// Returns remaining bytes.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Skip `n` bytes.
    #[inline]
    pub fn skip(&mut self, n: usize) {
        self.buf.advance(n.min(self.buf.remaining()));
    }

    #[inline]
    fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() >= n {
            Ok(())
        } else {
            Err(ProtocolError::UnexpectedEof)
        }
    }

    #[inline]
    pub fn get_u8(&mut self) -> Result<u8, ProtocolError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    #[inline]
    pub fn get_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.get_u8()? != 0)
    }

    #[inline]
    pub fn get_u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    #[inline]
    pub fn get_i32(&mut self) -> Result<i32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_i32())
    }

    #[inline]
    pub fn get_f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    #[inline]
    pub fn get_f64(&mut self) -> Result<f64, ProtocolError> {
        self.need(8)?;
        Ok(self.buf.get_f64())
    }

    #[inline]
    pub fn get_u128(&mut self) -> Result<u128, ProtocolError> {
        self.need(16)?;
        Ok(self.buf.get_u128())
    }

    /// Read a VarInt.
    pub fn get_varint(&mut self) -> Result<i32, ProtocolError> {
        let mut value: u32 = 0;
        for i in 0..5 {
            let byte = self.get_u8()?;
            value |= ((byte & 0x7F) as u32) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value as i32);
            }
        }
        Err(ProtocolError::VarIntTooLong)
    }

    /// Read a VarInt-length-prefixed UTF-8 string.
    pub fn get_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.get_varint()?;
        if !(0..=MAX_STRING_LEN).contains(&len) {
            return Err(ProtocolError::InvalidStringLength(len));
        }
        let len = len as usize;
        self.need(len)?;
        let bytes = self.buf.split_to(len);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// A writer for building binary protocol messages.
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: BytesMut,
}

impl BinaryWriter {
    /// Create a new writer with default capacity.
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    /// Create a new writer with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Returns the current length.
    #[inline]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    #[inline]
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    #[inline]
    pub fn put_bool(&mut self, v: bool) {
        self.buf.put_u8(v as u8);
    }

    #[inline]
    pub fn put_i8(&mut self, v: i8) {
        self.buf.put_i8(v);
    }

    #[inline]
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16(v);
    }

    #[inline]
    pub fn put_i16(&mut self, v: i16) {
        self.buf.put_i16(v);
    }

    #[inline]
    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32(v);
    }

    #[inline]
    pub fn put_f32(&mut self, v: f32) {
        self.buf.put_f32(v);
    }

    #[inline]
    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64(v);
    }

    #[inline]
    pub fn put_u128(&mut self, v: u128) {
        self.buf.put_u128(v);
    }

    /// Write a VarInt.
    pub fn put_varint(&mut self, v: i32) {
        let mut value = v as u32;
        loop {
            if value & !0x7F == 0 {
                self.buf.put_u8(value as u8);
                return;
            }
            self.buf.put_u8(((value & 0x7F) | 0x80) as u8);
            value >>= 7;
        }
    }

    /// Write a VarInt-length-prefixed UTF-8 string.
    pub fn put_string(&mut self, s: &str) {
        self.put_varint(s.len() as i32);
        self.buf.put_slice(s.as_bytes());
    }

    /// Write raw bytes.
    pub fn put_slice(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    /// Consume the writer and return the built buffer.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }

    /// Get current buffer as a slice.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}
