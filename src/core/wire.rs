//! # Wire Buffer
//!
//! The binary read/write cursor abstraction underlying all message
//! encoding. A `WireBuffer` owns a growable byte sequence with independent
//! write and read cursors, supporting typed primitive and length-prefixed
//! string encoding.
//!
//! ## Wire conventions
//! - Multi-byte primitives are written in the host's native byte order; a
//!   connection that detects an opposite-endian peer flips the buffer's
//!   `swap_endian` flag and every primitive is byte-swapped on read and
//!   write from then on. Floats swap via their bit patterns.
//! - Strings are a `u32` length prefix followed by raw bytes, no
//!   terminator.
//! - All fields are byte-aligned; no sub-byte packing.
//!
//! ## Safety
//! Every `read_*` validates the remaining byte count first and fails with
//! `TruncatedPayload` rather than reading out of bounds. String length
//! prefixes are bounded by `MAX_PAYLOAD_SIZE` before allocation.

use crate::config::{BUFFER_GROWTH_INCREMENT, MAX_PAYLOAD_SIZE};
use crate::error::{ProtocolError, Result};
use bytes::Bytes;

/// Growable byte buffer with independent write and read cursors.
///
/// Invariant: `read_cursor <= write_cursor <= data.len()`.
#[derive(Debug, Clone, Default)]
pub struct WireBuffer {
    data: Vec<u8>,
    write_cursor: usize,
    read_cursor: usize,
    swap_endian: bool,
}

impl WireBuffer {
    /// Create an empty buffer. Typically used for outbound messages.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty buffer pre-sized to `capacity` bytes, avoiding
    /// reallocation mid-pack. Callers size this from
    /// `Message::required_memory()`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0; capacity],
            write_cursor: 0,
            read_cursor: 0,
            swap_endian: false,
        }
    }

    /// Wrap a received datagram for reading. The payload is owned by the
    /// buffer for the duration of message decoding.
    pub fn from_datagram(payload: &[u8]) -> Self {
        Self {
            data: payload.to_vec(),
            write_cursor: payload.len(),
            read_cursor: 0,
            swap_endian: false,
        }
    }

    /// Enable or disable byte-swapping of multi-byte primitives. Set once
    /// by the connection when an opposite-endian peer is detected.
    pub fn set_swap_endian(&mut self, swap: bool) {
        self.swap_endian = swap;
    }

    /// Whether this buffer byte-swaps multi-byte primitives.
    pub fn swaps_endian(&self) -> bool {
        self.swap_endian
    }

    /// Number of unread bytes between the read and write cursors.
    pub fn remaining(&self) -> usize {
        self.write_cursor - self.read_cursor
    }

    /// Total bytes written so far.
    pub fn written_len(&self) -> usize {
        self.write_cursor
    }

    /// True once every written byte has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.read_cursor >= self.write_cursor
    }

    /// The written region, for handing to a transport.
    pub fn as_written(&self) -> &[u8] {
        &self.data[..self.write_cursor]
    }

    /// Consume the buffer, yielding the written region as a datagram
    /// payload.
    pub fn into_bytes(mut self) -> Bytes {
        self.data.truncate(self.write_cursor);
        Bytes::from(self.data)
    }

    /// Drop all written data and reset both cursors, keeping capacity.
    pub fn clear(&mut self) {
        self.write_cursor = 0;
        self.read_cursor = 0;
    }

    /// Shorten the written region to `len` bytes. Test support for
    /// truncation-safety checks; a no-op if `len` is not smaller.
    pub fn truncate_written(&mut self, len: usize) {
        if len < self.write_cursor {
            self.write_cursor = len;
            self.read_cursor = self.read_cursor.min(len);
        }
    }

    fn ensure_space(&mut self, additional: usize) {
        let needed = self.write_cursor + additional;
        if needed > self.data.len() {
            let mut grown = self.data.len() + BUFFER_GROWTH_INCREMENT;
            while grown < needed {
                grown += BUFFER_GROWTH_INCREMENT;
            }
            self.data.resize(grown, 0);
        }
    }

    fn take(&mut self, count: usize) -> Result<&[u8]> {
        if self.remaining() < count {
            return Err(ProtocolError::TruncatedPayload {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let start = self.read_cursor;
        self.read_cursor += count;
        Ok(&self.data[start..start + count])
    }

    fn write_raw(&mut self, bytes: &[u8]) {
        self.ensure_space(bytes.len());
        self.data[self.write_cursor..self.write_cursor + bytes.len()].copy_from_slice(bytes);
        self.write_cursor += bytes.len();
    }

    pub fn write_u8(&mut self, value: u8) {
        self.write_raw(&[value]);
    }

    pub fn write_u16(&mut self, value: u16) {
        let value = if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        };
        self.write_raw(&value.to_ne_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        let value = if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        };
        self.write_raw(&value.to_ne_bytes());
    }

    pub fn write_u64(&mut self, value: u64) {
        let value = if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        };
        self.write_raw(&value.to_ne_bytes());
    }

    pub fn write_f32(&mut self, value: f32) {
        self.write_u32(value.to_bits());
    }

    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    pub fn write_bool(&mut self, value: bool) {
        self.write_u8(u8::from(value));
    }

    /// Write a `u32` length prefix followed by the raw UTF-8 bytes, no
    /// terminator.
    pub fn write_string(&mut self, value: &str) {
        self.write_u32(value.len() as u32);
        self.write_raw(value.as_bytes());
    }

    /// Write raw bytes with no length prefix. Used for dirty bitmasks whose
    /// length is implied by the receiver's property count.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_raw(bytes);
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        let value = u16::from_ne_bytes([bytes[0], bytes[1]]);
        Ok(if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        })
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        let value = u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        Ok(if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        })
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        let value = u64::from_ne_bytes(raw);
        Ok(if self.swap_endian {
            value.swap_bytes()
        } else {
            value
        })
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    /// Read a length-prefixed string. Rejects prefixes larger than the
    /// remaining payload or the global payload cap before allocating.
    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::MalformedPayload(format!(
                "string length prefix {len} exceeds payload cap"
            )));
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::MalformedPayload("string is not valid UTF-8".into()))
    }

    /// Read exactly `count` raw bytes.
    pub fn read_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        Ok(self.take(count)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_roundtrip() {
        let mut buf = WireBuffer::new();
        buf.write_u8(0xAB);
        buf.write_u16(0xBEEF);
        buf.write_u32(0xDEAD_BEEF);
        buf.write_u64(0x0123_4567_89AB_CDEF);
        buf.write_f32(3.5);
        buf.write_f64(-2.25);
        buf.write_bool(true);

        assert_eq!(buf.read_u8().unwrap(), 0xAB);
        assert_eq!(buf.read_u16().unwrap(), 0xBEEF);
        assert_eq!(buf.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(buf.read_u64().unwrap(), 0x0123_4567_89AB_CDEF);
        assert_eq!(buf.read_f32().unwrap(), 3.5);
        assert_eq!(buf.read_f64().unwrap(), -2.25);
        assert!(buf.read_bool().unwrap());
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_string_roundtrip() {
        let mut buf = WireBuffer::new();
        buf.write_string("hello");
        buf.write_string("");
        assert_eq!(buf.read_string().unwrap(), "hello");
        assert_eq!(buf.read_string().unwrap(), "");
    }

    #[test]
    fn test_read_past_end_is_truncated_payload() {
        let mut buf = WireBuffer::new();
        buf.write_u16(7);
        buf.read_u16().unwrap();
        match buf.read_u8() {
            Err(ProtocolError::TruncatedPayload { needed, remaining }) => {
                assert_eq!(needed, 1);
                assert_eq!(remaining, 0);
            }
            other => panic!("expected TruncatedPayload, got {other:?}"),
        }
    }

    #[test]
    fn test_string_prefix_larger_than_payload() {
        let mut buf = WireBuffer::new();
        buf.write_u32(100); // claims 100 bytes follow
        buf.write_u8(1);
        assert!(buf.read_string().is_err());
    }

    #[test]
    fn test_growth_preserves_content() {
        let mut buf = WireBuffer::with_capacity(4);
        for i in 0..BUFFER_GROWTH_INCREMENT * 2 {
            buf.write_u8((i % 251) as u8);
        }
        for i in 0..BUFFER_GROWTH_INCREMENT * 2 {
            assert_eq!(buf.read_u8().unwrap(), (i % 251) as u8);
        }
    }

    #[test]
    fn test_endian_swap_roundtrip() {
        // A swapped writer feeding a swapped reader is transparent.
        let mut buf = WireBuffer::new();
        buf.set_swap_endian(true);
        buf.write_u32(0x1234_5678);
        buf.write_f32(1.5);
        assert_eq!(buf.read_u32().unwrap(), 0x1234_5678);
        assert_eq!(buf.read_f32().unwrap(), 1.5);

        // A swapped writer feeding a native reader shows swapped bytes.
        let mut swapped = WireBuffer::new();
        swapped.set_swap_endian(true);
        swapped.write_u32(0x1234_5678);
        let mut native = WireBuffer::from_datagram(swapped.as_written());
        assert_eq!(native.read_u32().unwrap(), 0x7856_3412);
    }

    #[test]
    fn test_truncate_written() {
        let mut buf = WireBuffer::new();
        buf.write_u64(1);
        buf.truncate_written(3);
        assert_eq!(buf.remaining(), 3);
        assert!(buf.read_u32().is_err());
    }

    #[test]
    fn test_datagram_view() {
        let mut out = WireBuffer::new();
        out.write_u32(42);
        out.write_string("abc");
        let datagram = out.into_bytes();

        let mut inbound = WireBuffer::from_datagram(&datagram);
        assert_eq!(inbound.read_u32().unwrap(), 42);
        assert_eq!(inbound.read_string().unwrap(), "abc");
        assert!(inbound.is_exhausted());
    }
}
