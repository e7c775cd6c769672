//! Replicated property values and their wire encoding.
//!
//! The value enum is closed: only types the wire codec can carry may be
//! registered on an entity. Each value is encoded as a one-byte type code
//! followed by the value itself, so a receiver can detect a malformed or
//! mismatched payload without trusting the sender's schema.

use crate::core::wire::WireBuffer;
use crate::error::{ProtocolError, Result};

/// Wire type codes. Stable constants; changing one is a protocol break.
mod code {
    pub const U32: u8 = 0x01;
    pub const U64: u8 = 0x02;
    pub const F32: u8 = 0x03;
    pub const F64: u8 = 0x04;
    pub const BOOL: u8 = 0x05;
    pub const STRING: u8 = 0x06;
    pub const VEC3: u8 = 0x07;
}

/// A single replicated property value.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    String(String),
    /// Three-component float vector (positions, velocities).
    Vec3([f32; 3]),
}

impl PropertyValue {
    /// The wire type code for this value.
    pub fn type_code(&self) -> u8 {
        match self {
            PropertyValue::U32(_) => code::U32,
            PropertyValue::U64(_) => code::U64,
            PropertyValue::F32(_) => code::F32,
            PropertyValue::F64(_) => code::F64,
            PropertyValue::Bool(_) => code::BOOL,
            PropertyValue::String(_) => code::STRING,
            PropertyValue::Vec3(_) => code::VEC3,
        }
    }

    /// True when `other` carries the same variant, regardless of value.
    pub fn same_type(&self, other: &PropertyValue) -> bool {
        self.type_code() == other.type_code()
    }

    /// Conservative upper bound on the encoded size of this value,
    /// including the type code byte.
    pub fn encoded_size(&self) -> usize {
        1 + match self {
            PropertyValue::U32(_) | PropertyValue::F32(_) => 4,
            PropertyValue::U64(_) | PropertyValue::F64(_) => 8,
            PropertyValue::Bool(_) => 1,
            PropertyValue::String(s) => 4 + s.len(),
            PropertyValue::Vec3(_) => 12,
        }
    }

    /// Encode the type code followed by the value.
    pub fn encode(&self, out: &mut WireBuffer) {
        out.write_u8(self.type_code());
        match self {
            PropertyValue::U32(v) => out.write_u32(*v),
            PropertyValue::U64(v) => out.write_u64(*v),
            PropertyValue::F32(v) => out.write_f32(*v),
            PropertyValue::F64(v) => out.write_f64(*v),
            PropertyValue::Bool(v) => out.write_bool(*v),
            PropertyValue::String(v) => out.write_string(v),
            PropertyValue::Vec3(v) => {
                out.write_f32(v[0]);
                out.write_f32(v[1]);
                out.write_f32(v[2]);
            }
        }
    }

    /// Decode a value from its type code. An unknown code is a malformed
    /// payload; a short buffer is a truncated payload.
    pub fn decode(input: &mut WireBuffer) -> Result<Self> {
        let type_code = input.read_u8()?;
        match type_code {
            code::U32 => Ok(PropertyValue::U32(input.read_u32()?)),
            code::U64 => Ok(PropertyValue::U64(input.read_u64()?)),
            code::F32 => Ok(PropertyValue::F32(input.read_f32()?)),
            code::F64 => Ok(PropertyValue::F64(input.read_f64()?)),
            code::BOOL => Ok(PropertyValue::Bool(input.read_bool()?)),
            code::STRING => Ok(PropertyValue::String(input.read_string()?)),
            code::VEC3 => {
                let x = input.read_f32()?;
                let y = input.read_f32()?;
                let z = input.read_f32()?;
                Ok(PropertyValue::Vec3([x, y, z]))
            }
            unknown => Err(ProtocolError::MalformedPayload(format!(
                "unknown property type code {unknown:#x}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: PropertyValue) {
        let mut buf = WireBuffer::new();
        value.encode(&mut buf);
        assert_eq!(buf.written_len(), value.encoded_size());
        let decoded = PropertyValue::decode(&mut buf).expect("decode");
        assert_eq!(decoded, value);
        assert!(buf.is_exhausted());
    }

    #[test]
    fn test_value_roundtrips() {
        roundtrip(PropertyValue::U32(7));
        roundtrip(PropertyValue::U64(u64::MAX));
        roundtrip(PropertyValue::F32(-0.5));
        roundtrip(PropertyValue::F64(1e300));
        roundtrip(PropertyValue::Bool(false));
        roundtrip(PropertyValue::String("spawn_point".into()));
        roundtrip(PropertyValue::String(String::new()));
        roundtrip(PropertyValue::Vec3([1.0, 0.0, -3.5]));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let mut buf = WireBuffer::new();
        buf.write_u8(0x7F);
        assert!(matches!(
            PropertyValue::decode(&mut buf),
            Err(ProtocolError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_truncated_value() {
        let mut buf = WireBuffer::new();
        PropertyValue::Vec3([1.0, 2.0, 3.0]).encode(&mut buf);
        buf.truncate_written(6);
        assert!(matches!(
            PropertyValue::decode(&mut buf),
            Err(ProtocolError::TruncatedPayload { .. })
        ));
    }

    #[test]
    fn test_same_type() {
        assert!(PropertyValue::U32(1).same_type(&PropertyValue::U32(2)));
        assert!(!PropertyValue::U32(1).same_type(&PropertyValue::U64(1)));
    }
}
