//! # Replicated Entity
//!
//! The dirty-tracked property table used by simulation entities to support
//! full-state snapshot encoding (for newly scoped entities) and delta
//! encoding (for already-scoped entities each tick).
//!
//! ## Contract
//! Property registration order is fixed for the entity's lifetime and is
//! the implicit index used in delta bitmasks. Sender and receiver must
//! construct entities of a given type with identical registration order;
//! that is a correctness precondition the `EntityFactory` upholds, not a
//! runtime check. Receiving a delta requires the peer to already hold a
//! full snapshot — the tick orchestrator guarantees Scope precedes the
//! first delta for every (entity, connection) pair.
//!
//! ## Wire encodings
//! - snapshot body: `property_count: u32`, then every value in
//!   registration order
//! - delta body: `property_count: u32`, a dirty bitmask of
//!   `ceil(property_count / 8)` bytes, then only the dirty values in
//!   registration order
//!
//! A body whose property count or bitmask shape disagrees with the
//! receiver's locally-known registration is a fatal protocol error for
//! that connection; desynchronization cannot be locally repaired.

use crate::core::wire::WireBuffer;
use crate::error::{constants, ProtocolError, Result};
use crate::replication::property::PropertyValue;
use std::collections::HashMap;

/// Network identity of a replicated entity, assigned by the server.
pub type EntityId = u32;

/// Identifies an entity's type so the receiving side can construct a
/// property table with the canonical registration order.
pub type EntityTypeId = u32;

/// A single registered property: name, current value, dirty flag.
#[derive(Debug, Clone)]
struct ReplicatedProperty {
    name: String,
    value: PropertyValue,
    dirty: bool,
}

/// Dirty-tracked ordered property table.
#[derive(Debug, Clone)]
pub struct ReplicatedEntity {
    type_id: EntityTypeId,
    properties: Vec<ReplicatedProperty>,
    index_by_name: HashMap<String, usize>,
    finalized: bool,
}

impl ReplicatedEntity {
    pub fn new(type_id: EntityTypeId) -> Self {
        Self {
            type_id,
            properties: Vec::new(),
            index_by_name: HashMap::new(),
            finalized: false,
        }
    }

    pub fn type_id(&self) -> EntityTypeId {
        self.type_id
    }

    pub fn property_count(&self) -> usize {
        self.properties.len()
    }

    /// Append a property to the table. Fails once `finalize` has locked
    /// the registration order, or if the name is already taken.
    pub fn register_property(&mut self, name: &str, initial: PropertyValue) -> Result<()> {
        if self.finalized {
            return Err(ProtocolError::ReplicationError(
                constants::ERR_ENTITY_FINALIZED.into(),
            ));
        }
        if self.index_by_name.contains_key(name) {
            return Err(ProtocolError::ReplicationError(format!(
                "property {name:?} registered twice"
            )));
        }

        self.index_by_name
            .insert(name.to_string(), self.properties.len());
        self.properties.push(ReplicatedProperty {
            name: name.to_string(),
            value: initial,
            dirty: false,
        });
        Ok(())
    }

    /// Lock the property list against further registration.
    pub fn finalize(&mut self) {
        self.finalized = true;
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    fn index_of(&self, name: &str) -> Result<usize> {
        self.index_by_name.get(name).copied().ok_or_else(|| {
            ProtocolError::ReplicationError(format!(
                "{}: {name:?}",
                constants::ERR_UNKNOWN_PROPERTY
            ))
        })
    }

    /// Read a property's current value.
    pub fn get(&self, name: &str) -> Result<&PropertyValue> {
        Ok(&self.properties[self.index_of(name)?].value)
    }

    /// Assign a property and mark it dirty for the next delta. The new
    /// value must carry the registered type.
    pub fn set(&mut self, name: &str, value: PropertyValue) -> Result<()> {
        let index = self.index_of(name)?;
        let slot = &mut self.properties[index];
        if !slot.value.same_type(&value) {
            return Err(ProtocolError::ReplicationError(format!(
                "{}: {name:?}",
                constants::ERR_PROPERTY_TYPE_MISMATCH
            )));
        }
        slot.value = value;
        slot.dirty = true;
        Ok(())
    }

    /// Mark a property dirty without changing its value. The only other
    /// write path that sets dirty flags is `set`.
    pub fn mark_dirty(&mut self, name: &str) -> Result<()> {
        let index = self.index_of(name)?;
        self.properties[index].dirty = true;
        Ok(())
    }

    /// True when any property is awaiting delta encoding.
    pub fn has_dirty(&self) -> bool {
        self.properties.iter().any(|p| p.dirty)
    }

    /// Clone every property's current value, in registration order.
    pub fn snapshot_values(&self) -> Vec<PropertyValue> {
        self.properties.iter().map(|p| p.value.clone()).collect()
    }

    /// Conservative upper bound on the encoded size of a full snapshot.
    pub fn snapshot_size_hint(&self) -> usize {
        4 + self
            .properties
            .iter()
            .map(|p| p.value.encoded_size())
            .sum::<usize>()
    }

    /// Write every registered property unconditionally, in registration
    /// order. Used exactly once per (entity, connection) pair, at scope
    /// time. Dirty flags are left untouched.
    pub fn full_snapshot(&self, out: &mut WireBuffer) {
        out.write_u32(self.properties.len() as u32);
        for property in &self.properties {
            property.value.encode(out);
        }
    }

    /// Write the dirty bitmask followed by only the dirty properties'
    /// values in registration order, then clear all dirty flags.
    pub fn delta(&mut self, out: &mut WireBuffer) {
        self.take_delta().encode(out);
    }

    /// Build the delta body for the current dirty set and clear all dirty
    /// flags. The orchestrator encodes one body per entity per tick and
    /// fans it out to every connection that has the entity scoped, so
    /// flags clear exactly once per tick.
    pub fn take_delta(&mut self) -> DeltaBody {
        let count = self.properties.len();
        let mut mask = vec![0u8; count.div_ceil(8)];
        let mut values = Vec::new();

        for (index, property) in self.properties.iter_mut().enumerate() {
            if property.dirty {
                mask[index / 8] |= 1 << (index % 8);
                values.push(property.value.clone());
                property.dirty = false;
            }
        }

        DeltaBody {
            property_count: count as u32,
            mask,
            values,
        }
    }

    /// Apply a decoded snapshot body. The value count and every value's
    /// type must match the local registration.
    pub fn apply_snapshot_body(&mut self, values: &[PropertyValue]) -> Result<()> {
        if values.len() != self.properties.len() {
            return Err(ProtocolError::ReplicationDesync(format!(
                "snapshot carries {} properties, local entity type {:#x} registers {}",
                values.len(),
                self.type_id,
                self.properties.len()
            )));
        }

        for (slot, value) in self.properties.iter_mut().zip(values) {
            if !slot.value.same_type(value) {
                return Err(ProtocolError::ReplicationDesync(format!(
                    "snapshot value type mismatch for property {:?}",
                    slot.name
                )));
            }
            slot.value = value.clone();
        }
        Ok(())
    }

    /// Apply a decoded delta body. The sender's property count and bitmask
    /// shape must match the local registration exactly.
    pub fn apply_delta_body(&mut self, body: &DeltaBody) -> Result<()> {
        let count = self.properties.len();
        if body.property_count as usize != count {
            return Err(ProtocolError::ReplicationDesync(format!(
                "delta bitmask sized for {} properties, local entity type {:#x} registers {count}",
                body.property_count, self.type_id
            )));
        }

        let mut values = body.values.iter();
        for (index, slot) in self.properties.iter_mut().enumerate() {
            if body.mask[index / 8] & (1 << (index % 8)) == 0 {
                continue;
            }
            let value = values.next().ok_or_else(|| {
                ProtocolError::MalformedPayload("delta bitmask and value list disagree".into())
            })?;
            if !slot.value.same_type(value) {
                return Err(ProtocolError::ReplicationDesync(format!(
                    "delta value type mismatch for property {:?}",
                    slot.name
                )));
            }
            slot.value = value.clone();
        }
        Ok(())
    }

    /// Decode a snapshot body from the wire and apply it.
    pub fn apply_snapshot(&mut self, input: &mut WireBuffer) -> Result<()> {
        let values = decode_snapshot_body(input)?;
        self.apply_snapshot_body(&values)
    }

    /// Decode a delta body from the wire and apply it.
    pub fn apply_delta(&mut self, input: &mut WireBuffer) -> Result<()> {
        let body = DeltaBody::decode(input)?;
        self.apply_delta_body(&body)
    }
}

/// Decode a snapshot body (count + tagged values) without consulting a
/// local schema. Shape validation against the schema happens on apply.
pub fn decode_snapshot_body(input: &mut WireBuffer) -> Result<Vec<PropertyValue>> {
    let count = input.read_u32()? as usize;
    let mut values = Vec::with_capacity(count.min(256));
    for _ in 0..count {
        values.push(PropertyValue::decode(input)?);
    }
    Ok(values)
}

/// A decoded delta body: the sender's property count, its dirty bitmask,
/// and the dirty values in registration order.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaBody {
    pub property_count: u32,
    pub mask: Vec<u8>,
    pub values: Vec<PropertyValue>,
}

impl DeltaBody {
    pub fn encode(&self, out: &mut WireBuffer) {
        out.write_u32(self.property_count);
        out.write_bytes(&self.mask);
        for value in &self.values {
            value.encode(out);
        }
    }

    pub fn decode(input: &mut WireBuffer) -> Result<Self> {
        let property_count = input.read_u32()?;
        let mask_len = (property_count as usize).div_ceil(8);
        if mask_len > input.remaining() {
            return Err(ProtocolError::TruncatedPayload {
                needed: mask_len,
                remaining: input.remaining(),
            });
        }
        let mask = input.read_bytes(mask_len)?;

        // Bits beyond the declared property count must be clear.
        for index in property_count as usize..mask_len * 8 {
            if mask[index / 8] & (1 << (index % 8)) != 0 {
                return Err(ProtocolError::MalformedPayload(
                    "delta bitmask sets bits past the property count".into(),
                ));
            }
        }

        let set_bits = mask.iter().map(|b| b.count_ones() as usize).sum();
        let mut values = Vec::with_capacity(set_bits);
        for _ in 0..set_bits {
            values.push(PropertyValue::decode(input)?);
        }

        Ok(Self {
            property_count,
            mask,
            values,
        })
    }

    pub fn encoded_size(&self) -> usize {
        4 + self.mask.len() + self.values.iter().map(PropertyValue::encoded_size).sum::<usize>()
    }
}

/// Client-side table mapping entity type ids to constructors. A
/// constructor produces a finalized entity with the type's canonical
/// registration order — the same order the server used, which is what
/// makes delta bitmask indices line up.
#[derive(Default)]
pub struct EntityFactory {
    constructors: HashMap<EntityTypeId, Box<dyn Fn() -> ReplicatedEntity + Send>>,
}

impl EntityFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, type_id: EntityTypeId, constructor: F)
    where
        F: Fn() -> ReplicatedEntity + Send + 'static,
    {
        self.constructors.insert(type_id, Box::new(constructor));
    }

    /// Construct a blank entity of the given type. An unknown type id in a
    /// Scope message means the peers disagree about the set of replicable
    /// types.
    pub fn spawn(&self, type_id: EntityTypeId) -> Result<ReplicatedEntity> {
        let constructor = self.constructors.get(&type_id).ok_or_else(|| {
            ProtocolError::ReplicationDesync(format!("unknown entity type id {type_id:#x}"))
        })?;
        Ok(constructor())
    }
}
