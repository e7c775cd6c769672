//! # Message Catalog
//!
//! The closed set of message variants that cross the wire, as a tagged
//! enum with an exhaustive match everywhere it is consumed. The catalog is
//! known at compile time; adding a variant is a compiler-checked change.
//!
//! ## Wire Format
//! ```text
//! [type_tag(4)] [sequence_id(4)] [payload(N)]
//! ```
//! Header first, for every variant. Sequence ids are assigned at pack time
//! from a process-wide monotonically increasing counter; they are not
//! sender-scoped and are never reset per connection.
//!
//! ## Decode contract
//! `unpack` is only ever called on a buffer whose type tag has already
//! been peeled off and matched. It re-validates
//! `minimum_payload_length()` before reading fields and fails with
//! `TruncatedPayload` otherwise; a malformed length prefix or type code is
//! a `MalformedPayload`. Either way the connection that sent it is torn
//! down — never a crash, never partial application.

use crate::core::wire::WireBuffer;
use crate::error::{ProtocolError, Result};
use crate::replication::entity::{decode_snapshot_body, DeltaBody, EntityId, EntityTypeId};
use crate::replication::property::PropertyValue;
use crate::replication::ReplicatedEntity;
use std::sync::atomic::{AtomicU32, Ordering};

/// Stable wire constants identifying each message variant.
pub mod tag {
    pub const HANDSHAKE: u32 = 0x03;
    pub const SIMULATION_COMMIT: u32 = 0x04;
    pub const DISCONNECT: u32 = 0x05;
    pub const SCOPE: u32 = 0x06;
    pub const EXECUTE_RPC: u32 = 0x07;
    pub const DATA_BLOCKS: u32 = 0x08;
    pub const SIMULATION_DELTA: u32 = 0x09;

    /// Whether the value names a variant in the catalog.
    pub fn is_known(value: u32) -> bool {
        matches!(
            value,
            HANDSHAKE
                | SIMULATION_COMMIT
                | DISCONNECT
                | SCOPE
                | EXECUTE_RPC
                | DATA_BLOCKS
                | SIMULATION_DELTA
        )
    }
}

/// Byte length of the sequence-id field that follows the type tag.
const SEQUENCE_ID_LEN: usize = 4;

/// Byte length of the full common header (type tag + sequence id).
pub const HEADER_LEN: usize = 8;

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

/// Allocate the next process-wide sequence id.
fn next_sequence_id() -> u32 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// One entity's full snapshot inside a Scope message.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeEntry {
    pub net_id: EntityId,
    pub type_id: EntityTypeId,
    pub values: Vec<PropertyValue>,
}

impl ScopeEntry {
    /// Capture an entity's current state for scoping.
    pub fn from_entity(net_id: EntityId, entity: &ReplicatedEntity) -> Self {
        Self {
            net_id,
            type_id: entity.type_id(),
            values: entity.snapshot_values(),
        }
    }

    fn encode(&self, out: &mut WireBuffer) {
        out.write_u32(self.net_id);
        out.write_u32(self.type_id);
        out.write_u32(self.values.len() as u32);
        for value in &self.values {
            value.encode(out);
        }
    }

    fn decode(input: &mut WireBuffer) -> Result<Self> {
        let net_id = input.read_u32()?;
        let type_id = input.read_u32()?;
        let values = decode_snapshot_body(input)?;
        Ok(Self {
            net_id,
            type_id,
            values,
        })
    }

    fn encoded_size(&self) -> usize {
        12 + self.values.iter().map(PropertyValue::encoded_size).sum::<usize>()
    }
}

/// One entity's delta inside a SimulationDelta message.
#[derive(Debug, Clone, PartialEq)]
pub struct DeltaEntry {
    pub net_id: EntityId,
    pub body: DeltaBody,
}

impl DeltaEntry {
    fn encode(&self, out: &mut WireBuffer) {
        out.write_u32(self.net_id);
        self.body.encode(out);
    }

    fn decode(input: &mut WireBuffer) -> Result<Self> {
        let net_id = input.read_u32()?;
        let body = DeltaBody::decode(input)?;
        Ok(Self { net_id, body })
    }

    fn encoded_size(&self) -> usize {
        4 + self.body.encoded_size()
    }
}

/// A static definition shipped to clients during the Loading stage.
#[derive(Debug, Clone, PartialEq)]
pub struct DataBlockDef {
    pub id: u32,
    pub name: String,
}

/// The message catalog.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Version challenge; the only authentication performed.
    Handshake {
        major: u8,
        minor: u8,
        revision: u8,
        build: u32,
        protocol: u32,
    },
    /// Tick boundary marker; carries no payload.
    SimulationCommit,
    /// Connection teardown with a human-readable reason.
    Disconnect { reason: String },
    /// Full snapshots of entities newly visible to the recipient.
    Scope { entities: Vec<ScopeEntry> },
    /// Invoke a named remote procedure.
    ExecuteRpc { name: String },
    /// Static definitions streamed during Loading.
    DataBlocks { blocks: Vec<DataBlockDef> },
    /// Dirty-property deltas for already-scoped entities.
    SimulationDelta { entities: Vec<DeltaEntry> },
}

impl Message {
    /// The stable wire tag for this variant.
    pub fn type_tag(&self) -> u32 {
        match self {
            Message::Handshake { .. } => tag::HANDSHAKE,
            Message::SimulationCommit => tag::SIMULATION_COMMIT,
            Message::Disconnect { .. } => tag::DISCONNECT,
            Message::Scope { .. } => tag::SCOPE,
            Message::ExecuteRpc { .. } => tag::EXECUTE_RPC,
            Message::DataBlocks { .. } => tag::DATA_BLOCKS,
            Message::SimulationDelta { .. } => tag::SIMULATION_DELTA,
        }
    }

    /// Minimum bytes a variant's payload occupies after the common header.
    /// Callers must verify at least this much remains before decoding
    /// variant fields.
    pub fn minimum_payload_length(type_tag: u32) -> usize {
        match type_tag {
            tag::HANDSHAKE => 3 + 4 + 4,
            tag::SIMULATION_COMMIT => 0,
            // An empty string or empty entry list is still a u32 prefix.
            tag::DISCONNECT
            | tag::SCOPE
            | tag::EXECUTE_RPC
            | tag::DATA_BLOCKS
            | tag::SIMULATION_DELTA => 4,
            _ => 0,
        }
    }

    /// Conservative upper bound on the bytes needed to pack this message,
    /// used to pre-size an outbound buffer and avoid reallocation
    /// mid-pack.
    pub fn required_memory(&self) -> usize {
        HEADER_LEN
            + match self {
                Message::Handshake { .. } => 11,
                Message::SimulationCommit => 0,
                Message::Disconnect { reason } => 4 + reason.len(),
                Message::ExecuteRpc { name } => 4 + name.len(),
                Message::Scope { entities } => {
                    4 + entities.iter().map(ScopeEntry::encoded_size).sum::<usize>()
                }
                Message::DataBlocks { blocks } => {
                    4 + blocks.iter().map(|b| 8 + b.name.len()).sum::<usize>()
                }
                Message::SimulationDelta { entities } => {
                    4 + entities.iter().map(DeltaEntry::encoded_size).sum::<usize>()
                }
            }
    }

    /// Encode the common header followed by the variant payload. Returns
    /// the sequence id assigned to this message.
    pub fn pack(&self, out: &mut WireBuffer) -> u32 {
        let sequence_id = next_sequence_id();
        out.write_u32(self.type_tag());
        out.write_u32(sequence_id);

        match self {
            Message::Handshake {
                major,
                minor,
                revision,
                build,
                protocol,
            } => {
                out.write_u8(*major);
                out.write_u8(*minor);
                out.write_u8(*revision);
                out.write_u32(*build);
                out.write_u32(*protocol);
            }
            Message::SimulationCommit => {}
            Message::Disconnect { reason } => out.write_string(reason),
            Message::ExecuteRpc { name } => out.write_string(name),
            Message::Scope { entities } => {
                out.write_u32(entities.len() as u32);
                for entry in entities {
                    entry.encode(out);
                }
            }
            Message::DataBlocks { blocks } => {
                out.write_u32(blocks.len() as u32);
                for block in blocks {
                    out.write_u32(block.id);
                    out.write_string(&block.name);
                }
            }
            Message::SimulationDelta { entities } => {
                out.write_u32(entities.len() as u32);
                for entry in entities {
                    entry.encode(out);
                }
            }
        }

        sequence_id
    }

    /// Decode the variant matching `type_tag` from a buffer positioned
    /// just past the tag. Returns the message and its sequence id.
    pub fn unpack(type_tag: u32, input: &mut WireBuffer) -> Result<(Self, u32)> {
        let minimum = SEQUENCE_ID_LEN + Self::minimum_payload_length(type_tag);
        if input.remaining() < minimum {
            return Err(ProtocolError::TruncatedPayload {
                needed: minimum,
                remaining: input.remaining(),
            });
        }

        let sequence_id = input.read_u32()?;

        let message = match type_tag {
            tag::HANDSHAKE => Message::Handshake {
                major: input.read_u8()?,
                minor: input.read_u8()?,
                revision: input.read_u8()?,
                build: input.read_u32()?,
                protocol: input.read_u32()?,
            },
            tag::SIMULATION_COMMIT => Message::SimulationCommit,
            tag::DISCONNECT => Message::Disconnect {
                reason: input.read_string()?,
            },
            tag::EXECUTE_RPC => Message::ExecuteRpc {
                name: input.read_string()?,
            },
            tag::SCOPE => {
                let count = input.read_u32()? as usize;
                let mut entities = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    entities.push(ScopeEntry::decode(input)?);
                }
                Message::Scope { entities }
            }
            tag::DATA_BLOCKS => {
                let count = input.read_u32()? as usize;
                let mut blocks = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    blocks.push(DataBlockDef {
                        id: input.read_u32()?,
                        name: input.read_string()?,
                    });
                }
                Message::DataBlocks { blocks }
            }
            tag::SIMULATION_DELTA => {
                let count = input.read_u32()? as usize;
                let mut entities = Vec::with_capacity(count.min(256));
                for _ in 0..count {
                    entities.push(DeltaEntry::decode(input)?);
                }
                Message::SimulationDelta { entities }
            }
            unknown => return Err(ProtocolError::UnknownMessageType(unknown)),
        };

        Ok((message, sequence_id))
    }

    /// Pack into a fresh buffer pre-sized from `required_memory`.
    pub fn to_wire(&self) -> WireBuffer {
        let mut out = WireBuffer::with_capacity(self.required_memory());
        self.pack(&mut out);
        out
    }
}
