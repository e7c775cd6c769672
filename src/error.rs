//! # Error Types
//!
//! Comprehensive error handling for the replication protocol.
//!
//! This module defines all error variants that can occur during protocol
//! operations, from truncated payloads to stage-validation failures.
//!
//! ## Error Categories
//! - **Decode errors**: truncated or malformed payloads
//! - **Protocol errors**: out-of-stage messages, version mismatches,
//!   desynchronized replication state
//! - **Transport errors**: peer unreachable, send failures
//!
//! No error in this crate is silently swallowed: any parse or
//! stage-validation failure terminates the offending connection rather than
//! attempting partial recovery, because partial application of a malformed
//! message risks silent state divergence between server and client.

use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
/// Static strings are borrowed, avoiding heap allocations for common cases.
/// Several of these double as disconnect reasons visible to the remote peer.
pub mod constants {
    /// Disconnect reason sent on a Handshake protocol version disagreement.
    pub const REASON_PROTOCOL_MISMATCH: &str = "protocol mismatch";
    /// Disconnect reason sent when a message is illegal in the current stage.
    pub const REASON_OUT_OF_STAGE: &str = "message not legal in current connection stage";
    /// Disconnect reason sent when a payload could not be decoded.
    pub const REASON_MALFORMED_PAYLOAD: &str = "malformed message payload";
    /// Disconnect reason sent when a peer exceeds its inbound queue limit.
    pub const REASON_QUEUE_OVERFLOW: &str = "too much queued data";
    /// Disconnect reason sent when replication state cannot be reconciled.
    pub const REASON_REPLICATION_DESYNC: &str = "replication state desynchronized";
    /// Disconnect reason used on local teardown.
    pub const REASON_SHUTDOWN: &str = "server shutdown";

    /// Replicated property table errors.
    pub const ERR_UNKNOWN_PROPERTY: &str = "unknown replicated property";
    pub const ERR_PROPERTY_TYPE_MISMATCH: &str = "replicated property type mismatch";
    pub const ERR_ENTITY_FINALIZED: &str = "entity property table already finalized";
}

/// Primary error type for all protocol operations.
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Fewer bytes remain in a wire buffer than a read requires. Always
    /// fatal to the message; recovered at the connection level by
    /// disconnecting the offending peer.
    #[error("truncated payload: needed {needed} bytes, {remaining} remain")]
    TruncatedPayload { needed: usize, remaining: usize },

    /// A message that is well-formed at the byte level but illegal given
    /// current connection state. Fatal to the connection.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A payload whose bytes cannot be decoded: an out-of-range length
    /// prefix, an unknown type code, invalid UTF-8, or a bitmask with
    /// stray bits. Fatal to the connection.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// A payload that decodes cleanly but disagrees with the receiver's
    /// locally-known entity schema. Fatal to the connection.
    #[error("replication desync: {0}")]
    ReplicationDesync(String),

    /// Handshake protocol version disagreement. Fatal to the connection at
    /// the Authentication stage only.
    #[error("protocol version mismatch: ours {ours}, theirs {theirs}")]
    VersionMismatch { ours: u32, theirs: u32 },

    /// Reported by the transport boundary; treated as an implicit
    /// disconnect, never retried.
    #[error("transport error: {0}")]
    TransportError(String),

    /// The connection handle refers to a slot that has been freed or
    /// recycled for a newer peer.
    #[error("connection closed")]
    ConnectionClosed,

    /// An unknown message type tag was read off the wire.
    #[error("unknown message type tag: {0:#x}")]
    UnknownMessageType(u32),

    /// Replicated property table misuse (registration after finalize,
    /// unknown name, type mismatch on assignment).
    #[error("replication error: {0}")]
    ReplicationError(String),

    /// Configuration load or validation failure.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError.
pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    /// The reason string a remote peer should receive when this error
    /// terminates its connection.
    pub fn disconnect_reason(&self) -> &'static str {
        match self {
            ProtocolError::TruncatedPayload { .. } => constants::REASON_MALFORMED_PAYLOAD,
            ProtocolError::ProtocolViolation(_) => constants::REASON_OUT_OF_STAGE,
            ProtocolError::MalformedPayload(_) => constants::REASON_MALFORMED_PAYLOAD,
            ProtocolError::ReplicationDesync(_) => constants::REASON_REPLICATION_DESYNC,
            ProtocolError::VersionMismatch { .. } => constants::REASON_PROTOCOL_MISMATCH,
            ProtocolError::UnknownMessageType(_) => constants::REASON_OUT_OF_STAGE,
            ProtocolError::ReplicationError(_) => constants::REASON_REPLICATION_DESYNC,
            _ => constants::REASON_MALFORMED_PAYLOAD,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reasons() {
        let err = ProtocolError::VersionMismatch { ours: 7, theirs: 8 };
        assert_eq!(err.disconnect_reason(), constants::REASON_PROTOCOL_MISMATCH);

        let err = ProtocolError::TruncatedPayload {
            needed: 4,
            remaining: 1,
        };
        assert_eq!(err.disconnect_reason(), constants::REASON_MALFORMED_PAYLOAD);

        // Undecodable bytes and schema disagreement are not stage errors.
        let err = ProtocolError::MalformedPayload("stray mask bits".into());
        assert_eq!(err.disconnect_reason(), constants::REASON_MALFORMED_PAYLOAD);

        let err = ProtocolError::ReplicationDesync("property count".into());
        assert_eq!(err.disconnect_reason(), constants::REASON_REPLICATION_DESYNC);

        let err = ProtocolError::ProtocolViolation("handshake replay".into());
        assert_eq!(err.disconnect_reason(), constants::REASON_OUT_OF_STAGE);
    }

    #[test]
    fn test_error_display() {
        let err = ProtocolError::UnknownMessageType(0xFF);
        assert!(err.to_string().contains("0xff"));
    }
}
