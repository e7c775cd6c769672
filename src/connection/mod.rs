//! # Connection
//!
//! Per-peer state for both roles: the server's view of a connected peer
//! ([`RemoteClient`], stored in a generation-checked [`ConnectionArena`])
//! and the client's whole session ([`ClientSession`]).

pub mod arena;
pub mod remote;
pub mod session;

pub use arena::{ConnectionArena, ConnectionHandle};
pub use remote::RemoteClient;
pub use session::ClientSession;

use crate::core::message::tag;
use crate::core::wire::WireBuffer;
use crate::error::{ProtocolError, Result};

/// Peel the next type tag off an inbound buffer.
///
/// While a connection is still in Authentication its peer's byte order is
/// unknown; if the tag is only recognizable byte-swapped, the peer encodes
/// in the opposite order. The buffer is flipped to swap mode and the
/// caller is told via the second tuple field so it can latch the
/// detection on the connection. Outside the detection window an
/// unrecognizable tag is simply unknown.
pub(crate) fn read_type_tag(buffer: &mut WireBuffer, may_detect: bool) -> Result<(u32, bool)> {
    let raw = buffer.read_u32()?;
    if tag::is_known(raw) {
        return Ok((raw, false));
    }
    if may_detect && tag::is_known(raw.swap_bytes()) {
        buffer.set_swap_endian(!buffer.swaps_endian());
        return Ok((raw.swap_bytes(), true));
    }
    Err(ProtocolError::UnknownMessageType(raw))
}
