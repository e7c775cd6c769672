//! # Transport
//!
//! The seam between the protocol core and whatever actually moves bytes.
//! The orchestrator and client talk to a `Transport` trait object; the
//! in-process [`loopback`] implementation backs the integration tests and
//! lets a server and client run in one process with no sockets.
//!
//! ## Delivery model
//! Two channels per peer: reliable (ordered, never dropped) and
//! unreliable (may be dropped, used for per-tick deltas that the next
//! tick supersedes). Teardown is either immediate (`close`) or deferred
//! until queued reliable data has drained (`close_after_flush`), so a
//! Disconnect message queued just before teardown still reaches the peer.

pub mod loopback;

use crate::error::Result;
use bytes::Bytes;

pub use loopback::{LoopbackEndpoint, LoopbackTransport};

/// Opaque identity of a remote peer, assigned by the transport.
pub type PeerId = u64;

/// One received datagram, tagged with the channel it arrived on.
#[derive(Debug, Clone)]
pub struct InboundDatagram {
    pub peer: PeerId,
    pub reliable: bool,
    pub payload: Bytes,
}

/// Byte-moving backend for one side of the protocol.
pub trait Transport: Send {
    /// Queue a datagram on the reliable, ordered channel.
    fn send_reliable(&mut self, peer: PeerId, payload: Bytes) -> Result<()>;

    /// Queue a datagram on the unreliable channel.
    fn send_unreliable(&mut self, peer: PeerId, payload: Bytes) -> Result<()>;

    /// Tear the link down immediately, discarding queued data.
    fn close(&mut self, peer: PeerId);

    /// Tear the link down once queued reliable data has been delivered.
    fn close_after_flush(&mut self, peer: PeerId);
}
