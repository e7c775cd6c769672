//! Server-side state for one connected peer.
//!
//! Outbound messages are coalesced per tick into one reliable and one
//! unreliable buffer rather than sent one datagram per message; the
//! orchestrator hands each non-empty buffer to the transport during its
//! flush phase. Inbound datagrams queue here between ticks so that all
//! dispatch happens on the tick path, bounded by the configured limit.

use crate::core::message::Message;
use crate::core::wire::WireBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::Stage;
use crate::replication::ScopeSet;
use crate::transport::PeerId;
use bytes::Bytes;
use std::collections::VecDeque;

/// One peer as the server sees it.
pub struct RemoteClient {
    peer: PeerId,
    stage: Stage,
    opposite_endian: bool,
    scope: ScopeSet,
    reliable_out: WireBuffer,
    unreliable_out: WireBuffer,
    inbound: VecDeque<WireBuffer>,
    initial_scope_sent: bool,
    closing: bool,
}

impl RemoteClient {
    pub fn new(peer: PeerId) -> Self {
        Self {
            peer,
            stage: Stage::Authentication,
            opposite_endian: false,
            scope: ScopeSet::new(),
            reliable_out: WireBuffer::new(),
            unreliable_out: WireBuffer::new(),
            inbound: VecDeque::new(),
            initial_scope_sent: false,
            closing: false,
        }
    }

    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn advance_stage(&mut self, next: Stage) -> Result<()> {
        self.stage.advance(next)
    }

    pub fn opposite_endian(&self) -> bool {
        self.opposite_endian
    }

    /// Record that the peer encodes in the opposite byte order. Outbound
    /// buffers and every inbound datagram still queued swap from here on;
    /// anything the peer sent before detection latched was encoded in its
    /// byte order too.
    pub fn set_opposite_endian(&mut self) {
        self.opposite_endian = true;
        self.reliable_out.set_swap_endian(true);
        self.unreliable_out.set_swap_endian(true);
        for buffer in &mut self.inbound {
            buffer.set_swap_endian(true);
        }
    }

    pub fn scope(&self) -> &ScopeSet {
        &self.scope
    }

    pub fn scope_mut(&mut self) -> &mut ScopeSet {
        &mut self.scope
    }

    /// Whether the initial (possibly empty) Scope of the Loading stage
    /// has been queued. The client acknowledges it to enter Gameplay, so
    /// it must be sent even when nothing is visible.
    pub fn initial_scope_sent(&self) -> bool {
        self.initial_scope_sent
    }

    pub fn mark_initial_scope_sent(&mut self) {
        self.initial_scope_sent = true;
    }

    /// Append a message to this tick's reliable datagram.
    pub fn queue_reliable(&mut self, message: &Message) {
        message.pack(&mut self.reliable_out);
    }

    /// Append a message to this tick's unreliable datagram.
    pub fn queue_unreliable(&mut self, message: &Message) {
        message.pack(&mut self.unreliable_out);
    }

    /// Take the coalesced reliable datagram, if any messages were queued.
    pub fn take_reliable(&mut self) -> Option<Bytes> {
        take_datagram(&mut self.reliable_out, self.opposite_endian)
    }

    /// Take the coalesced unreliable datagram, if any messages were queued.
    pub fn take_unreliable(&mut self) -> Option<Bytes> {
        take_datagram(&mut self.unreliable_out, self.opposite_endian)
    }

    /// Queue a received datagram for dispatch on the next tick.
    pub fn push_inbound(&mut self, payload: &[u8], limit: usize) -> Result<()> {
        if self.inbound.len() >= limit {
            return Err(ProtocolError::ProtocolViolation(format!(
                "inbound datagram queue limit {limit} exceeded"
            )));
        }
        let mut buffer = WireBuffer::from_datagram(payload);
        buffer.set_swap_endian(self.opposite_endian);
        self.inbound.push_back(buffer);
        Ok(())
    }

    /// The datagram currently being dispatched, partially read across
    /// calls when the per-tick message budget splits it.
    pub fn inbound_front_mut(&mut self) -> Option<&mut WireBuffer> {
        self.inbound.front_mut()
    }

    pub fn pop_inbound_front(&mut self) {
        self.inbound.pop_front();
    }

    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Mark the connection for teardown after this tick's flush, so a
    /// queued Disconnect still reaches the peer.
    pub fn begin_close(&mut self) {
        self.closing = true;
        self.inbound.clear();
    }

    pub fn is_closing(&self) -> bool {
        self.closing
    }
}

fn take_datagram(queue: &mut WireBuffer, opposite_endian: bool) -> Option<Bytes> {
    if queue.written_len() == 0 {
        return None;
    }
    let mut replacement = WireBuffer::new();
    replacement.set_swap_endian(opposite_endian);
    let full = std::mem::replace(queue, replacement);
    Some(full.into_bytes())
}
