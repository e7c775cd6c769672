//! In-process transport connecting a server and its clients through
//! shared queues. Nothing is dropped or reordered, which makes protocol
//! behavior deterministic under test; the unreliable channel differs from
//! the reliable one only in what the endpoints are allowed to assume.

use crate::error::{ProtocolError, Result};
use crate::transport::{InboundDatagram, PeerId, Transport};
use bytes::Bytes;
use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Link {
    to_client: VecDeque<InboundDatagram>,
    to_server: VecDeque<InboundDatagram>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    // BTreeMap keeps cross-peer receive order deterministic.
    links: BTreeMap<PeerId, Link>,
}

/// Server-side hub. Clone handles share the same underlying queues, so a
/// test can keep one clone while handing another to the orchestrator.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    shared: Arc<Mutex<Shared>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a link for `peer` and return the client-side endpoint.
    pub fn connect(&self, peer: PeerId) -> LoopbackEndpoint {
        self.shared
            .lock()
            .expect("loopback lock poisoned")
            .links
            .insert(peer, Link::default());
        LoopbackEndpoint {
            shared: Arc::clone(&self.shared),
            peer,
        }
    }

    /// Next datagram sent by any client, lowest peer id first.
    pub fn recv(&self) -> Option<InboundDatagram> {
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        shared
            .links
            .values_mut()
            .find_map(|link| link.to_server.pop_front())
    }

    /// Whether the link to `peer` has been torn down.
    pub fn is_closed(&self, peer: PeerId) -> bool {
        let shared = self.shared.lock().expect("loopback lock poisoned");
        shared.links.get(&peer).is_none_or(|link| link.closed)
    }
}

impl Transport for LoopbackTransport {
    fn send_reliable(&mut self, peer: PeerId, payload: Bytes) -> Result<()> {
        push(&self.shared, peer, payload, true, Direction::ToClient)
    }

    fn send_unreliable(&mut self, peer: PeerId, payload: Bytes) -> Result<()> {
        push(&self.shared, peer, payload, false, Direction::ToClient)
    }

    fn close(&mut self, peer: PeerId) {
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        if let Some(link) = shared.links.get_mut(&peer) {
            link.closed = true;
            link.to_client.clear();
            link.to_server.clear();
        }
    }

    fn close_after_flush(&mut self, peer: PeerId) {
        // Queued data stays deliverable; only further sends are refused.
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        if let Some(link) = shared.links.get_mut(&peer) {
            link.closed = true;
        }
    }
}

/// Client-side end of one loopback link. Clone handles share the link,
/// letting a test read server traffic while a session owns the sender.
#[derive(Clone)]
pub struct LoopbackEndpoint {
    shared: Arc<Mutex<Shared>>,
    peer: PeerId,
}

impl LoopbackEndpoint {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    /// Next datagram sent by the server on this link.
    pub fn recv(&self) -> Option<InboundDatagram> {
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        shared
            .links
            .get_mut(&self.peer)
            .and_then(|link| link.to_client.pop_front())
    }

    pub fn is_closed(&self) -> bool {
        let shared = self.shared.lock().expect("loopback lock poisoned");
        shared.links.get(&self.peer).is_none_or(|link| link.closed)
    }
}

impl Transport for LoopbackEndpoint {
    fn send_reliable(&mut self, _peer: PeerId, payload: Bytes) -> Result<()> {
        push(&self.shared, self.peer, payload, true, Direction::ToServer)
    }

    fn send_unreliable(&mut self, _peer: PeerId, payload: Bytes) -> Result<()> {
        push(&self.shared, self.peer, payload, false, Direction::ToServer)
    }

    fn close(&mut self, _peer: PeerId) {
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        if let Some(link) = shared.links.get_mut(&self.peer) {
            link.closed = true;
            link.to_client.clear();
            link.to_server.clear();
        }
    }

    fn close_after_flush(&mut self, _peer: PeerId) {
        let mut shared = self.shared.lock().expect("loopback lock poisoned");
        if let Some(link) = shared.links.get_mut(&self.peer) {
            link.closed = true;
        }
    }
}

enum Direction {
    ToClient,
    ToServer,
}

fn push(
    shared: &Arc<Mutex<Shared>>,
    peer: PeerId,
    payload: Bytes,
    reliable: bool,
    direction: Direction,
) -> Result<()> {
    let mut shared = shared.lock().expect("loopback lock poisoned");
    let link = shared
        .links
        .get_mut(&peer)
        .ok_or(ProtocolError::ConnectionClosed)?;
    if link.closed {
        return Err(ProtocolError::ConnectionClosed);
    }
    let queue = match direction {
        Direction::ToClient => &mut link.to_client,
        Direction::ToServer => &mut link.to_server,
    };
    queue.push_back(InboundDatagram {
        peer,
        reliable,
        payload,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_both_directions_deliver_in_order() {
        let mut hub = LoopbackTransport::new();
        let mut endpoint = hub.connect(1);

        hub.send_reliable(1, Bytes::from_static(b"a")).unwrap();
        hub.send_unreliable(1, Bytes::from_static(b"b")).unwrap();
        endpoint.send_reliable(0, Bytes::from_static(b"c")).unwrap();

        let first = endpoint.recv().unwrap();
        assert!(first.reliable);
        assert_eq!(&first.payload[..], b"a");
        assert!(!endpoint.recv().unwrap().reliable);
        assert!(endpoint.recv().is_none());

        let inbound = hub.recv().unwrap();
        assert_eq!(inbound.peer, 1);
        assert_eq!(&inbound.payload[..], b"c");
    }

    #[test]
    fn test_close_discards_close_after_flush_drains() {
        let mut hub = LoopbackTransport::new();
        let endpoint = hub.connect(1);

        hub.send_reliable(1, Bytes::from_static(b"kept")).unwrap();
        hub.close_after_flush(1);
        assert!(hub.is_closed(1));
        assert_eq!(&endpoint.recv().unwrap().payload[..], b"kept");
        assert!(matches!(
            hub.send_reliable(1, Bytes::from_static(b"late")),
            Err(ProtocolError::ConnectionClosed)
        ));

        let mut hub = LoopbackTransport::new();
        let endpoint = hub.connect(2);
        hub.send_reliable(2, Bytes::from_static(b"gone")).unwrap();
        hub.close(2);
        assert!(endpoint.recv().is_none());
    }

    #[test]
    fn test_unknown_peer_rejected() {
        let mut hub = LoopbackTransport::new();
        assert!(matches!(
            hub.send_reliable(7, Bytes::new()),
            Err(ProtocolError::ConnectionClosed)
        ));
    }
}
