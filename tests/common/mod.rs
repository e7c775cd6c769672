//! Shared fixtures: a probe entity archetype and a loopback-wired
//! server/client pair.

#![allow(dead_code)]

use replication_protocol::config::ReplicationConfig;
use replication_protocol::connection::ClientSession;
use replication_protocol::replication::{EntityFactory, PropertyValue, ReplicatedEntity};
use replication_protocol::server::{FullVisibility, ServerContext};
use replication_protocol::transport::{LoopbackEndpoint, LoopbackTransport, PeerId};

pub const PROBE_TYPE: u32 = 0x10;
pub const CLIENT_PEER: PeerId = 1;

/// An entity archetype with one of each commonly-replicated shape.
pub fn probe_entity() -> ReplicatedEntity {
    let mut entity = ReplicatedEntity::new(PROBE_TYPE);
    entity
        .register_property("position", PropertyValue::Vec3([0.0; 3]))
        .unwrap();
    entity
        .register_property("health", PropertyValue::U32(100))
        .unwrap();
    entity.finalize();
    entity
}

pub fn probe_factory() -> EntityFactory {
    let mut factory = EntityFactory::new();
    factory.register(PROBE_TYPE, probe_entity);
    factory
}

/// One server and one client joined by a loopback link.
pub struct Harness {
    pub server: ServerContext,
    pub hub: LoopbackTransport,
    pub client: ClientSession,
    pub endpoint: LoopbackEndpoint,
}

impl Harness {
    pub fn new(config: ReplicationConfig) -> Self {
        let hub = LoopbackTransport::new();
        let server =
            ServerContext::new(config.clone(), Box::new(hub.clone())).expect("config is valid");
        let endpoint = hub.connect(CLIENT_PEER);
        let mut harness = Self {
            client: ClientSession::new(
                config.client,
                probe_factory(),
                Box::new(endpoint.clone()),
                CLIENT_PEER,
            ),
            server,
            hub,
            endpoint,
        };
        harness
            .server
            .on_peer_connected(CLIENT_PEER)
            .expect("capacity available");
        harness
    }

    /// One full exchange: forward client traffic, run a server tick, then
    /// forward server traffic. Dispatch errors surface through connection
    /// state, which is what the tests assert on.
    pub fn pump(&mut self) {
        while let Some(datagram) = self.hub.recv() {
            let _ = self.server.deliver(datagram.peer, &datagram.payload);
        }
        self.server.tick(&FullVisibility);
        while let Some(datagram) = self.endpoint.recv() {
            let _ = self.client.deliver(&datagram.payload);
        }
    }

    /// Drive the connection through handshake and loading into gameplay
    /// on both ends.
    pub fn establish(&mut self) {
        self.client.connect().expect("connect");
        // Handshake + initial scene, then the readiness ack.
        self.pump();
        self.pump();
    }
}
