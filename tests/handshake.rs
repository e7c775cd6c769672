#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Connection lifecycle tests: version challenge, stage progression, and
//! byte-order negotiation.

mod common;

use common::{Harness, CLIENT_PEER};
use replication_protocol::config::{ReplicationConfig, PROTOCOL_VERSION};
use replication_protocol::core::message::{tag, DataBlockDef, Message};
use replication_protocol::core::wire::WireBuffer;
use replication_protocol::error::constants;
use replication_protocol::protocol::Stage;
use replication_protocol::server::FullVisibility;

#[test]
fn test_handshake_reaches_gameplay_on_both_ends() {
    let mut harness = Harness::new(ReplicationConfig::default());
    harness.server.register_datablock(DataBlockDef {
        id: 1,
        name: "terrain".into(),
    });

    harness.establish();

    assert_eq!(harness.client.stage(), Stage::Gameplay);
    assert!(harness.client.is_connected());
    assert_eq!(harness.client.datablocks().len(), 1);
    assert_eq!(harness.client.datablocks()[0].name, "terrain");
    assert_eq!(harness.server.connection_count(), 1);
}

#[test]
fn test_version_mismatch_disconnects_with_reason() {
    let config = ReplicationConfig::default_with_overrides(|c| {
        c.client.protocol_version = PROTOCOL_VERSION + 1;
    });
    let mut harness = Harness::new(config);

    harness.client.connect().unwrap();
    harness.pump();

    assert!(!harness.client.is_connected());
    assert_eq!(
        harness.client.disconnect_reason(),
        Some(constants::REASON_PROTOCOL_MISMATCH)
    );
    assert_eq!(harness.server.connection_count(), 0);
}

#[test]
fn test_message_before_handshake_is_rejected() {
    let mut harness = Harness::new(ReplicationConfig::default());

    // An RPC while the connection is still in Authentication.
    let rogue = Message::ExecuteRpc {
        name: "spawn_player".into(),
    }
    .to_wire();
    harness
        .server
        .deliver(CLIENT_PEER, rogue.as_written())
        .unwrap();
    harness.pump();

    assert_eq!(
        harness.client.disconnect_reason(),
        Some(constants::REASON_OUT_OF_STAGE)
    );
    assert_eq!(harness.server.connection_count(), 0);
}

#[test]
fn test_client_refuses_rpc_before_gameplay() {
    let mut harness = Harness::new(ReplicationConfig::default());
    assert!(harness.client.send_rpc("too_soon").is_err());

    harness.establish();
    assert!(harness.client.send_rpc("in_time").is_ok());
}

#[test]
fn test_opposite_endian_peer_negotiated_at_handshake() {
    let mut harness = Harness::new(ReplicationConfig::default());

    // A handshake as an opposite-endian peer would encode it.
    let mut swapped = WireBuffer::new();
    swapped.set_swap_endian(true);
    Message::Handshake {
        major: 1,
        minor: 0,
        revision: 0,
        build: 42,
        protocol: PROTOCOL_VERSION,
    }
    .pack(&mut swapped);

    harness
        .server
        .deliver(CLIENT_PEER, swapped.as_written())
        .unwrap();
    harness.server.tick(&FullVisibility);

    // The reply must come back in the peer's byte order.
    let datagram = harness.endpoint.recv().expect("handshake reply");
    let mut reply = WireBuffer::from_datagram(&datagram.payload);
    reply.set_swap_endian(true);
    let reply_tag = reply.read_u32().unwrap();
    assert_eq!(reply_tag, tag::HANDSHAKE);

    let (message, _) = Message::unpack(reply_tag, &mut reply).unwrap();
    let Message::Handshake { protocol, .. } = message else {
        panic!("expected a Handshake reply, got {message:?}");
    };
    assert_eq!(protocol, PROTOCOL_VERSION);
}

#[test]
fn test_opposite_endian_datagrams_queued_before_detection_survive() {
    let mut harness = Harness::new(ReplicationConfig::default());

    // Both datagrams land before the tick that detects the byte order,
    // so the second is already queued when detection latches.
    let mut handshake = WireBuffer::new();
    handshake.set_swap_endian(true);
    Message::Handshake {
        major: 1,
        minor: 0,
        revision: 0,
        build: 42,
        protocol: PROTOCOL_VERSION,
    }
    .pack(&mut handshake);
    let mut ready = WireBuffer::new();
    ready.set_swap_endian(true);
    Message::SimulationCommit.pack(&mut ready);

    harness
        .server
        .deliver(CLIENT_PEER, handshake.as_written())
        .unwrap();
    harness
        .server
        .deliver(CLIENT_PEER, ready.as_written())
        .unwrap();
    harness.server.tick(&FullVisibility);

    assert_eq!(harness.server.connection_count(), 1);
    let handle = harness.server.connection_of(CLIENT_PEER).unwrap();
    assert_eq!(
        harness.server.connection_stage(handle).unwrap(),
        Stage::Gameplay
    );
}

#[test]
fn test_duplicate_handshake_is_out_of_stage() {
    let mut harness = Harness::new(ReplicationConfig::default());
    harness.establish();

    let replay = Message::Handshake {
        major: 1,
        minor: 0,
        revision: 0,
        build: 42,
        protocol: PROTOCOL_VERSION,
    }
    .to_wire();
    harness
        .server
        .deliver(CLIENT_PEER, replay.as_written())
        .unwrap();
    harness.pump();

    assert_eq!(
        harness.client.disconnect_reason(),
        Some(constants::REASON_OUT_OF_STAGE)
    );
    assert_eq!(harness.server.connection_count(), 0);
}
