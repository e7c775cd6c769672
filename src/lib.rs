//! # Replication Protocol
//!
//! A client/server entity-replication protocol core: staged connection
//! lifecycle, a closed message catalog over a compact binary wire format,
//! per-connection visibility scoping, and dirty-property delta
//! replication driven by a server tick orchestrator.
//!
//! ## Architecture
//! - [`core`]: wire buffer primitives and the message catalog
//! - [`protocol`]: connection stages, stage-gated routing, RPC dispatch
//! - [`replication`]: replicated entities, property deltas, scope sets
//! - [`connection`]: per-peer state for the server and client roles
//! - [`server`]: the tick orchestrator owning all server-side state
//! - [`transport`]: the byte-moving seam, with an in-process loopback
//!
//! ## Connection lifecycle
//! ```text
//! Authentication --Handshake ok--> Loading --client ready--> Gameplay
//! ```
//! Stages only advance. Which messages a connection may send is a
//! function of its stage; anything else is a protocol violation and
//! disconnects it with a diagnostic reason.
//!
//! ## Example
//! ```
//! use replication_protocol::config::ReplicationConfig;
//! use replication_protocol::replication::{EntityFactory, PropertyValue, ReplicatedEntity};
//! use replication_protocol::server::{FullVisibility, ServerContext};
//! use replication_protocol::transport::LoopbackTransport;
//!
//! fn probe() -> ReplicatedEntity {
//!     let mut entity = ReplicatedEntity::new(0x10);
//!     entity
//!         .register_property("position", PropertyValue::Vec3([0.0; 3]))
//!         .unwrap();
//!     entity.finalize();
//!     entity
//! }
//!
//! let hub = LoopbackTransport::new();
//! let mut server =
//!     ServerContext::new(ReplicationConfig::default(), Box::new(hub.clone())).unwrap();
//! let net_id = server.spawn_entity(probe());
//! server.tick(&FullVisibility);
//! assert!(server.entity(net_id).is_some());
//! ```

pub mod config;
pub mod connection;
pub mod core;
pub mod error;
pub mod protocol;
pub mod replication;
pub mod server;
pub mod transport;
pub mod utils;

pub use config::ReplicationConfig;
pub use connection::{ClientSession, ConnectionHandle};
pub use core::message::Message;
pub use core::wire::WireBuffer;
pub use error::{ProtocolError, Result};
pub use protocol::Stage;
pub use replication::{EntityFactory, PropertyValue, ReplicatedEntity, ScopeSet};
pub use server::{FullVisibility, ScopeProvider, ServerContext};
pub use transport::{LoopbackTransport, Transport};
