//! # Server Orchestrator
//!
//! Owns every piece of per-server state (connection arena, entity table,
//! handler and RPC registries, the transport) and drives the tick cycle.
//! All state is reachable from one [`ServerContext`] value owned by the
//! embedding; nothing here is process-global.
//!
//! ## Tick cycle
//! 1. **Drain**: dispatch queued inbound messages per connection, bounded
//!    by the configured per-tick budget. Any decode or stage-validation
//!    error disconnects the offending peer with a diagnostic reason.
//! 2. **Replicate**: per connection, diff the scope provider's visibility
//!    against what the connection has seen. Newly visible entities get
//!    full snapshots on the reliable channel; already-scoped dirty
//!    entities get deltas on the unreliable channel. Dirty flags clear
//!    exactly once per tick, with one delta body fanned out to every
//!    connection that needs it.
//! 3. **Flush**: hand each connection's coalesced datagrams to the
//!    transport, then tear down connections marked for closure — after
//!    the flush, so a queued Disconnect still reaches its peer.

use crate::config::{ReplicationConfig, VERSION_BUILD, VERSION_MAJOR, VERSION_MINOR, VERSION_REVISION};
use crate::connection::{read_type_tag, ConnectionArena, ConnectionHandle, RemoteClient};
use crate::core::message::{tag, DataBlockDef, DeltaEntry, Message, ScopeEntry};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::{RpcDispatcher, Stage, StageRegistry};
use crate::replication::{EntityId, ReplicatedEntity};
use crate::transport::{PeerId, Transport};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

type Handler = fn(&mut ServerContext, ConnectionHandle, Message) -> Result<()>;

/// Decides which entities each connection may see. Implemented by the
/// embedding; distance culling, team visibility and the like live there.
pub trait ScopeProvider {
    fn visible_entities(
        &self,
        connection: ConnectionHandle,
        entities: &BTreeMap<EntityId, ReplicatedEntity>,
    ) -> BTreeSet<EntityId>;
}

/// Every entity is visible to every connection.
pub struct FullVisibility;

impl ScopeProvider for FullVisibility {
    fn visible_entities(
        &self,
        _connection: ConnectionHandle,
        entities: &BTreeMap<EntityId, ReplicatedEntity>,
    ) -> BTreeSet<EntityId> {
        entities.keys().copied().collect()
    }
}

/// All server-side protocol state, owned by the embedding.
pub struct ServerContext {
    config: ReplicationConfig,
    registry: StageRegistry<Handler>,
    rpcs: RpcDispatcher<ServerContext>,
    rpc_caller: Option<ConnectionHandle>,
    connections: ConnectionArena,
    peers: HashMap<PeerId, ConnectionHandle>,
    entities: BTreeMap<EntityId, ReplicatedEntity>,
    next_net_id: EntityId,
    datablocks: Vec<DataBlockDef>,
    transport: Box<dyn Transport>,
    ticks: u64,
}

impl ServerContext {
    pub fn new(config: ReplicationConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            registry: build_registry(),
            rpcs: RpcDispatcher::new(),
            rpc_caller: None,
            connections: ConnectionArena::new(),
            peers: HashMap::new(),
            entities: BTreeMap::new(),
            next_net_id: 1,
            datablocks: Vec::new(),
            transport,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn connection_stage(&self, handle: ConnectionHandle) -> Result<Stage> {
        Ok(self.connections.get(handle)?.stage())
    }

    /// The live connection handle for a transport peer, if any.
    pub fn connection_of(&self, peer: PeerId) -> Option<ConnectionHandle> {
        self.peers.get(&peer).copied()
    }

    /// The connection whose ExecuteRpc is currently being dispatched.
    pub fn rpc_caller(&self) -> Option<ConnectionHandle> {
        self.rpc_caller
    }

    pub fn register_rpc<F>(&mut self, name: &'static str, handler: F)
    where
        F: Fn(&mut ServerContext) + Send + 'static,
    {
        self.rpcs.register(name, handler);
    }

    /// Add a static definition streamed to every client during Loading.
    pub fn register_datablock(&mut self, block: DataBlockDef) {
        self.datablocks.push(block);
    }

    /// Add an entity to the world under a fresh network identity.
    pub fn spawn_entity(&mut self, entity: ReplicatedEntity) -> EntityId {
        let net_id = self.next_net_id;
        self.next_net_id += 1;
        self.entities.insert(net_id, entity);
        debug!(net_id, "entity spawned");
        net_id
    }

    /// Remove an entity from the world. Connections drop it from scope on
    /// their next visibility diff.
    pub fn despawn_entity(&mut self, net_id: EntityId) -> Option<ReplicatedEntity> {
        self.entities.remove(&net_id)
    }

    pub fn entity(&self, net_id: EntityId) -> Option<&ReplicatedEntity> {
        self.entities.get(&net_id)
    }

    pub fn entity_mut(&mut self, net_id: EntityId) -> Option<&mut ReplicatedEntity> {
        self.entities.get_mut(&net_id)
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, ReplicatedEntity> {
        &self.entities
    }

    /// Admit a peer the transport reports as connected. Refused when the
    /// configured client limit is reached.
    pub fn on_peer_connected(&mut self, peer: PeerId) -> Result<ConnectionHandle> {
        if self.connections.len() >= self.config.server.max_clients as usize {
            warn!(peer, "refusing connection, server at capacity");
            self.transport.close(peer);
            return Err(ProtocolError::TransportError("server at capacity".into()));
        }
        let handle = self.connections.insert(RemoteClient::new(peer));
        self.peers.insert(peer, handle);
        info!(peer, %handle, "peer connected");
        Ok(handle)
    }

    /// Forget a peer the transport reports as gone. No Disconnect is sent;
    /// there is nobody left to read it.
    pub fn on_peer_disconnected(&mut self, peer: PeerId) {
        if let Some(handle) = self.peers.remove(&peer) {
            self.connections.remove(handle);
            info!(peer, %handle, "peer disconnected");
        }
    }

    /// Queue a received datagram on its connection for dispatch next tick.
    /// A peer exceeding its queue limit is disconnected.
    pub fn deliver(&mut self, peer: PeerId, payload: &[u8]) -> Result<()> {
        let Some(&handle) = self.peers.get(&peer) else {
            return Err(ProtocolError::ConnectionClosed);
        };
        let limit = self.config.server.max_queued_datagrams;
        if let Err(err) = self.connections.get_mut(handle)?.push_inbound(payload, limit) {
            self.disconnect(handle, constants::REASON_QUEUE_OVERFLOW);
            return Err(err);
        }
        Ok(())
    }

    /// Run one tick: drain, replicate, flush.
    pub fn tick(&mut self, provider: &dyn ScopeProvider) {
        self.ticks += 1;
        self.drain_inbound();
        self.replicate(provider);
        self.flush();
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Queue a Disconnect with `reason` and mark the connection for
    /// teardown after this tick's flush.
    pub fn disconnect(&mut self, handle: ConnectionHandle, reason: &str) {
        if let Ok(client) = self.connections.get_mut(handle) {
            if !client.is_closing() {
                warn!(%handle, reason, "disconnecting peer");
                client.queue_reliable(&Message::Disconnect {
                    reason: reason.into(),
                });
                client.begin_close();
            }
        }
    }

    /// Tear a connection down immediately, discarding queued data.
    pub fn drop_hard(&mut self, handle: ConnectionHandle) {
        if let Some(client) = self.connections.remove(handle) {
            self.peers.remove(&client.peer());
            self.transport.close(client.peer());
            info!(%handle, "connection dropped");
        }
    }

    fn drain_inbound(&mut self) {
        for handle in self.connections.handles() {
            if let Err(err) = self.drain_connection(handle) {
                warn!(%handle, error = %err, "dispatch failed");
                self.disconnect(handle, err.disconnect_reason());
            }
        }
    }

    fn drain_connection(&mut self, handle: ConnectionHandle) -> Result<()> {
        let budget = self.config.server.messages_per_tick;
        let mut dispatched = 0u32;

        // Undrained messages past the budget stay queued for next tick.
        while dispatched < budget {
            let Some((stage, type_tag, message)) = self.next_inbound_message(handle)? else {
                break;
            };
            let handler = *self.registry.lookup(stage, type_tag)?;
            handler(self, handle, message)?;
            dispatched += 1;
        }
        Ok(())
    }

    /// Decode the next queued message for the connection, if any. Latches
    /// opposite-endian detection during Authentication.
    fn next_inbound_message(
        &mut self,
        handle: ConnectionHandle,
    ) -> Result<Option<(Stage, u32, Message)>> {
        loop {
            let client = self.connections.get_mut(handle)?;
            if client.is_closing() {
                return Ok(None);
            }
            let may_detect =
                client.stage() == Stage::Authentication && !client.opposite_endian();
            let Some(buffer) = client.inbound_front_mut() else {
                return Ok(None);
            };
            if buffer.is_exhausted() {
                client.pop_inbound_front();
                continue;
            }

            let (type_tag, detected) = read_type_tag(buffer, may_detect)?;
            let (message, _sequence) = Message::unpack(type_tag, buffer)?;
            if detected {
                debug!(%handle, "detected opposite-endian peer");
                client.set_opposite_endian();
            }
            return Ok(Some((client.stage(), type_tag, message)));
        }
    }

    fn replicate(&mut self, provider: &dyn ScopeProvider) {
        // One body per dirty entity per tick; fanned out below.
        let deltas: Vec<DeltaEntry> = self
            .entities
            .iter_mut()
            .filter(|(_, entity)| entity.has_dirty())
            .map(|(&net_id, entity)| DeltaEntry {
                net_id,
                body: entity.take_delta(),
            })
            .collect();

        for handle in self.connections.handles() {
            let Ok(client) = self.connections.get(handle) else {
                continue;
            };
            if client.is_closing() || client.stage() == Stage::Authentication {
                continue;
            }

            let target = provider.visible_entities(handle, &self.entities);
            let Ok(client) = self.connections.get_mut(handle) else {
                continue;
            };
            let fresh = client.scope().newly_visible(&target);
            let hidden = client.scope().newly_hidden(&target);

            // Snapshots before deltas, on the reliable channel, so no
            // delta can reach a client before the entity it refers to.
            // A Loading connection always gets its initial Scope, even an
            // empty one, because the client acknowledges it to advance.
            let owes_initial = client.stage() == Stage::Loading && !client.initial_scope_sent();
            if !fresh.is_empty() || owes_initial {
                let entries: Vec<ScopeEntry> = fresh
                    .iter()
                    .filter_map(|&net_id| {
                        self.entities
                            .get(&net_id)
                            .map(|entity| ScopeEntry::from_entity(net_id, entity))
                    })
                    .collect();
                for &net_id in &fresh {
                    client.scope_mut().insert(net_id);
                }
                client.queue_reliable(&Message::Scope { entities: entries });
                client.mark_initial_scope_sent();
            }
            for net_id in hidden {
                client.scope_mut().remove(net_id);
            }

            if client.stage() == Stage::Gameplay {
                let relevant: Vec<DeltaEntry> = deltas
                    .iter()
                    .filter(|entry| {
                        client.scope().contains(entry.net_id) && !fresh.contains(&entry.net_id)
                    })
                    .cloned()
                    .collect();
                if !relevant.is_empty() {
                    client.queue_unreliable(&Message::SimulationDelta { entities: relevant });
                }
                // Tick boundary marker, even on quiet ticks.
                client.queue_reliable(&Message::SimulationCommit);
            }
        }
    }

    fn flush(&mut self) {
        for handle in self.connections.handles() {
            let Ok(client) = self.connections.get_mut(handle) else {
                continue;
            };
            let peer = client.peer();
            let reliable = client.take_reliable();
            let unreliable = client.take_unreliable();
            let closing = client.is_closing();

            // Deltas go out ahead of the reliable datagram carrying the
            // tick's commit marker, so the commit seals them.
            let mut send_failed = false;
            if let Some(payload) = unreliable {
                if let Err(err) = self.transport.send_unreliable(peer, payload) {
                    warn!(%handle, error = %err, "unreliable send failed");
                    send_failed = true;
                }
            }
            if let Some(payload) = reliable {
                if let Err(err) = self.transport.send_reliable(peer, payload) {
                    warn!(%handle, error = %err, "reliable send failed");
                    send_failed = true;
                }
            }

            if closing {
                self.transport.close_after_flush(peer);
                self.connections.remove(handle);
                self.peers.remove(&peer);
            } else if send_failed {
                self.drop_hard(handle);
            }
        }
    }
}

/// The server-side stage-gated handler table.
fn build_registry() -> StageRegistry<Handler> {
    let mut registry: StageRegistry<Handler> = StageRegistry::new();
    registry.register(Stage::Authentication, tag::HANDSHAKE, on_handshake);
    registry.register(Stage::Loading, tag::SIMULATION_COMMIT, on_client_ready);
    registry.register(Stage::Gameplay, tag::EXECUTE_RPC, on_execute_rpc);
    registry.register_any_stage(tag::DISCONNECT, on_disconnect);
    registry
}

fn on_handshake(
    ctx: &mut ServerContext,
    handle: ConnectionHandle,
    message: Message,
) -> Result<()> {
    let Message::Handshake { protocol, .. } = message else {
        unreachable!("registry routed a non-Handshake to on_handshake");
    };

    let ours = ctx.config.server.protocol_version;
    if protocol != ours {
        return Err(ProtocolError::VersionMismatch {
            ours,
            theirs: protocol,
        });
    }

    let reply = Message::Handshake {
        major: VERSION_MAJOR,
        minor: VERSION_MINOR,
        revision: VERSION_REVISION,
        build: VERSION_BUILD,
        protocol: ours,
    };
    let blocks = Message::DataBlocks {
        blocks: ctx.datablocks.clone(),
    };

    let client = ctx.connections.get_mut(handle)?;
    client.queue_reliable(&reply);
    client.queue_reliable(&blocks);
    client.advance_stage(Stage::Loading)?;
    info!(%handle, protocol, "handshake accepted");
    // The initial Scope follows in this tick's replicate phase, now that
    // the connection is in Loading.
    Ok(())
}

fn on_client_ready(
    ctx: &mut ServerContext,
    handle: ConnectionHandle,
    message: Message,
) -> Result<()> {
    debug_assert!(matches!(message, Message::SimulationCommit));
    let client = ctx.connections.get_mut(handle)?;
    client.advance_stage(Stage::Gameplay)?;
    info!(%handle, "client ready, entering gameplay");
    Ok(())
}

fn on_execute_rpc(
    ctx: &mut ServerContext,
    handle: ConnectionHandle,
    message: Message,
) -> Result<()> {
    let Message::ExecuteRpc { name } = message else {
        unreachable!("registry routed a non-ExecuteRpc to on_execute_rpc");
    };

    // The dispatcher is moved out so handlers can borrow the whole
    // context; procedures registered mid-dispatch would be discarded.
    let rpcs = std::mem::take(&mut ctx.rpcs);
    ctx.rpc_caller = Some(handle);
    rpcs.dispatch(&name, ctx);
    ctx.rpc_caller = None;
    ctx.rpcs = rpcs;
    Ok(())
}

fn on_disconnect(
    ctx: &mut ServerContext,
    handle: ConnectionHandle,
    message: Message,
) -> Result<()> {
    let Message::Disconnect { reason } = message else {
        unreachable!("registry routed a non-Disconnect to on_disconnect");
    };
    info!(%handle, reason = %reason, "peer requested disconnect");
    ctx.drop_hard(handle);
    Ok(())
}
