//! Client-side session: handshake, world download, and steady-state
//! replication as seen from the receiving end.
//!
//! Scope and delta payloads arriving mid-tick are buffered and applied
//! only when the tick's SimulationCommit arrives, so observers of the
//! entity table only ever see whole-tick states, never a half-applied
//! tick.

use crate::config::{ClientConfig, VERSION_BUILD, VERSION_MAJOR, VERSION_MINOR, VERSION_REVISION};
use crate::connection::read_type_tag;
use crate::core::message::{tag, DataBlockDef, DeltaEntry, Message, ScopeEntry};
use crate::core::wire::WireBuffer;
use crate::error::{ProtocolError, Result};
use crate::protocol::{Stage, StageRegistry};
use crate::replication::{EntityFactory, EntityId, ReplicatedEntity};
use crate::transport::{PeerId, Transport};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

type Handler = fn(&mut ClientSession, Message) -> Result<()>;

/// A replicated update held back until the tick's commit marker.
enum PendingUpdate {
    Spawn(ScopeEntry),
    Delta(DeltaEntry),
}

/// One client's connection to a server.
pub struct ClientSession {
    config: ClientConfig,
    transport: Box<dyn Transport>,
    server: PeerId,
    stage: Stage,
    opposite_endian: bool,
    registry: StageRegistry<Handler>,
    factory: EntityFactory,
    entities: BTreeMap<EntityId, ReplicatedEntity>,
    datablocks: Vec<DataBlockDef>,
    pending: Vec<PendingUpdate>,
    commits_applied: u64,
    disconnect_reason: Option<String>,
    connected: bool,
}

impl ClientSession {
    pub fn new(
        config: ClientConfig,
        factory: EntityFactory,
        transport: Box<dyn Transport>,
        server: PeerId,
    ) -> Self {
        Self {
            config,
            transport,
            server,
            stage: Stage::Authentication,
            opposite_endian: false,
            registry: build_registry(),
            factory,
            entities: BTreeMap::new(),
            datablocks: Vec::new(),
            pending: Vec::new(),
            commits_applied: 0,
            disconnect_reason: None,
            connected: true,
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// The reason the server gave when it tore this session down, if any.
    pub fn disconnect_reason(&self) -> Option<&str> {
        self.disconnect_reason.as_deref()
    }

    pub fn entity(&self, net_id: EntityId) -> Option<&ReplicatedEntity> {
        self.entities.get(&net_id)
    }

    pub fn entities(&self) -> &BTreeMap<EntityId, ReplicatedEntity> {
        &self.entities
    }

    pub fn datablocks(&self) -> &[DataBlockDef] {
        &self.datablocks
    }

    /// Number of SimulationCommit markers applied so far.
    pub fn commits_applied(&self) -> u64 {
        self.commits_applied
    }

    /// Open the protocol: send the version challenge.
    pub fn connect(&mut self) -> Result<()> {
        info!(protocol = self.config.protocol_version, "connecting");
        self.send_reliable(&Message::Handshake {
            major: VERSION_MAJOR,
            minor: VERSION_MINOR,
            revision: VERSION_REVISION,
            build: VERSION_BUILD,
            protocol: self.config.protocol_version,
        })
    }

    /// Invoke a named procedure on the server. Legal only in Gameplay.
    pub fn send_rpc(&mut self, name: &str) -> Result<()> {
        if self.stage != Stage::Gameplay {
            return Err(ProtocolError::ProtocolViolation(format!(
                "cannot invoke RPCs in stage {}",
                self.stage
            )));
        }
        self.send_reliable(&Message::ExecuteRpc { name: name.into() })
    }

    /// Leave voluntarily, telling the server why.
    pub fn disconnect(&mut self, reason: &str) {
        if self.connected {
            let _ = self.send_reliable(&Message::Disconnect {
                reason: reason.into(),
            });
            self.transport.close_after_flush(self.server);
            self.connected = false;
        }
    }

    /// Dispatch every message in a received datagram.
    ///
    /// An error tears the session down: the entity table may be mid-tick
    /// stale but is never half-applied, because application happens only
    /// on commit.
    pub fn deliver(&mut self, payload: &[u8]) -> Result<()> {
        let mut buffer = WireBuffer::from_datagram(payload);
        buffer.set_swap_endian(self.opposite_endian);

        let result = self.dispatch_datagram(&mut buffer);
        if let Err(err) = &result {
            warn!(error = %err, "session terminated by protocol error");
            self.disconnect(err.disconnect_reason());
        }
        result
    }

    fn dispatch_datagram(&mut self, buffer: &mut WireBuffer) -> Result<()> {
        let mut dispatched = 0u32;
        while !buffer.is_exhausted() {
            if dispatched >= self.config.messages_per_tick {
                return Err(ProtocolError::ProtocolViolation(format!(
                    "datagram exceeds {} message budget",
                    self.config.messages_per_tick
                )));
            }

            let may_detect = self.stage == Stage::Authentication && !self.opposite_endian;
            let (type_tag, detected) = read_type_tag(buffer, may_detect)?;
            if detected {
                self.opposite_endian = true;
                debug!("detected opposite-endian server");
            }

            let handler = *self.registry.lookup(self.stage, type_tag)?;
            let (message, _sequence) = Message::unpack(type_tag, buffer)?;
            handler(self, message)?;
            dispatched += 1;
        }
        Ok(())
    }

    fn send_reliable(&mut self, message: &Message) -> Result<()> {
        let mut out = WireBuffer::with_capacity(message.required_memory());
        out.set_swap_endian(self.opposite_endian);
        message.pack(&mut out);
        self.transport.send_reliable(self.server, out.into_bytes())
    }

    fn spawn_entity(&mut self, entry: ScopeEntry) -> Result<()> {
        let mut entity = self.factory.spawn(entry.type_id)?;
        entity.apply_snapshot_body(&entry.values)?;
        debug!(net_id = entry.net_id, type_id = entry.type_id, "entity scoped in");
        self.entities.insert(entry.net_id, entity);
        Ok(())
    }

    fn apply_pending(&mut self) -> Result<()> {
        for update in std::mem::take(&mut self.pending) {
            match update {
                PendingUpdate::Spawn(entry) => self.spawn_entity(entry)?,
                PendingUpdate::Delta(entry) => match self.entities.get_mut(&entry.net_id) {
                    Some(entity) => entity.apply_delta_body(&entry.body)?,
                    // Unreliable deltas can outlive a scope-out; skip.
                    None => warn!(net_id = entry.net_id, "delta for unscoped entity dropped"),
                },
            }
        }
        self.commits_applied += 1;
        Ok(())
    }
}

/// The client-side stage-gated handler table.
fn build_registry() -> StageRegistry<Handler> {
    let mut registry: StageRegistry<Handler> = StageRegistry::new();
    registry.register(Stage::Authentication, tag::HANDSHAKE, on_handshake);
    registry.register(Stage::Loading, tag::DATA_BLOCKS, on_datablocks);
    registry.register(Stage::Loading, tag::SCOPE, on_scope);
    registry.register(Stage::Gameplay, tag::SCOPE, on_scope);
    registry.register(Stage::Gameplay, tag::SIMULATION_DELTA, on_delta);
    registry.register(Stage::Gameplay, tag::SIMULATION_COMMIT, on_commit);
    registry.register_any_stage(tag::DISCONNECT, on_disconnect);
    registry
}

fn on_handshake(session: &mut ClientSession, message: Message) -> Result<()> {
    let Message::Handshake { protocol, .. } = message else {
        unreachable!("registry routed a non-Handshake to on_handshake");
    };
    if protocol != session.config.protocol_version {
        return Err(ProtocolError::VersionMismatch {
            ours: session.config.protocol_version,
            theirs: protocol,
        });
    }
    info!(protocol, "handshake accepted, loading");
    session.stage.advance(Stage::Loading)
}

fn on_datablocks(session: &mut ClientSession, message: Message) -> Result<()> {
    let Message::DataBlocks { blocks } = message else {
        unreachable!("registry routed a non-DataBlocks to on_datablocks");
    };
    debug!(count = blocks.len(), "received data block definitions");
    session.datablocks.extend(blocks);
    Ok(())
}

fn on_scope(session: &mut ClientSession, message: Message) -> Result<()> {
    let Message::Scope { entities } = message else {
        unreachable!("registry routed a non-Scope to on_scope");
    };

    match session.stage {
        // The initial scene: apply immediately, acknowledge readiness,
        // and enter steady state.
        Stage::Loading => {
            for entry in entities {
                session.spawn_entity(entry)?;
            }
            session.send_reliable(&Message::SimulationCommit)?;
            session.stage.advance(Stage::Gameplay)?;
            info!("initial scene applied, entering gameplay");
            Ok(())
        }
        // Steady state: hold until the tick's commit.
        Stage::Gameplay => {
            session
                .pending
                .extend(entities.into_iter().map(PendingUpdate::Spawn));
            Ok(())
        }
        Stage::Authentication => unreachable!("registry gates Scope out of authentication"),
    }
}

fn on_delta(session: &mut ClientSession, message: Message) -> Result<()> {
    let Message::SimulationDelta { entities } = message else {
        unreachable!("registry routed a non-SimulationDelta to on_delta");
    };
    session
        .pending
        .extend(entities.into_iter().map(PendingUpdate::Delta));
    Ok(())
}

fn on_commit(session: &mut ClientSession, _message: Message) -> Result<()> {
    session.apply_pending()
}

fn on_disconnect(session: &mut ClientSession, message: Message) -> Result<()> {
    let Message::Disconnect { reason } = message else {
        unreachable!("registry routed a non-Disconnect to on_disconnect");
    };
    info!(reason = %reason, "disconnected by server");
    session.disconnect_reason = Some(reason);
    session.connected = false;
    Ok(())
}
