//! # Stage Registry
//!
//! Maps (connection stage, message type tag) to a handler, separately for
//! the server-side and client-side roles. The registry both validates
//! that a message is legal in the connection's current stage and routes
//! it.
//!
//! A lookup miss means "this message is not legal in the connection's
//! current stage" and is treated as a protocol violation: the connection
//! is disconnected with a diagnostic reason, never silently ignored —
//! silent ignoring would let a stalled or hostile peer desynchronize
//! state.
//!
//! Tables are populated once at startup from the closed message catalog
//! and are read-only afterwards, so lookups need no synchronization.

use crate::error::{ProtocolError, Result};
use crate::protocol::stage::Stage;
use std::collections::HashMap;

/// Stage-keyed handler table, generic over the role's handler type.
pub struct StageRegistry<H> {
    /// Handlers legal in exactly one stage.
    staged: HashMap<(Stage, u32), H>,
    /// Handlers legal in any stage, consulted first (the Disconnect path).
    any_stage: HashMap<u32, H>,
}

impl<H> Default for StageRegistry<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> StageRegistry<H> {
    pub fn new() -> Self {
        Self {
            staged: HashMap::new(),
            any_stage: HashMap::new(),
        }
    }

    /// Register a handler legal only in `stage`.
    pub fn register(&mut self, stage: Stage, type_tag: u32, handler: H) {
        self.staged.insert((stage, type_tag), handler);
    }

    /// Register a handler legal in every stage.
    pub fn register_any_stage(&mut self, type_tag: u32, handler: H) {
        self.any_stage.insert(type_tag, handler);
    }

    /// Look up the handler for a message arriving while the connection is
    /// in `stage`. A miss is a protocol violation.
    pub fn lookup(&self, stage: Stage, type_tag: u32) -> Result<&H> {
        self.any_stage
            .get(&type_tag)
            .or_else(|| self.staged.get(&(stage, type_tag)))
            .ok_or_else(|| {
                ProtocolError::ProtocolViolation(format!(
                    "message tag {type_tag:#x} is not legal in stage {stage}"
                ))
            })
    }

    /// Whether any registration exists for the tag, in any stage. Used to
    /// distinguish "unknown message" from "known but out of stage" in
    /// diagnostics.
    pub fn knows_tag(&self, type_tag: u32) -> bool {
        self.any_stage.contains_key(&type_tag)
            || self.staged.keys().any(|(_, tag)| *tag == type_tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::message::tag;

    #[test]
    fn test_lookup_respects_stage() {
        let mut registry: StageRegistry<u8> = StageRegistry::new();
        registry.register(Stage::Authentication, tag::HANDSHAKE, 1);
        registry.register(Stage::Gameplay, tag::EXECUTE_RPC, 2);

        assert_eq!(
            *registry.lookup(Stage::Authentication, tag::HANDSHAKE).unwrap(),
            1
        );
        // Same tag, wrong stage: protocol violation.
        assert!(matches!(
            registry.lookup(Stage::Gameplay, tag::HANDSHAKE),
            Err(ProtocolError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn test_any_stage_wins() {
        let mut registry: StageRegistry<u8> = StageRegistry::new();
        registry.register_any_stage(tag::DISCONNECT, 9);

        for stage in [Stage::Authentication, Stage::Loading, Stage::Gameplay] {
            assert_eq!(*registry.lookup(stage, tag::DISCONNECT).unwrap(), 9);
        }
    }

    #[test]
    fn test_knows_tag() {
        let mut registry: StageRegistry<u8> = StageRegistry::new();
        registry.register(Stage::Loading, tag::SCOPE, 3);
        assert!(registry.knows_tag(tag::SCOPE));
        assert!(!registry.knows_tag(tag::EXECUTE_RPC));
    }
}
