//! Per-connection visibility bookkeeping.

use crate::replication::entity::EntityId;
use std::collections::BTreeSet;

/// The set of entity identities currently visible to one connection.
///
/// An entity enters on being included in a Scope message and leaves when
/// the orchestrator stops referencing it. BTreeSet keeps iteration order
/// deterministic, which keeps the per-tick message stream reproducible.
#[derive(Debug, Default, Clone)]
pub struct ScopeSet {
    visible: BTreeSet<EntityId>,
}

impl ScopeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, entity: EntityId) -> bool {
        self.visible.contains(&entity)
    }

    /// Record that the entity's full snapshot has been sent. Returns false
    /// if it was already scoped.
    pub fn insert(&mut self, entity: EntityId) -> bool {
        self.visible.insert(entity)
    }

    pub fn remove(&mut self, entity: EntityId) -> bool {
        self.visible.remove(&entity)
    }

    pub fn len(&self) -> usize {
        self.visible.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visible.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.visible.iter().copied()
    }

    /// Entities in `target` that are not yet scoped, in deterministic
    /// order. These are the ones owed a full snapshot this tick.
    pub fn newly_visible(&self, target: &BTreeSet<EntityId>) -> Vec<EntityId> {
        target
            .iter()
            .copied()
            .filter(|id| !self.visible.contains(id))
            .collect()
    }

    /// Entities currently scoped that `target` no longer references.
    pub fn newly_hidden(&self, target: &BTreeSet<EntityId>) -> Vec<EntityId> {
        self.visible
            .iter()
            .copied()
            .filter(|id| !target.contains(id))
            .collect()
    }
}
