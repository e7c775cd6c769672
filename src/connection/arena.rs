//! Generation-checked storage for server-side connections.
//!
//! Connections are stored in a slab of reusable slots. A handle carries
//! the slot's generation at insertion time; after the slot is freed and
//! reused, stale handles no longer match and every access through them
//! fails instead of touching an unrelated connection.

use crate::connection::RemoteClient;
use crate::error::{ProtocolError, Result};

/// Stable reference to one connection slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionHandle {
    index: u32,
    generation: u32,
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    client: Option<RemoteClient>,
}

/// Slab of connection slots with a free list.
#[derive(Default)]
pub struct ConnectionArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl ConnectionArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn insert(&mut self, client: RemoteClient) -> ConnectionHandle {
        match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.client = Some(client);
                ConnectionHandle {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    client: Some(client),
                });
                ConnectionHandle {
                    index,
                    generation: 0,
                }
            }
        }
    }

    pub fn get(&self, handle: ConnectionHandle) -> Result<&RemoteClient> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.client.as_ref())
            .ok_or(ProtocolError::ConnectionClosed)
    }

    pub fn get_mut(&mut self, handle: ConnectionHandle) -> Result<&mut RemoteClient> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.client.as_mut())
            .ok_or(ProtocolError::ConnectionClosed)
    }

    /// Free the slot, bumping its generation so existing handles go stale.
    pub fn remove(&mut self, handle: ConnectionHandle) -> Option<RemoteClient> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let client = slot.client.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Some(client)
    }

    /// Handles of every live connection, in slot order.
    pub fn handles(&self) -> Vec<ConnectionHandle> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.client.is_some())
            .map(|(index, slot)| ConnectionHandle {
                index: index as u32,
                generation: slot.generation,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_handle_rejected_after_reuse() {
        let mut arena = ConnectionArena::new();
        let first = arena.insert(RemoteClient::new(1));
        assert_eq!(arena.get(first).unwrap().peer(), 1);

        arena.remove(first).unwrap();
        let second = arena.insert(RemoteClient::new(2));

        // Same slot, new generation.
        assert!(arena.get(first).is_err());
        assert!(arena.remove(first).is_none());
        assert_eq!(arena.get(second).unwrap().peer(), 2);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn test_handles_enumerates_live_slots() {
        let mut arena = ConnectionArena::new();
        let a = arena.insert(RemoteClient::new(1));
        let b = arena.insert(RemoteClient::new(2));
        arena.remove(a);

        assert_eq!(arena.handles(), vec![b]);
    }
}
