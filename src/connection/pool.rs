//! Reusable connection id pool.

use std::collections::BTreeSet;

use crate::core::{ConnectionId, RegistryError};

/// Bounded pool of connection ids in `[1, capacity]`.
///
/// Always hands out the smallest free id, so ids stay short and predictable.
#[derive(Debug, Clone)]
pub struct IdPool {
    free: BTreeSet<u16>,
    capacity: u16,
}

impl IdPool {
    /// Create a pool holding every id in `[1, capacity]`.
    pub fn new(capacity: u16) -> Self {
        Self {
            free: (1..=capacity).collect(),
            capacity,
        }
    }

    /// Take the smallest free id.
    pub fn allocate(&mut self) -> Result<ConnectionId, RegistryError> {
        self.free
            .pop_first()
            .map(ConnectionId::new)
            .ok_or(RegistryError::CapacityExceeded)
    }

    /// Return an id to the pool.
    ///
    /// Returns `false` (and changes nothing) if the id is outside the pool's
    /// range or already free.
    pub fn release(&mut self, id: ConnectionId) -> bool {
        if !id.is_valid() || id.raw() > self.capacity {
            return false;
        }
        self.free.insert(id.raw())
    }

    /// Number of ids still available.
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Total number of ids.
    pub fn capacity(&self) -> u16 {
        self.capacity
    }

    /// Make every id available again.
    pub fn reset(&mut self) {
        self.free = (1..=self.capacity).collect();
    }
}
