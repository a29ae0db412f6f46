//! Dual-keyed connection registry.
//!
//! Connections are owned by the id index; the peer index maps each identity
//! to the id of the same record. Every mutation updates both indexes before
//! returning, so a lookup by id and a lookup by peer always agree.

use std::collections::HashMap;

use tracing::error;

use super::connection::{Connection, ConnectionInfo};
use super::pool::IdPool;
use crate::core::{ConnectionId, PeerIdentity, RegistryError};

/// Live connections of one session, keyed by id and by peer identity.
#[derive(Debug)]
pub struct ConnectionRegistry {
    by_id: HashMap<ConnectionId, Connection>,
    by_peer: HashMap<PeerIdentity, ConnectionId>,
    pool: IdPool,
}

impl ConnectionRegistry {
    /// Create a registry whose id pool holds `[1, max_connections]`.
    pub fn new(max_connections: u16) -> Self {
        Self {
            by_id: HashMap::with_capacity(max_connections as usize),
            by_peer: HashMap::with_capacity(max_connections as usize),
            pool: IdPool::new(max_connections),
        }
    }

    /// Insert a connection under its id and its peer identity.
    pub fn insert(&mut self, connection: Connection) -> Result<(), RegistryError> {
        let id = connection.id();
        let peer = connection.peer();
        if self.by_peer.contains_key(&peer) {
            return Err(RegistryError::DuplicatePeer(peer));
        }
        if self.by_id.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }

        self.by_peer.insert(peer, id);
        self.by_id.insert(id, connection);
        Ok(())
    }

    /// Look up a connection by id.
    pub fn lookup_by_id(&self, id: ConnectionId) -> Option<&Connection> {
        self.by_id.get(&id)
    }

    /// Look up a connection by id, mutably.
    pub fn lookup_by_id_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.by_id.get_mut(&id)
    }

    /// Look up a connection by peer identity.
    pub fn lookup_by_peer(&self, peer: PeerIdentity) -> Option<&Connection> {
        self.by_peer.get(&peer).and_then(|id| self.by_id.get(id))
    }

    /// Id bound to `peer`, if any.
    pub fn id_of(&self, peer: PeerIdentity) -> Option<ConnectionId> {
        self.by_peer.get(&peer).copied()
    }

    /// Remove the connection bound to both `id` and `peer`.
    ///
    /// Absent keys are not an error: the transport may report the same
    /// teardown more than once.
    pub fn remove(&mut self, id: ConnectionId, peer: PeerIdentity) -> Option<Connection> {
        match self.by_id.get(&id) {
            Some(connection) if connection.peer() == peer => {}
            Some(connection) => {
                error!(
                    %id,
                    %peer,
                    bound = %connection.peer(),
                    "registry remove with mismatched keys"
                );
                return None;
            }
            None => return None,
        }

        self.by_peer.remove(&peer);
        self.by_id.remove(&id)
    }

    /// Remove the connection with `id`, whatever its peer.
    pub fn remove_by_id(&mut self, id: ConnectionId) -> Option<Connection> {
        let peer = self.by_id.get(&id)?.peer();
        self.remove(id, peer)
    }

    /// Take the smallest free id.
    pub fn allocate_id(&mut self) -> Result<ConnectionId, RegistryError> {
        self.pool.allocate()
    }

    /// Return an id to the pool once its connection has been removed.
    ///
    /// Ids still bound to a live connection are kept out of the pool.
    pub fn release_id(&mut self, id: ConnectionId) {
        if self.by_id.contains_key(&id) {
            error!(%id, "refusing to release id of a live connection");
            return;
        }
        self.pool.release(id);
    }

    /// Number of live connections.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Whether there are no live connections.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Size of the id pool.
    pub fn capacity(&self) -> u16 {
        self.pool.capacity()
    }

    /// Ids of live connections, ascending.
    pub fn ids(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Iterate over live connections in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.by_id.values()
    }

    /// Snapshot of every live connection, ordered by id.
    pub fn snapshot(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<_> = self.by_id.values().map(Connection::info).collect();
        infos.sort_unstable_by_key(|info| info.id);
        infos
    }

    /// Remove every connection and refill the id pool.
    pub fn drain(&mut self) -> Vec<Connection> {
        self.by_peer.clear();
        self.pool.reset();
        self.by_id.drain().map(|(_, connection)| connection).collect()
    }
}
