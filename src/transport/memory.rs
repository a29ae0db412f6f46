//! In-process relay transport.
//!
//! A [`MemoryRelay`] is a hub standing in for the relay network: every
//! [`MemoryTransport`] endpoint created from it can reach every other by
//! [`PeerIdentity`]. State changes are pushed through each endpoint's
//! [`EventQueue`], so the hub may be driven from any thread while sessions
//! only observe them on poll.
//!
//! Used for singleplayer hosting, loopback, and tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

use super::queue::{event_queue, EventQueue, EventSender};
use super::{
    ListenHandle, RawTransport, SendError, SocketPair, TransportError, TransportEvent,
    TransportHandle, TransportResult,
};
use crate::core::{DisconnectReason, PeerIdentity, SendFlags};

/// Largest message the relay accepts in one send.
const MAX_SEND_SIZE: usize = 512 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct EndpointId(u32);

#[derive(Debug)]
struct Endpoint {
    identity: PeerIdentity,
    events: EventSender<TransportEvent>,
    listening: Option<(ListenHandle, u16)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LinkPhase {
    Connecting,
    Connected,
    PeerClosed,
}

/// One direction of a connection: the half owned by one endpoint.
#[derive(Debug)]
struct Link {
    owner: EndpointId,
    remote: PeerIdentity,
    /// The other half. `None` while nobody is listening on the far side.
    twin: Option<TransportHandle>,
    phase: LinkPhase,
    inbox: VecDeque<Vec<u8>>,
    last_flags: Option<SendFlags>,
}

impl Link {
    fn new(
        owner: EndpointId,
        remote: PeerIdentity,
        twin: Option<TransportHandle>,
        phase: LinkPhase,
    ) -> Self {
        Self {
            owner,
            remote,
            twin,
            phase,
            inbox: VecDeque::new(),
            last_flags: None,
        }
    }
}

#[derive(Debug, Default)]
struct RelayState {
    endpoints: HashMap<EndpointId, Endpoint>,
    links: HashMap<TransportHandle, Link>,
    next_endpoint: u32,
    next_handle: u32,
    next_listen: u32,
    relay_unavailable: bool,
}

impl RelayState {
    fn allocate_handle(&mut self) -> TransportHandle {
        self.next_handle += 1;
        TransportHandle::new(self.next_handle)
    }

    fn notify(&self, endpoint: EndpointId, event: TransportEvent) {
        if let Some(target) = self.endpoints.get(&endpoint) {
            if !target.events.push(event) {
                debug!(peer = %target.identity, "dropping event for closed endpoint");
            }
        }
    }

    fn listener(&self, identity: PeerIdentity, port: Option<u16>) -> Option<EndpointId> {
        self.endpoints
            .iter()
            .find(|(_, endpoint)| {
                endpoint.identity == identity
                    && match (endpoint.listening, port) {
                        (Some((_, listening)), Some(port)) => listening == port,
                        (Some(_), None) => true,
                        (None, _) => false,
                    }
            })
            .map(|(id, _)| *id)
    }

    /// Mark the twin of a removed or severed link as closed by its peer.
    fn close_twin(
        &mut self,
        twin: Option<TransportHandle>,
        closer: PeerIdentity,
        reason: DisconnectReason,
    ) {
        let Some(twin) = twin else {
            return;
        };
        let owner = match self.links.get_mut(&twin) {
            Some(link) if link.phase != LinkPhase::PeerClosed => {
                link.phase = LinkPhase::PeerClosed;
                link.twin = None;
                link.owner
            }
            _ => return,
        };
        self.notify(
            owner,
            TransportEvent::Closed {
                handle: twin,
                peer: closer,
                reason,
            },
        );
    }
}

/// Shared hub standing in for the relay network.
#[derive(Debug, Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    /// Create an empty relay.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new endpoint reachable as `identity`.
    ///
    /// Several endpoints may share an identity (a host running both a
    /// client and a server).
    pub fn endpoint(&self, identity: PeerIdentity) -> MemoryTransport {
        let (events, queue) = event_queue();
        let mut state = self.lock();
        state.next_endpoint += 1;
        let id = EndpointId(state.next_endpoint);
        state.endpoints.insert(
            id,
            Endpoint {
                identity,
                events,
                listening: None,
            },
        );
        drop(state);

        MemoryTransport {
            id,
            identity,
            relay: self.clone(),
            events: queue,
        }
    }

    /// Make relay initialization fail (or succeed again).
    pub fn set_relay_available(&self, available: bool) {
        self.lock().relay_unavailable = !available;
    }

    /// Flags used by the last successful send on `handle`.
    pub fn last_send_flags(&self, handle: TransportHandle) -> Option<SendFlags> {
        self.lock().links.get(&handle).and_then(|link| link.last_flags)
    }

    /// Whether `handle` is still open (not closed by its owner).
    pub fn is_open(&self, handle: TransportHandle) -> bool {
        self.lock().links.contains_key(&handle)
    }

    /// Number of handles not yet closed by their owners.
    pub fn open_handles(&self) -> usize {
        self.lock().links.len()
    }

    /// Simulate a problem detected on `handle`: both ends observe a close
    /// with [`DisconnectReason::TransportError`].
    pub fn sever(&self, handle: TransportHandle) {
        let mut state = self.lock();
        let (owner, remote, twin) = match state.links.get_mut(&handle) {
            Some(link) if link.phase != LinkPhase::PeerClosed => {
                link.phase = LinkPhase::PeerClosed;
                (link.owner, link.remote, link.twin.take())
            }
            _ => return,
        };
        let closer = state
            .endpoints
            .get(&owner)
            .map(|endpoint| endpoint.identity)
            .unwrap_or(remote);

        state.notify(
            owner,
            TransportEvent::Closed {
                handle,
                peer: remote,
                reason: DisconnectReason::TransportError,
            },
        );
        state.close_twin(twin, closer, DisconnectReason::TransportError);
    }
}

/// One endpoint attached to a [`MemoryRelay`].
#[derive(Debug)]
pub struct MemoryTransport {
    id: EndpointId,
    identity: PeerIdentity,
    relay: MemoryRelay,
    events: EventQueue<TransportEvent>,
}

impl MemoryTransport {
    /// The relay this endpoint is attached to.
    pub fn relay(&self) -> &MemoryRelay {
        &self.relay
    }
}

impl Drop for MemoryTransport {
    /// Detach from the relay. Links still owned by this endpoint go away
    /// with it and their twins see a `TransportError` close.
    fn drop(&mut self) {
        let mut state = self.relay.lock();
        state.endpoints.remove(&self.id);

        let owned: Vec<TransportHandle> = state
            .links
            .iter()
            .filter(|(_, link)| link.owner == self.id)
            .map(|(handle, _)| *handle)
            .collect();
        for handle in owned {
            if let Some(link) = state.links.remove(&handle) {
                state.close_twin(link.twin, self.identity, DisconnectReason::TransportError);
            }
        }
    }
}

impl RawTransport for MemoryTransport {
    fn local_identity(&self) -> PeerIdentity {
        self.identity
    }

    fn init_relay_access(&mut self) -> TransportResult<()> {
        if self.relay.lock().relay_unavailable {
            return Err(TransportError::RelayInit("relay network unavailable".into()));
        }
        Ok(())
    }

    fn listen(&mut self, port: u16) -> TransportResult<ListenHandle> {
        let mut state = self.relay.lock();
        state.next_listen += 1;
        let listen = ListenHandle::new(state.next_listen);
        let endpoint = state
            .endpoints
            .get_mut(&self.id)
            .ok_or_else(|| TransportError::ListenFailed("endpoint detached".into()))?;
        if endpoint.listening.is_some() {
            return Err(TransportError::ListenFailed("already listening".into()));
        }
        endpoint.listening = Some((listen, port));
        Ok(listen)
    }

    fn close_listen(&mut self, listen: ListenHandle) {
        let mut state = self.relay.lock();
        if let Some(endpoint) = state.endpoints.get_mut(&self.id) {
            if matches!(endpoint.listening, Some((current, _)) if current == listen) {
                endpoint.listening = None;
            }
        }
    }

    fn connect_p2p(&mut self, remote: PeerIdentity, port: u16) -> TransportResult<TransportHandle> {
        let mut state = self.relay.lock();
        let local = state.allocate_handle();
        let listener = state.listener(remote, Some(port));
        let twin = listener.map(|_| state.allocate_handle());

        state.links.insert(
            local,
            Link::new(self.id, remote, twin, LinkPhase::Connecting),
        );

        // Nobody listening: the attempt hangs, like an unanswered relay request.
        if let (Some(listener), Some(twin)) = (listener, twin) {
            state.links.insert(
                twin,
                Link::new(listener, self.identity, Some(local), LinkPhase::Connecting),
            );
            state.notify(
                listener,
                TransportEvent::Connecting {
                    handle: twin,
                    peer: self.identity,
                },
            );
        }

        debug!(%remote, port, handle = %local, "relay connect started");
        Ok(local)
    }

    fn accept(&mut self, handle: TransportHandle) -> TransportResult<()> {
        let mut state = self.relay.lock();
        let (remote, twin) = match state.links.get_mut(&handle) {
            Some(link) if link.owner == self.id && link.phase == LinkPhase::Connecting => {
                link.phase = LinkPhase::Connected;
                (link.remote, link.twin)
            }
            Some(_) => return Err(TransportError::InvalidState(handle)),
            None => return Err(TransportError::InvalidHandle(handle)),
        };

        state.notify(
            self.id,
            TransportEvent::Connected {
                handle,
                peer: remote,
            },
        );

        let twin_owner = twin.and_then(|twin| {
            let link = state.links.get_mut(&twin)?;
            (link.phase == LinkPhase::Connecting).then(|| {
                link.phase = LinkPhase::Connected;
                (twin, link.owner)
            })
        });
        if let Some((twin, owner)) = twin_owner {
            state.notify(
                owner,
                TransportEvent::Connected {
                    handle: twin,
                    peer: self.identity,
                },
            );
        }
        Ok(())
    }

    fn create_socket_pair(&mut self, identity: PeerIdentity) -> TransportResult<SocketPair> {
        let mut state = self.relay.lock();
        let server_owner = state.listener(identity, None).unwrap_or(self.id);
        let to_server = state.allocate_handle();
        let to_client = state.allocate_handle();

        state.links.insert(
            to_server,
            Link::new(self.id, identity, Some(to_client), LinkPhase::Connected),
        );
        state.links.insert(
            to_client,
            Link::new(server_owner, self.identity, Some(to_server), LinkPhase::Connected),
        );

        Ok(SocketPair {
            to_server,
            to_client,
        })
    }

    fn close(&mut self, handle: TransportHandle, reason: DisconnectReason) {
        let mut state = self.relay.lock();
        if let Some(link) = state.links.remove(&handle) {
            state.close_twin(link.twin, self.identity, reason);
        }
    }

    fn send(&mut self, handle: TransportHandle, data: &[u8], flags: SendFlags) -> Result<(), SendError> {
        if data.len() > MAX_SEND_SIZE {
            return Err(SendError::MessageTooLarge(data.len()));
        }

        let mut state = self.relay.lock();
        let twin = match state.links.get_mut(&handle) {
            None => return Err(SendError::InvalidHandle),
            Some(link) => match link.phase {
                LinkPhase::Connecting => return Err(SendError::NotConnected),
                LinkPhase::PeerClosed => return Err(SendError::PeerUnreachable),
                LinkPhase::Connected => {
                    link.last_flags = Some(flags);
                    link.twin
                }
            },
        };

        let twin = twin.ok_or(SendError::PeerUnreachable)?;
        let link = state
            .links
            .get_mut(&twin)
            .ok_or(SendError::PeerUnreachable)?;
        link.inbox.push_back(data.to_vec());
        Ok(())
    }

    fn receive(&mut self, handle: TransportHandle, out: &mut Vec<Vec<u8>>, max: usize) -> usize {
        let mut state = self.relay.lock();
        let Some(link) = state.links.get_mut(&handle) else {
            return 0;
        };
        let count = max.min(link.inbox.len());
        out.extend(link.inbox.drain(..count));
        count
    }

    fn poll_events(&mut self, out: &mut Vec<TransportEvent>) {
        self.events.drain_into(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: PeerIdentity = PeerIdentity::new(100);
    const CLIENT: PeerIdentity = PeerIdentity::new(200);

    fn events(transport: &mut MemoryTransport) -> Vec<TransportEvent> {
        let mut out = Vec::new();
        transport.poll_events(&mut out);
        out
    }

    #[test]
    fn test_connect_accept_send() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        let mut client = relay.endpoint(CLIENT);
        server.listen(0).unwrap();

        let to_server = client.connect_p2p(SERVER, 0).unwrap();
        let pending = events(&mut server);
        assert_eq!(pending.len(), 1);
        let TransportEvent::Connecting { handle: to_client, peer } = pending[0] else {
            panic!("expected connecting event, got {:?}", pending[0]);
        };
        assert_eq!(peer, CLIENT);

        // Not usable until accepted.
        assert_eq!(
            client.send(to_server, b"early", SendFlags::RELIABLE),
            Err(SendError::NotConnected)
        );

        server.accept(to_client).unwrap();
        assert_eq!(
            events(&mut server),
            vec![TransportEvent::Connected { handle: to_client, peer: CLIENT }]
        );
        assert_eq!(
            events(&mut client),
            vec![TransportEvent::Connected { handle: to_server, peer: SERVER }]
        );

        client.send(to_server, b"ping", SendFlags::RELIABLE).unwrap();
        server.send(to_client, b"pong", SendFlags::UNRELIABLE).unwrap();

        let mut received = Vec::new();
        assert_eq!(server.receive(to_client, &mut received, 16), 1);
        assert_eq!(client.receive(to_server, &mut received, 16), 1);
        assert_eq!(received, vec![b"ping".to_vec(), b"pong".to_vec()]);
    }

    #[test]
    fn test_close_notifies_remote_with_reason() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        let mut client = relay.endpoint(CLIENT);
        server.listen(0).unwrap();

        let to_server = client.connect_p2p(SERVER, 0).unwrap();
        let to_client = events(&mut server)[0].handle();
        server.close(to_client, DisconnectReason::ServerFull);

        assert_eq!(
            events(&mut client),
            vec![TransportEvent::Closed {
                handle: to_server,
                peer: SERVER,
                reason: DisconnectReason::ServerFull,
            }]
        );
        assert!(!relay.is_open(to_client));
        assert_eq!(
            client.send(to_server, b"x", SendFlags::RELIABLE),
            Err(SendError::PeerUnreachable)
        );

        client.close(to_server, DisconnectReason::Disconnected);
        assert_eq!(relay.open_handles(), 0);
    }

    #[test]
    fn test_connect_without_listener_hangs() {
        let relay = MemoryRelay::new();
        let mut client = relay.endpoint(CLIENT);

        let handle = client.connect_p2p(SERVER, 0).unwrap();
        assert!(events(&mut client).is_empty());
        assert_eq!(
            client.send(handle, b"x", SendFlags::RELIABLE),
            Err(SendError::NotConnected)
        );
    }

    #[test]
    fn test_socket_pair_is_connected_without_events() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        let mut client = relay.endpoint(SERVER);
        server.listen(0).unwrap();

        let pair = client.create_socket_pair(SERVER).unwrap();
        assert!(events(&mut client).is_empty());
        assert!(events(&mut server).is_empty());

        server.send(pair.to_client, b"welcome", SendFlags::RELIABLE).unwrap();
        let mut received = Vec::new();
        client.receive(pair.to_server, &mut received, 8);
        assert_eq!(received, vec![b"welcome".to_vec()]);

        // Closing the client side is reported to the server endpoint.
        client.close(pair.to_server, DisconnectReason::Disconnected);
        assert_eq!(
            events(&mut server),
            vec![TransportEvent::Closed {
                handle: pair.to_client,
                peer: SERVER,
                reason: DisconnectReason::Disconnected,
            }]
        );
    }

    #[test]
    fn test_last_send_flags() {
        let relay = MemoryRelay::new();
        let mut host = relay.endpoint(SERVER);
        let pair = host.create_socket_pair(SERVER).unwrap();

        host.send(pair.to_server, b"a", SendFlags::RELIABLE).unwrap();
        assert_eq!(relay.last_send_flags(pair.to_server), Some(SendFlags::RELIABLE));

        host.send(pair.to_server, b"b", SendFlags::UNRELIABLE).unwrap();
        assert_eq!(relay.last_send_flags(pair.to_server), Some(SendFlags::UNRELIABLE));
    }

    #[test]
    fn test_relay_init_failure() {
        let relay = MemoryRelay::new();
        let mut client = relay.endpoint(CLIENT);
        assert!(client.init_relay_access().is_ok());

        relay.set_relay_available(false);
        assert!(matches!(
            client.init_relay_access(),
            Err(TransportError::RelayInit(_))
        ));
    }

    #[test]
    fn test_events_produced_on_other_thread() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        server.listen(0).unwrap();

        let remote_relay = relay.clone();
        std::thread::spawn(move || {
            let mut client = remote_relay.endpoint(CLIENT);
            client.connect_p2p(SERVER, 0).unwrap();
            // Keep the attempt alive after the thread ends.
            std::mem::forget(client);
        })
        .join()
        .unwrap();

        let pending = events(&mut server);
        assert_eq!(pending.len(), 1);
        assert!(matches!(pending[0], TransportEvent::Connecting { peer: CLIENT, .. }));
    }

    #[test]
    fn test_dropped_endpoint_closes_its_links() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        let mut client = relay.endpoint(CLIENT);
        server.listen(0).unwrap();

        let to_server = client.connect_p2p(SERVER, 0).unwrap();
        let to_client = events(&mut server)[0].handle();
        server.accept(to_client).unwrap();
        events(&mut server);
        drop(client);

        assert!(!relay.is_open(to_server));
        assert_eq!(relay.open_handles(), 1);
        assert_eq!(
            events(&mut server),
            vec![TransportEvent::Closed {
                handle: to_client,
                peer: CLIENT,
                reason: DisconnectReason::TransportError,
            }]
        );
        assert_eq!(
            server.send(to_client, b"x", SendFlags::RELIABLE),
            Err(SendError::PeerUnreachable)
        );

        server.close(to_client, DisconnectReason::Disconnected);
        assert_eq!(relay.open_handles(), 0);
    }

    #[test]
    fn test_sever_notifies_both_ends() {
        let relay = MemoryRelay::new();
        let mut server = relay.endpoint(SERVER);
        let mut client = relay.endpoint(CLIENT);
        server.listen(0).unwrap();

        let to_server = client.connect_p2p(SERVER, 0).unwrap();
        let to_client = events(&mut server)[0].handle();
        server.accept(to_client).unwrap();
        events(&mut server);
        events(&mut client);

        relay.sever(to_server);
        assert!(matches!(
            events(&mut client)[..],
            [TransportEvent::Closed { reason: DisconnectReason::TransportError, .. }]
        ));
        assert!(matches!(
            events(&mut server)[..],
            [TransportEvent::Closed { reason: DisconnectReason::TransportError, .. }]
        ));
    }
}
