//! Client role.
//!
//! Provides `ClientSession<T>` for driving one outbound connection over a
//! transport `T: RawTransport`, including the in-process loopback path.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::address::HostAddress;
use super::timeout::ConnectDeadline;
use crate::connection::{Connection, ConnectionInfo, LoopbackHost};
use crate::core::constants::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_MAX_MESSAGES_PER_POLL, DEFAULT_PORT, MAX_MESSAGE_SIZE,
    MAX_PAYLOAD_SIZE,
};
use crate::core::{ConnectError, ConnectionId, ConnectionState, DisconnectReason, PeerIdentity, SendMode};
use crate::protocol::{ControlMessage, Frame};
use crate::transport::{RawTransport, SendError, TransportEvent};

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Virtual port of the remote server.
    pub port: u16,

    /// Abandon a connection attempt after this long without a welcome.
    pub connect_timeout: Duration,

    /// Messages pulled from the connection per poll.
    pub max_messages_per_poll: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_messages_per_poll: DEFAULT_MAX_MESSAGES_PER_POLL,
        }
    }
}

impl ClientConfig {
    /// Start building a configuration.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Debug)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
        }
    }

    /// Set the remote server's virtual port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set how many messages are pulled per poll.
    pub fn max_messages_per_poll(mut self, max: usize) -> Self {
        self.config.max_messages_per_poll = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ClientConfig {
        self.config
    }
}

impl Default for ClientConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event raised to the application by [`ClientSession::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// Handshake finished; the server assigned `id`.
    Connected {
        /// Our connection id.
        id: ConnectionId,
    },

    /// The attempt ended before the handshake finished.
    ConnectionFailed {
        /// Why.
        reason: DisconnectReason,
    },

    /// An established connection ended.
    Disconnected {
        /// Why.
        reason: DisconnectReason,
    },

    /// Another client joined the server.
    PeerConnected {
        /// Its id.
        id: ConnectionId,
    },

    /// Another client left the server.
    PeerDisconnected {
        /// Its id.
        id: ConnectionId,
    },

    /// Application payload from the server.
    MessageReceived {
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

/// Connecting side of the protocol.
///
/// Drives at most one connection at a time. Everything happens inside
/// [`poll`](Self::poll), which the owner must call regularly; a pending
/// attempt is abandoned on the first poll after its deadline.
pub struct ClientSession<T: RawTransport> {
    transport: T,
    config: ClientConfig,
    connection: Option<Connection>,
    local_server: Option<Rc<RefCell<dyn LoopbackHost>>>,
    /// Set while an attempt is pending.
    deadline: Option<ConnectDeadline>,
    events: Vec<ClientEvent>,
    inbox: Vec<Vec<u8>>,
    transport_events: Vec<TransportEvent>,
}

impl<T: RawTransport> ClientSession<T> {
    /// Create a disconnected client over `transport`.
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            connection: None,
            local_server: None,
            deadline: None,
            events: Vec::new(),
            inbox: Vec::new(),
            transport_events: Vec::new(),
        }
    }

    /// Set (or clear) the in-process server used for loopback addresses.
    pub fn set_local_server(&mut self, host: Option<Rc<RefCell<dyn LoopbackHost>>>) {
        self.local_server = host;
    }

    /// Connect to `address`: a loopback designator or a peer identity.
    ///
    /// On success the returned connection is `Connecting`, except on the
    /// loopback path where the handshake usually completes before return.
    pub fn connect(&mut self, address: &str) -> Result<ConnectionInfo, ConnectError> {
        if self.connection.is_some() {
            return Err(ConnectError::AlreadyConnected);
        }

        let address: HostAddress = address.parse()?;
        match address {
            HostAddress::Loopback => self.connect_loopback(),
            HostAddress::Remote(peer) => self.connect_remote(peer),
        }
    }

    fn connect_remote(&mut self, peer: PeerIdentity) -> Result<ConnectionInfo, ConnectError> {
        self.transport
            .init_relay_access()
            .map_err(|err| ConnectError::TransportInitFailed(err.to_string()))?;

        let handle = self
            .transport
            .connect_p2p(peer, self.config.port)
            .map_err(|err| ConnectError::TransportInitFailed(err.to_string()))?;

        let connection = Connection::outbound(peer, handle);
        let info = connection.info();
        self.connection = Some(connection);
        self.deadline = Some(ConnectDeadline::after(self.config.connect_timeout));

        info!(%peer, port = self.config.port, %handle, "connecting");
        Ok(info)
    }

    fn connect_loopback(&mut self) -> Result<ConnectionInfo, ConnectError> {
        let host = self.local_server.clone().ok_or(ConnectError::NoLocalServer)?;
        let identity = host
            .try_borrow()
            .ok()
            .and_then(|host| host.host_identity())
            .ok_or(ConnectError::NoLocalServer)?;

        let pair = self
            .transport
            .create_socket_pair(identity)
            .map_err(|err| ConnectError::TransportInitFailed(err.to_string()))?;

        let connection = Connection::outbound(identity, pair.to_server);
        let info = connection.info();
        self.connection = Some(connection);
        info!(%identity, handle = %pair.to_server, "connecting to local server");

        let local = self.transport.local_identity();
        let accepted = match host.try_borrow_mut() {
            Ok(mut host) => host.accept_loopback(pair.to_client, local),
            Err(_) => {
                warn!("local server is busy, closing loopback pair");
                self.transport.close(pair.to_client, DisconnectReason::TransportError);
                None
            }
        };
        if accepted.is_none() {
            debug!("local server refused the loopback connection");
        }

        // The welcome is already waiting on our end of the pair.
        self.receive_messages();

        if self.is_connecting() {
            self.deadline = Some(ConnectDeadline::after(self.config.connect_timeout));
        }

        Ok(self
            .connection
            .as_ref()
            .map(Connection::info)
            .unwrap_or(ConnectionInfo {
                state: ConnectionState::NotConnected,
                ..info
            }))
    }

    /// Close the connection. Does nothing if there is none.
    pub fn disconnect(&mut self) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        self.deadline = None;
        connection.close(&mut self.transport, DisconnectReason::Disconnected);
        info!(id = %connection.id(), peer = %connection.peer(), "disconnected");
    }

    /// Consume pending messages and transport events, then check the
    /// connect deadline.
    ///
    /// Returns the application events raised since the last poll, in order.
    pub fn poll(&mut self) -> Vec<ClientEvent> {
        self.receive_messages();
        self.process_transport_events();
        self.check_deadline();
        std::mem::take(&mut self.events)
    }

    /// Send a payload to the server.
    pub fn send(&mut self, data: &[u8], mode: SendMode) -> Result<(), SendError> {
        self.send_payload(data, mode, false)
    }

    /// Send a payload the server may forward to every other client.
    pub fn send_relayed(&mut self, data: &[u8], mode: SendMode) -> Result<(), SendError> {
        self.send_payload(data, mode, true)
    }

    /// Push out anything the transport batches for this connection.
    pub fn flush(&mut self) {
        if let Some(connection) = &self.connection {
            self.transport.flush(connection.handle());
        }
    }

    /// Our connection id, `INVALID` until the welcome arrives.
    pub fn id(&self) -> ConnectionId {
        self.connection
            .as_ref()
            .map(Connection::id)
            .unwrap_or(ConnectionId::INVALID)
    }

    /// Lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(Connection::state)
            .unwrap_or(ConnectionState::NotConnected)
    }

    /// Whether the handshake finished.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Whether a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        self.state() == ConnectionState::Connecting
    }

    /// Whether there is no connection at all.
    pub fn is_not_connected(&self) -> bool {
        self.state() == ConnectionState::NotConnected
    }

    /// Snapshot of the current connection.
    pub fn connection(&self) -> Option<ConnectionInfo> {
        self.connection.as_ref().map(Connection::info)
    }

    /// Current configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The underlying transport, mutably.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn send_payload(&mut self, data: &[u8], mode: SendMode, relayed: bool) -> Result<(), SendError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::MessageTooLarge(data.len()));
        }
        let connection = match &self.connection {
            Some(connection) if connection.is_connected() => connection,
            _ => return Err(SendError::NotConnected),
        };

        let result = connection.send_payload(&mut self.transport, data, mode, relayed);
        if let Err(err) = &result {
            warn!(%err, "send failed");
            if err.is_unreachable() {
                self.teardown(DisconnectReason::TransportError);
            }
        }
        result
    }

    /// Drop the connection and raise the matching event.
    fn teardown(&mut self, reason: DisconnectReason) {
        let Some(mut connection) = self.connection.take() else {
            return;
        };
        self.deadline = None;
        let was_connected = connection.is_connected();
        connection.close(&mut self.transport, reason);

        if was_connected {
            info!(id = %connection.id(), %reason, "connection closed");
            self.events.push(ClientEvent::Disconnected { reason });
        } else {
            info!(peer = %connection.peer(), %reason, "connection attempt failed");
            self.events.push(ClientEvent::ConnectionFailed { reason });
        }
    }

    fn process_transport_events(&mut self) {
        let mut events = std::mem::take(&mut self.transport_events);
        self.transport.poll_events(&mut events);

        for event in events.drain(..) {
            let current = self.connection.as_ref().map(Connection::handle);
            if current != Some(event.handle()) {
                debug!(handle = %event.handle(), peer = %event.peer(), "ignoring event for another connection");
                continue;
            }

            match event {
                TransportEvent::Connecting { handle, peer } => {
                    debug!(%handle, %peer, "unexpected inbound connection event");
                }
                TransportEvent::Connected { handle, peer } => {
                    debug!(%handle, %peer, "transport connected, waiting for welcome");
                }
                TransportEvent::Closed { reason, .. } => self.teardown(reason),
            }
        }
        self.transport_events = events;
    }

    fn check_deadline(&mut self) {
        let expired = self.deadline.is_some_and(|deadline| deadline.has_passed());
        if expired && self.is_connecting() {
            warn!(timeout = ?self.config.connect_timeout, "connection attempt timed out");
            self.teardown(DisconnectReason::Timeout);
        }
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn receive_messages(&mut self) {
        let Some(handle) = self.connection.as_ref().map(Connection::handle) else {
            return;
        };

        let mut inbox = std::mem::take(&mut self.inbox);
        self.transport
            .receive(handle, &mut inbox, self.config.max_messages_per_poll);
        for message in inbox.drain(..) {
            self.handle_message(message);
        }
        self.inbox = inbox;
    }

    fn handle_message(&mut self, mut bytes: Vec<u8>) {
        if self.connection.is_none() {
            return;
        }
        if bytes.len() > MAX_MESSAGE_SIZE {
            warn!(len = bytes.len(), max = MAX_MESSAGE_SIZE, "truncating oversized message");
            bytes.truncate(MAX_MESSAGE_SIZE);
        }

        match Frame::decode(&bytes) {
            Ok(Frame::Control(ControlMessage::Welcome(id))) => self.on_welcome(id),
            Ok(Frame::Control(ControlMessage::PeerJoined(id))) => {
                self.events.push(ClientEvent::PeerConnected { id });
            }
            Ok(Frame::Control(ControlMessage::PeerLeft(id))) => {
                self.events.push(ClientEvent::PeerDisconnected { id });
            }
            Ok(Frame::Control(ControlMessage::WelcomeAck(_))) => {
                warn!("ignoring server-bound welcome ack");
            }
            Ok(Frame::Payload { data, relayed }) => self.on_payload(data, relayed),
            Err(err) => warn!(%err, "dropping malformed frame"),
        }
    }

    fn on_welcome(&mut self, id: ConnectionId) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        let Some(ack) = connection
            .client_handshake_mut()
            .and_then(|handshake| handshake.receive_welcome(id))
        else {
            debug!(%id, "duplicate welcome");
            return;
        };
        connection.set_id(id);

        if let Err(err) = connection.send_control(&mut self.transport, ack) {
            warn!(%id, %err, "failed to send welcome ack");
            if err.is_unreachable() {
                self.teardown(DisconnectReason::TransportError);
                return;
            }
        }

        if let Some(handshake) = connection.client_handshake_mut() {
            handshake.ack_sent();
        }
        if !connection.promote() {
            return;
        }
        let deferred = connection.take_deferred();
        self.deadline = None;

        info!(%id, peer = %connection.peer(), "connected");
        self.events.push(ClientEvent::Connected { id });
        self.events.extend(
            deferred
                .into_iter()
                .map(|payload| ClientEvent::MessageReceived { payload: payload.data }),
        );
    }

    fn on_payload(&mut self, data: Vec<u8>, relayed: bool) {
        let Some(connection) = self.connection.as_mut() else {
            return;
        };
        if connection.is_connecting() {
            connection.defer(data, relayed);
        } else {
            self.events.push(ClientEvent::MessageReceived { payload: data });
        }
    }
}

impl<T: RawTransport + fmt::Debug> fmt::Debug for ClientSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSession")
            .field("transport", &self.transport)
            .field("config", &self.config)
            .field("connection", &self.connection)
            .field("local_server", &self.local_server.is_some())
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, feature = "memory"))]
mod tests {
    use super::*;
    use crate::core::SendFlags;
    use crate::protocol::encode_payload;
    use crate::transport::{MemoryRelay, MemoryTransport, TransportHandle};

    const HOST: PeerIdentity = PeerIdentity::new(1);
    const CLIENT: PeerIdentity = PeerIdentity::new(2);
    const TIMEOUT: Duration = Duration::from_millis(500);

    /// A server driven by hand.
    struct RawHost {
        transport: MemoryTransport,
    }

    impl RawHost {
        fn listen(relay: &MemoryRelay) -> Self {
            let mut transport = relay.endpoint(HOST);
            transport.listen(0).unwrap();
            Self { transport }
        }

        /// Accept the pending attempt and return its handle.
        fn accept(&mut self) -> TransportHandle {
            let mut events = Vec::new();
            self.transport.poll_events(&mut events);
            let handle = events
                .iter()
                .find_map(|event| match event {
                    TransportEvent::Connecting { handle, .. } => Some(*handle),
                    _ => None,
                })
                .expect("no pending connection attempt");
            self.transport.accept(handle).unwrap();
            handle
        }

        fn control(&mut self, handle: TransportHandle, message: ControlMessage) {
            self.transport
                .send(handle, &message.to_bytes(), SendFlags::RELIABLE)
                .unwrap();
        }

        fn payload(&mut self, handle: TransportHandle, data: &[u8]) {
            self.transport
                .send(handle, &encode_payload(data, false), SendFlags::RELIABLE)
                .unwrap();
        }

        fn frames(&mut self, handle: TransportHandle) -> Vec<Frame> {
            let mut out = Vec::new();
            self.transport.receive(handle, &mut out, 64);
            out.iter().map(|bytes| Frame::decode(bytes).unwrap()).collect()
        }
    }

    fn client(relay: &MemoryRelay) -> ClientSession<MemoryTransport> {
        let config = ClientConfig::builder().connect_timeout(TIMEOUT).build();
        ClientSession::new(relay.endpoint(CLIENT), config)
    }

    /// Connect and finish the handshake with id `id`.
    fn connected(
        relay: &MemoryRelay,
        host: &mut RawHost,
        id: u16,
    ) -> (ClientSession<MemoryTransport>, TransportHandle) {
        let mut client = client(relay);
        client.connect(&HOST.to_string()).unwrap();
        let handle = host.accept();
        host.control(handle, ControlMessage::Welcome(ConnectionId::new(id)));
        assert_eq!(
            client.poll(),
            vec![ClientEvent::Connected {
                id: ConnectionId::new(id)
            }]
        );
        (client, handle)
    }

    #[test]
    fn test_invalid_address() {
        let relay = MemoryRelay::new();
        let mut client = client(&relay);
        assert_eq!(
            client.connect("not a peer").unwrap_err(),
            ConnectError::InvalidAddress("not a peer".into())
        );
        assert!(client.is_not_connected());
    }

    #[test]
    fn test_loopback_without_local_server() {
        let relay = MemoryRelay::new();
        let mut client = client(&relay);
        assert_eq!(client.connect("localhost").unwrap_err(), ConnectError::NoLocalServer);
        assert!(client.connection().is_none());
    }

    #[test]
    fn test_remote_connect_times_out_without_runtime() {
        let relay = MemoryRelay::new();
        let config = ClientConfig::builder()
            .connect_timeout(Duration::from_millis(50))
            .build();
        let mut client = ClientSession::new(relay.endpoint(CLIENT), config);

        assert_eq!(client.connect("1").unwrap().state, ConnectionState::Connecting);
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(
            client.poll(),
            vec![ClientEvent::ConnectionFailed {
                reason: DisconnectReason::Timeout
            }]
        );
        assert_eq!(relay.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_timeout_fires_in_blocking_poll_loop() {
        let relay = MemoryRelay::new();
        let config = ClientConfig::builder()
            .connect_timeout(Duration::from_millis(50))
            .build();
        let mut client = ClientSession::new(relay.endpoint(CLIENT), config);
        client.connect("99").unwrap();

        // A game loop that never yields to the runtime.
        let mut events = Vec::new();
        for _ in 0..20 {
            std::thread::sleep(Duration::from_millis(10));
            events.extend(client.poll());
        }
        assert_eq!(
            events,
            vec![ClientEvent::ConnectionFailed {
                reason: DisconnectReason::Timeout
            }]
        );
        assert!(client.is_not_connected());
    }

    #[test]
    fn test_relay_init_failure() {
        let relay = MemoryRelay::new();
        relay.set_relay_available(false);
        let mut client = client(&relay);
        assert!(matches!(
            client.connect("1"),
            Err(ConnectError::TransportInitFailed(_))
        ));
        assert!(client.is_not_connected());
    }

    #[tokio::test]
    async fn test_handshake() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let mut client = client(&relay);

        let info = client.connect("1").unwrap();
        assert_eq!(info.state, ConnectionState::Connecting);
        assert_eq!(info.peer, HOST);
        assert_eq!(client.connect("1").unwrap_err(), ConnectError::AlreadyConnected);

        let handle = host.accept();
        assert!(client.poll().is_empty());
        assert!(client.is_connecting());

        let id = ConnectionId::new(5);
        host.control(handle, ControlMessage::Welcome(id));
        assert_eq!(client.poll(), vec![ClientEvent::Connected { id }]);
        assert!(client.is_connected());
        assert_eq!(client.id(), id);
        assert_eq!(
            host.frames(handle),
            vec![Frame::Control(ControlMessage::WelcomeAck(id))]
        );
    }

    #[tokio::test]
    async fn test_payloads_before_welcome_are_buffered() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let mut client = client(&relay);
        client.connect("1").unwrap();
        let handle = host.accept();

        host.payload(handle, b"A");
        host.payload(handle, b"B");
        assert!(client.poll().is_empty());

        host.payload(handle, b"C");
        host.control(handle, ControlMessage::Welcome(ConnectionId::new(1)));
        host.payload(handle, b"D");
        assert_eq!(
            client.poll(),
            vec![
                ClientEvent::Connected {
                    id: ConnectionId::new(1)
                },
                ClientEvent::MessageReceived {
                    payload: b"A".to_vec()
                },
                ClientEvent::MessageReceived {
                    payload: b"B".to_vec()
                },
                ClientEvent::MessageReceived {
                    payload: b"C".to_vec()
                },
                ClientEvent::MessageReceived {
                    payload: b"D".to_vec()
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_exactly_once() {
        let relay = MemoryRelay::new();
        let mut client = client(&relay);
        client.connect("1").unwrap();
        assert!(client.poll().is_empty());

        tokio::time::sleep(TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(
            client.poll(),
            vec![ClientEvent::ConnectionFailed {
                reason: DisconnectReason::Timeout
            }]
        );
        assert!(client.poll().is_empty());
        assert!(client.connection().is_none());
        assert_eq!(relay.open_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cleared_once_connected() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let (mut client, _) = connected(&relay, &mut host, 1);

        tokio::time::sleep(TIMEOUT * 2).await;
        assert!(client.poll().is_empty());
        assert!(client.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_gets_fresh_deadline() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let mut client = client(&relay);

        client.connect("1").unwrap();
        host.accept();
        tokio::time::sleep(TIMEOUT / 2).await;
        client.disconnect();
        client.connect("1").unwrap();
        host.accept();

        // The first attempt's deadline has passed, the second's has not.
        tokio::time::sleep(TIMEOUT / 2 + Duration::from_millis(1)).await;
        assert!(client.poll().is_empty());
        assert!(client.is_connecting());

        tokio::time::sleep(TIMEOUT / 2).await;
        assert_eq!(
            client.poll(),
            vec![ClientEvent::ConnectionFailed {
                reason: DisconnectReason::Timeout
            }]
        );
    }

    #[tokio::test]
    async fn test_rejection_while_connecting() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let mut client = client(&relay);
        client.connect("1").unwrap();

        let mut events = Vec::new();
        host.transport.poll_events(&mut events);
        host.transport
            .close(events[0].handle(), DisconnectReason::ServerFull);

        assert_eq!(
            client.poll(),
            vec![ClientEvent::ConnectionFailed {
                reason: DisconnectReason::ServerFull
            }]
        );
        assert!(client.is_not_connected());
    }

    #[tokio::test]
    async fn test_kicked_while_connected() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let (mut client, handle) = connected(&relay, &mut host, 1);

        host.transport.close(handle, DisconnectReason::Kicked);
        assert_eq!(
            client.poll(),
            vec![ClientEvent::Disconnected {
                reason: DisconnectReason::Kicked
            }]
        );
        assert_eq!(client.id(), ConnectionId::INVALID);
    }

    #[tokio::test]
    async fn test_send_uses_requested_reliability() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let mut client = client(&relay);
        assert_eq!(client.send(b"x", SendMode::Reliable), Err(SendError::NotConnected));

        client.connect("1").unwrap();
        assert_eq!(client.send(b"x", SendMode::Reliable), Err(SendError::NotConnected));

        let handle = host.accept();
        host.control(handle, ControlMessage::Welcome(ConnectionId::new(1)));
        client.poll();
        let ours = client.connection().unwrap().handle;

        client.send(b"r", SendMode::Reliable).unwrap();
        assert_eq!(relay.last_send_flags(ours), Some(SendFlags::RELIABLE));
        client.send(b"u", SendMode::Unreliable).unwrap();
        assert_eq!(relay.last_send_flags(ours), Some(SendFlags::UNRELIABLE));

        client.send_relayed(b"all", SendMode::Reliable).unwrap();
        assert_eq!(
            host.frames(handle)[1..],
            [
                Frame::Payload {
                    data: b"r".to_vec(),
                    relayed: false
                },
                Frame::Payload {
                    data: b"u".to_vec(),
                    relayed: false
                },
                Frame::Payload {
                    data: b"all".to_vec(),
                    relayed: true
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_peer_notifications() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let (mut client, handle) = connected(&relay, &mut host, 1);

        host.control(handle, ControlMessage::PeerJoined(ConnectionId::new(2)));
        host.control(handle, ControlMessage::PeerLeft(ConnectionId::new(2)));
        assert_eq!(
            client.poll(),
            vec![
                ClientEvent::PeerConnected {
                    id: ConnectionId::new(2)
                },
                ClientEvent::PeerDisconnected {
                    id: ConnectionId::new(2)
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_send_to_unreachable_server_disconnects() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let (mut client, handle) = connected(&relay, &mut host, 1);

        relay.sever(handle);
        assert_eq!(
            client.send(b"lost", SendMode::Reliable),
            Err(SendError::PeerUnreachable)
        );
        assert!(client.is_not_connected());

        // The close report for the dropped handle is ignored.
        assert_eq!(
            client.poll(),
            vec![ClientEvent::Disconnected {
                reason: DisconnectReason::TransportError
            }]
        );
        assert!(client.poll().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let relay = MemoryRelay::new();
        let mut host = RawHost::listen(&relay);
        let (mut client, _) = connected(&relay, &mut host, 1);
        let ours = client.connection().unwrap().handle;

        client.disconnect();
        client.disconnect();
        assert!(client.is_not_connected());
        assert!(client.poll().is_empty());
        assert!(!relay.is_open(ours));
    }
}
