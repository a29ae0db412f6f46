//! Server role.
//!
//! Provides `ServerSession<T>` for accepting many inbound connections over
//! one listen socket of a transport `T: RawTransport`.

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, ConnectionInfo, ConnectionRegistry, LoopbackHost};
use crate::core::constants::{
    DEFAULT_MAX_CLIENTS, DEFAULT_MAX_MESSAGES_PER_POLL, DEFAULT_PORT, MAX_MESSAGE_SIZE,
    MAX_PAYLOAD_SIZE,
};
use crate::core::{ConnectionId, DisconnectReason, PeerIdentity, SendMode};
use crate::protocol::{AckOutcome, ControlMessage, Frame};
use crate::transport::{
    ListenHandle, RawTransport, SendError, TransportError, TransportEvent, TransportHandle,
};

/// Errors that can occur when starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called on a running server.
    #[error("server already running")]
    AlreadyRunning,

    /// A server needs room for at least one client.
    #[error("max_clients must be at least 1")]
    InvalidCapacity,

    /// Relay access or the listen socket failed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Virtual port to listen on.
    pub port: u16,

    /// Maximum number of simultaneous connections.
    pub max_clients: u16,

    /// Forward relayed payloads to every other client instead of raising
    /// them as messages.
    pub allow_auto_relay: bool,

    /// Messages pulled from one connection per poll.
    pub max_messages_per_poll: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            allow_auto_relay: false,
            max_messages_per_poll: DEFAULT_MAX_MESSAGES_PER_POLL,
        }
    }
}

impl ServerConfig {
    /// Start building a configuration.
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::new()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Debug)]
pub struct ServerConfigBuilder {
    config: ServerConfig,
}

impl ServerConfigBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Set the virtual listen port.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Set the maximum number of simultaneous connections.
    pub fn max_clients(mut self, max: u16) -> Self {
        self.config.max_clients = max;
        self
    }

    /// Enable or disable forwarding of relayed payloads.
    pub fn allow_auto_relay(mut self, enabled: bool) -> Self {
        self.config.allow_auto_relay = enabled;
        self
    }

    /// Set how many messages are pulled from one connection per poll.
    pub fn max_messages_per_poll(mut self, max: usize) -> Self {
        self.config.max_messages_per_poll = max;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ServerConfig {
        self.config
    }
}

impl Default for ServerConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Event raised to the application by [`ServerSession::poll`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// A client finished its handshake.
    PeerConnected {
        /// Assigned id.
        id: ConnectionId,
        /// Client identity.
        peer: PeerIdentity,
    },

    /// A connected client left.
    PeerDisconnected {
        /// Id the client had.
        id: ConnectionId,
        /// Why it left.
        reason: DisconnectReason,
    },

    /// Application payload from a connected client.
    MessageReceived {
        /// Sender.
        from: ConnectionId,
        /// Payload bytes.
        payload: Vec<u8>,
    },
}

/// Accepting side of the protocol.
///
/// Everything happens inside [`poll`](Self::poll), which the owner must call
/// regularly. Events caused by calls made between polls (`kick`, failed
/// sends) are returned by the next poll.
///
/// # Example
///
/// ```ignore
/// use relay_transport::server::{ServerConfig, ServerSession};
///
/// let mut server = ServerSession::new(transport, ServerConfig::default());
/// server.start(0, 8)?;
///
/// loop {
///     for event in server.poll() {
///         // ...
///     }
/// }
/// ```
#[derive(Debug)]
pub struct ServerSession<T: RawTransport> {
    transport: T,
    config: ServerConfig,
    registry: ConnectionRegistry,
    listen: Option<ListenHandle>,
    /// Accepted at the transport, waiting for its `Connected` event.
    accepting: HashMap<TransportHandle, PeerIdentity>,
    events: Vec<ServerEvent>,
    inbox: Vec<Vec<u8>>,
    transport_events: Vec<TransportEvent>,
}

impl<T: RawTransport> ServerSession<T> {
    /// Create a stopped server over `transport`.
    pub fn new(transport: T, config: ServerConfig) -> Self {
        let registry = ConnectionRegistry::new(config.max_clients);
        Self {
            transport,
            config,
            registry,
            listen: None,
            accepting: HashMap::new(),
            events: Vec::new(),
            inbox: Vec::new(),
            transport_events: Vec::new(),
        }
    }

    /// Open the listen socket on `port` with room for `max_clients`.
    pub fn start(&mut self, port: u16, max_clients: u16) -> Result<(), ServerError> {
        if self.listen.is_some() {
            return Err(ServerError::AlreadyRunning);
        }
        if max_clients == 0 {
            return Err(ServerError::InvalidCapacity);
        }

        self.transport.init_relay_access()?;
        let listen = self.transport.listen(port)?;

        self.config.port = port;
        self.config.max_clients = max_clients;
        self.registry = ConnectionRegistry::new(max_clients);
        self.listen = Some(listen);

        info!(port, max_clients, identity = %self.transport.local_identity(), "server started");
        Ok(())
    }

    /// Start with the port and capacity from the configuration.
    pub fn start_from_config(&mut self) -> Result<(), ServerError> {
        self.start(self.config.port, self.config.max_clients)
    }

    /// Whether the listen socket is open.
    pub fn is_running(&self) -> bool {
        self.listen.is_some()
    }

    /// Listen port.
    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Capacity.
    pub fn max_clients(&self) -> u16 {
        self.config.max_clients
    }

    /// Number of registered connections, including those still in handshake.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// Snapshot of every registered connection, ordered by id.
    pub fn clients(&self) -> Vec<ConnectionInfo> {
        self.registry.snapshot()
    }

    /// Snapshot of one connection.
    pub fn connection(&self, id: ConnectionId) -> Option<ConnectionInfo> {
        self.registry.lookup_by_id(id).map(Connection::info)
    }

    /// Current configuration.
    pub fn config(&self) -> &ServerConfig {
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

    /// Consume pending messages and transport events.
    ///
    /// Returns the application events raised since the last poll, in order.
    pub fn poll(&mut self) -> Vec<ServerEvent> {
        self.receive_messages();
        self.process_transport_events();
        std::mem::take(&mut self.events)
    }

    /// Send a payload to one connected client.
    ///
    /// Unknown ids (or clients still in handshake) are a no-op; the client
    /// may have left between the caller's decision and this call.
    pub fn send_to(&mut self, id: ConnectionId, data: &[u8], mode: SendMode) -> Result<(), SendError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::MessageTooLarge(data.len()));
        }

        let result = match self.registry.lookup_by_id(id) {
            Some(connection) if connection.is_connected() => {
                connection.send_payload(&mut self.transport, data, mode, false)
            }
            _ => {
                debug!(%id, "send_to: no connected client with this id");
                return Ok(());
            }
        };

        if let Err(err) = &result {
            warn!(%id, %err, "send failed");
            if err.is_unreachable() {
                self.teardown(id, DisconnectReason::TransportError);
            }
        }
        result
    }

    /// Send a payload to every connected client except `except`.
    ///
    /// Returns the number of clients the payload was handed to.
    pub fn broadcast(
        &mut self,
        data: &[u8],
        mode: SendMode,
        except: Option<ConnectionId>,
    ) -> Result<usize, SendError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(SendError::MessageTooLarge(data.len()));
        }
        Ok(self.fan_out(except, |connection, transport| {
            connection.send_payload(transport, data, mode, false)
        }))
    }

    /// Disconnect a client with [`DisconnectReason::Kicked`].
    ///
    /// Unknown ids are logged and otherwise ignored.
    pub fn kick(&mut self, id: ConnectionId) {
        if self.registry.lookup_by_id(id).is_none() {
            warn!(%id, "kick: no connection with this id");
            return;
        }
        info!(%id, "kicking client");
        self.teardown(id, DisconnectReason::Kicked);
    }

    /// Push out anything the transport batches for each connection.
    pub fn flush(&mut self) {
        for connection in self.registry.iter() {
            self.transport.flush(connection.handle());
        }
    }

    /// Close every connection and the listen socket.
    ///
    /// No events are raised for connections closed this way. Events raised
    /// earlier are still returned by the next poll.
    pub fn shutdown(&mut self) {
        for mut connection in self.registry.drain() {
            connection.close(&mut self.transport, DisconnectReason::Disconnected);
        }
        for (handle, _) in self.accepting.drain() {
            self.transport.close(handle, DisconnectReason::Disconnected);
        }

        if let Some(listen) = self.listen.take() {
            self.transport.close_listen(listen);
            info!(port = self.config.port, "server stopped");
        }
    }

    // =========================================================================
    // Transport events
    // =========================================================================

    fn process_transport_events(&mut self) {
        let mut events = std::mem::take(&mut self.transport_events);
        self.transport.poll_events(&mut events);

        for event in events.drain(..) {
            match event {
                TransportEvent::Connecting { handle, peer } => self.on_connecting(handle, peer),
                TransportEvent::Connected { handle, peer } => self.on_connected(handle, peer),
                TransportEvent::Closed {
                    handle,
                    peer,
                    reason,
                } => self.on_closed(handle, peer, reason),
            }
        }
        self.transport_events = events;
    }

    fn on_connecting(&mut self, handle: TransportHandle, peer: PeerIdentity) {
        debug!(%handle, %peer, "inbound connection attempt");
        if !self.admit(handle, peer) {
            return;
        }

        match self.transport.accept(handle) {
            Ok(()) => {
                self.accepting.insert(handle, peer);
            }
            Err(err) => {
                warn!(%handle, %peer, %err, "accept failed");
                self.transport.close(handle, DisconnectReason::TransportError);
            }
        }
    }

    fn on_connected(&mut self, handle: TransportHandle, peer: PeerIdentity) {
        if self.accepting.remove(&handle).is_none() {
            debug!(%handle, %peer, "connected event for a handle we did not accept");
            return;
        }

        match self.registry.allocate_id() {
            Ok(id) => {
                self.register(id, peer, handle);
            }
            Err(err) => {
                warn!(%peer, %err, "no connection id available");
                self.transport.close(handle, DisconnectReason::ServerFull);
            }
        }
    }

    fn on_closed(&mut self, handle: TransportHandle, peer: PeerIdentity, reason: DisconnectReason) {
        debug!(%handle, %peer, %reason, "transport connection closed");
        if self.accepting.remove(&handle).is_some() {
            self.transport.close(handle, DisconnectReason::Disconnected);
            return;
        }

        let id = self
            .registry
            .lookup_by_peer(peer)
            .filter(|connection| connection.handle() == handle)
            .map(Connection::id);
        match id {
            Some(id) => self.teardown(id, reason),
            None => debug!(%handle, %peer, "close for unknown connection"),
        }
    }

    /// Capacity and duplicate checks. Refused attempts are closed here and
    /// leave nothing behind.
    fn admit(&mut self, handle: TransportHandle, peer: PeerIdentity) -> bool {
        if !self.is_running() {
            debug!(%handle, %peer, "not running, refusing connection");
            self.transport.close(handle, DisconnectReason::Disconnected);
            return false;
        }

        let live = self.registry.len() + self.accepting.len();
        if live >= self.config.max_clients as usize {
            info!(%peer, max_clients = self.config.max_clients, "server full, rejecting connection");
            self.transport.close(handle, DisconnectReason::ServerFull);
            return false;
        }

        if self.registry.id_of(peer).is_some() || self.accepting.values().any(|p| *p == peer) {
            warn!(%peer, "peer already has a connection, rejecting");
            self.transport.close(handle, DisconnectReason::Disconnected);
            return false;
        }

        true
    }

    /// Create the connection record and send the welcome.
    fn register(
        &mut self,
        id: ConnectionId,
        peer: PeerIdentity,
        handle: TransportHandle,
    ) -> Option<ConnectionId> {
        let mut connection = Connection::inbound(id, peer, handle);
        let welcome = connection.server_handshake_mut()?.start(id);

        if let Err(err) = self.registry.insert(connection) {
            error!(%id, %peer, %err, "registry integrity violation");
            self.registry.release_id(id);
            self.transport.close(handle, DisconnectReason::TransportError);
            return None;
        }

        info!(%id, %peer, %handle, "accepted connection, sending welcome");
        let sent = self
            .registry
            .lookup_by_id(id)
            .map(|connection| connection.send_control(&mut self.transport, welcome));

        if let Some(Err(err)) = sent {
            warn!(%id, %err, "failed to send welcome");
            if err.is_unreachable() {
                self.teardown(id, DisconnectReason::TransportError);
                return None;
            }
        }
        Some(id)
    }

    /// Remove a connection, close its handle and release its id. Peers are
    /// told it left only if it had been announced.
    fn teardown(&mut self, id: ConnectionId, reason: DisconnectReason) {
        let Some(mut connection) = self.registry.remove_by_id(id) else {
            return;
        };
        let was_connected = connection.is_connected();
        connection.close(&mut self.transport, reason);
        self.registry.release_id(id);

        if was_connected {
            info!(%id, peer = %connection.peer(), %reason, "client disconnected");
            self.fan_out(None, |other, transport| {
                other.send_control(transport, ControlMessage::PeerLeft(id))
            });
            self.events.push(ServerEvent::PeerDisconnected { id, reason });
        } else {
            debug!(%id, peer = %connection.peer(), %reason, "connection dropped during handshake");
        }
    }

    /// Send to every connected client except `except`, tearing down the ones
    /// found unreachable. Returns the number of successful sends.
    fn fan_out<F>(&mut self, except: Option<ConnectionId>, mut send: F) -> usize
    where
        F: FnMut(&Connection, &mut T) -> Result<(), SendError>,
    {
        let mut sent = 0;
        let mut unreachable = Vec::new();

        for connection in self.registry.iter() {
            if !connection.is_connected() || Some(connection.id()) == except {
                continue;
            }
            match send(connection, &mut self.transport) {
                Ok(()) => sent += 1,
                Err(err) => {
                    warn!(id = %connection.id(), %err, "send failed");
                    if err.is_unreachable() {
                        unreachable.push(connection.id());
                    }
                }
            }
        }

        for id in unreachable {
            self.teardown(id, DisconnectReason::TransportError);
        }
        sent
    }

    // =========================================================================
    // Messages
    // =========================================================================

    fn receive_messages(&mut self) {
        let mut inbox = std::mem::take(&mut self.inbox);

        for id in self.registry.ids() {
            let Some(handle) = self.registry.lookup_by_id(id).map(Connection::handle) else {
                continue;
            };
            self.transport
                .receive(handle, &mut inbox, self.config.max_messages_per_poll);
            for message in inbox.drain(..) {
                self.handle_message(id, message);
            }
        }
        self.inbox = inbox;
    }

    fn handle_message(&mut self, id: ConnectionId, mut bytes: Vec<u8>) {
        if bytes.len() > MAX_MESSAGE_SIZE {
            warn!(%id, len = bytes.len(), max = MAX_MESSAGE_SIZE, "truncating oversized message");
            bytes.truncate(MAX_MESSAGE_SIZE);
        }

        match Frame::decode(&bytes) {
            Ok(Frame::Control(ControlMessage::WelcomeAck(echoed))) => self.on_welcome_ack(id, echoed),
            Ok(Frame::Control(other)) => {
                warn!(%id, kind = ?other.kind(), "ignoring client-bound control message");
            }
            Ok(Frame::Payload { data, relayed }) => self.on_payload(id, data, relayed),
            Err(err) => warn!(%id, %err, "dropping malformed frame"),
        }
    }

    fn on_welcome_ack(&mut self, id: ConnectionId, echoed: ConnectionId) {
        let Some(connection) = self.registry.lookup_by_id_mut(id) else {
            return;
        };
        let Some(handshake) = connection.server_handshake_mut() else {
            return;
        };

        match handshake.acknowledge(id, echoed) {
            AckOutcome::Completed => {}
            AckOutcome::Mismatch { echoed } => {
                warn!(%id, %echoed, "welcome ack carries a different id, continuing");
            }
            AckOutcome::Duplicate => {
                debug!(%id, "duplicate welcome ack");
                return;
            }
            AckOutcome::Unexpected => {
                warn!(%id, "welcome ack before welcome");
                return;
            }
        }

        if !connection.promote() {
            return;
        }
        let peer = connection.peer();
        let deferred = connection.take_deferred();

        info!(%id, %peer, "client connected");
        self.events.push(ServerEvent::PeerConnected { id, peer });
        if self.registry.len() > 1 {
            self.fan_out(Some(id), |other, transport| {
                other.send_control(transport, ControlMessage::PeerJoined(id))
            });
        }

        for payload in deferred {
            self.on_payload(id, payload.data, payload.relayed);
        }
    }

    fn on_payload(&mut self, id: ConnectionId, data: Vec<u8>, relayed: bool) {
        let Some(connection) = self.registry.lookup_by_id_mut(id) else {
            return;
        };
        if connection.is_connecting() {
            connection.defer(data, relayed);
            return;
        }

        if relayed && self.config.allow_auto_relay {
            let forwarded = self.fan_out(Some(id), |other, transport| {
                other.send_payload(transport, &data, SendMode::Reliable, true)
            });
            debug!(from = %id, forwarded, "relayed payload");
        } else {
            self.events.push(ServerEvent::MessageReceived { from: id, payload: data });
        }
    }
}

impl<T: RawTransport> LoopbackHost for ServerSession<T> {
    fn host_identity(&self) -> Option<PeerIdentity> {
        self.is_running().then(|| self.transport.local_identity())
    }

    fn accept_loopback(
        &mut self,
        handle: TransportHandle,
        peer: PeerIdentity,
    ) -> Option<ConnectionId> {
        if !self.admit(handle, peer) {
            return None;
        }

        match self.registry.allocate_id() {
            Ok(id) => {
                info!(%id, %handle, "accepting loopback connection");
                self.register(id, peer, handle)
            }
            Err(err) => {
                warn!(%peer, %err, "no connection id available for loopback");
                self.transport.close(handle, DisconnectReason::ServerFull);
                None
            }
        }
    }
}
