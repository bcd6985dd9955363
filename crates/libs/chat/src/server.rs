use crate::command::{Audience, CommandInterpreter};
use crate::config::ServerConfig;
use crate::error::ChatError;
use crate::protocol::{self, Kind, Packet};
use crate::registry::{ANONYMOUS_NAME, ConnKey, ConnectionRegistry, ConnectionSet};
use crate::server_log::ServerLog;
use crate::transport::{ConnectionId, NetEvent, ServerTransport};
use crate::udp::UdpServerTransport;
use log::{debug, error, warn};
use std::time::{Duration, Instant};

// =================================================================================================
//                                        ROSTER SNAPSHOT
// =================================================================================================

/// Read-only copy of the registered display names for presentation.
///
/// Recomputed on a fixed schedule and right after membership changes. The
/// version only moves when the names actually differ, so consumers can poll it
/// cheaply.
#[derive(Debug)]
pub struct RosterSnapshot {
    names: Vec<String>,
    version: u64,
    next_refresh: Instant,
    interval: Duration,
}

impl RosterSnapshot {
    pub fn new(now: Instant, initial_delay: Duration, interval: Duration) -> Self {
        Self {
            names: Vec::new(),
            version: 0,
            next_refresh: now + initial_delay,
            interval,
        }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next_refresh
    }

    pub fn reschedule(&mut self, now: Instant) {
        self.next_refresh = now + self.interval;
    }

    pub fn update(&mut self, names: Vec<String>) {
        if names != self.names {
            self.names = names;
            self.version += 1;
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

// =================================================================================================
//                                          SERVER LOOP
// =================================================================================================

/// Single-threaded chat server driven by an external periodic [`ChatServer::tick`].
///
/// The server owns its registry, connection set and log outright; nothing else
/// mutates them. Dropping the server drops the transport, which releases the
/// socket.
pub struct ChatServer<T: ServerTransport> {
    transport: T,
    interpreter: CommandInterpreter,
    registry: ConnectionRegistry<ConnectionId>,
    connections: ConnectionSet,
    log: ServerLog,
    roster: RosterSnapshot,
}

impl ChatServer<UdpServerTransport> {
    /// Binds a UDP transport on the configured address and port.
    pub fn bind(config: &ServerConfig) -> Result<Self, ChatError> {
        let transport = match UdpServerTransport::bind(&config.bind_addr(), config.transport.clone()) {
            Ok(transport) => transport,
            Err(e) => {
                error!("Failed to start server on port {}", config.port);
                return Err(e);
            }
        };
        let port = transport.local_addr()?.port();

        let mut server = Self::with_transport(
            transport,
            CommandInterpreter::default(),
            config,
            Instant::now(),
        );
        server.log.push(&format!("Server listening on port {}", port));
        Ok(server)
    }
}

impl<T: ServerTransport> ChatServer<T> {
    pub fn with_transport(
        transport: T,
        interpreter: CommandInterpreter,
        config: &ServerConfig,
        now: Instant,
    ) -> Self {
        Self {
            transport,
            interpreter,
            registry: ConnectionRegistry::new(),
            connections: ConnectionSet::new(),
            log: ServerLog::new(config.max_log_entries),
            roster: RosterSnapshot::new(
                now,
                config.roster_initial_delay(),
                config.roster_interval(),
            ),
        }
    }

    /// Runs one polling pass: accept, drain every connection, dispatch, refresh.
    pub fn tick(&mut self, now: Instant) {
        if let Err(e) = self.transport.update(now) {
            warn!("Transport update failed: {}", e);
        }

        while let Some(handle) = self.transport.accept() {
            let key = self.registry.accept(handle);
            self.connections.push(key);
            debug!("Connection {} is {}", handle, key);
            self.log.push("New client connected");
        }

        // Index-based so disconnects can tombstone slots mid-pass.
        for index in 0..self.connections.slot_count() {
            let Some(key) = self.connections.get(index) else {
                continue;
            };
            let Some(handle) = self.registry.handle_of(key) else {
                continue;
            };
            while let Some(event) = self.transport.pop_event(handle) {
                match event {
                    NetEvent::Data(payload) => self.handle_data(key, &payload),
                    NetEvent::Disconnect => {
                        self.handle_disconnect(key);
                        break;
                    }
                }
            }
        }
        self.connections.compact();

        if self.roster.is_due(now) {
            self.refresh_roster();
            self.roster.reschedule(now);
        }
    }

    fn handle_data(&mut self, key: ConnKey, payload: &[u8]) {
        let packet = match protocol::decode(payload) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Discarding packet from {}: {}", key, e);
                self.log
                    .push(&format!("[Error] Discarded packet from {}: {}", key, e));
                return;
            }
        };

        match packet.kind {
            Kind::Register => self.handle_register(key, &packet.sender),
            Kind::Chat => self.handle_chat(key, packet.body),
            Kind::Command => self.handle_command(key, &packet.body),
        }
    }

    fn handle_register(&mut self, key: ConnKey, requested: &str) {
        let name = self.registry.register(key, requested);
        self.log.push(&format!("[Register] {} joined", name));

        let notice = Packet::chat(
            self.interpreter.server_name(),
            format!("Player {} connected", name),
        );
        // The newcomer sees their own join notice too.
        self.broadcast(&notice, None);
        self.refresh_roster();
    }

    fn handle_chat(&mut self, key: ConnKey, body: String) {
        let sender = self
            .registry
            .name_of(key)
            .unwrap_or(ANONYMOUS_NAME)
            .to_string();
        debug!("Received message from {}: {}", sender, body);
        self.broadcast(&Packet::chat(sender, body), None);
    }

    fn handle_command(&mut self, key: ConnKey, line: &str) {
        let outcome = self.interpreter.execute(&mut self.registry, key, line);
        if let Some(entry) = &outcome.log {
            self.log.push(entry);
        }
        for reply in &outcome.replies {
            match reply.audience {
                Audience::Sender => self.unicast(key, &reply.packet),
                Audience::AllButSender => self.broadcast(&reply.packet, Some(key)),
            }
        }
        if outcome.roster_changed {
            self.refresh_roster();
        }
    }

    fn handle_disconnect(&mut self, key: ConnKey) {
        match self.registry.remove(key) {
            Some(name) => self.log.push(&format!("Client disconnected: {}", name)),
            None => self.log.push("Client disconnected (unregistered)"),
        }
        self.connections.tombstone(key);
        self.refresh_roster();
    }

    fn unicast(&mut self, key: ConnKey, packet: &Packet) {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode reply for {}: {}", key, e);
                return;
            }
        };
        let Some(handle) = self.registry.handle_of(key) else {
            return;
        };
        if let Err(e) = self.transport.send(handle, &bytes) {
            debug!("Failed to deliver reply to {}: {}", key, e);
        }
    }

    /// Best-effort fan-out to every live connection; one failed send never stops the rest.
    fn broadcast(&mut self, packet: &Packet, except: Option<ConnKey>) {
        let bytes = match packet.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Could not encode broadcast: {}", e);
                return;
            }
        };
        for key in self.connections.live().filter(|key| Some(*key) != except) {
            let Some(handle) = self.registry.handle_of(key) else {
                continue;
            };
            if let Err(e) = self.transport.send(handle, &bytes) {
                debug!("Failed to deliver broadcast to {}: {}", key, e);
            }
        }
    }

    fn refresh_roster(&mut self) {
        self.roster.update(self.registry.all_names());
    }

    /// Display names of every registered connection, straight from the registry.
    pub fn all_names(&self) -> Vec<String> {
        self.registry.all_names()
    }

    /// The presentation snapshot; may lag [`ChatServer::all_names`] until the next refresh.
    pub fn roster(&self) -> &RosterSnapshot {
        &self.roster
    }

    pub fn log(&self) -> &ServerLog {
        &self.log
    }

    pub fn connection_count(&self) -> usize {
        self.connections.live_count()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
