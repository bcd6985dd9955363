use crate::config::TransportConfig;
use crate::error::ChatError;
use crate::transport::{
    ClientTransport, ConnectionId, Frame, LinkState, MAX_DATAGRAM_LEN, NetEvent, ServerTransport,
};
use log::{debug, info, warn};
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Instant;

// =================================================================================================
//                                          SERVER SIDE
// =================================================================================================

struct Peer {
    addr: SocketAddr,
    inbox: VecDeque<NetEvent>,
    last_recv: Instant,
    last_send: Instant,
    open: bool,
}

/// A non-blocking UDP socket that tracks one [`Peer`] per remote address.
pub struct UdpServerTransport {
    socket: UdpSocket,
    config: TransportConfig,
    by_addr: HashMap<SocketAddr, ConnectionId>,
    peers: HashMap<ConnectionId, Peer>,
    pending_accepts: VecDeque<ConnectionId>,
    next_id: u32,
    // Time of the latest `update`; sends between updates are stamped with it.
    clock: Instant,
}

impl UdpServerTransport {
    /// Binds the listening socket. Failure here is fatal for the server.
    pub fn bind(addr: &str, config: TransportConfig) -> Result<Self, ChatError> {
        let unavailable = |source: std::io::Error| ChatError::TransportUnavailable {
            addr: addr.to_string(),
            source,
        };
        let socket = UdpSocket::bind(addr).map_err(unavailable)?;
        socket.set_nonblocking(true).map_err(unavailable)?;

        Ok(Self {
            socket,
            config,
            by_addr: HashMap::new(),
            peers: HashMap::new(),
            pending_accepts: VecDeque::new(),
            next_id: 1,
            clock: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.socket.local_addr()?)
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr, now: Instant) {
        let Some(frame) = Frame::parse(datagram) else {
            debug!("Dropping unrecognised datagram ({} bytes) from {}", datagram.len(), from);
            return;
        };

        let Some(id) = self.by_addr.get(&from).copied() else {
            match frame {
                Frame::ConnectRequest => {
                    let id = self.open_connection(from, now);
                    debug!("Accepted {} as connection {}", from, id);
                    self.send_frame(from, &Frame::ConnectAccept);
                }
                Frame::Data(_) | Frame::Heartbeat => {
                    // Tell a stale client (e.g. from before a restart) to give up.
                    self.send_frame(from, &Frame::Disconnect);
                }
                Frame::ConnectAccept | Frame::Disconnect => {}
            }
            return;
        };

        if let Some(peer) = self.peers.get_mut(&id) {
            peer.last_recv = now;
        }
        match frame {
            Frame::ConnectRequest => self.send_frame(from, &Frame::ConnectAccept),
            Frame::Data(payload) => {
                if let Some(peer) = self.peers.get_mut(&id) {
                    peer.inbox.push_back(NetEvent::Data(payload));
                }
            }
            Frame::Disconnect => self.close(id, false),
            Frame::Heartbeat | Frame::ConnectAccept => {}
        }
    }

    fn open_connection(&mut self, addr: SocketAddr, now: Instant) -> ConnectionId {
        let id = ConnectionId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.by_addr.insert(addr, id);
        self.peers.insert(
            id,
            Peer {
                addr,
                inbox: VecDeque::new(),
                last_recv: now,
                last_send: now,
                open: true,
            },
        );
        self.pending_accepts.push_back(id);
        id
    }

    /// Queues a `Disconnect` event. The peer stays in the map until that event is popped.
    fn close(&mut self, id: ConnectionId, notify_peer: bool) {
        let Some(peer) = self.peers.get_mut(&id) else {
            return;
        };
        if !peer.open {
            return;
        }
        peer.open = false;
        peer.inbox.push_back(NetEvent::Disconnect);
        let addr = peer.addr;
        self.by_addr.remove(&addr);
        if notify_peer {
            self.send_frame(addr, &Frame::Disconnect);
        }
    }

    fn send_frame(&self, addr: SocketAddr, frame: &Frame) {
        if let Err(e) = self.socket.send_to(&frame.to_bytes(), addr) {
            debug!("Failed to send {:?} to {}: {}", frame, addr, e);
        }
    }

    fn run_timers(&mut self, now: Instant) {
        let mut expired = Vec::new();
        for (id, peer) in self.peers.iter_mut().filter(|(_, p)| p.open) {
            if now.duration_since(peer.last_recv) >= self.config.timeout() {
                expired.push(*id);
            } else if now.duration_since(peer.last_send) >= self.config.heartbeat() {
                if let Err(e) = self.socket.send_to(&Frame::Heartbeat.to_bytes(), peer.addr) {
                    debug!("Heartbeat to {} failed: {}", peer.addr, e);
                }
                peer.last_send = now;
            }
        }
        for id in expired {
            info!("Connection {} timed out", id);
            self.close(id, true);
        }
    }
}

impl ServerTransport for UdpServerTransport {
    fn update(&mut self, now: Instant) -> Result<(), ChatError> {
        self.clock = now;
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            match self.socket.recv_from(&mut buf) {
                Ok((len, from)) => self.handle_datagram(&buf[..len], from, now),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // ICMP "port unreachable" from a vanished peer is reported here on some platforms.
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!("Ignoring connection reset: {}", e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.run_timers(now);
        Ok(())
    }

    fn accept(&mut self) -> Option<ConnectionId> {
        self.pending_accepts.pop_front()
    }

    fn pop_event(&mut self, conn: ConnectionId) -> Option<NetEvent> {
        let event = self.peers.get_mut(&conn)?.inbox.pop_front()?;
        if event == NetEvent::Disconnect {
            self.peers.remove(&conn);
        }
        Some(event)
    }

    fn send(&mut self, conn: ConnectionId, payload: &[u8]) -> Result<(), ChatError> {
        let peer = match self.peers.get_mut(&conn) {
            Some(peer) if peer.open => peer,
            _ => return Err(ChatError::UnknownConnection(conn)),
        };
        self.socket
            .send_to(&Frame::data_datagram(payload), peer.addr)?;
        peer.last_send = self.clock;
        Ok(())
    }
}

impl Drop for UdpServerTransport {
    fn drop(&mut self) {
        for peer in self.peers.values().filter(|p| p.open) {
            let _ = self.socket.send_to(&Frame::Disconnect.to_bytes(), peer.addr);
        }
    }
}

// =================================================================================================
//                                          CLIENT SIDE
// =================================================================================================

/// A non-blocking UDP socket connected to one server.
pub struct UdpClientTransport {
    socket: UdpSocket,
    server: SocketAddr,
    config: TransportConfig,
    state: LinkState,
    inbox: VecDeque<NetEvent>,
    connect_attempts: u32,
    last_recv: Instant,
    last_send: Instant,
    clock: Instant,
}

impl UdpClientTransport {
    /// Resolves `addr`, binds an ephemeral local socket and sends the first
    /// connect request. The handshake completes during later `update` calls.
    pub fn connect(addr: &str, config: TransportConfig) -> Result<Self, ChatError> {
        let unavailable = |source: std::io::Error| ChatError::TransportUnavailable {
            addr: addr.to_string(),
            source,
        };
        let server = addr
            .to_socket_addrs()
            .map_err(unavailable)?
            .next()
            .ok_or_else(|| {
                unavailable(std::io::Error::new(
                    ErrorKind::AddrNotAvailable,
                    "address did not resolve",
                ))
            })?;

        let local = if server.is_ipv4() {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local).map_err(unavailable)?;
        socket.connect(server).map_err(unavailable)?;
        socket.set_nonblocking(true).map_err(unavailable)?;

        let now = Instant::now();
        let transport = Self {
            socket,
            server,
            config,
            state: LinkState::Connecting,
            inbox: VecDeque::new(),
            connect_attempts: 1,
            last_recv: now,
            last_send: now,
            clock: now,
        };
        info!("Attempting to connect to server at {}...", server);
        transport.send_frame(&Frame::ConnectRequest);
        Ok(transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ChatError> {
        Ok(self.socket.local_addr()?)
    }

    fn send_frame(&self, frame: &Frame) {
        if let Err(e) = self.socket.send(&frame.to_bytes()) {
            debug!("Failed to send {:?} to {}: {}", frame, self.server, e);
        }
    }

    fn drop_link(&mut self) {
        if self.state != LinkState::Disconnected {
            self.state = LinkState::Disconnected;
            self.inbox.push_back(NetEvent::Disconnect);
        }
    }

    fn handle_frame(&mut self, frame: Frame, now: Instant) {
        if self.state == LinkState::Disconnected {
            return;
        }
        self.last_recv = now;
        match frame {
            Frame::ConnectAccept => {
                if self.state == LinkState::Connecting {
                    info!("Successfully connected to {}.", self.server);
                    self.state = LinkState::Connected;
                }
            }
            Frame::Data(payload) => {
                // Data before the accept means the accept itself was lost.
                self.state = LinkState::Connected;
                self.inbox.push_back(NetEvent::Data(payload));
            }
            Frame::Disconnect => {
                info!("Server {} closed the connection.", self.server);
                self.drop_link();
            }
            Frame::Heartbeat | Frame::ConnectRequest => {}
        }
    }

    fn run_timers(&mut self, now: Instant) {
        match self.state {
            LinkState::Connecting => {
                if now.duration_since(self.last_send) < self.config.connect_interval() {
                    return;
                }
                if self.connect_attempts >= self.config.max_connect_attempts {
                    warn!(
                        "Giving up on {} after {} connect attempts.",
                        self.server, self.connect_attempts
                    );
                    self.drop_link();
                    return;
                }
                self.connect_attempts += 1;
                self.last_send = now;
                self.send_frame(&Frame::ConnectRequest);
            }
            LinkState::Connected => {
                if now.duration_since(self.last_recv) >= self.config.timeout() {
                    warn!("Connection to {} timed out.", self.server);
                    self.drop_link();
                } else if now.duration_since(self.last_send) >= self.config.heartbeat() {
                    self.last_send = now;
                    self.send_frame(&Frame::Heartbeat);
                }
            }
            LinkState::Disconnected => {}
        }
    }
}

impl ClientTransport for UdpClientTransport {
    fn update(&mut self, now: Instant) -> Result<(), ChatError> {
        self.clock = now;
        let mut buf = [0u8; MAX_DATAGRAM_LEN];
        loop {
            match self.socket.recv(&mut buf) {
                Ok(len) => match Frame::parse(&buf[..len]) {
                    Some(frame) => self.handle_frame(frame, now),
                    None => debug!("Dropping unrecognised datagram ({} bytes)", len),
                },
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                // Nobody listening (yet); the connect retry timer handles it.
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
                    ) =>
                {
                    debug!("Server {} unreachable: {}", self.server, e);
                }
                Err(e) => return Err(e.into()),
            }
        }
        self.run_timers(now);
        Ok(())
    }

    fn state(&self) -> LinkState {
        self.state
    }

    fn pop_event(&mut self) -> Option<NetEvent> {
        self.inbox.pop_front()
    }

    fn send(&mut self, payload: &[u8]) -> Result<(), ChatError> {
        if self.state != LinkState::Connected {
            return Err(ChatError::NotConnected);
        }
        self.socket.send(&Frame::data_datagram(payload))?;
        self.last_send = self.clock;
        Ok(())
    }
}

impl Drop for UdpClientTransport {
    fn drop(&mut self) {
        if self.state != LinkState::Disconnected {
            let _ = self.socket.send(&Frame::Disconnect.to_bytes());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn fast_config() -> TransportConfig {
        TransportConfig {
            heartbeat_ms: 20,
            timeout_ms: 200,
            connect_interval_ms: 20,
            max_connect_attempts: 5,
        }
    }

    /// Polls `step` every few milliseconds until it returns `Some` or two seconds pass.
    fn wait_for<T>(mut step: impl FnMut() -> Option<T>) -> T {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(value) = step() {
                return value;
            }
            assert!(Instant::now() < deadline, "timed out waiting for transport");
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn connected_pair() -> (UdpServerTransport, UdpClientTransport, ConnectionId) {
        let mut server = UdpServerTransport::bind("127.0.0.1:0", fast_config()).unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let mut client = UdpClientTransport::connect(&addr, fast_config()).unwrap();

        let conn = wait_for(|| {
            server.update(Instant::now()).unwrap();
            client.update(Instant::now()).unwrap();
            server.accept()
        });
        wait_for(|| {
            client.update(Instant::now()).unwrap();
            (client.state() == LinkState::Connected).then_some(())
        });
        (server, client, conn)
    }

    #[test]
    fn test_handshake_and_data_both_ways() {
        let (mut server, mut client, conn) = connected_pair();

        client.send(b"ping").unwrap();
        let event = wait_for(|| {
            server.update(Instant::now()).unwrap();
            server.pop_event(conn)
        });
        assert_eq!(event, NetEvent::Data(bytes::Bytes::from_static(b"ping")));

        server.send(conn, b"pong").unwrap();
        let event = wait_for(|| {
            client.update(Instant::now()).unwrap();
            client.pop_event()
        });
        assert_eq!(event, NetEvent::Data(bytes::Bytes::from_static(b"pong")));
    }

    #[test]
    fn test_client_drop_disconnects_on_server() {
        let (mut server, client, conn) = connected_pair();
        drop(client);

        let event = wait_for(|| {
            server.update(Instant::now()).unwrap();
            server.pop_event(conn)
        });
        assert_eq!(event, NetEvent::Disconnect);
        assert!(matches!(
            server.send(conn, b"late"),
            Err(ChatError::UnknownConnection(_))
        ));
    }

    #[test]
    fn test_server_times_out_silent_peer() {
        let (mut server, _client, conn) = connected_pair();

        // The client is never updated again, so it sends no heartbeats.
        let event = wait_for(|| {
            server.update(Instant::now()).unwrap();
            server.pop_event(conn)
        });
        assert_eq!(event, NetEvent::Disconnect);
    }

    #[test]
    fn test_send_before_connected_is_rejected() {
        let server = UdpServerTransport::bind("127.0.0.1:0", fast_config()).unwrap();
        let addr = server.local_addr().unwrap().to_string();
        let mut client = UdpClientTransport::connect(&addr, fast_config()).unwrap();
        assert_eq!(client.state(), LinkState::Connecting);
        assert!(matches!(client.send(b"hi"), Err(ChatError::NotConnected)));
    }

    #[test]
    fn test_client_gives_up_without_server() {
        // Bind and immediately drop a socket to obtain a port nobody listens on.
        let port = UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let mut client =
            UdpClientTransport::connect(&format!("127.0.0.1:{}", port), fast_config()).unwrap();

        let event = wait_for(|| {
            client.update(Instant::now()).unwrap();
            client.pop_event()
        });
        assert_eq!(event, NetEvent::Disconnect);
        assert_eq!(client.state(), LinkState::Disconnected);
    }

    /// A bare socket speaking raw frames, for driving the server without a client transport.
    fn raw_peer() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_nonblocking(true).unwrap();
        socket
    }

    /// Updates the server until the next frame reaches `peer`.
    fn next_frame(server: &mut UdpServerTransport, peer: &UdpSocket) -> Frame {
        wait_for(|| {
            server.update(Instant::now()).unwrap();
            let mut buf = [0u8; MAX_DATAGRAM_LEN];
            let (len, _) = peer.recv_from(&mut buf).ok()?;
            Frame::parse(&buf[..len])
        })
    }

    #[test]
    fn test_repeated_connect_request_opens_one_connection() {
        let mut server = UdpServerTransport::bind("127.0.0.1:0", TransportConfig::default()).unwrap();
        let addr = server.local_addr().unwrap();
        let peer = raw_peer();

        peer.send_to(&Frame::ConnectRequest.to_bytes(), addr).unwrap();
        peer.send_to(&Frame::ConnectRequest.to_bytes(), addr).unwrap();

        assert_eq!(next_frame(&mut server, &peer), Frame::ConnectAccept);
        assert_eq!(next_frame(&mut server, &peer), Frame::ConnectAccept);

        assert!(server.accept().is_some());
        assert_eq!(server.accept(), None);
        assert_eq!(server.peers.len(), 1);
    }

    #[test]
    fn test_frames_from_unknown_address_get_disconnect() {
        let mut server = UdpServerTransport::bind("127.0.0.1:0", TransportConfig::default()).unwrap();
        let addr = server.local_addr().unwrap();
        let peer = raw_peer();

        peer.send_to(&Frame::data_datagram(b"stale"), addr).unwrap();
        assert_eq!(next_frame(&mut server, &peer), Frame::Disconnect);

        peer.send_to(&Frame::Heartbeat.to_bytes(), addr).unwrap();
        assert_eq!(next_frame(&mut server, &peer), Frame::Disconnect);

        assert_eq!(server.accept(), None);
        assert!(server.peers.is_empty());
    }

    #[test]
    fn test_heartbeats_keep_idle_link_alive() {
        let (mut server, mut client, conn) = connected_pair();

        // Four times the timeout with no application data in either direction.
        let until = Instant::now() + Duration::from_millis(800);
        while Instant::now() < until {
            server.update(Instant::now()).unwrap();
            client.update(Instant::now()).unwrap();
            assert_eq!(server.pop_event(conn), None);
            assert_eq!(client.pop_event(), None);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(client.state(), LinkState::Connected);
        assert!(server.send(conn, b"still here").is_ok());
    }

    #[test]
    fn test_sends_are_stamped_with_the_update_clock() {
        let (mut server, mut client, conn) = connected_pair();

        let tick = Instant::now();
        server.update(tick).unwrap();
        client.update(tick).unwrap();
        std::thread::sleep(Duration::from_millis(5));

        server.send(conn, b"pong").unwrap();
        client.send(b"ping").unwrap();
        assert_eq!(server.peers[&conn].last_send, tick);
        assert_eq!(client.last_send, tick);
    }

    #[test]
    fn test_bind_conflict_is_transport_unavailable() {
        let first = UdpServerTransport::bind("127.0.0.1:0", fast_config()).unwrap();
        let addr = first.local_addr().unwrap().to_string();
        assert!(matches!(
            UdpServerTransport::bind(&addr, fast_config()),
            Err(ChatError::TransportUnavailable { .. })
        ));
    }
}
