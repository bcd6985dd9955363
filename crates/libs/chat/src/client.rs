use crate::config::ClientConfig;
use crate::error::ChatError;
use crate::protocol::{self, BODY_CAPACITY, Kind, NAME_CAPACITY, Packet, check_capacity};
use crate::transport::{ClientTransport, LinkState, NetEvent};
use crate::udp::UdpClientTransport;
use log::{debug, info, warn};
use std::time::Instant;

/// A client's view of one chat server.
///
/// Drive it by calling [`ChatSession::poll`] once per tick. It never blocks
/// and never reconnects on its own.
pub struct ChatSession<T: ClientTransport> {
    transport: T,
    display_name: String,
    connected: bool,
}

impl ChatSession<UdpClientTransport> {
    /// Starts connecting to the configured server. The handshake finishes during `poll`.
    pub fn connect(config: &ClientConfig) -> Result<Self, ChatError> {
        let transport =
            UdpClientTransport::connect(&config.server_addr, config.transport.clone())?;
        Self::with_transport(transport, &config.display_name)
    }
}

impl<T: ClientTransport> ChatSession<T> {
    pub fn with_transport(transport: T, display_name: &str) -> Result<Self, ChatError> {
        check_capacity("display name", display_name, NAME_CAPACITY)?;
        Ok(Self {
            transport,
            display_name: display_name.to_string(),
            connected: false,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn link_state(&self) -> LinkState {
        self.transport.state()
    }

    /// Pumps the transport and returns every chat packet that arrived since the last call.
    ///
    /// The first poll that observes the link as connected sends the `Register`
    /// packet. There is no acknowledgement; the server's join notice arrives as
    /// an ordinary chat packet.
    pub fn poll(&mut self, now: Instant) -> Result<Vec<Packet>, ChatError> {
        self.transport.update(now)?;

        if !self.connected && self.transport.state() == LinkState::Connected {
            self.connected = true;
            info!("Connected; registering as {}", self.display_name);
            let register = Packet::register(self.display_name.as_str()).encode()?;
            self.transport.send(&register)?;
        }

        let mut chats = Vec::new();
        while let Some(event) = self.transport.pop_event() {
            match event {
                NetEvent::Data(payload) => match protocol::decode(&payload) {
                    Ok(packet) if packet.kind == Kind::Chat => chats.push(packet),
                    Ok(packet) => debug!("Ignoring {:?} packet from server", packet.kind),
                    Err(e) => warn!("Discarding packet from server: {}", e),
                },
                NetEvent::Disconnect => {
                    info!("Disconnected from server");
                    self.connected = false;
                }
            }
        }
        Ok(chats)
    }

    /// Sends `text` as a command if it starts with `/`, as chat otherwise.
    pub fn send(&mut self, text: &str) -> Result<(), ChatError> {
        self.send_packet(Packet::from_input(text))
    }

    pub fn send_chat(&mut self, text: &str) -> Result<(), ChatError> {
        self.send_packet(Packet::chat("", text))
    }

    pub fn send_command(&mut self, line: &str) -> Result<(), ChatError> {
        self.send_packet(Packet::command(line))
    }

    fn send_packet(&mut self, packet: Packet) -> Result<(), ChatError> {
        check_capacity("body", &packet.body, BODY_CAPACITY)?;
        if !self.connected {
            return Err(ChatError::NotConnected);
        }
        let bytes = packet.encode()?;
        self.transport.send(&bytes)?;
        debug!("Sent {:?}: {}", packet.kind, packet.body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    struct MockState {
        link: LinkState,
        inbox: VecDeque<NetEvent>,
        sent: Vec<Packet>,
    }

    #[derive(Clone)]
    struct MockLink(Rc<RefCell<MockState>>);

    impl MockLink {
        fn new() -> Self {
            Self(Rc::new(RefCell::new(MockState {
                link: LinkState::Connecting,
                inbox: VecDeque::new(),
                sent: Vec::new(),
            })))
        }

        fn set_state(&self, link: LinkState) {
            self.0.borrow_mut().link = link;
        }

        fn deliver_raw(&self, bytes: &[u8]) {
            self.0
                .borrow_mut()
                .inbox
                .push_back(NetEvent::Data(bytes::Bytes::copy_from_slice(bytes)));
        }

        fn deliver(&self, packet: Packet) {
            self.deliver_raw(&packet.encode().unwrap());
        }

        fn drop_link(&self) {
            let mut state = self.0.borrow_mut();
            state.link = LinkState::Disconnected;
            state.inbox.push_back(NetEvent::Disconnect);
        }

        fn sent(&self) -> Vec<Packet> {
            self.0.borrow().sent.clone()
        }
    }

    impl ClientTransport for MockLink {
        fn update(&mut self, _now: Instant) -> Result<(), ChatError> {
            Ok(())
        }

        fn state(&self) -> LinkState {
            self.0.borrow().link
        }

        fn pop_event(&mut self) -> Option<NetEvent> {
            self.0.borrow_mut().inbox.pop_front()
        }

        fn send(&mut self, payload: &[u8]) -> Result<(), ChatError> {
            let mut state = self.0.borrow_mut();
            if state.link != LinkState::Connected {
                return Err(ChatError::NotConnected);
            }
            state.sent.push(protocol::decode(payload).unwrap());
            Ok(())
        }
    }

    fn connected_session() -> (ChatSession<MockLink>, MockLink) {
        let link = MockLink::new();
        let mut session = ChatSession::with_transport(link.clone(), "Amy").unwrap();
        link.set_state(LinkState::Connected);
        session.poll(Instant::now()).unwrap();
        (session, link)
    }

    #[test]
    fn test_registers_exactly_once_after_connect() {
        let link = MockLink::new();
        let mut session = ChatSession::with_transport(link.clone(), "Amy").unwrap();

        session.poll(Instant::now()).unwrap();
        assert!(link.sent().is_empty());
        assert!(!session.is_connected());

        link.set_state(LinkState::Connected);
        session.poll(Instant::now()).unwrap();
        session.poll(Instant::now()).unwrap();
        assert_eq!(link.sent(), vec![Packet::register("Amy")]);
        assert!(session.is_connected());
    }

    #[test]
    fn test_poll_returns_chats_and_skips_garbage() {
        let (mut session, link) = connected_session();

        link.deliver(Packet::chat("Server", "Player Amy connected"));
        link.deliver_raw(&[42]);
        link.deliver(Packet::command("/help"));
        link.deliver(Packet::chat("Bob", "hi"));

        let chats = session.poll(Instant::now()).unwrap();
        assert_eq!(
            chats,
            vec![
                Packet::chat("Server", "Player Amy connected"),
                Packet::chat("Bob", "hi"),
            ]
        );
        assert!(session.poll(Instant::now()).unwrap().is_empty());
    }

    #[test]
    fn test_send_picks_kind_from_slash() {
        let (mut session, link) = connected_session();
        session.send("hello").unwrap();
        session.send("/name Zed").unwrap();

        let sent = link.sent();
        assert_eq!(sent[1], Packet::chat("", "hello"));
        assert_eq!(sent[2], Packet::command("/name Zed"));
    }

    #[test]
    fn test_oversized_text_is_rejected_before_sending() {
        let (mut session, link) = connected_session();

        let too_long = "a".repeat(BODY_CAPACITY + 1);
        assert!(matches!(
            session.send(&too_long),
            Err(ChatError::PayloadTooLarge { .. })
        ));
        assert_eq!(link.sent().len(), 1);

        session.send(&"a".repeat(BODY_CAPACITY)).unwrap();
        assert_eq!(link.sent().len(), 2);
    }

    #[test]
    fn test_send_requires_connection() {
        let link = MockLink::new();
        let mut session = ChatSession::with_transport(link, "Amy").unwrap();
        assert!(matches!(session.send("hi"), Err(ChatError::NotConnected)));
    }

    #[test]
    fn test_disconnect_clears_state_without_reconnecting() {
        let (mut session, link) = connected_session();

        link.drop_link();
        session.poll(Instant::now()).unwrap();
        assert!(!session.is_connected());
        assert_eq!(session.link_state(), LinkState::Disconnected);
        assert!(matches!(session.send("hi"), Err(ChatError::NotConnected)));

        session.poll(Instant::now()).unwrap();
        assert_eq!(link.sent(), vec![Packet::register("Amy")]);
    }

    #[test]
    fn test_display_name_over_capacity() {
        let name = "n".repeat(NAME_CAPACITY + 1);
        assert!(matches!(
            ChatSession::with_transport(MockLink::new(), &name),
            Err(ChatError::PayloadTooLarge { .. })
        ));
    }
}
