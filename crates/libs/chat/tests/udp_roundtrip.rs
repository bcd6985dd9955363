use chat::{ChatServer, ChatSession, ClientConfig, Packet, ServerConfig, UdpServerTransport};
use std::time::{Duration, Instant};

const DEADLINE: Duration = Duration::from_secs(3);

struct Rig {
    server: ChatServer<UdpServerTransport>,
    amy: ChatSession<chat::UdpClientTransport>,
    bob: ChatSession<chat::UdpClientTransport>,
    amy_seen: Vec<Packet>,
    bob_seen: Vec<Packet>,
}

impl Rig {
    fn start() -> Self {
        let server_config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        let server = ChatServer::bind(&server_config).expect("bind server");
        let addr = server.transport().local_addr().expect("server addr");

        let client = |name: &str| {
            let config = ClientConfig {
                server_addr: addr.to_string(),
                display_name: name.to_string(),
                ..ClientConfig::default()
            };
            ChatSession::connect(&config).expect("connect client")
        };

        Self {
            amy: client("Amy"),
            bob: client("Bob"),
            server,
            amy_seen: Vec::new(),
            bob_seen: Vec::new(),
        }
    }

    fn step(&mut self) {
        let now = Instant::now();
        self.server.tick(now);
        self.amy_seen.extend(self.amy.poll(now).expect("amy poll"));
        self.bob_seen.extend(self.bob.poll(now).expect("bob poll"));
        std::thread::sleep(Duration::from_millis(2));
    }

    fn run_until(&mut self, what: &str, done: impl Fn(&Rig) -> bool) {
        let deadline = Instant::now() + DEADLINE;
        while !done(self) {
            assert!(Instant::now() < deadline, "timed out waiting for {}", what);
            self.step();
        }
    }
}

fn saw(seen: &[Packet], sender: &str, body: &str) -> bool {
    seen.iter().any(|p| p.sender == sender && p.body == body)
}

#[test]
fn clients_register_chat_and_rename_over_udp() {
    let mut rig = Rig::start();

    rig.run_until("both registrations", |r| {
        r.server.all_names().len() == 2
            && saw(&r.amy_seen, "Server", "Player Bob connected")
            && saw(&r.bob_seen, "Server", "Player Amy connected")
    });

    rig.amy.send("hello bob").expect("amy chat");
    rig.run_until("chat fan-out", |r| {
        saw(&r.amy_seen, "Amy", "hello bob") && saw(&r.bob_seen, "Amy", "hello bob")
    });

    rig.bob.send("/name Rob").expect("bob rename");
    rig.run_until("rename replies", |r| {
        saw(&r.bob_seen, "Server", "Your name has been changed to Rob")
            && saw(&r.amy_seen, "Server", "Bob changed their name to Rob")
    });
    assert!(!saw(&rig.bob_seen, "Server", "Bob changed their name to Rob"));

    rig.amy.send("/frobnicate").expect("amy unknown command");
    rig.run_until("unknown command reply", |r| {
        saw(
            &r.amy_seen,
            "Server",
            "Unknown command. Type /help for available commands.",
        )
    });

    let mut names = rig.server.all_names();
    names.sort();
    assert_eq!(names, vec!["Amy", "Rob"]);
}

#[test]
fn dropping_a_client_removes_it_from_the_registry() {
    let mut rig = Rig::start();
    rig.run_until("both registrations", |r| r.server.all_names().len() == 2);

    let Rig {
        mut server,
        amy,
        bob,
        ..
    } = rig;
    drop(bob);

    let deadline = Instant::now() + DEADLINE;
    while server.all_names() != vec!["Amy"] {
        assert!(Instant::now() < deadline, "timed out waiting for disconnect");
        server.tick(Instant::now());
        std::thread::sleep(Duration::from_millis(2));
    }
    assert!(
        server
            .log()
            .entries()
            .any(|line| line.ends_with("Client disconnected: Bob"))
    );
    drop(amy);
}
