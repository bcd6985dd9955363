//! The shared library for the chat server and clients.
//!
//! This crate contains the wire codec, the connection registry, the slash
//! command interpreter, the tick-driven server loop and the client session,
//! plus the small connection layer that runs all of it over UDP.

pub mod client;
pub mod command;
pub mod config;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod server_log;
pub mod transport;
pub mod udp;

pub use client::ChatSession;
pub use command::{Audience, Command, CommandInterpreter, CommandOutcome, Reply};
pub use config::{ClientConfig, ServerConfig, TransportConfig};
pub use error::ChatError;
pub use protocol::{BODY_CAPACITY, Kind, NAME_CAPACITY, Packet};
pub use registry::{ConnKey, ConnectionRegistry, ConnectionSet};
pub use server::{ChatServer, RosterSnapshot};
pub use server_log::ServerLog;
pub use transport::{ClientTransport, ConnectionId, LinkState, NetEvent, ServerTransport};
pub use udp::{UdpClientTransport, UdpServerTransport};
