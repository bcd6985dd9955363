//! Connection semantics on top of a datagram socket.
//!
//! UDP itself has no notion of a connection, so every datagram is wrapped in
//! a one-byte [`Frame`] tag. The handshake (`ConnectRequest` / `ConnectAccept`)
//! and teardown (`Disconnect`) are idempotent, so a lost or duplicated frame
//! never leaves the peers disagreeing for longer than one retry or timeout.

use crate::error::ChatError;
use crate::protocol::MAX_PACKET_LEN;
use bytes::Bytes;
use std::fmt;
use std::time::Instant;

/// Transport-level handle for one accepted peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u32);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// An event popped from a connection's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetEvent {
    Data(Bytes),
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
}

/// The server half of the transport, polled once per tick.
///
/// None of these calls block: when nothing is pending they simply return
/// `None` or an empty result.
pub trait ServerTransport {
    /// Drains the socket and advances timers.
    fn update(&mut self, now: Instant) -> Result<(), ChatError>;
    /// Pops the next newly accepted connection.
    fn accept(&mut self) -> Option<ConnectionId>;
    /// Pops the next event queued for `conn`, in arrival order.
    fn pop_event(&mut self, conn: ConnectionId) -> Option<NetEvent>;
    fn send(&mut self, conn: ConnectionId, payload: &[u8]) -> Result<(), ChatError>;
}

/// The client half of the transport, bound to a single server.
pub trait ClientTransport {
    fn update(&mut self, now: Instant) -> Result<(), ChatError>;
    fn state(&self) -> LinkState;
    fn pop_event(&mut self) -> Option<NetEvent>;
    fn send(&mut self, payload: &[u8]) -> Result<(), ChatError>;
}

/// Largest datagram either side will read.
pub const MAX_DATAGRAM_LEN: usize = 1500;

// A full-size packet plus its frame tag must fit in one receive buffer.
const _: () = assert!(1 + MAX_PACKET_LEN <= MAX_DATAGRAM_LEN);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    ConnectRequest,
    ConnectAccept,
    Data(Bytes),
    Disconnect,
    Heartbeat,
}

impl Frame {
    const CONNECT_REQUEST: u8 = 0xC0;
    const CONNECT_ACCEPT: u8 = 0xC1;
    const DATA: u8 = 0xD0;
    const DISCONNECT: u8 = 0xDC;
    const HEARTBEAT: u8 = 0xEE;

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Frame::ConnectRequest => vec![Self::CONNECT_REQUEST],
            Frame::ConnectAccept => vec![Self::CONNECT_ACCEPT],
            Frame::Disconnect => vec![Self::DISCONNECT],
            Frame::Heartbeat => vec![Self::HEARTBEAT],
            Frame::Data(payload) => Self::data_datagram(payload),
        }
    }

    /// Wraps an encoded packet without first copying it into a `Frame`.
    pub fn data_datagram(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + payload.len());
        out.push(Self::DATA);
        out.extend_from_slice(payload);
        out
    }

    /// Returns `None` for empty datagrams, unknown tags and control frames
    /// that carry unexpected trailing bytes.
    pub fn parse(datagram: &[u8]) -> Option<Frame> {
        let (&tag, rest) = datagram.split_first()?;
        let frame = match tag {
            Self::DATA => return Some(Frame::Data(Bytes::copy_from_slice(rest))),
            Self::CONNECT_REQUEST => Frame::ConnectRequest,
            Self::CONNECT_ACCEPT => Frame::ConnectAccept,
            Self::DISCONNECT => Frame::Disconnect,
            Self::HEARTBEAT => Frame::Heartbeat,
            _ => return None,
        };
        rest.is_empty().then_some(frame)
    }
}
