use crate::error::ChatError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum byte length of the `sender` field (display names).
pub const NAME_CAPACITY: usize = 64;
/// Maximum byte length of the `body` field (chat text or a raw command line).
pub const BODY_CAPACITY: usize = 512;

// kind (1) + sender length (1) + body length (2)
pub const HEADER_LEN: usize = 4;
pub const MAX_PACKET_LEN: usize = HEADER_LEN + NAME_CAPACITY + BODY_CAPACITY;

/// Discriminator selecting the semantics of a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Kind {
    Register = 0,
    Chat = 1,
    Command = 2,
}

impl TryFrom<u8> for Kind {
    type Error = ChatError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Kind::Register),
            1 => Ok(Kind::Chat),
            2 => Ok(Kind::Command),
            other => Err(ChatError::MalformedPacket(format!(
                "unknown kind tag {}",
                other
            ))),
        }
    }
}

/// The unit of wire exchange between client and server.
///
/// `sender` carries the requested name on `Register`, the resolved display
/// name on server-authored `Chat`, and is left empty on client `Chat` and
/// `Command` packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub kind: Kind,
    pub sender: String,
    pub body: String,
}

impl Packet {
    pub fn register(name: impl Into<String>) -> Self {
        Self {
            kind: Kind::Register,
            sender: name.into(),
            body: String::new(),
        }
    }

    pub fn chat(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind: Kind::Chat,
            sender: sender.into(),
            body: body.into(),
        }
    }

    pub fn command(line: impl Into<String>) -> Self {
        Self {
            kind: Kind::Command,
            sender: String::new(),
            body: line.into(),
        }
    }

    /// Builds the client packet for a line of user input: a leading `/`
    /// makes it a `Command`, anything else is plain `Chat`.
    pub fn from_input(text: &str) -> Self {
        if text.starts_with('/') {
            Self::command(text)
        } else {
            Self::chat("", text)
        }
    }

    pub fn encode(&self) -> Result<Bytes, ChatError> {
        encode(self.kind, &self.sender, &self.body)
    }
}

/// Fails with `PayloadTooLarge` when `value` does not fit in `max` bytes.
pub fn check_capacity(field: &'static str, value: &str, max: usize) -> Result<(), ChatError> {
    if value.len() > max {
        return Err(ChatError::PayloadTooLarge {
            field,
            len: value.len(),
            max,
        });
    }
    Ok(())
}

/// Encodes a packet as `[kind:u8][sender_len:u8][sender][body_len:u16 BE][body]`.
///
/// Oversized fields are rejected rather than truncated so that both peers
/// always agree on the semantic content.
pub fn encode(kind: Kind, sender: &str, body: &str) -> Result<Bytes, ChatError> {
    check_capacity("sender", sender, NAME_CAPACITY)?;
    check_capacity("body", body, BODY_CAPACITY)?;

    let mut buf = BytesMut::with_capacity(HEADER_LEN + sender.len() + body.len());
    buf.put_u8(kind as u8);
    buf.put_u8(sender.len() as u8);
    buf.put_slice(sender.as_bytes());
    buf.put_u16(body.len() as u16);
    buf.put_slice(body.as_bytes());
    Ok(buf.freeze())
}

pub fn decode(mut buf: &[u8]) -> Result<Packet, ChatError> {
    if buf.len() < HEADER_LEN {
        return Err(ChatError::MalformedPacket(format!(
            "{} bytes is shorter than the {} byte header",
            buf.len(),
            HEADER_LEN
        )));
    }

    let kind = Kind::try_from(buf.get_u8())?;
    let sender = read_field(&mut buf, "sender", NAME_CAPACITY, |b| b.get_u8() as usize, 1)?;
    let body = read_field(&mut buf, "body", BODY_CAPACITY, |b| b.get_u16() as usize, 2)?;

    if buf.has_remaining() {
        return Err(ChatError::MalformedPacket(format!(
            "{} trailing bytes after body",
            buf.remaining()
        )));
    }

    Ok(Packet { kind, sender, body })
}

fn read_field(
    buf: &mut &[u8],
    field: &str,
    max: usize,
    read_len: impl Fn(&mut &[u8]) -> usize,
    prefix_len: usize,
) -> Result<String, ChatError> {
    if buf.remaining() < prefix_len {
        return Err(ChatError::MalformedPacket(format!(
            "missing {} length prefix",
            field
        )));
    }
    let len = read_len(buf);
    if len > max {
        return Err(ChatError::MalformedPacket(format!(
            "{} declares {} bytes, capacity is {}",
            field, len, max
        )));
    }
    if buf.remaining() < len {
        return Err(ChatError::MalformedPacket(format!(
            "{} declares {} bytes but only {} remain",
            field,
            len,
            buf.remaining()
        )));
    }

    let raw = buf.copy_to_bytes(len);
    String::from_utf8(raw.to_vec())
        .map_err(|_| ChatError::MalformedPacket(format!("{} is not valid UTF-8", field)))
}
