//! The slash-command language.
//!
//! The interpreter keeps no state between calls. It renames through the
//! registry it is handed and otherwise only describes the replies; the server
//! loop decides how to deliver them.

use crate::error::ChatError;
use crate::protocol::Packet;
use crate::registry::{ANONYMOUS_NAME, ConnKey, ConnectionRegistry};

/// Sender name on every server-authored packet.
pub const SERVER_NAME: &str = "Server";

const RENAME_KEYWORDS: [&str; 2] = ["/name", "/nombre"];
const HELP_KEYWORDS: [&str; 2] = ["/help", "/ayuda"];

pub const HELP_TEXT: &str =
    "Available commands:\n/name [new_name]: Change your name\n/help: Show this help";
pub const UNKNOWN_TEXT: &str = "Unknown command. Type /help for available commands.";
pub const INVALID_NAME_TEXT: &str = "Invalid name. Names must be 1-64 bytes.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// `/name <new>` or `/nombre <new>`, with the remainder trimmed (possibly empty).
    Rename(&'a str),
    Help,
    Unknown(&'a str),
}

impl<'a> Command<'a> {
    /// Returns `None` for plain chat (no leading slash).
    pub fn parse(line: &'a str) -> Option<Self> {
        if !line.starts_with('/') {
            return None;
        }

        for keyword in RENAME_KEYWORDS {
            if let Some(rest) = line
                .strip_prefix(keyword)
                .and_then(|rest| rest.strip_prefix(' '))
            {
                return Some(Command::Rename(rest.trim()));
            }
        }

        if HELP_KEYWORDS.contains(&line.trim_end()) {
            return Some(Command::Help);
        }

        Some(Command::Unknown(line))
    }
}

/// Who a reply is addressed to, relative to the issuing connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Sender,
    AllButSender,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub audience: Audience,
    pub packet: Packet,
}

/// Effects proposed by one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutcome {
    pub replies: Vec<Reply>,
    /// Line for the server log, if the command changed anything.
    pub log: Option<String>,
    /// Set when the set of registered names changed.
    pub roster_changed: bool,
}

impl CommandOutcome {
    fn private(server_name: &str, text: impl Into<String>) -> Self {
        Self {
            replies: vec![Reply {
                audience: Audience::Sender,
                packet: Packet::chat(server_name, text),
            }],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandInterpreter {
    server_name: String,
}

impl Default for CommandInterpreter {
    fn default() -> Self {
        Self::new(SERVER_NAME)
    }
}

impl CommandInterpreter {
    pub fn new(server_name: impl Into<String>) -> Self {
        Self {
            server_name: server_name.into(),
        }
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn execute<H: Copy>(
        &self,
        registry: &mut ConnectionRegistry<H>,
        issuer: ConnKey,
        line: &str,
    ) -> CommandOutcome {
        match Command::parse(line) {
            Some(Command::Rename(new_name)) => self.rename(registry, issuer, new_name),
            Some(Command::Help) => CommandOutcome::private(&self.server_name, HELP_TEXT),
            Some(Command::Unknown(_)) | None => {
                CommandOutcome::private(&self.server_name, UNKNOWN_TEXT)
            }
        }
    }

    fn rename<H: Copy>(
        &self,
        registry: &mut ConnectionRegistry<H>,
        issuer: ConnKey,
        new_name: &str,
    ) -> CommandOutcome {
        let (old, new) = match registry.rename(issuer, new_name) {
            Ok(names) => names,
            Err(ChatError::InvalidName(reason)) => {
                log::debug!("Rejected rename from {}: {}", issuer, reason);
                return CommandOutcome::private(&self.server_name, INVALID_NAME_TEXT);
            }
            Err(e) => {
                log::warn!("Unexpected rename failure for {}: {}", issuer, e);
                return CommandOutcome::private(&self.server_name, INVALID_NAME_TEXT);
            }
        };
        let old = old.unwrap_or_else(|| ANONYMOUS_NAME.to_string());

        CommandOutcome {
            replies: vec![
                Reply {
                    audience: Audience::Sender,
                    packet: Packet::chat(
                        &self.server_name,
                        format!("Your name has been changed to {}", new),
                    ),
                },
                Reply {
                    audience: Audience::AllButSender,
                    packet: Packet::chat(
                        &self.server_name,
                        format!("{} changed their name to {}", old, new),
                    ),
                },
            ],
            log: Some(format!("[Command] {} changed name to {}", old, new)),
            roster_changed: true,
        }
    }
}
