//! Protocol commands carried in the header `command` field.

use serde::{Deserialize, Serialize};

/// The command of a protocol message.
///
/// Only the commands a client participates in are defined; the replica group
/// uses further command values internally, and a client drops anything it
/// does not recognize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum Command {
    /// The invalid zero command.
    Reserved = 0,

    /// Client → All replicas: liveness probe, also carries our view.
    PingClient = 1,

    /// Replica → Client: ping response with the replica's current view.
    PongClient = 2,

    /// Client → Primary: an operation to execute.
    Request = 3,

    /// Primary → Client: the committed result of a request.
    Reply = 4,

    /// Primary → Client: this session has been evicted. Fatal.
    Eviction = 5,
}

impl Command {
    /// Returns the wire encoding of this command.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Parses a command from its wire encoding.
    pub fn from_u16(word: u16) -> Option<Self> {
        match word {
            0 => Some(Command::Reserved),
            1 => Some(Command::PingClient),
            2 => Some(Command::PongClient),
            3 => Some(Command::Request),
            4 => Some(Command::Reply),
            5 => Some(Command::Eviction),
            _ => None,
        }
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::Reserved => "reserved",
            Command::PingClient => "ping_client",
            Command::PongClient => "pong_client",
            Command::Request => "request",
            Command::Reply => "reply",
            Command::Eviction => "eviction",
        };
        write!(f, "{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_wire_roundtrip() {
        for command in [
            Command::Reserved,
            Command::PingClient,
            Command::PongClient,
            Command::Request,
            Command::Reply,
            Command::Eviction,
        ] {
            assert_eq!(Command::from_u16(command.as_u16()), Some(command));
        }
    }

    #[test]
    fn unknown_command_rejected() {
        assert_eq!(Command::from_u16(6), None);
        assert_eq!(Command::from_u16(u16::MAX), None);
    }
}
