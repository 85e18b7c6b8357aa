//! Bundled packet vocabulary shared by client and server
//!
//! `default_registry` registers these in a fixed order; both peers must use
//! it (or an identical registration sequence) or type codes desynchronize.

use crate::codec::{put_i32, put_str, ByteReader, CodecError};
use crate::packet::{Packet, PacketRegistry};
use std::any::Any;

/// Credentials presented right after connecting. The server stores the
/// resulting authentication flag; policy lives in the packet handler.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoginPacket {
    pub username: String,
    pub password: String,
}

impl LoginPacket {
    pub const NAME: &'static str = "login";
}

impl Packet for LoginPacket {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        put_str(out, &self.username);
        put_str(out, &self.password);
    }

    fn decode_payload(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.username = reader.read_str()?;
        self.password = reader.read_str()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A line of chat. The server overwrites `sender` with the sending client's
/// identifier before broadcasting.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChatPacket {
    pub sender: String,
    pub message: String,
}

impl ChatPacket {
    pub const NAME: &'static str = "chat";

    pub fn new(sender: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            message: message.into(),
        }
    }
}

impl Packet for ChatPacket {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        put_str(out, &self.sender);
        put_str(out, &self.message);
    }

    fn decode_payload(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.sender = reader.read_str()?;
        self.message = reader.read_str()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Liveness probe; the server echoes it back to the sender unchanged.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PingPacket {
    pub nonce: i32,
}

impl PingPacket {
    pub const NAME: &'static str = "ping";
}

impl Packet for PingPacket {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_payload(&self, out: &mut Vec<u8>) {
        put_i32(out, self.nonce);
    }

    fn decode_payload(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError> {
        self.nonce = reader.read_i32()?;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registry with the bundled types in their canonical order: login = 1,
/// chat = 2, ping = 3 (0 is the empty sentinel).
pub fn default_registry() -> PacketRegistry {
    let mut registry = PacketRegistry::new();
    registry.register::<LoginPacket>();
    registry.register::<ChatPacket>();
    registry.register::<PingPacket>();
    registry
}
