//! Self-describing packets and the registry that dispatches them
//!
//! A packet serializes to a 4-byte little-endian type code followed by its
//! type-specific payload. Codes are assigned sequentially at registration
//! time, so both peers must register the same types in the same order —
//! registration order is effectively the protocol version. Code 0 is always
//! the empty/unknown sentinel, which callers treat as a no-op rather than an
//! error.

use crate::codec::{put_i32, ByteReader, CodecError};
use log::debug;
use std::any::Any;
use std::collections::HashMap;

/// A typed message that knows how to serialize its own payload.
///
/// `decode_payload` failures are soft: the registry resolves them to the
/// empty-packet sentinel instead of propagating an error.
pub trait Packet: Send + Sync {
    /// Stable name used for code assignment at registration time.
    fn type_name(&self) -> &'static str;

    /// Appends the type-specific payload. Must be deterministic for the
    /// packet's current field values.
    fn encode_payload(&self, out: &mut Vec<u8>);

    /// Parses the payload from the reader, mutating own fields.
    fn decode_payload(&mut self, reader: &mut ByteReader<'_>) -> Result<(), CodecError>;

    /// Downcast support for packet handlers.
    fn as_any(&self) -> &dyn Any;
}

/// Sentinel for unknown or malformed packets, always registered at code 0.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EmptyPacket;

impl EmptyPacket {
    pub const NAME: &'static str = "empty";
}

impl Packet for EmptyPacket {
    fn type_name(&self) -> &'static str {
        Self::NAME
    }

    fn encode_payload(&self, _out: &mut Vec<u8>) {}

    fn decode_payload(&mut self, _reader: &mut ByteReader<'_>) -> Result<(), CodecError> {
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Returns true if the packet is the unknown/empty sentinel.
pub fn is_empty_packet(packet: &dyn Packet) -> bool {
    packet.type_name() == EmptyPacket::NAME
}

type Factory = fn() -> Box<dyn Packet>;

fn make<P: Packet + Default + 'static>() -> Box<dyn Packet> {
    Box::new(P::default())
}

struct Registration {
    name: &'static str,
    factory: Factory,
}

/// Bidirectional mapping between packet type names and sequential integer
/// type codes, plus a constructor per registered type.
pub struct PacketRegistry {
    codes: HashMap<&'static str, i32>,
    entries: Vec<Registration>,
}

impl PacketRegistry {
    /// Creates a registry with the empty packet pre-registered at code 0.
    pub fn new() -> Self {
        let mut registry = Self {
            codes: HashMap::new(),
            entries: Vec::new(),
        };
        registry.register::<EmptyPacket>();
        registry
    }

    /// Registers a packet type under the next sequential code and returns
    /// that code. Registering the same type name again just returns the
    /// existing code.
    pub fn register<P: Packet + Default + 'static>(&mut self) -> i32 {
        let name = P::default().type_name();
        if let Some(&code) = self.codes.get(name) {
            return code;
        }

        let code = self.entries.len() as i32;
        self.codes.insert(name, code);
        self.entries.push(Registration {
            name,
            factory: make::<P>,
        });
        code
    }

    /// Code assigned to a type name, if registered.
    pub fn code(&self, name: &str) -> Option<i32> {
        self.codes.get(name).copied()
    }

    /// Type name registered for a code, if any.
    pub fn name(&self, code: i32) -> Option<&'static str> {
        usize::try_from(code)
            .ok()
            .and_then(|index| self.entries.get(index))
            .map(|entry| entry.name)
    }

    /// Number of registered types, including the empty sentinel.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serializes a packet as its type code followed by its payload.
    pub fn encode(&self, packet: &dyn Packet) -> Result<Vec<u8>, CodecError> {
        let code = self
            .code(packet.type_name())
            .ok_or_else(|| CodecError::UnknownType(packet.type_name().to_string()))?;

        let mut out = Vec::new();
        put_i32(&mut out, code);
        packet.encode_payload(&mut out);
        Ok(out)
    }

    /// Builds a typed packet from a raw buffer. An unknown code, truncated
    /// header, or payload parse failure resolves to the empty sentinel.
    pub fn decode(&self, bytes: &[u8]) -> Box<dyn Packet> {
        let mut reader = ByteReader::new(bytes);

        let code = match reader.read_i32() {
            Ok(code) => code,
            Err(e) => {
                debug!("packet header too short: {}", e);
                return Box::new(EmptyPacket);
            }
        };

        let entry = match usize::try_from(code).ok().and_then(|i| self.entries.get(i)) {
            Some(entry) => entry,
            None => {
                debug!("unknown packet type code {}", code);
                return Box::new(EmptyPacket);
            }
        };

        let mut packet = (entry.factory)();
        match packet.decode_payload(&mut reader) {
            Ok(()) => packet,
            Err(e) => {
                debug!("malformed \"{}\" packet: {}", entry.name, e);
                Box::new(EmptyPacket)
            }
        }
    }
}

impl Default for PacketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
