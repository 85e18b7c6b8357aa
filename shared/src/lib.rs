//! Wire-level networking shared by the client and server crates
//!
//! Layers, bottom up: fixed-width field encoding and a cursor reader
//! ([`codec`]), length-prefixed message framing ([`framing`]), typed packets
//! and the code registry ([`packet`], [`packets`]), and the per-connection
//! handle with its read/write loops ([`connection`]).

pub mod codec;
pub mod connection;
pub mod framing;
pub mod packet;
pub mod packets;

pub use codec::{ByteReader, CodecError};
pub use connection::{Connection, ConnectionEvent};
pub use framing::{read_frame, write_frame, MAX_FRAME_LEN};
pub use packet::{is_empty_packet, EmptyPacket, Packet, PacketRegistry};
pub use packets::{default_registry, ChatPacket, LoginPacket, PingPacket};

/// Protocol version implied by the default registration order. Bump when
/// `default_registry` changes.
pub const PROTOCOL_VERSION: u32 = 1;
